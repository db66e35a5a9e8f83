use anyhow::Result;
use colored::*;
use runbook_core::runbook::Runbook;

pub fn execute(runbook: &Runbook) -> Result<()> {
    println!("{}", "Task Dependency Graph:".bold().underline());

    let registry = runbook.registry();
    let graph = registry.graph();

    if graph.node_count() == 0 {
        println!("No dependency graph available");
        return Ok(());
    }

    for task in graph.node_weights() {
        if registry.contains(task) {
            println!("{}", task.blue().bold());
        } else {
            println!("{} {}", task.yellow().bold(), "(not registered)".yellow());
        }

        let deps = registry.graph_dependencies(task);
        if !deps.is_empty() {
            println!("  {} {}", "depends on:".dimmed(), deps.join(", "));
        } else {
            println!("  {}", "no dependencies".dimmed());
        }
        println!();
    }

    Ok(())
}
