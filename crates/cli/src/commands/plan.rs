use anyhow::Result;
use colored::*;
use runbook_core::runbook::Runbook;

pub fn execute(runbook: &Runbook, task: &str, args: &[String], json: bool) -> Result<()> {
    let plans = runbook.plan(task, args)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&plans)?);
        return Ok(());
    }

    println!("{} {}", "Execution plan for".bold(), task.cyan());
    println!("\n{}:", "Execution order".bold());
    for (i, plan) in plans.iter().enumerate() {
        println!("  {}. {}", i + 1, plan.task.blue().bold());
        if plan.steps.is_empty() {
            println!("     {}", "nothing to do".dimmed());
        }
        for step in &plan.steps {
            println!("     {}", step);
        }
    }

    Ok(())
}
