use anyhow::Result;
use colored::*;
use runbook_core::configs::workspace::WORKSPACE_FILE;
use runbook_core::runbook::Runbook;

pub fn execute(runbook: &Runbook, json: bool) -> Result<()> {
    let tasks = runbook.list();

    if json {
        println!("{}", serde_json::to_string_pretty(&tasks)?);
        return Ok(());
    }

    println!("{}", format!("Tasks in {}", runbook.name()).bold().underline());
    if tasks.is_empty() {
        println!("  {}", "No tasks found".dimmed());
        return Ok(());
    }

    let width = tasks.iter().map(|task| task.name.len()).max().unwrap_or(0);
    for task in &tasks {
        let name = format!("{:width$}", task.name, width = width);
        let mut line = format!("  {}  {}", name.blue().bold(), task.description);
        if !task.dependencies.is_empty() {
            let after = format!("(after {})", task.dependencies.join(", "));
            line.push_str(&format!(" {}", after.dimmed()));
        }
        if !task.builtin {
            line.push_str(&format!(" {}", format!("[{}]", WORKSPACE_FILE).cyan()));
        }
        println!("{}", line);
    }

    Ok(())
}
