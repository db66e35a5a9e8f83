use anyhow::Result;
use colored::*;
use runbook_core::runbook::Runbook;

pub async fn execute(runbook: &Runbook, task: &str, args: &[String]) -> Result<()> {
    println!("{} {}", "Running task".bold(), task.cyan());

    // Errors stay typed so main can mirror the exit code
    let report = runbook.run(task, args).await?;

    println!();
    println!(
        "{} {}",
        "✓".green().bold(),
        format!(
            "{} task(s) completed successfully in {:.1}s",
            report.tasks.len(),
            report.result.duration.as_secs_f64()
        )
        .green()
        .bold()
    );

    Ok(())
}
