pub mod down;
pub mod graph;
pub mod output;
pub mod plan;
pub mod up;
pub mod validate;

use colored::Colorize;
use stratus_cloud::{ActionType, ApplyResult, Plan};

/// Print each pending action with its change marker
pub(crate) fn print_plan(plan: &Plan) {
    for action in &plan.actions {
        let line = format!("{} {}", action.resource_key(), action.description.dimmed());
        match action.action_type {
            ActionType::Create => println!("  {} {}", "+".green().bold(), line),
            ActionType::Update => println!("  {} {}", "~".yellow().bold(), line),
            ActionType::Replace => println!("  {} {}", "±".magenta().bold(), line),
            ActionType::Delete => println!("  {} {}", "-".red().bold(), line),
            ActionType::NoOp => {}
        }
    }
    println!();
    println!("{}", plan.summary().to_string().bold());
}

/// Print the outcome of an apply or destroy and fail when any action failed
pub(crate) fn report(result: &ApplyResult) -> anyhow::Result<()> {
    for failure in &result.failed {
        eprintln!("  {} {}: {}", "✗".red(), failure.action_id, failure.message);
    }
    for skipped in &result.skipped {
        eprintln!(
            "  {} {}: {}",
            "⊘".yellow(),
            skipped.action_id,
            skipped.message
        );
    }
    println!(
        "{} succeeded, {} failed, {} skipped ({} ms)",
        result.succeeded.len(),
        result.failed.len(),
        result.skipped.len(),
        result.duration_ms
    );
    if result.is_success() {
        Ok(())
    } else {
        anyhow::bail!("{}", incomplete_message(result))
    }
}

/// Why a run did not complete, counting skipped actions alongside failures
fn incomplete_message(result: &ApplyResult) -> String {
    format!(
        "not every action completed: {} failed, {} skipped",
        result.failed.len(),
        result.skipped.len()
    )
}
