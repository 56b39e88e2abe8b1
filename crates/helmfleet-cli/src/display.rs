//! Display formatting for batch reports

use console::style;
use helmfleet_kube::{BatchReport, ReplicaStatus};

/// Print one line per replica, then readiness and a summary line
pub fn print_report(report: &BatchReport) {
    for replica in &report.replicas {
        let (mark, label) = match &replica.status {
            ReplicaStatus::Installed => (
                style("✓").green().bold(),
                style("installed".to_string()).green(),
            ),
            ReplicaStatus::Reinstalled => (
                style("✓").green().bold(),
                style("reinstalled".to_string()).green(),
            ),
            ReplicaStatus::Skipped => (
                style("•").dim(),
                style("already installed".to_string()).dim(),
            ),
            ReplicaStatus::Removed => (
                style("✓").green().bold(),
                style("removed".to_string()).green(),
            ),
            ReplicaStatus::Absent => (
                style("•").dim(),
                style("not installed".to_string()).dim(),
            ),
            ReplicaStatus::Failed(message) => {
                (style("✗").red().bold(), style(message.clone()).red())
            }
        };
        println!(
            "  {} [{}] {} in {}: {}",
            mark,
            replica.index,
            style(&replica.release).cyan(),
            style(&replica.namespace).yellow(),
            label
        );
    }

    for (namespace, outcome) in &report.readiness.outcomes {
        if outcome.all_ready {
            println!("  {} {} ready", style("✓").green(), style(namespace).yellow());
        } else {
            let pending: Vec<&str> = outcome.pending.iter().map(String::as_str).collect();
            println!(
                "  {} {} not ready: {}",
                style("✗").red(),
                style(namespace).yellow(),
                pending.join(", ")
            );
        }
    }

    let summary = report.summary();
    let mut parts = Vec::new();
    for (count, label) in [
        (summary.installed, "installed"),
        (summary.skipped, "skipped"),
        (summary.removed, "removed"),
        (summary.absent, "absent"),
        (summary.failed, "failed"),
        (summary.not_ready, "not ready"),
    ] {
        if count > 0 {
            parts.push(format!("{} {}", count, label));
        }
    }
    if parts.is_empty() {
        parts.push("nothing to do".to_string());
    }

    let headline = if report.is_success() {
        style("Done:").green().bold()
    } else {
        style("Finished with errors:").red().bold()
    };
    println!(
        "\n{} {} ({}s)",
        headline,
        parts.join(", "),
        report.duration().num_seconds()
    );
}
