//! Output formatting utilities

use crate::OutputFormat;
use console::style;
use mediafetch_types::{BatchSummary, Placement};
use serde::Serialize;

/// One row of `mediafetch list`
#[derive(Debug, Serialize)]
pub struct ListedResource {
    pub url: String,
    pub file_name: Option<String>,
    pub exists: bool,
}

/// Print the outcome of a batch run
pub fn print_summary(summary: &BatchSummary, format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(summary)?);
        }
        OutputFormat::Human => {
            for report in &summary.reports {
                let name = report
                    .destination
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| report.url.clone());

                match &report.placement {
                    Placement::Moved => println!(
                        "{} {} ({}, {} attempt{})",
                        style("✓").green().bold(),
                        style(&name).cyan(),
                        format_bytes(report.bytes),
                        report.attempts,
                        if report.attempts == 1 { "" } else { "s" }
                    ),
                    Placement::MoveFailed { reason } => println!(
                        "{} {} downloaded but not placed: {}",
                        style("✗").red().bold(),
                        style(&name).cyan(),
                        reason
                    ),
                }
            }

            println!(
                "{} downloaded, {} already present, {} invalid",
                style(summary.downloaded).bold(),
                summary.skipped,
                summary.invalid
            );
            if summary.move_failures > 0 {
                println!(
                    "{} {} file(s) could not be moved into place",
                    style("!").yellow().bold(),
                    summary.move_failures
                );
            }
            if let Some(reason) = &summary.interrupted {
                println!("{} Stopped early: {}", style("○").dim(), reason);
            }
        }
    }
    Ok(())
}

/// Print the files a page links to
pub fn print_listing(listing: &[ListedResource], format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(listing)?);
        }
        OutputFormat::Human => {
            if listing.is_empty() {
                println!("{}", style("No files found").dim());
                return Ok(());
            }
            for item in listing {
                let marker = match (&item.file_name, item.exists) {
                    (None, _) => style("✗").red().bold(),
                    (Some(_), true) => style("✓").green().bold(),
                    (Some(_), false) => style("↓").cyan().bold(),
                };
                println!(
                    "{} {}  {}",
                    marker,
                    item.file_name.as_deref().unwrap_or("<invalid>"),
                    style(&item.url).dim()
                );
            }
        }
    }
    Ok(())
}

/// Format bytes as human-readable
pub fn format_bytes(bytes: u64) -> String {
    human_bytes::human_bytes(bytes as f64)
}
