//! Full sync command implementation.

use super::{describe, Target};
use crate::error::CliResult;
use crate::Format;

/// Runs the full synchronization sequence. Returns the overall result.
pub fn run(target: &Target, format: Format) -> CliResult<bool> {
    let session = target.open()?;
    let report = session.coordinator.run_full_sync()?;

    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        Format::Text => {
            println!("Full sync");
            println!("=========");
            for step in &report.steps {
                println!("  {:<20} {}", step.step.as_str(), describe(&step.report));
            }
            println!();
            println!("Remote available: {}", yes_no(report.remote_available));
            println!("Overall:          {}", if report.overall { "ok" } else { "failed" });
            println!("Duration:         {} ms", report.duration_ms);
        }
    }
    Ok(report.overall)
}

pub(crate) fn yes_no(value: bool) -> &'static str {
    if value {
        "yes"
    } else {
        "no"
    }
}
