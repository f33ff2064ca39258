//! Single pass command implementation.

use super::{describe, Target};
use crate::error::CliResult;
use crate::Format;
use lalantsika_sync::SyncStep;
use serde_json::json;

/// Runs one pass. Returns true if it succeeded.
pub fn run(target: &Target, step: &str, format: Format) -> CliResult<bool> {
    let step: SyncStep = step.parse()?;
    let session = target.open()?;
    let report = session.coordinator.run_step(step)?;

    match format {
        Format::Json => {
            let out = json!({ "step": step, "report": report });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        Format::Text => println!("{step}: {}", describe(&report)),
    }
    Ok(report.is_success())
}
