//! Status command implementation.

use super::sync::yes_no;
use super::Target;
use crate::error::CliResult;
use crate::Format;

/// Probes the mirror and counts pending records. Returns the probe result.
pub fn run(target: &Target, format: Format) -> CliResult<bool> {
    let session = target.open()?;
    let status = session.coordinator.get_sync_status()?;

    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(&status)?),
        Format::Text => {
            println!("Remote available: {}", yes_no(status.remote_available));
            println!("Pending records:  {}", status.total_pending());
            for (kind, pending) in &status.pending {
                println!("  {:<16} {}", kind.as_str(), pending);
            }
        }
    }
    Ok(status.remote_available)
}
