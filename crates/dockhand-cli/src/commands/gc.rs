//! `dockhand gc` — Evict the oldest images above a size threshold.

use clap::Args;
use dockhand_image::gc::GcPolicy;

use super::{Context, parse_reference};
use crate::output::format_bytes;

/// Arguments for the `gc` command.
#[derive(Args, Debug)]
pub struct GcArgs {
    /// Total size in bytes above which collection starts.
    #[arg(long, value_name = "BYTES")]
    pub high: u64,

    /// Total size in bytes collection tries to reach.
    #[arg(long, value_name = "BYTES")]
    pub low: u64,

    /// Image that must never be evicted (repeatable).
    #[arg(long = "pin", value_name = "REF")]
    pub pinned: Vec<String>,
}

impl GcArgs {
    fn policy(&self) -> anyhow::Result<GcPolicy> {
        anyhow::ensure!(
            self.low <= self.high,
            "low threshold ({}) exceeds high threshold ({})",
            self.low,
            self.high
        );
        let pinned = self
            .pinned
            .iter()
            .map(|raw| parse_reference(raw))
            .collect::<anyhow::Result<Vec<_>>>()?;
        Ok(GcPolicy {
            high_threshold_bytes: self.high,
            low_threshold_bytes: self.low,
            pinned,
        })
    }
}

/// Executes the `gc` command.
///
/// # Errors
///
/// Returns an error if the thresholds or pins are invalid, or the catalog
/// cannot be updated.
pub fn execute(ctx: &Context, args: &GcArgs) -> anyhow::Result<()> {
    let report = ctx.manager.collect_garbage(&args.policy()?)?;
    for record in &report.removed {
        println!("Evicted: {} ({})", record.reference, format_bytes(record.size_bytes));
    }
    println!(
        "Freed {}, {} remaining",
        format_bytes(report.freed_bytes),
        format_bytes(report.remaining_bytes)
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inverted_thresholds_are_rejected() {
        let args = GcArgs {
            high: 10,
            low: 20,
            pinned: Vec::new(),
        };
        assert!(args.policy().is_err());
    }

    #[test]
    fn pins_are_normalized() {
        let args = GcArgs {
            high: 100,
            low: 50,
            pinned: vec!["pause:3.9".into()],
        };
        let policy = args.policy().unwrap();
        assert_eq!(policy.pinned[0].to_string(), "docker.io/library/pause:3.9");
    }
}
