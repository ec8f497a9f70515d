//! `dockhand images` — List images present on this node.

use chrono::Utc;
use clap::Args;

use super::Context;
use crate::output::{format_age, format_bytes};

/// Arguments for the `images` command.
#[derive(Args, Debug)]
pub struct ImagesArgs {
    /// Only print image references.
    #[arg(short, long)]
    pub quiet: bool,
}

/// Executes the `images` command.
///
/// # Errors
///
/// Returns an error if the catalog cannot be read.
pub fn execute(ctx: &Context, args: &ImagesArgs) -> anyhow::Result<()> {
    let mut records = ctx.manager.records()?;
    records.sort_by_cached_key(|r| r.reference.to_string());

    if args.quiet {
        for record in &records {
            println!("{}", record.reference);
        }
        return Ok(());
    }

    let now = Utc::now();
    println!("{:<60} {:<14} {:>10}  PULLED", "REFERENCE", "DIGEST", "SIZE");
    for record in &records {
        println!(
            "{:<60} {:<14} {:>10}  {}",
            record.reference.to_string(),
            record.digest.short(),
            format_bytes(record.size_bytes),
            format_age(record.pulled_at, now)
        );
    }
    Ok(())
}
