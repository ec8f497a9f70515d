//! `dockhand inspect` — Print the stored record of an image.

use clap::Args;
use dockhand_image::ImageError;

use super::{Context, parse_reference};

/// Arguments for the `inspect` command.
#[derive(Args, Debug)]
pub struct InspectArgs {
    /// Image reference to inspect.
    pub reference: String,
}

/// Executes the `inspect` command, printing the record as pretty JSON.
///
/// # Errors
///
/// Returns an error if the reference is invalid or the image is absent.
pub fn execute(ctx: &Context, args: &InspectArgs) -> anyhow::Result<()> {
    let reference = parse_reference(&args.reference)?;
    let record = ctx
        .manager
        .inspect(&reference)?
        .ok_or_else(|| ImageError::NotFoundLocally {
            reference: reference.to_string(),
        })?;
    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(())
}
