//! `dockhand present` — Report whether an image is present.

use clap::Args;

use super::{Context, parse_reference};

/// Arguments for the `present` command.
#[derive(Args, Debug)]
pub struct PresentArgs {
    /// Image reference to look up.
    pub reference: String,
}

/// Executes the `present` command, printing `true` or `false`.
///
/// # Errors
///
/// Returns an error if the reference is invalid or the catalog cannot be
/// read. Absence is not an error.
pub fn execute(ctx: &Context, args: &PresentArgs) -> anyhow::Result<()> {
    let reference = parse_reference(&args.reference)?;
    println!("{}", ctx.manager.present(&reference)?);
    Ok(())
}
