//! `dockhand rmi` — Remove images from this node.

use clap::Args;

use super::{Context, parse_reference};

/// Arguments for the `rmi` command.
#[derive(Args, Debug)]
pub struct RmiArgs {
    /// Image references to remove.
    #[arg(required = true)]
    pub references: Vec<String>,
}

/// Executes the `rmi` command.
///
/// Every reference is parsed before anything is removed; removal stops at
/// the first image that is not present.
///
/// # Errors
///
/// Returns an error if a reference is invalid or an image is absent.
pub fn execute(ctx: &Context, args: &RmiArgs) -> anyhow::Result<()> {
    let references = args
        .references
        .iter()
        .map(|raw| parse_reference(raw))
        .collect::<anyhow::Result<Vec<_>>>()?;

    for reference in &references {
        let record = ctx.manager.remove(reference)?;
        println!("Deleted: {} ({})", record.reference, record.digest);
    }
    Ok(())
}
