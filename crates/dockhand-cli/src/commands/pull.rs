//! `dockhand pull` — Pull an image from its registry.

use std::time::Duration;

use clap::Args;
use dockhand_image::retry::RetryPolicy;

use super::{Context, parse_reference};
use crate::output::format_bytes;

/// Arguments for the `pull` command.
#[derive(Args, Debug)]
pub struct PullArgs {
    /// Image reference, e.g. `alpine:3.19` or `gcr.io/project/app@sha256:...`.
    pub reference: String,

    /// Retry transient failures until the pull timeout.
    #[arg(long)]
    pub retry: bool,

    /// Overall retry deadline in seconds (defaults to the configured value).
    #[arg(long, requires = "retry", value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Pause between attempts in seconds (defaults to the configured value).
    #[arg(long, requires = "retry", value_name = "SECS")]
    pub interval: Option<u64>,
}

impl PullArgs {
    fn policy(&self, ctx: &Context) -> RetryPolicy {
        if !self.retry {
            return RetryPolicy::once();
        }
        let base = RetryPolicy::from_config(&ctx.config);
        RetryPolicy::new(
            self.timeout.map_or(base.timeout, Duration::from_secs),
            self.interval.map_or(base.interval, Duration::from_secs),
        )
    }
}

/// Executes the `pull` command. Ctrl-C abandons the pull.
///
/// # Errors
///
/// Returns an error if the reference is invalid, the pull fails, or the
/// user interrupts it.
pub async fn execute(ctx: &Context, args: PullArgs) -> anyhow::Result<()> {
    let reference = parse_reference(&args.reference)?;
    let policy = args.policy(ctx);

    let report = tokio::select! {
        report = ctx.manager.pull_with_retry(&reference, &policy) => report?,
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!(reference = %reference, "pull interrupted");
            anyhow::bail!("pull of {reference} interrupted");
        }
    };

    println!(
        "{reference}: {} ({})",
        report.record.digest,
        format_bytes(report.record.size_bytes)
    );
    if report.attempts > 1 {
        tracing::info!(attempts = report.attempts, "pull succeeded after retries");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use dockhand_common::config::DockhandConfig;
    use dockhand_image::registry::InMemoryRegistry;
    use dockhand_image::{ImageIndex, ImageManager};

    use super::*;

    fn context() -> Context {
        let config = DockhandConfig {
            pull_timeout_secs: 120,
            pull_interval_secs: 3,
            ..DockhandConfig::default()
        };
        Context {
            config,
            manager: ImageManager::new(ImageIndex::in_memory(), Arc::new(InMemoryRegistry::new())),
        }
    }

    fn args(retry: bool, timeout: Option<u64>) -> PullArgs {
        PullArgs {
            reference: "alpine".into(),
            retry,
            timeout,
            interval: None,
        }
    }

    #[test]
    fn without_retry_a_single_attempt_is_made() {
        assert_eq!(args(false, None).policy(&context()), RetryPolicy::once());
    }

    #[test]
    fn retry_uses_config_unless_overridden() {
        let ctx = context();
        assert_eq!(
            args(true, None).policy(&ctx),
            RetryPolicy::new(Duration::from_secs(120), Duration::from_secs(3))
        );
        assert_eq!(
            args(true, Some(10)).policy(&ctx),
            RetryPolicy::new(Duration::from_secs(10), Duration::from_secs(3))
        );
    }

    #[tokio::test]
    async fn pulled_image_lands_in_the_index() {
        let registry = Arc::new(InMemoryRegistry::new());
        let reference = parse_reference("alpine").unwrap();
        let _ = registry.publish(&reference, 4096);
        let ctx = Context {
            config: DockhandConfig::default(),
            manager: ImageManager::new(ImageIndex::in_memory(), registry),
        };

        execute(&ctx, args(false, None)).await.unwrap();
        assert!(ctx.manager.present(&reference).unwrap());
    }
}
