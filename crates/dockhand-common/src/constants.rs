//! System-wide constants and default paths.

use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Duration;

/// Default base directory for Dockhand data on Linux with root access.
pub const SYSTEM_DATA_DIR: &str = "/var/lib/dockhand";

/// Returns the data directory, preferring `$HOME/.dockhand` for non-root
/// or non-Linux environments, falling back to `/var/lib/dockhand`.
fn resolve_data_dir() -> PathBuf {
    if let Ok(home) = std::env::var("HOME").or_else(|_| std::env::var("USERPROFILE")) {
        let user_dir = PathBuf::from(home).join(".dockhand");
        if std::fs::create_dir_all(&user_dir).is_ok() {
            return user_dir;
        }
    }
    PathBuf::from(SYSTEM_DATA_DIR)
}

static DATA_DIR: OnceLock<PathBuf> = OnceLock::new();

/// Returns the resolved data directory for this session.
pub fn data_dir() -> &'static PathBuf {
    DATA_DIR.get_or_init(resolve_data_dir)
}

/// Name of the directory under the data dir that holds image metadata.
pub const IMAGES_DIR: &str = "images";

/// File name of the JSON catalog mirroring the image index.
pub const CATALOG_FILE: &str = "catalog.json";

/// Overall deadline for a retried pull. Registry pulls are slow and flaky.
pub const DEFAULT_PULL_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Pause between two attempts of a retried pull.
pub const DEFAULT_PULL_INTERVAL: Duration = Duration::from_secs(15);

/// Timeout applied to a single HTTP request against a registry.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Registry assumed when a reference names none.
pub const DEFAULT_REGISTRY: &str = "docker.io";

/// Host actually serving the `docker.io` registry API.
pub const DOCKER_HUB_API_HOST: &str = "registry-1.docker.io";

/// Namespace prepended to single-component Docker Hub repositories.
pub const OFFICIAL_NAMESPACE: &str = "library";

/// Tag assumed when a reference names neither tag nor digest.
pub const DEFAULT_TAG: &str = "latest";

/// Maximum accepted length of an image reference.
pub const MAX_IMAGE_REF_LEN: usize = 255;

/// Maximum accepted length of a tag.
pub const MAX_TAG_LEN: usize = 128;

/// SHA-256 digest length in hex characters.
pub const SHA256_HEX_LENGTH: usize = 64;
