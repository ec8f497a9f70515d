//! Error taxonomy for image operations.
//!
//! Every failure is classified so callers can decide whether retrying makes
//! sense. The manager itself never retries; see [`crate::retry`].

use std::fmt;
use std::path::Path;

use thiserror::Error;

/// Coarse classification of an [`ImageError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageErrorKind {
    /// Malformed reference, detected locally.
    InvalidReference,
    /// Network or DNS failure reaching the registry host.
    RegistryUnreachable,
    /// The registry reports the repository or tag does not exist.
    ImageNotFound,
    /// The registry refused access to the repository.
    AccessDenied,
    /// Any other registry protocol failure.
    Registry,
    /// The image is not present in the local index.
    NotFoundLocally,
    /// The local index could not be read or written.
    IndexAccessFailure,
    /// The operation was abandoned before it completed.
    Cancelled,
}

impl fmt::Display for ImageErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::InvalidReference => "invalid-reference",
            Self::RegistryUnreachable => "registry-unreachable",
            Self::ImageNotFound => "image-not-found",
            Self::AccessDenied => "access-denied",
            Self::Registry => "registry",
            Self::NotFoundLocally => "not-found-locally",
            Self::IndexAccessFailure => "index-access-failure",
            Self::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Errors produced by the image manager and its collaborators.
///
/// All payloads are owned strings so a single outcome can be handed to
/// every caller waiting on the same pull.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ImageError {
    /// The reference could not be parsed.
    #[error("invalid image reference {reference:?}: {reason}")]
    InvalidReference {
        /// Raw input.
        reference: String,
        /// What is wrong with it.
        reason: String,
    },

    /// The registry host could not be reached.
    #[error("registry {host} unreachable: {message}")]
    RegistryUnreachable {
        /// Registry host name.
        host: String,
        /// Transport-level description.
        message: String,
    },

    /// The registry answered but does not know the image.
    #[error("image not found in registry: {reference}")]
    ImageNotFound {
        /// Normalized reference.
        reference: String,
    },

    /// The registry rejected the request for lack of authorization.
    #[error("access denied to {reference}: {message}")]
    AccessDenied {
        /// Normalized reference.
        reference: String,
        /// Registry-provided detail.
        message: String,
    },

    /// Unexpected registry response.
    #[error("registry error for {reference}: {message}")]
    Registry {
        /// Normalized reference.
        reference: String,
        /// Description of the failure.
        message: String,
        /// Whether a later attempt may succeed (throttling, 5xx).
        transient: bool,
    },

    /// The image is not in the local index.
    #[error("image not present locally: {reference}")]
    NotFoundLocally {
        /// Normalized reference.
        reference: String,
    },

    /// The local index or its catalog file is unusable.
    #[error("image index access failure: {message}")]
    IndexAccessFailure {
        /// Description of the failure.
        message: String,
    },

    /// The caller's deadline passed before the operation finished.
    #[error("pull of {reference} cancelled")]
    Cancelled {
        /// Normalized reference.
        reference: String,
    },
}

impl ImageError {
    /// Returns the classification of this error.
    #[must_use]
    pub const fn kind(&self) -> ImageErrorKind {
        match self {
            Self::InvalidReference { .. } => ImageErrorKind::InvalidReference,
            Self::RegistryUnreachable { .. } => ImageErrorKind::RegistryUnreachable,
            Self::ImageNotFound { .. } => ImageErrorKind::ImageNotFound,
            Self::AccessDenied { .. } => ImageErrorKind::AccessDenied,
            Self::Registry { .. } => ImageErrorKind::Registry,
            Self::NotFoundLocally { .. } => ImageErrorKind::NotFoundLocally,
            Self::IndexAccessFailure { .. } => ImageErrorKind::IndexAccessFailure,
            Self::Cancelled { .. } => ImageErrorKind::Cancelled,
        }
    }

    /// Whether a caller-side retry policy may try again.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::RegistryUnreachable { .. } => true,
            Self::Registry { transient, .. } => *transient,
            _ => false,
        }
    }

    pub(crate) fn invalid_reference(reference: &str, reason: impl Into<String>) -> Self {
        Self::InvalidReference {
            reference: reference.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn index_io(path: &Path, source: &std::io::Error) -> Self {
        Self::IndexAccessFailure {
            message: format!("{}: {source}", path.display()),
        }
    }

    pub(crate) fn poisoned() -> Self {
        Self::IndexAccessFailure {
            message: "index lock poisoned".into(),
        }
    }
}

/// Convenience alias for image operations.
pub type Result<T> = std::result::Result<T, ImageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_network_and_transient_errors_are_retryable() {
        let unreachable = ImageError::RegistryUnreachable {
            host: "foo.com".into(),
            message: "dns error".into(),
        };
        let throttled = ImageError::Registry {
            reference: "docker.io/library/alpine:latest".into(),
            message: "429".into(),
            transient: true,
        };
        let malformed = ImageError::Registry {
            reference: "docker.io/library/alpine:latest".into(),
            message: "bad manifest".into(),
            transient: false,
        };
        let missing = ImageError::ImageNotFound {
            reference: "gcr.io/google_containers/not_exist:latest".into(),
        };

        assert!(unreachable.is_retryable());
        assert!(throttled.is_retryable());
        assert!(!malformed.is_retryable());
        assert!(!missing.is_retryable());
        assert!(!ImageError::invalid_reference("A", "uppercase").is_retryable());
        assert!(!ImageError::poisoned().is_retryable());
    }

    #[test]
    fn unreachable_and_not_found_are_distinguishable() {
        let unreachable = ImageError::RegistryUnreachable {
            host: "foo.com".into(),
            message: "connection refused".into(),
        };
        let missing = ImageError::ImageNotFound {
            reference: "gcr.io/google_containers/not_exist:latest".into(),
        };
        assert_ne!(unreachable.kind(), missing.kind());
    }

    #[test]
    fn display_includes_reference() {
        let err = ImageError::NotFoundLocally {
            reference: "docker.io/library/busybox:1.36".into(),
        };
        assert_eq!(
            err.to_string(),
            "image not present locally: docker.io/library/busybox:1.36"
        );
        assert_eq!(err.kind().to_string(), "not-found-locally");
    }
}
