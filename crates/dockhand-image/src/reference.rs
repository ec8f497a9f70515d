//! Image reference parsing and normalization.
//!
//! References follow the familiar `[registry/]repository[:tag|@digest]`
//! grammar. Parsing always produces the fully-qualified form so that two
//! spellings of the same image (`alpine`, `docker.io/library/alpine:latest`)
//! compare equal.

use std::fmt;
use std::str::FromStr;

use dockhand_common::constants::{
    DEFAULT_REGISTRY, DEFAULT_TAG, MAX_IMAGE_REF_LEN, MAX_TAG_LEN, OFFICIAL_NAMESPACE,
};
use dockhand_common::types::Digest;
use serde::{Deserialize, Serialize};

use crate::error::ImageError;

/// What a reference points at inside its repository.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Target {
    /// A mutable tag such as `latest` or `1.36`.
    Tag(String),
    /// An immutable content digest.
    Digest(Digest),
}

/// A normalized, fully-qualified image reference.
///
/// Tag references and digest references are distinct identities: pulling
/// `alpine@sha256:…` does not make `alpine:latest` present.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ImageReference {
    registry: String,
    repository: String,
    target: Target,
}

impl ImageReference {
    /// Registry host, including the port if one was given.
    #[must_use]
    pub fn registry(&self) -> &str {
        &self.registry
    }

    /// Repository path within the registry.
    #[must_use]
    pub fn repository(&self) -> &str {
        &self.repository
    }

    /// Tag or digest.
    #[must_use]
    pub const fn target(&self) -> &Target {
        &self.target
    }

    /// The tag, if this is a tag reference.
    #[must_use]
    pub fn tag(&self) -> Option<&str> {
        match &self.target {
            Target::Tag(tag) => Some(tag),
            Target::Digest(_) => None,
        }
    }

    /// The digest, if this is a digest reference.
    #[must_use]
    pub const fn digest(&self) -> Option<&Digest> {
        match &self.target {
            Target::Tag(_) => None,
            Target::Digest(digest) => Some(digest),
        }
    }

    /// The tag or digest as it appears in registry API paths.
    #[must_use]
    pub fn target_str(&self) -> String {
        match &self.target {
            Target::Tag(tag) => tag.clone(),
            Target::Digest(digest) => digest.to_string(),
        }
    }

    /// Returns a reference to the same repository pinned to `digest`.
    #[must_use]
    pub fn with_digest(&self, digest: Digest) -> Self {
        Self {
            registry: self.registry.clone(),
            repository: self.repository.clone(),
            target: Target::Digest(digest),
        }
    }
}

impl FromStr for ImageReference {
    type Err = ImageError;

    fn from_str(raw: &str) -> Result<Self, ImageError> {
        if raw.is_empty() {
            return Err(ImageError::invalid_reference(raw, "empty reference"));
        }
        if raw.len() > MAX_IMAGE_REF_LEN {
            return Err(ImageError::invalid_reference(
                raw,
                format!("longer than {MAX_IMAGE_REF_LEN} characters"),
            ));
        }

        let (name, digest) = match raw.split_once('@') {
            Some((name, digest)) => {
                let digest = digest
                    .parse::<Digest>()
                    .map_err(|e| ImageError::invalid_reference(raw, e.to_string()))?;
                (name, Some(digest))
            }
            None => (raw, None),
        };

        let last_slash = name.rfind('/').map_or(0, |i| i + 1);
        let (name, tag) = match name[last_slash..].rfind(':') {
            Some(i) => (&name[..last_slash + i], Some(&name[last_slash + i + 1..])),
            None => (name, None),
        };

        let (registry, remainder) = split_registry(name);
        let repository = if registry == DEFAULT_REGISTRY && !remainder.contains('/') {
            format!("{OFFICIAL_NAMESPACE}/{remainder}")
        } else {
            remainder.to_string()
        };

        if !valid_registry(&registry) {
            return Err(ImageError::invalid_reference(
                raw,
                format!("invalid registry host {registry:?}"),
            ));
        }
        if let Some(component) = repository.split('/').find(|c| !valid_path_component(c)) {
            return Err(ImageError::invalid_reference(
                raw,
                format!("invalid repository component {component:?}"),
            ));
        }

        if let Some(tag) = tag.filter(|t| !valid_tag(t)) {
            return Err(ImageError::invalid_reference(
                raw,
                format!("invalid tag {tag:?}"),
            ));
        }

        // A digest pins the content; any tag next to it is informational.
        let target = match (digest, tag) {
            (Some(digest), _) => Target::Digest(digest),
            (None, Some(tag)) => Target::Tag(tag.to_string()),
            (None, None) => Target::Tag(DEFAULT_TAG.to_string()),
        };

        Ok(Self {
            registry,
            repository,
            target,
        })
    }
}

impl TryFrom<String> for ImageReference {
    type Error = ImageError;

    fn try_from(value: String) -> Result<Self, ImageError> {
        value.parse()
    }
}

impl From<ImageReference> for String {
    fn from(reference: ImageReference) -> Self {
        reference.to_string()
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.target {
            Target::Tag(tag) => write!(f, "{}/{}:{tag}", self.registry, self.repository),
            Target::Digest(digest) => {
                write!(f, "{}/{}@{digest}", self.registry, self.repository)
            }
        }
    }
}

/// Splits the leading registry host off a name, defaulting to Docker Hub.
fn split_registry(name: &str) -> (String, &str) {
    match name.split_once('/') {
        Some((first, rest))
            if first.contains('.') || first.contains(':') || first == "localhost" =>
        {
            let host = first.to_ascii_lowercase();
            if host == "index.docker.io" {
                (DEFAULT_REGISTRY.to_string(), rest)
            } else {
                (host, rest)
            }
        }
        _ => (DEFAULT_REGISTRY.to_string(), name),
    }
}

fn valid_registry(host: &str) -> bool {
    let (name, port) = match host.rsplit_once(':') {
        Some((name, port)) => (name, Some(port)),
        None => (host, None),
    };
    let name_ok = !name.is_empty()
        && name
            .split('.')
            .all(|label| !label.is_empty() && label.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-'));
    let port_ok = port.is_none_or(|p| !p.is_empty() && p.parse::<u16>().is_ok());
    name_ok && port_ok
}

/// Repository components: lowercase alphanumerics joined by `.`, `_`, `__`
/// or runs of `-`.
fn valid_path_component(component: &str) -> bool {
    let bytes = component.as_bytes();
    let is_alnum = |b: u8| b.is_ascii_lowercase() || b.is_ascii_digit();
    if bytes.is_empty() || !is_alnum(bytes[0]) || !is_alnum(bytes[bytes.len() - 1]) {
        return false;
    }

    let mut i = 0;
    while i < bytes.len() {
        if is_alnum(bytes[i]) {
            i += 1;
            continue;
        }
        let start = i;
        while i < bytes.len() && !is_alnum(bytes[i]) {
            i += 1;
        }
        let sep = &component[start..i];
        let ok = sep == "." || sep == "_" || sep == "__" || sep.bytes().all(|b| b == b'-');
        if !ok {
            return false;
        }
    }
    true
}

fn valid_tag(tag: &str) -> bool {
    let mut bytes = tag.bytes();
    let Some(first) = bytes.next() else {
        return false;
    };
    tag.len() <= MAX_TAG_LEN
        && (first.is_ascii_alphanumeric() || first == b'_')
        && bytes.all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'.' | b'-'))
}
