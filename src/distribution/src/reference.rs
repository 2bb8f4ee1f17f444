//! Image reference parsing.
//!
//! Parses references like `ghcr.io/acme/app:1.4` into structured
//! components with docker-style normalization: bare names default to
//! `docker.io` with a `library/` prefix and the `latest` tag.

use std::fmt;

use enclayer_core::error::{EnclayerError, Result};

/// Default registry when none is specified.
const DEFAULT_REGISTRY: &str = "docker.io";

/// Default tag when neither tag nor digest is specified.
const DEFAULT_TAG: &str = "latest";

/// Parsed image reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    /// Registry hostname, possibly with a port (e.g. "ghcr.io").
    pub registry: String,
    /// Repository path (e.g. "acme/app").
    pub repository: String,
    /// Tag (e.g. "latest").
    pub tag: Option<String>,
    /// Digest (e.g. "sha256:ab12...").
    pub digest: Option<String>,
}

impl ImageReference {
    /// Parse a reference string.
    ///
    /// Supported forms:
    /// - `app` → docker.io/library/app:latest
    /// - `app:1.4` → docker.io/library/app:1.4
    /// - `acme/app` → docker.io/acme/app:latest
    /// - `ghcr.io/acme/app:1.4`
    /// - `ghcr.io/acme/app@sha256:ab12...`
    pub fn parse(reference: &str) -> Result<Self> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(EnclayerError::InputMalformed(
                "empty image reference".to_string(),
            ));
        }

        // Split off the digest first.
        let (name_tag, digest) = match reference.rsplit_once('@') {
            Some((head, digest)) => {
                if !digest.contains(':') {
                    return Err(EnclayerError::InputMalformed(format!(
                        "invalid digest in reference '{reference}': expected algorithm:hex"
                    )));
                }
                (head, Some(digest.to_string()))
            }
            None => (reference, None),
        };

        // Split the tag: the last colon after the last slash, unless it
        // looks like a registry port.
        let (name, tag) = match name_tag.rfind('/') {
            Some(slash) => match name_tag[slash + 1..].rfind(':') {
                Some(colon) => {
                    let colon = slash + 1 + colon;
                    (&name_tag[..colon], Some(name_tag[colon + 1..].to_string()))
                }
                None => (name_tag, None),
            },
            None => match name_tag.rfind(':') {
                Some(colon) if name_tag[colon + 1..].chars().all(|c| c.is_ascii_digit()) => {
                    // registry:port with no path would be malformed, but a
                    // bare name:1234 reads as a numeric tagless port; keep
                    // the whole thing as the name.
                    (name_tag, None)
                }
                Some(colon) => (&name_tag[..colon], Some(name_tag[colon + 1..].to_string())),
                None => (name_tag, None),
            },
        };

        let (registry, repository) = split_registry(name)?;

        // Untagged, undigested references default to "latest".
        let tag = match (&tag, &digest) {
            (None, None) => Some(DEFAULT_TAG.to_string()),
            _ => tag,
        };

        Ok(ImageReference {
            registry,
            repository,
            tag,
            digest,
        })
    }

    /// The fully qualified reference string.
    pub fn canonical(&self) -> String {
        let mut s = format!("{}/{}", self.registry, self.repository);
        if let Some(tag) = &self.tag {
            s.push(':');
            s.push_str(tag);
        }
        if let Some(digest) = &self.digest {
            s.push('@');
            s.push_str(digest);
        }
        s
    }

    /// The manifest path component: digest if pinned, else tag.
    pub fn manifest_selector(&self) -> &str {
        if let Some(digest) = &self.digest {
            digest
        } else if let Some(tag) = &self.tag {
            tag
        } else {
            DEFAULT_TAG
        }
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.canonical())
    }
}

/// Split a name into registry and repository. The first path component
/// is a registry when it contains a dot or colon or is "localhost".
fn split_registry(name: &str) -> Result<(String, String)> {
    if let Some((first, rest)) = name.split_once('/') {
        if first.contains('.') || first.contains(':') || first == "localhost" {
            if rest.is_empty() {
                return Err(EnclayerError::InputMalformed(format!(
                    "empty repository in reference '{name}'"
                )));
            }
            return Ok((first.to_string(), rest.to_string()));
        }
    }

    let repository = if name.contains('/') {
        name.to_string()
    } else {
        // Bare names live under library/ on Docker Hub.
        format!("library/{name}")
    };

    Ok((DEFAULT_REGISTRY.to_string(), repository))
}
