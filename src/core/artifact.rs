//! Image artifacts: references, tags, digests and promotion lineage

use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;
use thiserror::Error;

/// Number of revision characters used in pinned tags (`rc-<rev12>`)
pub const PINNED_REVISION_LEN: usize = 12;

/// Errors raised while parsing or promoting artifacts
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ArtifactError {
    #[error("invalid image reference '{0}'")]
    InvalidReference(String),

    #[error("invalid image tag '{0}'")]
    InvalidTag(String),

    #[error("invalid digest '{0}'")]
    InvalidDigest(String),

    #[error("cannot promote {from} to {to}")]
    InvalidLineage { from: ImageTag, to: ImageTag },
}

fn tag_regex() -> &'static Regex {
    static TAG: OnceLock<Regex> = OnceLock::new();
    TAG.get_or_init(|| Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9_.-]{0,127}$").expect("valid tag regex"))
}

fn digest_regex() -> &'static Regex {
    static DIGEST: OnceLock<Regex> = OnceLock::new();
    DIGEST.get_or_init(|| Regex::new(r"^[a-z0-9]+:[0-9a-f]{32,}$").expect("valid digest regex"))
}

/// Tag of an image within its lineage
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageTag {
    /// Release candidate, pending qualification
    Rc,
    /// Convenience tag for the last qualified rc (`IMAGE_DEV`)
    Latest,
    /// Production image
    Prod,
    /// Immutable, revision-pinned tag (`rc-<rev>`, `prod-<rev>`)
    Pinned(String),
}

impl ImageTag {
    /// Pinned rc tag for a source revision
    pub fn rc_pinned(revision: &str) -> Self {
        ImageTag::Pinned(format!("rc-{}", short_revision(revision)))
    }

    /// Pinned prod tag for a source revision
    pub fn prod_pinned(revision: &str) -> Self {
        ImageTag::Pinned(format!("prod-{}", short_revision(revision)))
    }

    pub fn as_str(&self) -> &str {
        match self {
            ImageTag::Rc => "rc",
            ImageTag::Latest => "latest",
            ImageTag::Prod => "prod",
            ImageTag::Pinned(tag) => tag,
        }
    }

    /// Whether a tag of this kind may be derived from `self` by re-tagging
    pub fn can_promote_to(&self, to: &ImageTag) -> bool {
        matches!(
            (self, to),
            (ImageTag::Rc, ImageTag::Latest)
                | (ImageTag::Rc, ImageTag::Prod)
                | (ImageTag::Rc, ImageTag::Pinned(_))
                | (ImageTag::Prod, ImageTag::Pinned(_))
        )
    }
}

impl fmt::Display for ImageTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ImageTag {
    type Err = ArtifactError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "rc" => Ok(ImageTag::Rc),
            "latest" => Ok(ImageTag::Latest),
            "prod" => Ok(ImageTag::Prod),
            other if tag_regex().is_match(other) => Ok(ImageTag::Pinned(other.to_string())),
            other => Err(ArtifactError::InvalidTag(other.to_string())),
        }
    }
}

/// Truncate a revision hash for use in tags
pub fn short_revision(revision: &str) -> &str {
    match revision.char_indices().nth(PINNED_REVISION_LEN) {
        Some((idx, _)) => &revision[..idx],
        None => revision,
    }
}

/// Immutable content identifier of a built image
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Digest(String);

impl Digest {
    pub fn parse(value: &str) -> Result<Self, ArtifactError> {
        let value = value.trim();
        if digest_regex().is_match(value) {
            Ok(Digest(value.to_string()))
        } else {
            Err(ArtifactError::InvalidDigest(value.to_string()))
        }
    }

    /// Content digest of arbitrary bytes
    pub fn sha256(content: &[u8]) -> Self {
        Digest(format!("sha256:{}", hex::encode(Sha256::digest(content))))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Abbreviated form for display (`sha256:0123456789ab`)
    pub fn short(&self) -> &str {
        let cut = self.0.find(':').map(|i| i + 13).unwrap_or(12);
        if self.0.len() > cut {
            &self.0[..cut]
        } else {
            &self.0
        }
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Digest {
    type Error = ArtifactError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Digest::parse(&value)
    }
}

impl From<Digest> for String {
    fn from(digest: Digest) -> Self {
        digest.0
    }
}

/// A fully qualified `repository:tag` reference
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageReference {
    pub repository: String,
    pub tag: String,
}

impl ImageReference {
    pub fn new(repository: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            repository: repository.into(),
            tag: tag.into(),
        }
    }

    /// Parse `registry/path/name:tag`. A missing tag defaults to `latest`.
    pub fn parse(value: &str) -> Result<Self, ArtifactError> {
        let value = value.trim();
        if value.is_empty() || value.contains(char::is_whitespace) || value.contains('@') {
            return Err(ArtifactError::InvalidReference(value.to_string()));
        }

        // A colon before the last slash belongs to a registry port
        let last_slash = value.rfind('/').map(|i| i + 1).unwrap_or(0);
        let (repository, tag) = match value[last_slash..].rfind(':') {
            Some(pos) => {
                let split = last_slash + pos;
                (&value[..split], &value[split + 1..])
            }
            None => (value, "latest"),
        };

        if repository.is_empty() || repository.ends_with('/') {
            return Err(ArtifactError::InvalidReference(value.to_string()));
        }
        if !tag_regex().is_match(tag) {
            return Err(ArtifactError::InvalidTag(tag.to_string()));
        }

        Ok(Self::new(repository, tag))
    }

    /// Registry host part of the repository, if it has one
    pub fn registry(&self) -> Option<&str> {
        let (first, rest) = self.repository.split_once('/')?;
        if rest.is_empty() {
            return None;
        }
        if first.contains('.') || first.contains(':') || first == "localhost" {
            Some(first)
        } else {
            None
        }
    }

    /// Same repository, different tag
    pub fn with_tag(&self, tag: &ImageTag) -> Self {
        Self::new(self.repository.clone(), tag.as_str())
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.repository, self.tag)
    }
}

impl FromStr for ImageReference {
    type Err = ArtifactError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ImageReference::parse(s)
    }
}

/// An image variant the pipeline acts upon
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    /// Logical image family (repository)
    pub name: String,

    /// Lineage tag
    pub tag: ImageTag,

    /// Immutable build identifier, once known
    pub digest: Option<Digest>,
}

impl ArtifactRef {
    pub fn new(name: impl Into<String>, tag: ImageTag) -> Self {
        Self {
            name: name.into(),
            tag,
            digest: None,
        }
    }

    pub fn with_digest(mut self, digest: Digest) -> Self {
        self.digest = Some(digest);
        self
    }

    /// Derive a new tag pointing at the same digest.
    ///
    /// Promotion never rebuilds: the returned ref carries this ref's digest,
    /// and `self` is left untouched.
    pub fn promote(&self, to: ImageTag) -> Result<ArtifactRef, ArtifactError> {
        if !self.tag.can_promote_to(&to) {
            return Err(ArtifactError::InvalidLineage {
                from: self.tag.clone(),
                to,
            });
        }
        Ok(ArtifactRef {
            name: self.name.clone(),
            tag: to,
            digest: self.digest.clone(),
        })
    }
}

impl fmt::Display for ArtifactRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.digest {
            Some(digest) => write!(f, "{}:{} ({})", self.name, self.tag, digest.short()),
            None => write!(f, "{}:{}", self.name, self.tag),
        }
    }
}
