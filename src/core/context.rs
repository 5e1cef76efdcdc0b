//! Invocation context - everything a run needs besides the pipeline itself

use crate::core::{
    artifact::{Digest, ImageReference, ImageTag},
    config::{ConfigError, Settings, UNKNOWN_REVISION},
    tier::{TestTier, TriggerKind},
};
use crate::credentials::RegistryCredentials;
use crate::execution::cancel::CancelSignal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// The three lineage references of the image family
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSet {
    /// `latest` (`IMAGE_DEV`)
    pub dev: ImageReference,
    pub rc: ImageReference,
    pub prod: ImageReference,
}

impl ImageSet {
    /// Registry reference for a lineage tag
    pub fn reference(&self, tag: &ImageTag) -> ImageReference {
        match tag {
            ImageTag::Rc => self.rc.clone(),
            ImageTag::Latest => self.dev.clone(),
            ImageTag::Prod => self.prod.clone(),
            ImageTag::Pinned(pinned) if pinned.starts_with("prod-") => self.prod.with_tag(tag),
            ImageTag::Pinned(_) => self.rc.with_tag(tag),
        }
    }
}

/// A digest that passed a test tier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualificationRecord {
    pub digest: Digest,
    pub tier: TestTier,
    pub revision: String,
    pub recorded_at: DateTime<Utc>,
}

/// Qualification records visible to one invocation
#[derive(Debug, Clone, Default)]
pub struct QualificationLedger {
    records: Vec<QualificationRecord>,
    seeded: usize,
}

impl QualificationLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ledger preloaded with records from earlier invocations
    pub fn seeded(records: Vec<QualificationRecord>) -> Self {
        let seeded = records.len();
        Self { records, seeded }
    }

    /// Record that `digest` passed `tier`
    pub fn record(&mut self, digest: Digest, tier: TestTier, revision: &str) {
        let known = self
            .records
            .iter()
            .any(|r| r.digest == digest && r.tier == tier && r.revision == revision);
        if known {
            return;
        }
        self.records.push(QualificationRecord {
            digest,
            tier,
            revision: revision.to_string(),
            recorded_at: Utc::now(),
        });
    }

    /// Tiers a digest has passed
    pub fn passed(&self, digest: &Digest) -> BTreeSet<TestTier> {
        self.records
            .iter()
            .filter(|r| &r.digest == digest)
            .map(|r| r.tier)
            .collect()
    }

    /// Ok if the digest passed every required tier, else the missing ones
    pub fn check(&self, digest: &Digest, required: &[TestTier]) -> Result<(), Vec<TestTier>> {
        let passed = self.passed(digest);
        let missing: Vec<TestTier> = required
            .iter()
            .filter(|tier| !passed.contains(tier))
            .copied()
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(missing)
        }
    }

    /// Records added during this invocation
    pub fn new_records(&self) -> &[QualificationRecord] {
        &self.records[self.seeded..]
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Per-invocation state replacing the Makefile globals
#[derive(Debug, Clone)]
pub struct InvocationContext {
    pub settings: Settings,

    pub images: ImageSet,

    /// `IMAGE` override for builds and in-container runs
    pub image_override: Option<ImageReference>,

    /// Source revision the rc is built from
    pub revision: String,

    pub trigger: TriggerKind,

    /// Extra test runner arguments
    pub opts: Vec<String>,

    /// Extra environment passed into containers
    pub env: BTreeMap<String, String>,

    /// Rebuild rc even when the revision was already built
    pub force_rebuild: bool,

    /// Skip the qualification check on promotion
    pub assume_qualified: bool,

    /// Resolved before any registry stage runs
    pub credentials: Option<RegistryCredentials>,

    pub ledger: QualificationLedger,

    pub cancel: CancelSignal,
}

impl InvocationContext {
    pub fn new(settings: Settings, trigger: TriggerKind) -> Result<Self, ConfigError> {
        let images = settings.images()?;
        let image_override = settings.image_override()?;
        let revision = settings.revision();
        let opts = settings.opts.clone();

        Ok(Self {
            settings,
            images,
            image_override,
            revision,
            trigger,
            opts,
            env: BTreeMap::new(),
            force_rebuild: false,
            assume_qualified: false,
            credentials: None,
            ledger: QualificationLedger::new(),
            cancel: CancelSignal::new(),
        })
    }

    /// Whether builds and promotions carry a revision-pinned tag
    pub fn pins_revision(&self) -> bool {
        self.revision != UNKNOWN_REVISION
    }

    /// Registry reference of a lineage tag
    pub fn reference(&self, tag: &ImageTag) -> ImageReference {
        self.images.reference(tag)
    }

    /// Reference a build or in-container run acts on; `IMAGE` wins when set
    pub fn working_reference(&self, tag: &ImageTag) -> ImageReference {
        match (&self.image_override, tag) {
            (Some(image), ImageTag::Rc | ImageTag::Latest | ImageTag::Prod) => image.clone(),
            _ => self.images.reference(tag),
        }
    }

    /// Human-readable setup report
    pub fn describe(&self) -> String {
        let mut lines = vec![
            format!("revision: {}", self.revision),
            format!("trigger: {}", self.trigger),
            format!("IMAGE_DEV: {}", self.images.dev),
            format!("IMAGE_RC: {}", self.images.rc),
            format!("IMAGE_PROD: {}", self.images.prod),
        ];
        if let Some(image) = &self.image_override {
            lines.push(format!("IMAGE: {}", image));
        }
        lines.push(format!("docker: {}", self.settings.docker));
        lines.push(format!("test command: {}", self.settings.test_command.join(" ")));
        if !self.opts.is_empty() {
            lines.push(format!("OPTS: {}", self.opts.join(" ")));
        }
        lines.push(format!(
            "registry credentials: {}",
            if self.credentials.is_some() { "resolved" } else { "not resolved" }
        ));
        lines.join("\n")
    }
}
