//! Pipeline domain model

use crate::core::{
    artifact::{ArtifactRef, Digest},
    error::PipelineError,
    stage::{Stage, StageAction},
    state::{PipelineState, StageResult},
    tier::TestTier,
};
use std::collections::HashSet;

/// A named sub-pipeline. Leaf targets have exactly one.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    /// Target the stages come from
    pub target_name: String,

    /// Image the segment acts on
    pub image_ref: ArtifactRef,

    /// Stages in execution order
    pub stages: Vec<Stage>,
}

impl Segment {
    pub fn new(target_name: impl Into<String>, image_ref: ArtifactRef) -> Self {
        Self {
            target_name: target_name.into(),
            image_ref,
            stages: Vec::new(),
        }
    }

    pub fn stage(mut self, stage: Stage) -> Self {
        self.stages.push(stage);
        self
    }

    /// Test tier this segment runs, if any
    pub fn test_tier(&self) -> Option<TestTier> {
        self.stages.iter().find_map(Stage::test_tier)
    }

    fn validate(&self) -> Result<(), PipelineError> {
        let mut seen: HashSet<&str> = HashSet::new();

        for stage in &self.stages {
            for dep in &stage.depends_on {
                if !seen.contains(dep.as_str()) {
                    return Err(PipelineError::Definition(format!(
                        "stage '{}' in '{}' depends on '{}', which does not run before it",
                        stage.name, self.target_name, dep
                    )));
                }
            }

            if let StageAction::Tag { from, to, .. } = &stage.action {
                if !from.can_promote_to(to) {
                    return Err(PipelineError::Definition(format!(
                        "stage '{}' in '{}' re-tags {} as {}, which is not a promotion",
                        stage.name, self.target_name, from, to
                    )));
                }
            }

            if !seen.insert(stage.name.as_str()) {
                return Err(PipelineError::Definition(format!(
                    "duplicate stage '{}' in '{}'",
                    stage.name, self.target_name
                )));
            }
        }

        Ok(())
    }
}

/// A pipeline definition plus its execution record
#[derive(Debug, Clone)]
pub struct Pipeline {
    /// CLI target this pipeline implements
    pub target_name: String,

    /// Sub-pipelines in execution order
    pub segments: Vec<Segment>,

    /// Execution state
    pub state: PipelineState,

    /// Stage results, in execution order
    pub results: Vec<StageResult>,
}

impl Pipeline {
    pub fn new(target_name: impl Into<String>) -> Self {
        Self {
            target_name: target_name.into(),
            segments: Vec::new(),
            state: PipelineState::new(),
            results: Vec::new(),
        }
    }

    /// Leaf pipeline with a single segment named after the target
    pub fn single(segment: Segment) -> Self {
        let mut pipeline = Self::new(segment.target_name.clone());
        pipeline.segments.push(segment);
        pipeline
    }

    /// Composite pipeline: the segments of each part, in order
    pub fn compose(target_name: impl Into<String>, parts: Vec<Pipeline>) -> Self {
        let mut pipeline = Self::new(target_name);
        pipeline.segments = parts.into_iter().flat_map(|p| p.segments).collect();
        pipeline
    }

    /// Check stage ordering, uniqueness and promotion lineage
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.segments.is_empty() {
            return Err(PipelineError::Definition(format!(
                "target '{}' has no stages",
                self.target_name
            )));
        }
        self.segments.iter().try_for_each(Segment::validate)
    }

    /// Total number of stages across segments
    pub fn stage_count(&self) -> usize {
        self.segments.iter().map(|s| s.stages.len()).sum()
    }

    /// All stages with their segment, in execution order
    pub fn stages(&self) -> impl Iterator<Item = (&Segment, &Stage)> {
        self.segments
            .iter()
            .flat_map(|segment| segment.stages.iter().map(move |stage| (segment, stage)))
    }

    /// Whether any stage talks to the registry
    pub fn requires_registry(&self) -> bool {
        self.stages().any(|(_, stage)| stage.action.needs_registry())
    }

    /// Pin a segment's artifact to the digest a stage resolved
    pub fn resolve_artifact(&mut self, segment: &str, digest: Digest) {
        if let Some(segment) = self.segments.iter_mut().find(|s| s.target_name == segment) {
            segment.image_ref.digest = Some(digest);
        }
    }

    /// Last artifact whose digest is known
    pub fn artifact(&self) -> Option<&ArtifactRef> {
        self.segments
            .iter()
            .rev()
            .map(|s| &s.image_ref)
            .find(|image| image.digest.is_some())
    }

    /// Result of a stage within a segment
    pub fn result(&self, segment: &str, stage: &str) -> Option<&StageResult> {
        self.results
            .iter()
            .find(|r| r.target == segment && r.stage_name == stage)
    }

    /// First halting failure
    pub fn first_failure(&self) -> Option<&StageResult> {
        self.results.iter().find(|r| r.is_failure())
    }
}
