//! Pipeline error taxonomy

use crate::core::{
    artifact::Digest,
    stage::StageKind,
    state::{FailureCause, StageResult, CANCELLED_EXIT_CODE},
    tier::TestTier,
};
use crate::credentials::CredentialError;
use thiserror::Error;

/// Why a pipeline invocation did not complete
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PipelineError {
    /// Image build or compile error
    #[error("build failed at stage '{stage}': {cause}")]
    Build { stage: String, cause: FailureCause },

    /// A test tier failed
    #[error("qualification failed at stage '{stage}': {cause}")]
    Qualification { stage: String, cause: FailureCause },

    /// Re-tag or push failed; the artifact itself is fine, retry promotion alone
    #[error("promotion failed at stage '{stage}': {cause}")]
    Promotion { stage: String, cause: FailureCause },

    /// Promotion refused because the digest has not passed the required tiers
    #[error("stage '{stage}' refused to promote {digest}: missing {}", tier_list(.missing))]
    NotQualified {
        stage: String,
        digest: Digest,
        missing: Vec<TestTier>,
    },

    /// Any other stage failure
    #[error("stage '{stage}' failed: {cause}")]
    StageFailed { stage: String, cause: FailureCause },

    /// Missing or invalid secrets; raised before any stage runs
    #[error("credential failure: {0}")]
    Credential(#[from] CredentialError),

    #[error("invalid pipeline definition: {0}")]
    Definition(String),

    #[error("pipeline cancelled")]
    Cancelled,
}

fn tier_list(tiers: &[TestTier]) -> String {
    tiers.iter().map(|t| t.name()).collect::<Vec<_>>().join(", ")
}

impl PipelineError {
    /// Classify a failed stage result
    pub fn from_failed_stage(result: &StageResult) -> Self {
        let stage = result.stage_name.clone();
        let cause = result
            .cause
            .clone()
            .unwrap_or_else(|| FailureCause::Engine("unknown failure".to_string()));

        match cause {
            FailureCause::Cancelled => PipelineError::Cancelled,
            FailureCause::NotQualified { digest, missing } => PipelineError::NotQualified {
                stage,
                digest,
                missing,
            },
            FailureCause::MissingCredentials => {
                PipelineError::Credential(CredentialError::Missing("AWS_ACCESS_KEY_ID".to_string()))
            }
            // The registry rejected the secrets
            cause @ FailureCause::ExitStatus(_) if result.kind == StageKind::Login => {
                PipelineError::Credential(CredentialError::Invalid {
                    variable: "AWS_ACCESS_KEY_ID".to_string(),
                    message: format!("registry login at stage '{}' was rejected: {}", stage, cause),
                })
            }
            cause => match result.kind {
                StageKind::Build => PipelineError::Build { stage, cause },
                StageKind::Test => PipelineError::Qualification { stage, cause },
                StageKind::Tag | StageKind::Push => PipelineError::Promotion { stage, cause },
                StageKind::Login | StageKind::Pull | StageKind::Exec => {
                    PipelineError::StageFailed { stage, cause }
                }
            },
        }
    }

    /// Process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            PipelineError::Build { cause, .. }
            | PipelineError::Qualification { cause, .. }
            | PipelineError::Promotion { cause, .. }
            | PipelineError::StageFailed { cause, .. } => cause.exit_code(),
            PipelineError::Cancelled => CANCELLED_EXIT_CODE,
            PipelineError::NotQualified { .. }
            | PipelineError::Credential(_)
            | PipelineError::Definition(_) => 1,
        }
    }

    /// Short category name used in notifications and history
    pub fn category(&self) -> &'static str {
        match self {
            PipelineError::Build { .. } => "BuildFailure",
            PipelineError::Qualification { .. } => "QualificationFailure",
            PipelineError::Promotion { .. } => "PromotionFailure",
            PipelineError::NotQualified { .. } => "NotQualified",
            PipelineError::StageFailed { .. } => "StageFailure",
            PipelineError::Credential(_) => "CredentialFailure",
            PipelineError::Definition(_) => "DefinitionError",
            PipelineError::Cancelled => "Cancelled",
        }
    }
}
