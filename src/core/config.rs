//! Invocation settings from defaults, a YAML file and the environment

use crate::core::{
    artifact::{ArtifactError, ImageReference},
    context::ImageSet,
    tier::TestTier,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

/// Revision used when neither `GITHUB_SHA` nor a git checkout names one
pub const UNKNOWN_REVISION: &str = "unknown";

/// Environment variables as a plain map
pub type EnvMap = HashMap<String, String>;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("no image location: set ECR_REPO_BASE_PATH or IMAGE_DEV, IMAGE_RC and IMAGE_PROD")]
    MissingImageLocation,

    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error(transparent)]
    Artifact(#[from] ArtifactError),
}

/// Settings for one invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Registry path images live under (`ECR_REPO_BASE_PATH`)
    pub ecr_repo_base_path: Option<String>,

    /// Image family name under the base path
    pub image_name: String,

    /// Explicit image override for the target (`IMAGE`)
    pub image: Option<String>,

    /// `IMAGE_DEV` (the `latest` reference)
    pub image_dev: Option<String>,

    /// `IMAGE_RC`
    pub image_rc: Option<String>,

    /// `IMAGE_PROD`
    pub image_prod: Option<String>,

    /// Source revision (`GITHUB_SHA`); resolved from git when absent
    pub revision: Option<String>,

    /// Container engine binary
    pub docker: String,

    /// AWS CLI binary, used for registry login
    pub aws: String,

    pub dockerfile: String,

    pub build_context: String,

    pub build_args: BTreeMap<String, String>,

    /// Test runner invoked inside the image
    pub test_command: Vec<String>,

    /// Extra test runner arguments (`OPTS`)
    pub opts: Vec<String>,

    pub build_timeout_secs: u64,

    pub test_timeout_secs: u64,

    /// Timeout for every other stage
    pub stage_timeout_secs: u64,

    /// Retries for push and tag stages
    pub promotion_retries: usize,

    pub retry_delay_ms: u64,

    /// Tiers an rc digest must pass before becoming `latest`
    pub latest_required_tiers: Vec<TestTier>,

    /// Tiers an rc digest must pass before becoming `prod`
    pub prod_required_tiers: Vec<TestTier>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            ecr_repo_base_path: None,
            image_name: "amp_env".to_string(),
            image: None,
            image_dev: None,
            image_rc: None,
            image_prod: None,
            revision: None,
            docker: "docker".to_string(),
            aws: "aws".to_string(),
            dockerfile: "Dockerfile".to_string(),
            build_context: ".".to_string(),
            build_args: BTreeMap::new(),
            test_command: vec!["pytest".to_string()],
            opts: Vec::new(),
            build_timeout_secs: 7200,
            test_timeout_secs: 14400,
            stage_timeout_secs: 1800,
            promotion_retries: 2,
            retry_delay_ms: 5000,
            latest_required_tiers: vec![TestTier::Fast],
            prod_required_tiers: vec![TestTier::Fast],
        }
    }
}

impl Settings {
    /// Defaults, then the optional YAML file, then the environment
    pub fn load(path: Option<&Path>, env: &EnvMap) -> Result<Self, ConfigError> {
        let mut settings = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        settings.apply_env(env);
        settings.validate()?;
        Ok(settings)
    }

    /// Load settings from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&content)
    }

    /// Parse settings from a YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Apply the Makefile-era environment variables
    pub fn apply_env(&mut self, env: &EnvMap) {
        let get = |name: &str| {
            env.get(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        if let Some(value) = get("ECR_REPO_BASE_PATH") {
            self.ecr_repo_base_path = Some(value);
        }
        if let Some(value) = get("IMAGE") {
            self.image = Some(value);
        }
        if let Some(value) = get("IMAGE_DEV") {
            self.image_dev = Some(value);
        }
        if let Some(value) = get("IMAGE_RC") {
            self.image_rc = Some(value);
        }
        if let Some(value) = get("IMAGE_PROD") {
            self.image_prod = Some(value);
        }
        if let Some(value) = get("GITHUB_SHA") {
            self.revision = Some(value);
        }
        if let Some(value) = get("OPTS") {
            self.opts = value.split_whitespace().map(str::to_string).collect();
        }
    }

    /// Validate the settings
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.image_name.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "image_name".to_string(),
                message: "must not be empty".to_string(),
            });
        }
        if self.test_command.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "test_command".to_string(),
                message: "must name a test runner".to_string(),
            });
        }

        for (field, tiers) in [
            ("latest_required_tiers", &self.latest_required_tiers),
            ("prod_required_tiers", &self.prod_required_tiers),
        ] {
            if !tiers.contains(&TestTier::Fast) {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    message: "must include the fast tier".to_string(),
                });
            }
            if tiers.contains(&TestTier::Blank) {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    message: "blank is a smoke check and cannot qualify an image".to_string(),
                });
            }
        }

        if let Some(image) = &self.image {
            ImageReference::parse(image)?;
        }
        self.images()?;

        Ok(())
    }

    /// Resolve the dev/rc/prod references
    pub fn images(&self) -> Result<ImageSet, ConfigError> {
        let repository = self
            .ecr_repo_base_path
            .as_ref()
            .map(|base| format!("{}/{}", base.trim_end_matches('/'), self.image_name));

        let resolve = |explicit: &Option<String>, tag: &str| -> Result<ImageReference, ConfigError> {
            match (explicit, &repository) {
                (Some(value), _) => Ok(ImageReference::parse(value)?),
                (None, Some(repository)) => Ok(ImageReference::new(repository.clone(), tag)),
                (None, None) => Err(ConfigError::MissingImageLocation),
            }
        };

        Ok(ImageSet {
            dev: resolve(&self.image_dev, "latest")?,
            rc: resolve(&self.image_rc, "rc")?,
            prod: resolve(&self.image_prod, "prod")?,
        })
    }

    /// Explicit `IMAGE` override, if any
    pub fn image_override(&self) -> Result<Option<ImageReference>, ConfigError> {
        self.image
            .as_deref()
            .map(ImageReference::parse)
            .transpose()
            .map_err(ConfigError::from)
    }

    /// Fill in the revision from `git rev-parse HEAD` when none is configured
    pub async fn resolve_revision(&mut self) {
        if self.revision.is_some() {
            return;
        }

        let output = Command::new("git")
            .args(["rev-parse", "HEAD"])
            .kill_on_drop(true)
            .output()
            .await;
        let revision = match output {
            Ok(output) if output.status.success() => {
                let revision = String::from_utf8_lossy(&output.stdout).trim().to_string();
                debug!("Resolved revision from git: {}", revision);
                revision
            }
            _ => {
                debug!("No GITHUB_SHA and no git checkout, using '{}' revision", UNKNOWN_REVISION);
                UNKNOWN_REVISION.to_string()
            }
        };
        self.revision = Some(revision);
    }

    /// Configured or resolved revision
    pub fn revision(&self) -> String {
        self.revision
            .clone()
            .unwrap_or_else(|| UNKNOWN_REVISION.to_string())
    }
}
