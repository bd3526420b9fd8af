//! Error types for pod template composition

use std::fmt;

use thiserror::Error;

use crate::resources::sidecar::Capability;

/// Composition stage an error surfaced in
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    /// Parsing and gating the declared version
    Version,
    /// Building the sidecar for one monitoring capability
    Sidecar(Capability),
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Version => write!(f, "version"),
            Stage::Sidecar(capability) => write!(f, "{} sidecar", capability),
        }
    }
}

/// Errors raised while composing a pod template.
///
/// Every variant is fatal for the composition call; retries belong to the caller.
#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid version {version:?}: {source}")]
    VersionParse {
        version: String,
        #[source]
        source: semver::Error,
    },

    #[error("credentials unavailable: {0}")]
    CredentialUnavailable(String),

    #[error("trust material unavailable: {0}")]
    TrustMaterialUnavailable(String),

    #[error("template render error: {0}")]
    TemplateRender(#[from] minijinja::Error),

    #[error("composition cancelled")]
    Cancelled,

    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("{stage} stage failed: {source}")]
    Stage {
        stage: Stage,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Attach the composition stage to this error
    pub fn in_stage(self, stage: Stage) -> Self {
        Error::Stage {
            stage,
            source: Box::new(self),
        }
    }

    /// Innermost stage the error was raised in, if any
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Error::Stage { stage, source } => source.stage().or(Some(*stage)),
            _ => None,
        }
    }

    /// The error with all stage context removed
    pub fn root_cause(&self) -> &Error {
        match self {
            Error::Stage { source, .. } => source.root_cause(),
            other => other,
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self.root_cause() {
            Error::KubeError(e) => match e {
                kube::Error::Api(api_err) => {
                    // 4xx errors (except 409 Conflict, 429 TooManyRequests) are usually not retryable
                    let code = api_err.code;
                    if (400..500).contains(&code) {
                        return code == 409 || code == 429;
                    }
                    true
                }
                _ => true,
            },
            // Secrets are created by other controllers and may appear later
            Error::CredentialUnavailable(_) => true,
            Error::TrustMaterialUnavailable(_) => true,
            Error::Cancelled => true,
            Error::VersionParse { .. } => false,
            Error::TemplateRender(_) => false,
            Error::InvalidConfig(_) => false,
            Error::Stage { .. } => false,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
