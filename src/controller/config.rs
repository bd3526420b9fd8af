//! Composer configuration
//!
//! Operator-wide settings that influence the composed pod templates. They are
//! read once at startup and passed to composition through [`Context`].
//!
//! [`Context`]: crate::controller::Context

use semver::Version;

use crate::controller::error::{Error, Result};
use crate::resources::version::release_tag;

/// Container registry prefix for default images
pub const IMAGE_REGISTRY_ENV: &str = "STACK_OPERATOR_IMAGE_REGISTRY";

/// Toggle for the version-gated default security context
pub const SET_DEFAULT_SECURITY_CONTEXT_ENV: &str = "STACK_OPERATOR_SET_DEFAULT_SECURITY_CONTEXT";

/// Default container registry
pub const DEFAULT_IMAGE_REGISTRY: &str = "docker.elastic.co";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ComposerConfig {
    /// Registry used for the Kibana and Beats images
    pub image_registry: String,
    /// Apply the restrictive security context on versions that support it
    pub set_default_security_context: bool,
}

impl Default for ComposerConfig {
    fn default() -> Self {
        Self {
            image_registry: DEFAULT_IMAGE_REGISTRY.to_string(),
            set_default_security_context: true,
        }
    }
}

impl ComposerConfig {
    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(registry) = lookup(IMAGE_REGISTRY_ENV) {
            let registry = registry.trim().trim_end_matches('/');
            if registry.is_empty() {
                return Err(Error::InvalidConfig(format!(
                    "{} must not be empty",
                    IMAGE_REGISTRY_ENV
                )));
            }
            config.image_registry = registry.to_string();
        }

        if let Some(raw) = lookup(SET_DEFAULT_SECURITY_CONTEXT_ENV) {
            config.set_default_security_context =
                raw.trim().to_ascii_lowercase().parse().map_err(|_| {
                    Error::InvalidConfig(format!(
                        "{} must be true or false, got {:?}",
                        SET_DEFAULT_SECURITY_CONTEXT_ENV, raw
                    ))
                })?;
        }

        Ok(config)
    }

    pub fn with_image_registry(mut self, registry: impl Into<String>) -> Self {
        self.image_registry = registry.into();
        self
    }

    pub fn with_default_security_context(mut self, enabled: bool) -> Self {
        self.set_default_security_context = enabled;
        self
    }

    /// Default Kibana image for a version
    pub fn kibana_image(&self, version: &Version) -> String {
        format!("{}/kibana/kibana:{}", self.image_registry, release_tag(version))
    }

    /// Beat image matching the monitored stack version
    pub fn beat_image(&self, beat: &str, version: &Version) -> String {
        format!("{}/beats/{}:{}", self.image_registry, beat, release_tag(version))
    }
}
