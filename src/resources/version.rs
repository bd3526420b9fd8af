//! Version-gated behavior
//!
//! Every version comparison made during composition lives here. The declared
//! version is parsed once and resolved into [`BehaviorFlags`], which is then
//! threaded through the pod composer and the sidecar factory.

use k8s_openapi::api::core::v1::{Capabilities, PodSecurityContext, SecurityContext};
use semver::{BuildMetadata, Version};

use crate::controller::error::{Error, Result};

/// First version whose image runs as a non-root user with a restricted profile
pub const DEFAULT_SECURITY_CONTEXT_MIN_VERSION: Version = Version::new(7, 10, 0);

/// First version supporting a read-only root filesystem
pub const WRITABLE_VOLUMES_MIN_VERSION: Version = Version::new(8, 0, 0);

/// Readiness probe path component, relative to the base path
pub const PROBE_PATH: &str = "/login";

/// Group owning the mounted volumes
pub const DEFAULT_FS_GROUP: i64 = 1000;

/// Parse a declared version string
pub fn parse_version(version: &str) -> Result<Version> {
    Version::parse(version.trim()).map_err(|source| Error::VersionParse {
        version: version.to_string(),
        source,
    })
}

/// Version without build metadata, usable as a label value or image tag
pub fn release_tag(version: &Version) -> String {
    let mut release = version.clone();
    release.build = BuildMetadata::EMPTY;
    release.to_string()
}

/// Pre-releases are gated like their release
fn at_least(version: &Version, threshold: &Version) -> bool {
    (version.major, version.minor, version.patch)
        >= (threshold.major, threshold.minor, threshold.patch)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BehaviorFlags {
    /// Apply the restrictive container and pod security context
    pub default_security_context: bool,
    /// Mount writable tmp and plugins volumes, root filesystem read-only
    pub writable_volumes: bool,
    pub probe_path: &'static str,
}

impl BehaviorFlags {
    pub fn resolve(version: &Version) -> Self {
        Self {
            default_security_context: at_least(version, &DEFAULT_SECURITY_CONTEXT_MIN_VERSION),
            writable_volumes: at_least(version, &WRITABLE_VOLUMES_MIN_VERSION),
            probe_path: PROBE_PATH,
        }
    }

    /// Drop the default security context, whatever the version
    pub fn without_security_context(self) -> Self {
        Self {
            default_security_context: false,
            ..self
        }
    }

    /// Security context applied to every container when enabled
    pub fn container_security_context(&self) -> Option<SecurityContext> {
        if !self.default_security_context {
            return None;
        }
        Some(SecurityContext {
            allow_privilege_escalation: Some(false),
            capabilities: Some(Capabilities {
                drop: Some(vec!["ALL".to_string()]),
                ..Default::default()
            }),
            privileged: Some(false),
            read_only_root_filesystem: Some(self.writable_volumes),
            run_as_non_root: Some(true),
            ..Default::default()
        })
    }

    pub fn pod_security_context(&self) -> Option<PodSecurityContext> {
        if !self.default_security_context {
            return None;
        }
        Some(PodSecurityContext {
            fs_group: Some(DEFAULT_FS_GROUP),
            ..Default::default()
        })
    }
}
