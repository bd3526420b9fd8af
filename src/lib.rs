//! Pod template composition for Kibana workloads.
//!
//! [`compose_pod_template`] turns a [`Kibana`] resource into the pod template
//! of its deployment: version-gated defaults, the user's `podTemplate`
//! override and the stack monitoring sidecars, with a fingerprint annotation
//! that changes whenever a sidecar configuration changes.

pub mod controller;
pub mod crd;
pub mod resources;

pub use controller::{ComposerConfig, Context, Error, Result, Stage};
pub use crd::{Kibana, KibanaSpec};
pub use resources::{
    Capability, ComposedPodTemplate, KeystoreResources, compose_pod_template,
    compose_pod_template_with_keystore,
};
