pub mod base_path;
pub mod common;
pub mod fingerprint;
pub mod merge;
pub mod pod;
pub mod secret;
pub mod sidecar;
pub mod template;
pub mod version;

pub use base_path::{BasePath, resolve_base_path};
pub use common::{API_VERSION, FIELD_MANAGER, KIND, owner_reference, standard_labels};
pub use fingerprint::ConfigFingerprint;
pub use merge::{
    FieldMerge, NamedItem, merge_by_name, merge_containers, merge_maps, merge_missing,
    merge_missing_mounts, merge_mounts,
};
pub use pod::{
    ComposedPodTemplate, KeystoreResources, compose_pod_template,
    compose_pod_template_with_keystore,
};
pub use secret::{
    CredentialKey, CredentialSource, Credentials, StaticCredentials, StaticTrustMaterial,
    TrustKey, TrustMaterialSource, TrustVolume,
};
pub use sidecar::{
    Capability, SidecarSpec, build_sidecar, enabled_capabilities, log_to_file_settings,
};
pub use template::TemplateRenderer;
pub use version::{BehaviorFlags, parse_version, release_tag};
