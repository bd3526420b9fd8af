//! Common utilities for Kubernetes resource generation
//!
//! This module provides the names, paths, labels and annotation keys shared
//! by the pod composer and the sidecar factory, together with small builders
//! for the volume types they use.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    EmptyDirVolumeSource, SecretVolumeSource, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::ResourceExt;

use crate::crd::Kibana;

/// API version for the Kibana CRD
pub const API_VERSION: &str = "kibana.k8s.elastic.co/v1";

/// Kind for the Kibana CRD
pub const KIND: &str = "Kibana";

/// Operator field manager name for server-side apply
pub const FIELD_MANAGER: &str = "stack-operator";

/// Name of the main Kibana container
pub const KIBANA_CONTAINER_NAME: &str = "kibana";

/// Name of the init container preparing the Kibana configuration directory
pub const INIT_CONFIG_CONTAINER_NAME: &str = "elastic-internal-init-config";

/// Kibana HTTP port
pub const HTTP_PORT: i32 = 5601;

// Operator-managed kibana.yml, copied into the writable config volume at startup
pub const CONFIG_LOCAL_VOLUME_NAME: &str = "elastic-internal-kibana-config-local";
pub const CONFIG_LOCAL_MOUNT_PATH: &str = "/mnt/elastic-internal/kibana-config-local";
pub const CONFIG_VOLUME_NAME: &str = "elastic-internal-kibana-config";
pub const CONFIG_MOUNT_PATH: &str = "/usr/share/kibana/config";
pub const CONFIG_FILE_NAME: &str = "kibana.yml";

pub const DATA_VOLUME_NAME: &str = "kibana-data";
pub const DATA_MOUNT_PATH: &str = "/usr/share/kibana/data";

/// Kibana log directory, tailed by the Filebeat sidecar
pub const LOGS_VOLUME_NAME: &str = "kibana-logs";
pub const LOGS_MOUNT_PATH: &str = "/usr/share/kibana/logs";

// Writable directories needed once the root filesystem is read-only
pub const TMP_VOLUME_NAME: &str = "temp-volume";
pub const TMP_MOUNT_PATH: &str = "/tmp";
pub const PLUGINS_VOLUME_NAME: &str = "kibana-plugins";
pub const PLUGINS_MOUNT_PATH: &str = "/usr/share/kibana/plugins";

/// CA of the Kibana HTTP certificates, mounted into sidecars when TLS is on
pub const HTTP_CA_VOLUME_NAME: &str = "elastic-internal-kibana-http-ca";
pub const HTTP_CA_MOUNT_PATH: &str = "/mnt/elastic-internal/kibana/http-ca";
pub const CA_FILE_NAME: &str = "ca.crt";

/// Annotation holding the fingerprint of all sidecar configurations
pub const CONFIG_HASH_ANNOTATION: &str = "kibana.k8s.elastic.co/monitoring-config-hash";

/// Hint for log collectors about the log format
pub const LOG_MODULE_ANNOTATION: &str = "co.elastic.logs/module";

pub const NAME_LABEL: &str = "kibana.k8s.elastic.co/name";
pub const VERSION_LABEL: &str = "kibana.k8s.elastic.co/version";
pub const TYPE_LABEL: &str = "common.k8s.elastic.co/type";

/// Built-in user the Metricbeat sidecar authenticates as against Kibana
pub const MONITORING_USER_NAME: &str = "elastic-internal-monitoring";

/// Generate an owner reference for a Kibana
///
/// This ensures that all child resources are properly owned by the Kibana
/// and will be garbage collected when it is deleted.
pub fn owner_reference(kibana: &Kibana) -> OwnerReference {
    OwnerReference {
        api_version: API_VERSION.to_string(),
        kind: KIND.to_string(),
        name: kibana.name_any(),
        uid: kibana.metadata.uid.clone().unwrap_or_default(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

/// Identity labels for all resources belonging to a Kibana
pub fn standard_labels(kibana_name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (NAME_LABEL.to_string(), kibana_name.to_string()),
        (TYPE_LABEL.to_string(), "kibana".to_string()),
        (
            "app.kubernetes.io/managed-by".to_string(),
            FIELD_MANAGER.to_string(),
        ),
    ])
}

/// Namespace of a Kibana, falling back to `default`
pub fn namespace_of(kibana: &Kibana) -> String {
    kibana.namespace().unwrap_or_else(|| "default".to_string())
}

/// Secret holding the operator-managed kibana.yml
pub fn config_secret_name(kibana_name: &str) -> String {
    format!("{}-kb-config", kibana_name)
}

/// Secret holding the public CA of the Kibana HTTP certificates
pub fn http_certs_public_secret_name(kibana_name: &str) -> String {
    format!("{}-kb-http-certs-public", kibana_name)
}

/// Secret holding the password of [`MONITORING_USER_NAME`]
pub fn monitoring_user_secret_name(kibana_name: &str) -> String {
    format!("{}-kb-monitoring-user", kibana_name)
}

/// Secret holding the credentials a beat uses against the monitoring cluster
pub fn beat_user_secret_name(kibana_name: &str, beat: &str) -> String {
    format!("{}-kb-monitoring-{}-user", kibana_name, beat)
}

/// User a beat authenticates as against the monitoring cluster
pub fn beat_user_name(namespace: &str, kibana_name: &str, beat: &str) -> String {
    format!("{}-{}-kb-monitoring-{}-beat-user", namespace, kibana_name, beat)
}

/// Secret holding a beat's rendered configuration
pub fn beat_config_secret_name(kibana_name: &str, beat: &str) -> String {
    format!("{}-kb-monitoring-{}-config", kibana_name, beat)
}

/// HTTP endpoint of an Elasticsearch cluster managed by the operator
pub fn elasticsearch_url(name: &str, namespace: &str) -> String {
    format!("https://{}-es-http.{}.svc:9200", name, namespace)
}

/// Copy of a monitoring cluster's public CA, published in the Kibana namespace
pub fn elasticsearch_ca_secret_name(
    kibana_name: &str,
    es_namespace: &str,
    es_name: &str,
) -> String {
    format!("{}-kb-monitoring-{}-{}-ca", kibana_name, es_namespace, es_name)
}

/// Volume carrying the CA of a monitoring Elasticsearch cluster
pub fn elasticsearch_ca_volume_name(es_namespace: &str, es_name: &str) -> String {
    format!("{}-{}-es-monitoring-ca", es_namespace, es_name)
}

pub fn elasticsearch_ca_mount_path(es_namespace: &str, es_name: &str) -> String {
    format!("/mnt/elastic-internal/es-monitoring/{}/{}/certs", es_namespace, es_name)
}

pub fn empty_dir_volume(name: &str) -> Volume {
    Volume {
        name: name.to_string(),
        empty_dir: Some(EmptyDirVolumeSource::default()),
        ..Default::default()
    }
}

pub fn secret_volume(name: &str, secret_name: &str) -> Volume {
    Volume {
        name: name.to_string(),
        secret: Some(SecretVolumeSource {
            secret_name: Some(secret_name.to_string()),
            optional: Some(false),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn volume_mount(name: &str, mount_path: &str, read_only: bool) -> VolumeMount {
    VolumeMount {
        name: name.to_string(),
        mount_path: mount_path.to_string(),
        read_only: read_only.then_some(true),
        ..Default::default()
    }
}
