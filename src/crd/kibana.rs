use k8s_openapi::api::core::v1::PodTemplateSpec;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Kibana is the Schema for the kibanas API
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, JsonSchema)]
#[kube(
    group = "kibana.k8s.elastic.co",
    version = "v1",
    kind = "Kibana",
    plural = "kibanas",
    shortname = "kb",
    namespaced,
    printcolumn = r#"{"name":"Version", "type":"string", "jsonPath":".spec.version"}"#,
    printcolumn = r#"{"name":"Nodes", "type":"integer", "jsonPath":".spec.count"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct KibanaSpec {
    /// Kibana version (e.g., "8.12.0")
    pub version: String,

    /// Custom container image. Defaults to the official image for `version`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    /// Number of Kibana instances
    #[serde(default = "default_count")]
    pub count: i32,

    /// HTTP layer settings
    #[serde(default)]
    pub http: HttpConfig,

    /// Kibana configuration (kibana.yml), either nested or with dotted keys
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "preserve_unknown_fields")]
    pub config: Option<serde_json::Value>,

    /// Pod template override merged over the operator defaults
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "preserve_unknown_fields")]
    pub pod_template: Option<PodTemplateSpec>,

    /// Stack monitoring sidecars
    #[serde(default)]
    pub monitoring: MonitoringSpec,
}

fn default_count() -> i32 {
    1
}

impl Default for KibanaSpec {
    fn default() -> Self {
        Self {
            version: String::new(),
            image: None,
            count: default_count(),
            http: HttpConfig::default(),
            config: None,
            pod_template: None,
            monitoring: MonitoringSpec::default(),
        }
    }
}

fn preserve_unknown_fields(_: &mut schemars::SchemaGenerator) -> schemars::Schema {
    schemars::json_schema!({
        "type": "object",
        "x-kubernetes-preserve-unknown-fields": true
    })
}

/// HTTP layer settings
#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HttpConfig {
    /// TLS settings for the HTTP layer
    #[serde(default)]
    pub tls: TlsOptions,
}

impl HttpConfig {
    /// TLS is on unless the self-signed certificate is explicitly disabled
    pub fn tls_enabled(&self) -> bool {
        !self
            .tls
            .self_signed_certificate
            .as_ref()
            .is_some_and(|cert| cert.disabled)
    }

    /// URL scheme served by the workload
    pub fn protocol(&self) -> &'static str {
        if self.tls_enabled() { "https" } else { "http" }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TlsOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub self_signed_certificate: Option<SelfSignedCertificate>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SelfSignedCertificate {
    /// Serve plain HTTP instead of TLS
    #[serde(default)]
    pub disabled: bool,
}

/// Stack monitoring configuration
///
/// Each target ships to exactly one monitoring Elasticsearch cluster.
#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MonitoringSpec {
    /// Ship Kibana metrics with a Metricbeat sidecar
    #[serde(default)]
    pub metrics: MonitoringTarget,

    /// Ship Kibana logs with a Filebeat sidecar
    #[serde(default)]
    pub logs: MonitoringTarget,
}

impl MonitoringSpec {
    pub fn is_metrics_defined(&self) -> bool {
        !self.metrics.elasticsearch_refs.is_empty()
    }

    pub fn is_logs_defined(&self) -> bool {
        !self.logs.elasticsearch_refs.is_empty()
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MonitoringTarget {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub elasticsearch_refs: Vec<ObjectSelector>,
}

/// Reference to another resource, defaulting to the referrer's namespace
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ObjectSelector {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl ObjectSelector {
    pub fn namespace_or<'a>(&'a self, default: &'a str) -> &'a str {
        self.namespace.as_deref().unwrap_or(default)
    }
}
