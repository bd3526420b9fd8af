//! Stack monitoring sidecars
//!
//! Each monitoring capability runs one Beat next to Kibana: Metricbeat scrapes
//! the Kibana stats API, Filebeat tails the Kibana log volume. Both ship to a
//! single monitoring Elasticsearch cluster. The factory resolves credentials
//! and CA material, renders the Beat configuration and returns the container,
//! the volumes it needs and the Secret carrying the rendered configuration.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::future::Future;

use k8s_openapi::api::core::v1::{
    Container, EnvVar, EnvVarSource, ObjectFieldSelector, ResourceRequirements, Secret, Volume,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::ResourceExt;
use kube::core::ObjectMeta;
use semver::Version;
use serde::Serialize;
use serde_json::{Map, Value, json};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::controller::context::Context;
use crate::controller::error::{Error, Result};
use crate::crd::{Kibana, MonitoringSpec, MonitoringTarget, ObjectSelector};
use crate::resources::base_path::BasePath;
use crate::resources::common::{
    CA_FILE_NAME, HTTP_CA_MOUNT_PATH, HTTP_CA_VOLUME_NAME, HTTP_PORT, LOGS_MOUNT_PATH,
    LOGS_VOLUME_NAME, MONITORING_USER_NAME, beat_config_secret_name, beat_user_name,
    beat_user_secret_name, elasticsearch_ca_mount_path, elasticsearch_ca_secret_name,
    elasticsearch_ca_volume_name, elasticsearch_url, empty_dir_volume,
    http_certs_public_secret_name, monitoring_user_secret_name, namespace_of, owner_reference,
    secret_volume, standard_labels, volume_mount,
};
use crate::resources::fingerprint::ConfigFingerprint;
use crate::resources::secret::{CredentialKey, Credentials, TrustKey};
use crate::resources::template::{
    FILEBEAT_TEMPLATE, FILEBEAT_TEMPLATE_NAME, METRICBEAT_TEMPLATE, METRICBEAT_TEMPLATE_NAME,
    TemplateRenderer,
};
use crate::resources::version::BehaviorFlags;

/// A monitoring capability, ordered by name
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Capability {
    /// Ship Kibana logs with Filebeat
    Logs,
    /// Ship Kibana metrics with Metricbeat
    Metrics,
}

impl Capability {
    pub const ALL: [Capability; 2] = [Capability::Logs, Capability::Metrics];

    pub fn name(self) -> &'static str {
        match self {
            Capability::Logs => "logs",
            Capability::Metrics => "metrics",
        }
    }

    /// Beat implementing the capability, also the sidecar container name
    pub fn beat(self) -> &'static str {
        match self {
            Capability::Logs => "filebeat",
            Capability::Metrics => "metricbeat",
        }
    }

    fn target(self, monitoring: &MonitoringSpec) -> &MonitoringTarget {
        match self {
            Capability::Logs => &monitoring.logs,
            Capability::Metrics => &monitoring.metrics,
        }
    }

    fn template(self) -> (&'static str, &'static str) {
        match self {
            Capability::Logs => (FILEBEAT_TEMPLATE_NAME, FILEBEAT_TEMPLATE),
            Capability::Metrics => (METRICBEAT_TEMPLATE_NAME, METRICBEAT_TEMPLATE),
        }
    }

    fn config_volume_name(self) -> String {
        format!("{}-config", self.beat())
    }

    fn config_mount_path(self) -> String {
        format!("/etc/{}-config", self.beat())
    }

    fn config_file_name(self) -> String {
        format!("{}.yml", self.beat())
    }

    fn data_volume_name(self) -> String {
        format!("{}-data", self.beat())
    }

    fn data_mount_path(self) -> String {
        format!("/usr/share/{}/data", self.beat())
    }

    fn logs_volume_name(self) -> String {
        format!("{}-logs", self.beat())
    }

    fn logs_mount_path(self) -> String {
        format!("/usr/share/{}/logs", self.beat())
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Capabilities declared on a Kibana, in name order
pub fn enabled_capabilities(monitoring: &MonitoringSpec) -> BTreeSet<Capability> {
    Capability::ALL
        .into_iter()
        .filter(|capability| !capability.target(monitoring).elasticsearch_refs.is_empty())
        .collect()
}

/// A built sidecar, ready to be merged into the pod template
#[derive(Clone, Debug)]
pub struct SidecarSpec {
    pub capability: Capability,
    pub container: Container,
    /// Volumes the container mounts, except the Kibana log volume
    pub volumes: Vec<Volume>,
    /// Secret carrying the rendered configuration, to be applied by the caller
    pub config_secret: Secret,
    /// Digest of the rendered configuration
    pub config_hash: [u8; 32],
    /// kibana.yml settings the sidecar depends on, in dotted form
    pub kibana_settings: Map<String, Value>,
}

/// File Kibana writes its JSON logs to when logs are shipped
pub const KIBANA_LOG_FILE_NAME: &str = "kibana.json";

/// kibana.yml settings adding a JSON file appender next to the default console one
pub fn log_to_file_settings() -> Map<String, Value> {
    let mut settings = Map::new();
    settings.insert(
        "logging.appenders.rolling-file".to_string(),
        json!({
            "type": "rolling-file",
            "fileName": format!("{}/{}", LOGS_MOUNT_PATH, KIBANA_LOG_FILE_NAME),
            "policy": {"type": "size-limit", "size": "50mb"},
            "strategy": {"type": "numeric", "pattern": "-%i", "max": 2},
            "layout": {"type": "json"},
        }),
    );
    settings.insert(
        "logging.root.appenders".to_string(),
        json!(["default", "rolling-file"]),
    );
    settings
}

#[derive(Serialize)]
struct BeatParams {
    output_url: String,
    output_username: String,
    output_password: String,
    output_ca_path: String,
    data_path: String,
    logs_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    kibana_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    base_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    kibana_username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    kibana_password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    kibana_logs_glob: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    kibana_ca_path: Option<String>,
}

/// Await a lookup unless the composition is cancelled first
async fn cancellable<T>(
    cancel: &CancellationToken,
    lookup: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Cancelled),
        result = lookup => result,
    }
}

/// The single monitoring cluster of a target
fn single_ref(capability: Capability, target: &MonitoringTarget) -> Result<&ObjectSelector> {
    match target.elasticsearch_refs.as_slice() {
        [es_ref] => Ok(es_ref),
        refs => Err(Error::InvalidConfig(format!(
            "{} monitoring requires exactly one elasticsearchRef, got {}",
            capability,
            refs.len()
        ))),
    }
}

fn field_ref_env(name: &str, field_path: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value_from: Some(EnvVarSource {
            field_ref: Some(ObjectFieldSelector {
                field_path: field_path.to_string(),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn default_beat_resources() -> ResourceRequirements {
    ResourceRequirements {
        requests: Some(BTreeMap::from([
            ("cpu".to_string(), Quantity("100m".to_string())),
            ("memory".to_string(), Quantity("200Mi".to_string())),
        ])),
        limits: Some(BTreeMap::from([
            ("memory".to_string(), Quantity("300Mi".to_string())),
        ])),
        ..Default::default()
    }
}

/// Build the sidecar for one capability of a Kibana
pub async fn build_sidecar(
    capability: Capability,
    ctx: &Context,
    kibana: &Kibana,
    version: &Version,
    flags: &BehaviorFlags,
    base_path: &BasePath,
) -> Result<SidecarSpec> {
    let name = kibana.name_any();
    let namespace = namespace_of(kibana);
    let beat = capability.beat();

    let es_ref = single_ref(capability, capability.target(&kibana.spec.monitoring))?;
    let es_namespace = es_ref.namespace_or(&namespace);

    let output_key = CredentialKey::new(
        &namespace,
        beat_user_secret_name(&name, beat),
        beat_user_name(&namespace, &name, beat),
    );
    let output: Credentials =
        cancellable(&ctx.cancel, ctx.credentials.credentials(&output_key)).await?;

    // The pod can only mount the copy published in its own namespace
    let es_ca_key = TrustKey::new(
        &namespace,
        elasticsearch_ca_secret_name(&name, es_namespace, &es_ref.name),
    );
    let es_ca = cancellable(&ctx.cancel, ctx.trust.ca_volume(&es_ca_key)).await?;
    let es_ca_volume_name = elasticsearch_ca_volume_name(es_namespace, &es_ref.name);
    let es_ca_mount_path = elasticsearch_ca_mount_path(es_namespace, &es_ref.name);

    let mut volumes = vec![
        secret_volume(
            &capability.config_volume_name(),
            &beat_config_secret_name(&name, beat),
        ),
        empty_dir_volume(&capability.data_volume_name()),
        empty_dir_volume(&capability.logs_volume_name()),
        es_ca.volume_in(&namespace, &es_ca_volume_name)?,
    ];
    let mut mounts = vec![
        volume_mount(
            &capability.config_volume_name(),
            &capability.config_mount_path(),
            true,
        ),
        volume_mount(
            &capability.data_volume_name(),
            &capability.data_mount_path(),
            false,
        ),
        volume_mount(
            &capability.logs_volume_name(),
            &capability.logs_mount_path(),
            false,
        ),
        volume_mount(&es_ca_volume_name, &es_ca_mount_path, true),
    ];

    let mut params = BeatParams {
        output_url: elasticsearch_url(&es_ref.name, es_namespace),
        output_username: output.username,
        output_password: output.password,
        output_ca_path: format!("{}/{}", es_ca_mount_path, CA_FILE_NAME),
        data_path: capability.data_mount_path(),
        logs_path: capability.logs_mount_path(),
        kibana_url: None,
        base_path: None,
        kibana_username: None,
        kibana_password: None,
        kibana_logs_glob: None,
        kibana_ca_path: None,
    };
    let mut kibana_settings = Map::new();

    match capability {
        Capability::Metrics => {
            let user_key = CredentialKey::new(
                &namespace,
                monitoring_user_secret_name(&name),
                MONITORING_USER_NAME,
            );
            let user = cancellable(&ctx.cancel, ctx.credentials.credentials(&user_key)).await?;

            if kibana.spec.http.tls_enabled() {
                let ca_key = TrustKey::new(&namespace, http_certs_public_secret_name(&name));
                let ca = cancellable(&ctx.cancel, ctx.trust.ca_volume(&ca_key)).await?;
                volumes.push(ca.volume_in(&namespace, HTTP_CA_VOLUME_NAME)?);
                mounts.push(volume_mount(HTTP_CA_VOLUME_NAME, HTTP_CA_MOUNT_PATH, true));
                params.kibana_ca_path = Some(format!("{}/{}", HTTP_CA_MOUNT_PATH, CA_FILE_NAME));
            }

            // Same pod, the sidecar reaches Kibana on the loopback interface
            params.kibana_url = Some(format!(
                "{}://localhost:{}",
                kibana.spec.http.protocol(),
                HTTP_PORT
            ));
            params.base_path = Some(base_path.probe_prefix().to_string());
            params.kibana_username = Some(user.username);
            params.kibana_password = Some(user.password);
        }
        Capability::Logs => {
            mounts.push(volume_mount(LOGS_VOLUME_NAME, LOGS_MOUNT_PATH, true));
            params.kibana_logs_glob = Some(format!("{}/*.json", LOGS_MOUNT_PATH));
            kibana_settings = log_to_file_settings();
        }
    }

    let (template_name, template) = capability.template();
    let rendered = TemplateRenderer::new().render(template_name, template, &params)?;

    let mut fingerprint = ConfigFingerprint::new();
    fingerprint.write(rendered.as_bytes());
    let config_hash = fingerprint.digest();

    let config_secret = Secret {
        metadata: ObjectMeta {
            name: Some(beat_config_secret_name(&name, beat)),
            namespace: Some(namespace.clone()),
            labels: Some(standard_labels(&name)),
            owner_references: Some(vec![owner_reference(kibana)]),
            ..Default::default()
        },
        type_: Some("Opaque".to_string()),
        string_data: Some(BTreeMap::from([(capability.config_file_name(), rendered)])),
        ..Default::default()
    };

    let container = Container {
        name: beat.to_string(),
        image: Some(ctx.config.beat_image(beat, version)),
        args: Some(vec![
            "-c".to_string(),
            format!(
                "{}/{}",
                capability.config_mount_path(),
                capability.config_file_name()
            ),
            "-e".to_string(),
        ]),
        env: Some(vec![
            field_ref_env("POD_NAME", "metadata.name"),
            field_ref_env("NODE_NAME", "spec.nodeName"),
        ]),
        resources: Some(default_beat_resources()),
        security_context: flags.container_security_context(),
        volume_mounts: Some(mounts),
        ..Default::default()
    };

    debug!(
        kibana = %name,
        namespace = %namespace,
        capability = %capability,
        elasticsearch = %es_ref.name,
        "Built monitoring sidecar"
    );

    Ok(SidecarSpec {
        capability,
        container,
        volumes,
        config_secret,
        config_hash,
        kibana_settings,
    })
}
