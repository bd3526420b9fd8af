//! Kibana pod template composition
//!
//! Builds the pod template of a Kibana deployment from three sources: the
//! version-gated operator defaults, the user's `podTemplate` override and the
//! stack monitoring sidecars. The result carries a fingerprint annotation of
//! every sidecar configuration so that configuration changes roll the pods.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    Container, ContainerPort, HTTPGetAction, PodSpec, PodTemplateSpec, Probe,
    ResourceRequirements, Secret, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::ResourceExt;
use kube::core::ObjectMeta;
use semver::Version;
use serde_json::{Map, Value};
use tracing::{debug, info, instrument};

use crate::controller::context::Context;
use crate::controller::error::{Result, Stage};
use crate::crd::Kibana;
use crate::resources::base_path::{BasePath, resolve_base_path};
use crate::resources::common::{
    CONFIG_FILE_NAME, CONFIG_HASH_ANNOTATION, CONFIG_LOCAL_MOUNT_PATH, CONFIG_LOCAL_VOLUME_NAME,
    CONFIG_MOUNT_PATH, CONFIG_VOLUME_NAME, DATA_MOUNT_PATH, DATA_VOLUME_NAME, HTTP_PORT,
    INIT_CONFIG_CONTAINER_NAME, KIBANA_CONTAINER_NAME, LOG_MODULE_ANNOTATION, LOGS_MOUNT_PATH,
    LOGS_VOLUME_NAME, PLUGINS_MOUNT_PATH, PLUGINS_VOLUME_NAME, TMP_MOUNT_PATH, TMP_VOLUME_NAME,
    VERSION_LABEL, config_secret_name, empty_dir_volume, secret_volume, volume_mount,
};
use crate::resources::fingerprint::ConfigFingerprint;
use crate::resources::merge::{
    merge_by_name, merge_containers, merge_maps, merge_missing, merge_missing_mounts,
};
use crate::resources::sidecar::{Capability, SidecarSpec, build_sidecar, enabled_capabilities};
use crate::resources::version::{BehaviorFlags, parse_version, release_tag};

/// Secure settings keystore, prepared by an init container from user Secrets
#[derive(Clone, Debug, Default, PartialEq)]
pub struct KeystoreResources {
    /// Runs after the config init container, with the main container's mounts
    pub init_container: Container,
    /// Volume holding the keystore sources
    pub volume: Volume,
}

/// A composed Kibana pod template and the Secrets it depends on
#[derive(Clone, Debug)]
pub struct ComposedPodTemplate {
    template: PodTemplateSpec,
    config_secrets: Vec<Secret>,
    kibana_settings: Map<String, Value>,
}

impl ComposedPodTemplate {
    pub fn template(&self) -> &PodTemplateSpec {
        &self.template
    }

    /// Rendered sidecar configurations, to be applied before the template
    pub fn config_secrets(&self) -> &[Secret] {
        &self.config_secrets
    }

    /// Settings to merge into kibana.yml for the sidecars to work, in dotted form
    pub fn kibana_settings(&self) -> &Map<String, Value> {
        &self.kibana_settings
    }

    pub fn into_parts(self) -> (PodTemplateSpec, Vec<Secret>) {
        (self.template, self.config_secrets)
    }

    pub fn pod_spec(&self) -> Option<&PodSpec> {
        self.template.spec.as_ref()
    }

    pub fn containers(&self) -> &[Container] {
        self.pod_spec().map(|s| s.containers.as_slice()).unwrap_or_default()
    }

    pub fn init_containers(&self) -> &[Container] {
        self.pod_spec()
            .and_then(|s| s.init_containers.as_deref())
            .unwrap_or_default()
    }

    pub fn volumes(&self) -> &[Volume] {
        self.pod_spec()
            .and_then(|s| s.volumes.as_deref())
            .unwrap_or_default()
    }

    pub fn container(&self, name: &str) -> Option<&Container> {
        self.containers().iter().find(|c| c.name == name)
    }

    pub fn labels(&self) -> Option<&BTreeMap<String, String>> {
        self.template.metadata.as_ref()?.labels.as_ref()
    }

    pub fn annotations(&self) -> Option<&BTreeMap<String, String>> {
        self.template.metadata.as_ref()?.annotations.as_ref()
    }

    /// Value of the sidecar configuration fingerprint annotation
    pub fn config_hash(&self) -> Option<&str> {
        self.annotations()?
            .get(CONFIG_HASH_ANNOTATION)
            .map(String::as_str)
    }
}

fn main_image(ctx: &Context, kibana: &Kibana, version: &Version) -> String {
    kibana
        .spec
        .image
        .clone()
        .unwrap_or_else(|| ctx.config.kibana_image(version))
}

fn default_resources() -> ResourceRequirements {
    let memory = BTreeMap::from([("memory".to_string(), Quantity("1Gi".to_string()))]);
    ResourceRequirements {
        requests: Some(memory.clone()),
        limits: Some(memory),
        ..Default::default()
    }
}

fn readiness_probe(kibana: &Kibana, flags: &BehaviorFlags, base_path: &BasePath) -> Probe {
    let scheme = if kibana.spec.http.tls_enabled() {
        "HTTPS"
    } else {
        "HTTP"
    };
    Probe {
        http_get: Some(HTTPGetAction {
            path: Some(base_path.probe_path(flags.probe_path)),
            port: IntOrString::Int(HTTP_PORT),
            scheme: Some(scheme.to_string()),
            ..Default::default()
        }),
        initial_delay_seconds: Some(10),
        period_seconds: Some(10),
        timeout_seconds: Some(5),
        success_threshold: Some(1),
        failure_threshold: Some(3),
        ..Default::default()
    }
}

fn main_volume_mounts(flags: &BehaviorFlags) -> Vec<VolumeMount> {
    let mut mounts = vec![
        volume_mount(CONFIG_VOLUME_NAME, CONFIG_MOUNT_PATH, false),
        volume_mount(DATA_VOLUME_NAME, DATA_MOUNT_PATH, false),
    ];
    if flags.writable_volumes {
        mounts.push(volume_mount(TMP_VOLUME_NAME, TMP_MOUNT_PATH, false));
        mounts.push(volume_mount(PLUGINS_VOLUME_NAME, PLUGINS_MOUNT_PATH, false));
    }
    mounts
}

fn default_volumes(kibana_name: &str, flags: &BehaviorFlags) -> Vec<Volume> {
    let mut volumes = vec![
        secret_volume(CONFIG_LOCAL_VOLUME_NAME, &config_secret_name(kibana_name)),
        empty_dir_volume(CONFIG_VOLUME_NAME),
        empty_dir_volume(DATA_VOLUME_NAME),
    ];
    if flags.writable_volumes {
        volumes.push(empty_dir_volume(TMP_VOLUME_NAME));
        volumes.push(empty_dir_volume(PLUGINS_VOLUME_NAME));
    }
    volumes
}

fn main_container(
    kibana: &Kibana,
    image: String,
    flags: &BehaviorFlags,
    base_path: &BasePath,
) -> Container {
    Container {
        name: KIBANA_CONTAINER_NAME.to_string(),
        image: Some(image),
        ports: Some(vec![ContainerPort {
            name: Some(kibana.spec.http.protocol().to_string()),
            container_port: HTTP_PORT,
            protocol: Some("TCP".to_string()),
            ..Default::default()
        }]),
        readiness_probe: Some(readiness_probe(kibana, flags, base_path)),
        resources: Some(default_resources()),
        volume_mounts: Some(main_volume_mounts(flags)),
        ..Default::default()
    }
}

/// Copies the operator-managed kibana.yml into the writable config volume
fn init_config_container() -> Container {
    let script = format!(
        "set -eu\ncp -f {src}/{file} {dst}/{file}\n",
        src = CONFIG_LOCAL_MOUNT_PATH,
        dst = CONFIG_MOUNT_PATH,
        file = CONFIG_FILE_NAME,
    );
    Container {
        name: INIT_CONFIG_CONTAINER_NAME.to_string(),
        command: Some(vec![
            "/usr/bin/env".to_string(),
            "bash".to_string(),
            "-c".to_string(),
            script,
        ]),
        volume_mounts: Some(vec![volume_mount(
            CONFIG_LOCAL_VOLUME_NAME,
            CONFIG_LOCAL_MOUNT_PATH,
            true,
        )]),
        ..Default::default()
    }
}

/// Inherit image, volume mounts and security context from the main container
fn apply_init_container_defaults(
    init_containers: Vec<Container>,
    main: &Container,
    flags: &BehaviorFlags,
) -> Vec<Container> {
    let main_mounts = main.volume_mounts.clone().unwrap_or_default();
    init_containers
        .into_iter()
        .map(|mut container| {
            if container.image.is_none() {
                container.image = main.image.clone();
            }
            let mounts = container.volume_mounts.take().unwrap_or_default();
            container.volume_mounts = Some(merge_missing_mounts(mounts, main_mounts.clone()));
            if container.security_context.is_none() {
                container.security_context = flags.container_security_context();
            }
            container
        })
        .collect()
}

/// Compose the pod template of a Kibana
///
/// The override and the enabled monitoring capabilities are read from the
/// Kibana spec. Composition only reads credentials and CA material; it never
/// writes to the cluster. The rendered sidecar configurations and the
/// kibana.yml settings they rely on are returned alongside the template for
/// the caller to apply.
pub async fn compose_pod_template(
    ctx: &Context,
    kibana: &Kibana,
    base_labels: &BTreeMap<String, String>,
) -> Result<ComposedPodTemplate> {
    compose_pod_template_with_keystore(ctx, kibana, None, base_labels).await
}

/// Compose the pod template of a Kibana whose secure settings live in a keystore
#[instrument(skip(ctx, kibana, keystore, base_labels), fields(name = %kibana.name_any(), namespace = kibana.namespace().unwrap_or_default()))]
pub async fn compose_pod_template_with_keystore(
    ctx: &Context,
    kibana: &Kibana,
    keystore: Option<&KeystoreResources>,
    base_labels: &BTreeMap<String, String>,
) -> Result<ComposedPodTemplate> {
    let spec = &kibana.spec;

    let version = parse_version(&spec.version).map_err(|e| e.in_stage(Stage::Version))?;
    let mut flags = BehaviorFlags::resolve(&version);
    if !ctx.config.set_default_security_context {
        flags = flags.without_security_context();
    }
    debug!(%version, ?flags, "Resolved behavior flags");

    let base_path = resolve_base_path(spec);

    let capabilities = enabled_capabilities(&spec.monitoring);

    let mut main = main_container(kibana, main_image(ctx, kibana, &version), &flags, &base_path);
    let mut volumes = default_volumes(&kibana.name_any(), &flags);
    let mut default_init_containers = vec![init_config_container()];
    if let Some(keystore) = keystore {
        volumes.push(keystore.volume.clone());
        default_init_containers.push(keystore.init_container.clone());
    }
    // Kibana only writes log files for Filebeat to tail
    if capabilities.contains(&Capability::Logs) {
        volumes.push(empty_dir_volume(LOGS_VOLUME_NAME));
        main.volume_mounts
            .get_or_insert_with(Vec::new)
            .push(volume_mount(LOGS_VOLUME_NAME, LOGS_MOUNT_PATH, false));
    }

    let mut sidecars: Vec<SidecarSpec> = Vec::new();
    for capability in capabilities {
        let sidecar = build_sidecar(capability, ctx, kibana, &version, &flags, &base_path)
            .await
            .map_err(|e| e.in_stage(Stage::Sidecar(capability)))?;
        sidecars.push(sidecar);
    }

    let mut default_containers = vec![main];
    let mut fingerprint = ConfigFingerprint::new();
    let mut config_secrets = Vec::with_capacity(sidecars.len());
    let mut kibana_settings = Map::new();
    for sidecar in sidecars {
        fingerprint.write(&sidecar.config_hash);
        kibana_settings.extend(sidecar.kibana_settings);
        volumes = merge_missing(volumes, sidecar.volumes);
        default_containers.push(sidecar.container);
        config_secrets.push(sidecar.config_secret);
    }

    let user = spec.pod_template.clone().unwrap_or_default();
    let user_meta = user.metadata.unwrap_or_default();
    let mut pod_spec = user.spec.unwrap_or_default();

    let user_containers = std::mem::take(&mut pod_spec.containers);
    let mut containers = merge_containers(default_containers, user_containers);
    for container in containers.iter_mut() {
        if container.security_context.is_none() {
            container.security_context = flags.container_security_context();
        }
    }

    let init_containers = merge_containers(
        default_init_containers,
        pod_spec.init_containers.take().unwrap_or_default(),
    );
    // The merged main container always comes first
    let init_containers = match containers.first() {
        Some(main) => apply_init_container_defaults(init_containers, main, &flags),
        None => init_containers,
    };

    let volumes = merge_by_name(volumes, pod_spec.volumes.take().unwrap_or_default());

    pod_spec.containers = containers;
    pod_spec.init_containers = Some(init_containers);
    pod_spec.volumes = Some(volumes);
    if pod_spec.security_context.is_none() {
        pod_spec.security_context = flags.pod_security_context();
    }
    if pod_spec.automount_service_account_token.is_none() {
        pod_spec.automount_service_account_token = Some(false);
    }

    let mut labels = base_labels.clone();
    labels.insert(VERSION_LABEL.to_string(), release_tag(&version));
    let labels = merge_maps(labels, user_meta.labels.as_ref());

    let default_annotations =
        BTreeMap::from([(LOG_MODULE_ANNOTATION.to_string(), "kibana".to_string())]);
    let mut annotations = merge_maps(default_annotations, user_meta.annotations.as_ref());
    let config_hash = fingerprint.annotation_value();
    annotations.insert(CONFIG_HASH_ANNOTATION.to_string(), config_hash.clone());

    info!(
        containers = pod_spec.containers.len(),
        sidecars = config_secrets.len(),
        config_hash = %config_hash,
        "Composed pod template"
    );

    Ok(ComposedPodTemplate {
        template: PodTemplateSpec {
            metadata: Some(ObjectMeta {
                labels: Some(labels),
                annotations: Some(annotations),
                ..user_meta
            }),
            spec: Some(pod_spec),
        },
        config_secrets,
        kibana_settings,
    })
}
