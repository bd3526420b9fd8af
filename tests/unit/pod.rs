//! Unit tests for pod template composition

use k8s_openapi::api::core::v1::{
    Container, ResourceRequirements, SecurityContext, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use serde_json::json;
use stack_operator::resources::common::{
    CONFIG_HASH_ANNOTATION, INIT_CONFIG_CONTAINER_NAME, KIBANA_CONTAINER_NAME,
    LOG_MODULE_ANNOTATION, NAME_LABEL, PLUGINS_VOLUME_NAME, TMP_VOLUME_NAME, VERSION_LABEL,
};
use stack_operator::{
    ComposerConfig, Error, KeystoreResources, Stage, compose_pod_template,
    compose_pod_template_with_keystore,
};
use std::collections::BTreeMap;

use crate::common::*;

fn probe_path(composed: &stack_operator::ComposedPodTemplate) -> String {
    composed
        .container(KIBANA_CONTAINER_NAME)
        .and_then(|c| c.readiness_probe.as_ref())
        .and_then(|p| p.http_get.as_ref())
        .and_then(|h| h.path.clone())
        .unwrap()
}

fn mount_names(container: &Container) -> Vec<String> {
    container
        .volume_mounts
        .iter()
        .flatten()
        .map(|m| m.name.clone())
        .collect()
}

mod defaults {
    use super::*;

    #[tokio::test]
    async fn test_default_template() {
        let kibana = KibanaBuilder::new("kb", "default").build();
        let composed = compose_pod_template(&empty_context(), &kibana, &base_labels("kb"))
            .await
            .unwrap();

        assert_eq!(composed.containers().len(), 1);
        let main = &composed.containers()[0];
        assert_eq!(main.name, KIBANA_CONTAINER_NAME);
        assert_eq!(
            main.image.as_deref(),
            Some("docker.elastic.co/kibana/kibana:8.12.0")
        );

        let port = &main.ports.as_ref().unwrap()[0];
        assert_eq!(port.container_port, 5601);
        assert_eq!(port.name.as_deref(), Some("https"));

        let probe = main.readiness_probe.as_ref().unwrap();
        assert_eq!(probe.failure_threshold, Some(3));
        assert_eq!(
            probe.http_get.as_ref().unwrap().scheme.as_deref(),
            Some("HTTPS")
        );

        let init = composed.init_containers();
        assert_eq!(init.len(), 1);
        assert_eq!(init[0].name, INIT_CONFIG_CONTAINER_NAME);
        assert_eq!(init[0].image, main.image);

        let spec = composed.pod_spec().unwrap();
        assert_eq!(spec.automount_service_account_token, Some(false));
        assert!(composed.config_secrets().is_empty());
    }

    #[tokio::test]
    async fn test_plain_http() {
        let kibana = KibanaBuilder::new("kb", "default").without_tls().build();
        let composed = compose_pod_template(&empty_context(), &kibana, &base_labels("kb"))
            .await
            .unwrap();

        let main = composed.container(KIBANA_CONTAINER_NAME).unwrap();
        assert_eq!(main.ports.as_ref().unwrap()[0].name.as_deref(), Some("http"));
        assert_eq!(
            main.readiness_probe
                .as_ref()
                .and_then(|p| p.http_get.as_ref())
                .and_then(|h| h.scheme.as_deref()),
            Some("HTTP")
        );
    }

    #[tokio::test]
    async fn test_labels_and_annotations() {
        let kibana = KibanaBuilder::new("kb", "default")
            .with_label("team", "observability")
            .with_label(NAME_LABEL, "user-value")
            .with_annotation("custom", "value")
            .build();
        let composed = compose_pod_template(&empty_context(), &kibana, &base_labels("kb"))
            .await
            .unwrap();

        let labels = composed.labels().unwrap();
        assert_eq!(labels.get("team"), Some(&"observability".to_string()));
        assert_eq!(labels.get(NAME_LABEL), Some(&"user-value".to_string()));
        assert_eq!(labels.get(VERSION_LABEL), Some(&"8.12.0".to_string()));

        let annotations = composed.annotations().unwrap();
        assert_eq!(annotations.get("custom"), Some(&"value".to_string()));
        assert_eq!(annotations.get(LOG_MODULE_ANNOTATION), Some(&"kibana".to_string()));
        assert!(annotations.contains_key(CONFIG_HASH_ANNOTATION));
    }

    #[tokio::test]
    async fn test_custom_image_and_registry() {
        let kibana = KibanaBuilder::new("kb", "default")
            .with_image("my-registry/kibana:custom")
            .build();
        let composed = compose_pod_template(&empty_context(), &kibana, &base_labels("kb"))
            .await
            .unwrap();
        assert_eq!(
            composed.containers()[0].image.as_deref(),
            Some("my-registry/kibana:custom")
        );

        let kibana = KibanaBuilder::new("kb", "default").build();
        let ctx = empty_context()
            .with_config(ComposerConfig::default().with_image_registry("registry.local"));
        let composed = compose_pod_template(&ctx, &kibana, &base_labels("kb"))
            .await
            .unwrap();
        assert_eq!(
            composed.containers()[0].image.as_deref(),
            Some("registry.local/kibana/kibana:8.12.0")
        );
    }

    #[tokio::test]
    async fn test_invalid_version_aborts() {
        let kibana = KibanaBuilder::new("kb", "default")
            .with_version("8.x")
            .build();
        let err = compose_pod_template(&empty_context(), &kibana, &base_labels("kb"))
            .await
            .unwrap_err();

        assert_eq!(err.stage(), Some(Stage::Version));
        assert!(matches!(err.root_cause(), Error::VersionParse { .. }));
        assert!(!err.is_retryable());
    }
}

mod version_gating {
    use super::*;

    #[tokio::test]
    async fn test_no_security_context_before_threshold() {
        let kibana = KibanaBuilder::new("kb", "default")
            .with_version("7.4.0")
            .build();
        let composed = compose_pod_template(&empty_context(), &kibana, &base_labels("kb"))
            .await
            .unwrap();

        for container in composed.containers().iter().chain(composed.init_containers()) {
            assert!(container.security_context.is_none(), "{}", container.name);
        }
        assert!(composed.pod_spec().unwrap().security_context.is_none());
    }

    #[tokio::test]
    async fn test_security_context_on_every_container() {
        let kibana = KibanaBuilder::new("kb", "default")
            .with_monitoring(MONITORING_CLUSTER)
            .build();
        let composed = compose_pod_template(&static_context(&kibana), &kibana, &base_labels("kb"))
            .await
            .unwrap();

        assert_eq!(composed.containers().len(), 3);
        for container in composed.containers().iter().chain(composed.init_containers()) {
            let context = container.security_context.as_ref().unwrap();
            assert_eq!(context.run_as_non_root, Some(true), "{}", container.name);
            assert_eq!(context.allow_privilege_escalation, Some(false));
            assert_eq!(context.read_only_root_filesystem, Some(true));
        }
        assert_eq!(
            composed
                .pod_spec()
                .unwrap()
                .security_context
                .as_ref()
                .unwrap()
                .fs_group,
            Some(1000)
        );
    }

    #[tokio::test]
    async fn test_security_context_disabled_by_config() {
        let kibana = KibanaBuilder::new("kb", "default").build();
        let ctx = empty_context()
            .with_config(ComposerConfig::default().with_default_security_context(false));
        let composed = compose_pod_template(&ctx, &kibana, &base_labels("kb"))
            .await
            .unwrap();

        assert!(composed.containers()[0].security_context.is_none());
        assert!(composed.pod_spec().unwrap().security_context.is_none());
    }

    #[tokio::test]
    async fn test_user_security_context_wins() {
        let user_context = SecurityContext {
            run_as_user: Some(1234),
            ..Default::default()
        };
        let kibana = KibanaBuilder::new("kb", "default")
            .with_container(Container {
                name: KIBANA_CONTAINER_NAME.to_string(),
                security_context: Some(user_context.clone()),
                ..Default::default()
            })
            .build();
        let composed = compose_pod_template(&empty_context(), &kibana, &base_labels("kb"))
            .await
            .unwrap();

        assert_eq!(composed.containers()[0].security_context, Some(user_context));
    }

    #[tokio::test]
    async fn test_writable_volumes_from_8_0() {
        let old = KibanaBuilder::new("kb", "default")
            .with_version("7.17.9")
            .build();
        let new = KibanaBuilder::new("kb", "default")
            .with_version("8.12.0")
            .build();

        let old = compose_pod_template(&empty_context(), &old, &base_labels("kb"))
            .await
            .unwrap();
        let new = compose_pod_template(&empty_context(), &new, &base_labels("kb"))
            .await
            .unwrap();

        let old_mounts = mount_names(&old.containers()[0]);
        let new_mounts = mount_names(&new.containers()[0]);
        assert_eq!(old_mounts.len() + 2, new_mounts.len());
        assert!(new_mounts.contains(&TMP_VOLUME_NAME.to_string()));
        assert!(new_mounts.contains(&PLUGINS_VOLUME_NAME.to_string()));

        let new_volumes: Vec<&str> = new.volumes().iter().map(|v| v.name.as_str()).collect();
        assert!(new_volumes.contains(&TMP_VOLUME_NAME));
        assert!(new_volumes.contains(&PLUGINS_VOLUME_NAME));
        assert_eq!(old.volumes().len() + 2, new.volumes().len());
    }
}

mod base_path {
    use super::*;

    #[tokio::test]
    async fn test_probe_uses_base_path_from_env() {
        let kibana = KibanaBuilder::new("kb", "default")
            .with_kibana_env(&[
                ("SERVER_BASEPATH", "/monitoring/kibana"),
                ("SERVER_REWRITEBASEPATH", "true"),
            ])
            .build();
        let composed = compose_pod_template(&empty_context(), &kibana, &base_labels("kb"))
            .await
            .unwrap();
        assert_eq!(probe_path(&composed), "/monitoring/kibana/login");
    }

    #[tokio::test]
    async fn test_probe_uses_base_path_from_config() {
        let kibana = KibanaBuilder::new("kb", "default")
            .with_config(json!({"server": {"basePath": "/monitoring/kibana", "rewriteBasePath": true}}))
            .build();
        let composed = compose_pod_template(&empty_context(), &kibana, &base_labels("kb"))
            .await
            .unwrap();
        assert_eq!(probe_path(&composed), "/monitoring/kibana/login");
    }

    #[tokio::test]
    async fn test_probe_uses_flattened_config() {
        let kibana = KibanaBuilder::new("kb", "default")
            .with_config(json!({"server.basePath": "/monitoring/kibana", "server.rewriteBasePath": true}))
            .build();
        let composed = compose_pod_template(&empty_context(), &kibana, &base_labels("kb"))
            .await
            .unwrap();
        assert_eq!(probe_path(&composed), "/monitoring/kibana/login");
    }

    #[tokio::test]
    async fn test_base_path_without_rewrite() {
        let kibana = KibanaBuilder::new("kb", "default")
            .with_config(json!({"server.basePath": "/monitoring/kibana"}))
            .build();
        let composed = compose_pod_template(&empty_context(), &kibana, &base_labels("kb"))
            .await
            .unwrap();
        assert_eq!(probe_path(&composed), "/login");
    }
}

mod overrides {
    use super::*;

    #[tokio::test]
    async fn test_user_resources_replace_defaults() {
        let resources = ResourceRequirements {
            limits: Some(BTreeMap::from([(
                "memory".to_string(),
                Quantity("2Gi".to_string()),
            )])),
            ..Default::default()
        };
        let kibana = KibanaBuilder::new("kb", "default")
            .with_container(Container {
                name: KIBANA_CONTAINER_NAME.to_string(),
                resources: Some(resources.clone()),
                ..Default::default()
            })
            .build();
        let composed = compose_pod_template(&empty_context(), &kibana, &base_labels("kb"))
            .await
            .unwrap();

        let main = &composed.containers()[0];
        assert_eq!(main.resources, Some(resources));
        // Unset fields keep their defaults
        assert!(main.readiness_probe.is_some());
        assert!(main.image.is_some());
    }

    #[tokio::test]
    async fn test_default_resources() {
        let kibana = KibanaBuilder::new("kb", "default").build();
        let composed = compose_pod_template(&empty_context(), &kibana, &base_labels("kb"))
            .await
            .unwrap();
        let resources = composed.containers()[0].resources.clone().unwrap();
        assert_eq!(
            resources.limits.unwrap().get("memory"),
            Some(&Quantity("1Gi".to_string()))
        );
    }

    #[tokio::test]
    async fn test_user_env_is_merged() {
        let kibana = KibanaBuilder::new("kb", "default")
            .with_kibana_env(&[("NODE_OPTIONS", "--max-old-space-size=2048")])
            .build();
        let composed = compose_pod_template(&empty_context(), &kibana, &base_labels("kb"))
            .await
            .unwrap();

        assert_eq!(composed.containers().len(), 1);
        let env = composed.containers()[0].env.as_ref().unwrap();
        assert_eq!(env.len(), 1);
        assert_eq!(env[0].name, "NODE_OPTIONS");
    }

    #[tokio::test]
    async fn test_extra_user_container_is_appended() {
        let kibana = KibanaBuilder::new("kb", "default")
            .with_monitoring(MONITORING_CLUSTER)
            .with_container(Container {
                name: "proxy".to_string(),
                image: Some("envoy:latest".to_string()),
                ..Default::default()
            })
            .build();
        let composed = compose_pod_template(&static_context(&kibana), &kibana, &base_labels("kb"))
            .await
            .unwrap();

        let names: Vec<&str> = composed.containers().iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["kibana", "filebeat", "metricbeat", "proxy"]);
    }

    #[tokio::test]
    async fn test_user_init_containers_inherit_defaults() {
        let kibana = KibanaBuilder::new("kb", "default")
            .with_init_container(Container {
                name: "install-plugins".to_string(),
                command: Some(vec!["sh".to_string(), "-c".to_string(), "true".to_string()]),
                ..Default::default()
            })
            .build();
        let composed = compose_pod_template(&empty_context(), &kibana, &base_labels("kb"))
            .await
            .unwrap();

        let init = composed.init_containers();
        assert_eq!(init.len(), 2);
        let user = &init[1];
        assert_eq!(user.name, "install-plugins");
        assert_eq!(
            user.image.as_deref(),
            Some("docker.elastic.co/kibana/kibana:8.12.0")
        );
        let mounts = mount_names(user);
        assert!(mounts.contains(&PLUGINS_VOLUME_NAME.to_string()));
        assert!(user.security_context.is_some());
    }

    #[tokio::test]
    async fn test_user_volume_replaces_default() {
        let data = Volume {
            name: "kibana-data".to_string(),
            host_path: Some(k8s_openapi::api::core::v1::HostPathVolumeSource {
                path: "/var/lib/kibana".to_string(),
                ..Default::default()
            }),
            ..Default::default()
        };
        let kibana = KibanaBuilder::new("kb", "default")
            .with_volume(data.clone())
            .build();
        let composed = compose_pod_template(&empty_context(), &kibana, &base_labels("kb"))
            .await
            .unwrap();

        let volumes: Vec<&Volume> = composed
            .volumes()
            .iter()
            .filter(|v| v.name == "kibana-data")
            .collect();
        assert_eq!(volumes, vec![&data]);
    }

    #[tokio::test]
    async fn test_user_mount_on_main_container() {
        let kibana = KibanaBuilder::new("kb", "default")
            .with_container(Container {
                name: KIBANA_CONTAINER_NAME.to_string(),
                volume_mounts: Some(vec![VolumeMount {
                    name: "extra".to_string(),
                    mount_path: "/extra".to_string(),
                    ..Default::default()
                }]),
                ..Default::default()
            })
            .build();
        let composed = compose_pod_template(&empty_context(), &kibana, &base_labels("kb"))
            .await
            .unwrap();

        let mounts = mount_names(&composed.containers()[0]);
        assert_eq!(mounts.last().map(String::as_str), Some("extra"));
        assert!(mounts.contains(&"kibana-data".to_string()));
    }

    #[tokio::test]
    async fn test_composition_is_idempotent() {
        let kibana = KibanaBuilder::new("kb", "default")
            .with_monitoring(MONITORING_CLUSTER)
            .with_kibana_env(&[("SERVER_BASEPATH", "/kb")])
            .with_label("team", "a")
            .build();
        let ctx = static_context(&kibana);

        let first = compose_pod_template(&ctx, &kibana, &base_labels("kb"))
            .await
            .unwrap();
        let second = compose_pod_template(&ctx, &kibana, &base_labels("kb"))
            .await
            .unwrap();
        assert_eq!(first.template(), second.template());
        assert_eq!(first.config_secrets(), second.config_secrets());
    }

    #[tokio::test]
    async fn test_user_mount_takes_over_default_path() {
        let kibana = KibanaBuilder::new("kb", "default")
            .with_volume(Volume {
                name: "data-pvc".to_string(),
                ..Default::default()
            })
            .with_container(Container {
                name: KIBANA_CONTAINER_NAME.to_string(),
                volume_mounts: Some(vec![VolumeMount {
                    name: "data-pvc".to_string(),
                    mount_path: "/usr/share/kibana/data".to_string(),
                    ..Default::default()
                }]),
                ..Default::default()
            })
            .build();
        let composed = compose_pod_template(&empty_context(), &kibana, &base_labels("kb"))
            .await
            .unwrap();

        let containers = composed.containers().iter().chain(composed.init_containers());
        for container in containers {
            let at_data: Vec<&str> = container
                .volume_mounts
                .iter()
                .flatten()
                .filter(|m| m.mount_path == "/usr/share/kibana/data")
                .map(|m| m.name.as_str())
                .collect();
            assert_eq!(at_data, vec!["data-pvc"], "container {}", container.name);
        }
    }

    #[tokio::test]
    async fn test_version_label_without_build_metadata() {
        let kibana = KibanaBuilder::new("kb", "default")
            .with_version("8.12.0+build.1")
            .build();
        let composed = compose_pod_template(&empty_context(), &kibana, &base_labels("kb"))
            .await
            .unwrap();

        assert_eq!(
            composed.labels().unwrap().get(VERSION_LABEL).map(String::as_str),
            Some("8.12.0")
        );
        assert_eq!(
            composed.containers()[0].image.as_deref(),
            Some("docker.elastic.co/kibana/kibana:8.12.0")
        );
    }
}

mod keystore {
    use super::*;

    fn keystore() -> KeystoreResources {
        KeystoreResources {
            init_container: Container {
                name: "elastic-internal-init-keystore".to_string(),
                command: Some(vec!["/usr/bin/env".to_string(), "bash".to_string()]),
                ..Default::default()
            },
            volume: Volume {
                name: "elastic-internal-secure-settings".to_string(),
                ..Default::default()
            },
        }
    }

    #[tokio::test]
    async fn test_keystore_adds_init_container_and_volume() {
        let kibana = KibanaBuilder::new("kb", "default")
            .with_version("7.1.0")
            .build();
        let plain = compose_pod_template(&empty_context(), &kibana, &base_labels("kb"))
            .await
            .unwrap();
        let keystore = keystore();
        let composed = compose_pod_template_with_keystore(
            &empty_context(),
            &kibana,
            Some(&keystore),
            &base_labels("kb"),
        )
        .await
        .unwrap();

        let init: Vec<&str> = composed
            .init_containers()
            .iter()
            .map(|c| c.name.as_str())
            .collect();
        assert_eq!(
            init,
            vec![INIT_CONFIG_CONTAINER_NAME, "elastic-internal-init-keystore"]
        );
        assert_eq!(composed.volumes().len(), plain.volumes().len() + 1);
        assert!(
            composed
                .volumes()
                .iter()
                .any(|v| v.name == "elastic-internal-secure-settings")
        );
    }

    #[tokio::test]
    async fn test_keystore_init_container_inherits_defaults() {
        let kibana = KibanaBuilder::new("kb", "default").build();
        let keystore = keystore();
        let composed = compose_pod_template_with_keystore(
            &empty_context(),
            &kibana,
            Some(&keystore),
            &base_labels("kb"),
        )
        .await
        .unwrap();

        let main = &composed.containers()[0];
        let init = &composed.init_containers()[1];
        assert_eq!(init.image, main.image);
        assert!(init.security_context.is_some());
        let mounts = mount_names(init);
        for mount in mount_names(main) {
            assert!(mounts.contains(&mount), "missing mount {}", mount);
        }
    }

    #[tokio::test]
    async fn test_user_init_containers_follow_keystore() {
        let kibana = KibanaBuilder::new("kb", "default")
            .with_init_container(Container {
                name: "install-plugins".to_string(),
                ..Default::default()
            })
            .build();
        let keystore = keystore();
        let composed = compose_pod_template_with_keystore(
            &empty_context(),
            &kibana,
            Some(&keystore),
            &base_labels("kb"),
        )
        .await
        .unwrap();

        let init: Vec<&str> = composed
            .init_containers()
            .iter()
            .map(|c| c.name.as_str())
            .collect();
        assert_eq!(
            init,
            vec![
                INIT_CONFIG_CONTAINER_NAME,
                "elastic-internal-init-keystore",
                "install-plugins"
            ]
        );
    }
}
