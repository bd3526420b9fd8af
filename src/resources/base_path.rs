//! Base path resolution
//!
//! Kibana can be served below a path prefix. The prefix and whether Kibana
//! itself strips it decide the readiness probe path and the endpoint the
//! metrics sidecar scrapes. Sources are checked in order: env vars on the
//! user's `kibana` container, nested `server` config, flattened dotted config
//! keys. The first source that sets either field supplies both.

use serde_json::Value;

use crate::crd::KibanaSpec;
use crate::resources::common::KIBANA_CONTAINER_NAME;

pub const BASE_PATH_ENV: &str = "SERVER_BASEPATH";
pub const REWRITE_BASE_PATH_ENV: &str = "SERVER_REWRITEBASEPATH";

const SERVER_KEY: &str = "server";
const BASE_PATH_KEY: &str = "basePath";
const REWRITE_BASE_PATH_KEY: &str = "rewriteBasePath";

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BasePath {
    pub path: String,
    pub rewrite: bool,
}

impl BasePath {
    pub fn new(path: impl Into<String>, rewrite: bool) -> Self {
        Self {
            path: path.into(),
            rewrite,
        }
    }

    /// Prefix of every path served by Kibana, empty unless Kibana rewrites
    pub fn probe_prefix(&self) -> &str {
        if self.rewrite {
            self.path.trim_end_matches('/')
        } else {
            ""
        }
    }

    /// Full path of `component` as served by Kibana
    pub fn probe_path(&self, component: &str) -> String {
        format!("{}{}", self.probe_prefix(), component)
    }
}

/// One precedence level: both fields as found, either may be absent
#[derive(Default)]
struct Candidate {
    path: Option<String>,
    rewrite: Option<bool>,
}

impl Candidate {
    fn is_set(&self) -> bool {
        self.path.is_some() || self.rewrite.is_some()
    }

    fn into_base_path(self) -> BasePath {
        BasePath {
            path: self.path.unwrap_or_default(),
            rewrite: self.rewrite.unwrap_or(false),
        }
    }
}

fn parse_rewrite(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::String(s) => s.trim().eq_ignore_ascii_case("true"),
        _ => false,
    }
}

fn parse_path(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

fn from_env(spec: &KibanaSpec) -> Candidate {
    let mut candidate = Candidate::default();
    let env = spec
        .pod_template
        .as_ref()
        .and_then(|template| template.spec.as_ref())
        .and_then(|pod| {
            pod.containers
                .iter()
                .find(|c| c.name == KIBANA_CONTAINER_NAME)
        })
        .and_then(|container| container.env.as_ref());

    for var in env.into_iter().flatten() {
        // Only literal values, references resolve at runtime
        let Some(value) = var.value.as_ref() else {
            continue;
        };
        match var.name.as_str() {
            BASE_PATH_ENV => candidate.path = Some(value.clone()),
            REWRITE_BASE_PATH_ENV => {
                candidate.rewrite = Some(value.trim().eq_ignore_ascii_case("true"))
            }
            _ => {}
        }
    }
    candidate
}

fn from_nested(config: &Value) -> Candidate {
    let Some(server) = config.get(SERVER_KEY).filter(|v| v.is_object()) else {
        return Candidate::default();
    };
    Candidate {
        path: server.get(BASE_PATH_KEY).and_then(parse_path),
        rewrite: server.get(REWRITE_BASE_PATH_KEY).map(parse_rewrite),
    }
}

fn from_flattened(config: &Value) -> Candidate {
    let path_key = format!("{}.{}", SERVER_KEY, BASE_PATH_KEY);
    let rewrite_key = format!("{}.{}", SERVER_KEY, REWRITE_BASE_PATH_KEY);
    Candidate {
        path: config.get(path_key.as_str()).and_then(parse_path),
        rewrite: config.get(rewrite_key.as_str()).map(parse_rewrite),
    }
}

/// Resolve the effective base path of a Kibana
pub fn resolve_base_path(spec: &KibanaSpec) -> BasePath {
    let env = from_env(spec);
    if env.is_set() {
        return env.into_base_path();
    }

    if let Some(config) = spec.config.as_ref() {
        let nested = from_nested(config);
        if nested.is_set() {
            return nested.into_base_path();
        }
        let flattened = from_flattened(config);
        if flattened.is_set() {
            return flattened.into_base_path();
        }
    }

    BasePath::default()
}
