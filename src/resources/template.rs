//! Sidecar configuration templates
//!
//! Beat configurations are rendered with minijinja. Undefined parameters are
//! errors, and every user-influenced value goes through the `quote` filter so
//! that it lands in the YAML output as a double-quoted scalar.
//!
//! Beats expand `${VAR}` from their own environment at startup; those
//! references pass through rendering untouched.

use minijinja::{Environment, UndefinedBehavior};
use serde::Serialize;

use crate::controller::error::Result;

pub const METRICBEAT_TEMPLATE_NAME: &str = "metricbeat.yml";

pub const METRICBEAT_TEMPLATE: &str = r#"metricbeat.modules:
- module: kibana
  metricsets:
  - stats
  period: 10s
  xpack.enabled: true
  hosts:
  - {{ kibana_url | quote }}
  basepath: {{ base_path | quote }}
  username: {{ kibana_username | quote }}
  password: {{ kibana_password | quote }}
{% if kibana_ca_path is defined %}
  ssl.certificate_authorities:
  - {{ kibana_ca_path | quote }}
  ssl.verification_mode: certificate
{% endif %}
processors:
- add_cloud_metadata: {}
- add_host_metadata: {}
name: ${POD_NAME}
path.data: {{ data_path | quote }}
path.logs: {{ logs_path | quote }}
output.elasticsearch:
  hosts:
  - {{ output_url | quote }}
  username: {{ output_username | quote }}
  password: {{ output_password | quote }}
  ssl.certificate_authorities:
  - {{ output_ca_path | quote }}
"#;

pub const FILEBEAT_TEMPLATE_NAME: &str = "filebeat.yml";

pub const FILEBEAT_TEMPLATE: &str = r#"filebeat.inputs:
- type: filestream
  id: kibana-logs
  paths:
  - {{ kibana_logs_glob | quote }}
  parsers:
  - ndjson:
      overwrite_keys: true
      add_error_key: true
      expand_keys: true
processors:
- add_cloud_metadata: {}
- add_host_metadata: {}
name: ${POD_NAME}
path.data: {{ data_path | quote }}
path.logs: {{ logs_path | quote }}
output.elasticsearch:
  hosts:
  - {{ output_url | quote }}
  username: {{ output_username | quote }}
  password: {{ output_password | quote }}
  ssl.certificate_authorities:
  - {{ output_ca_path | quote }}
"#;

/// Render a value as a double-quoted YAML scalar
fn quote(value: String) -> String {
    serde_json::Value::String(value).to_string()
}

/// Renders named templates against serializable parameters
pub struct TemplateRenderer {
    env: Environment<'static>,
}

impl Default for TemplateRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateRenderer {
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        env.set_keep_trailing_newline(true);
        env.set_trim_blocks(true);
        env.add_filter("quote", quote);
        Self { env }
    }

    /// Render `source` under `name`, which appears in error messages
    pub fn render<P: Serialize>(&self, name: &str, source: &str, params: &P) -> Result<String> {
        Ok(self.env.render_named_str(name, source, params)?)
    }
}
