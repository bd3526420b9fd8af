//! Credential and trust material lookup
//!
//! Sidecars authenticate against the monitoring cluster and the monitored
//! Kibana with credentials stored in Secrets owned by other controllers. The
//! composer only reads them, through the [`CredentialSource`] and
//! [`TrustMaterialSource`] traits, so composition can run against in-memory
//! sources in tests.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Secret, Volume};
use kube::{Api, Client};
use tracing::debug;

use crate::controller::error::{Error, Result};
use crate::resources::common::{CA_FILE_NAME, secret_volume};

/// Identity of a username/password pair
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CredentialKey {
    pub namespace: String,
    /// Secret holding the password under the key `username`
    pub secret_name: String,
    pub username: String,
}

impl CredentialKey {
    pub fn new(
        namespace: impl Into<String>,
        secret_name: impl Into<String>,
        username: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            secret_name: secret_name.into(),
            username: username.into(),
        }
    }
}

impl fmt::Display for CredentialKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "user {} in secret {}/{}",
            self.username, self.namespace, self.secret_name
        )
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Identity of a CA bundle published in a Secret
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TrustKey {
    pub namespace: String,
    pub secret_name: String,
}

impl TrustKey {
    pub fn new(namespace: impl Into<String>, secret_name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            secret_name: secret_name.into(),
        }
    }
}

impl fmt::Display for TrustKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "secret {}/{}", self.namespace, self.secret_name)
    }
}

/// Reference to a Secret carrying `ca.crt`, mountable into a sidecar
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TrustVolume {
    pub namespace: String,
    pub secret_name: String,
}

impl TrustVolume {
    pub fn new(namespace: impl Into<String>, secret_name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            secret_name: secret_name.into(),
        }
    }

    /// Secret volume for a pod in `namespace`; Secrets only mount in their own namespace
    pub fn volume_in(&self, namespace: &str, volume_name: &str) -> Result<Volume> {
        if self.namespace != namespace {
            return Err(Error::TrustMaterialUnavailable(format!(
                "secret {}/{} cannot be mounted by a pod in namespace {}",
                self.namespace, self.secret_name, namespace
            )));
        }
        Ok(secret_volume(volume_name, &self.secret_name))
    }
}

#[async_trait]
pub trait CredentialSource: Send + Sync {
    /// Resolve a username/password pair; absence is [`Error::CredentialUnavailable`]
    async fn credentials(&self, key: &CredentialKey) -> Result<Credentials>;
}

#[async_trait]
pub trait TrustMaterialSource: Send + Sync {
    /// Resolve the CA volume; absence is [`Error::TrustMaterialUnavailable`]
    async fn ca_volume(&self, key: &TrustKey) -> Result<TrustVolume>;
}

/// Read a key of a Secret, accepting both `data` and `stringData`
fn secret_value(secret: &Secret, key: &str) -> Option<String> {
    if let Some(value) = secret.data.as_ref().and_then(|data| data.get(key)) {
        return String::from_utf8(value.0.clone()).ok();
    }
    secret
        .string_data
        .as_ref()
        .and_then(|data| data.get(key))
        .cloned()
}

/// Credentials read from Secrets through the Kubernetes API
#[derive(Clone)]
pub struct SecretCredentialSource {
    client: Client,
}

impl SecretCredentialSource {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl CredentialSource for SecretCredentialSource {
    async fn credentials(&self, key: &CredentialKey) -> Result<Credentials> {
        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), &key.namespace);
        let secret = secrets
            .get_opt(&key.secret_name)
            .await?
            .ok_or_else(|| Error::CredentialUnavailable(format!("{} not found", key)))?;

        let password = secret_value(&secret, &key.username).ok_or_else(|| {
            Error::CredentialUnavailable(format!("{}: no password entry", key))
        })?;

        debug!(secret = %key.secret_name, namespace = %key.namespace, "Resolved credentials");
        Ok(Credentials {
            username: key.username.clone(),
            password,
        })
    }
}

/// CA bundles read from Secrets through the Kubernetes API
#[derive(Clone)]
pub struct SecretTrustMaterialSource {
    client: Client,
}

impl SecretTrustMaterialSource {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl TrustMaterialSource for SecretTrustMaterialSource {
    async fn ca_volume(&self, key: &TrustKey) -> Result<TrustVolume> {
        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), &key.namespace);
        let secret = secrets
            .get_opt(&key.secret_name)
            .await?
            .ok_or_else(|| Error::TrustMaterialUnavailable(format!("{} not found", key)))?;

        if secret_value(&secret, CA_FILE_NAME).is_none() {
            return Err(Error::TrustMaterialUnavailable(format!(
                "{} has no {} entry",
                key, CA_FILE_NAME
            )));
        }

        Ok(TrustVolume::new(&key.namespace, &key.secret_name))
    }
}

/// In-memory credential store
#[derive(Clone, Debug, Default)]
pub struct StaticCredentials {
    entries: BTreeMap<CredentialKey, String>,
}

impl StaticCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: CredentialKey, password: impl Into<String>) -> Self {
        self.entries.insert(key, password.into());
        self
    }
}

#[async_trait]
impl CredentialSource for StaticCredentials {
    async fn credentials(&self, key: &CredentialKey) -> Result<Credentials> {
        self.entries
            .get(key)
            .map(|password| Credentials {
                username: key.username.clone(),
                password: password.clone(),
            })
            .ok_or_else(|| Error::CredentialUnavailable(format!("{} not found", key)))
    }
}

/// In-memory trust store
#[derive(Clone, Debug, Default)]
pub struct StaticTrustMaterial {
    entries: BTreeMap<TrustKey, TrustVolume>,
}

impl StaticTrustMaterial {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: TrustKey) -> Self {
        let volume = TrustVolume::new(&key.namespace, &key.secret_name);
        self.entries.insert(key, volume);
        self
    }
}

#[async_trait]
impl TrustMaterialSource for StaticTrustMaterial {
    async fn ca_volume(&self, key: &TrustKey) -> Result<TrustVolume> {
        self.entries
            .get(key)
            .cloned()
            .ok_or_else(|| Error::TrustMaterialUnavailable(format!("{} not found", key)))
    }
}
