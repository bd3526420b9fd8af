use std::sync::Arc;

use kube::Client;
use tokio_util::sync::CancellationToken;

use crate::controller::config::ComposerConfig;
use crate::resources::secret::{
    CredentialSource, SecretCredentialSource, SecretTrustMaterialSource, TrustMaterialSource,
};

/// Shared context for pod template composition
#[derive(Clone)]
pub struct Context {
    /// Lookup of usernames and passwords
    pub credentials: Arc<dyn CredentialSource>,
    /// Lookup of CA trust volumes
    pub trust: Arc<dyn TrustMaterialSource>,
    /// Operator-wide composer settings
    pub config: ComposerConfig,
    /// Cancellation of the reconcile that owns this composition
    pub cancel: CancellationToken,
}

impl Context {
    pub fn new(
        credentials: Arc<dyn CredentialSource>,
        trust: Arc<dyn TrustMaterialSource>,
    ) -> Self {
        Self {
            credentials,
            trust,
            config: ComposerConfig::default(),
            cancel: CancellationToken::new(),
        }
    }

    /// Context backed by Secrets read through the Kubernetes API
    pub fn from_client(client: Client) -> Self {
        Self::new(
            Arc::new(SecretCredentialSource::new(client.clone())),
            Arc::new(SecretTrustMaterialSource::new(client)),
        )
    }

    pub fn with_config(mut self, config: ComposerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}
