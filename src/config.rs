use crate::blind_sigs::MAX_INPUT_LEN;
use crate::error::{Error, Result};
use crate::keys::ServicePublicKey;
use crate::pipeline::IdentifierPipeline;
use crate::quota::{ChainClient, TopUpConfig, DEFAULT_TOP_UP_AMOUNT};
use crate::service::HttpSignatureService;
use alloy_primitives::{Address, U256};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 5;

fn default_top_up_amount() -> U256 {
    DEFAULT_TOP_UP_AMOUNT
}

fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

fn default_max_input_len() -> usize {
    MAX_INPUT_LEN
}

/// Client configuration, usually loaded from JSON.
///
/// Credentials are not part of the configuration; they are passed per request
/// as an [`AuthContext`](crate::AuthContext).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientConfig {
    /// Base URL of the identifier service.
    pub service_url: String,
    /// Base64 service public key.
    pub public_key: String,
    pub stable_token: Address,
    pub payments: Address,
    /// Amount paid per top-up, in the stable token's smallest unit.
    #[serde(default = "default_top_up_amount")]
    pub top_up_amount: U256,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_max_input_len")]
    pub max_input_len: usize,
}

impl ClientConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| Error::Config(format!("cannot parse configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_json(&json)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.service_url.starts_with("https://") || self.service_url.starts_with("http://")) {
            return Err(Error::Config(format!(
                "service url {:?} must be http(s)",
                self.service_url
            )));
        }
        self.service_public_key()?;
        if self.top_up_amount.is_zero() {
            return Err(Error::Config("top-up amount must be positive".to_string()));
        }
        if self.request_timeout_secs == 0 {
            return Err(Error::Config("request timeout must be positive".to_string()));
        }
        if self.max_input_len == 0 {
            return Err(Error::Config("max input length must be positive".to_string()));
        }
        Ok(())
    }

    pub fn service_public_key(&self) -> Result<ServicePublicKey> {
        ServicePublicKey::from_base64(&self.public_key)
            .map_err(|e| Error::Config(format!("invalid service public key: {}", e)))
    }

    pub fn top_up_config(&self) -> TopUpConfig {
        TopUpConfig::new(self.stable_token, self.payments).with_amount(self.top_up_amount)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Wires an HTTP identifier service and `chain` into a pipeline.
    pub fn build_pipeline(&self, chain: Arc<dyn ChainClient>) -> Result<IdentifierPipeline> {
        self.validate()?;
        let service = HttpSignatureService::new(self.service_url.clone(), self.request_timeout());
        Ok(IdentifierPipeline::new(
            Arc::new(service),
            chain,
            self.service_public_key()?,
            self.top_up_config(),
        )
        .with_max_input_len(self.max_input_len))
    }
}
