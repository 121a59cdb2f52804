use async_trait::async_trait;
use policy::ActionParams;
use serde_json::{Value, json};
use tracing::{debug, error, info, warn};

use crate::{Provider, ProviderError};

/// Writes `LOG` actions to the tracing subscriber.
#[derive(Debug, Default)]
pub struct LogProvider;

#[async_trait]
impl Provider for LogProvider {
    async fn execute(&self, params: &ActionParams) -> Result<Value, ProviderError> {
        let ActionParams::Log { level, message } = params else {
            return Err(ProviderError::Unsupported(params.kind()));
        };
        match level.to_ascii_lowercase().as_str() {
            "debug" => debug!(target: "warden::agent", "{message}"),
            "info" => info!(target: "warden::agent", "{message}"),
            "warn" => warn!(target: "warden::agent", "{message}"),
            "error" => error!(target: "warden::agent", "{message}"),
            other => {
                let error = format!("unknown log level '{other}'");
                return Err(ProviderError::InvalidInput(error));
            }
        }
        Ok(json!({ "logged": true, "level": level }))
    }
}
