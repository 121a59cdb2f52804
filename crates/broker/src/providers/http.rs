use async_trait::async_trait;
use policy::ActionParams;
use reqwest::Method;
use serde_json::{Value, json};

use crate::{Provider, ProviderError};

const MAX_BODY_BYTES: usize = 64 * 1024;

/// Performs `NETWORK_FETCH` actions over HTTP.
///
/// Host filtering happens in the policy engine before this runs.
#[derive(Debug, Clone, Default)]
pub struct HttpFetchProvider {
    client: reqwest::Client,
}

impl HttpFetchProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Provider for HttpFetchProvider {
    async fn execute(&self, params: &ActionParams) -> Result<Value, ProviderError> {
        let ActionParams::NetworkFetch { url, method } = params else {
            return Err(ProviderError::Unsupported(params.kind()));
        };
        let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes())
            .map_err(|_| ProviderError::InvalidInput(format!("bad HTTP method '{method}'")))?;

        let mut response = self
            .client
            .request(method, url)
            .send()
            .await
            .map_err(|e| ProviderError::Execution(format!("network: {e}")))?;

        let status = response.status();
        let mut body = Vec::new();
        let mut truncated = false;
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| ProviderError::Execution(format!("read body: {e}")))?
        {
            let (kept, more) = cap_chunk(&chunk, MAX_BODY_BYTES - body.len());
            body.extend_from_slice(kept);
            if more {
                truncated = true;
                break;
            }
        }

        Ok(json!({
            "status": status.as_u16(),
            "ok": status.is_success(),
            "body": String::from_utf8_lossy(&body),
            "truncated": truncated,
        }))
    }
}

/// The part of `chunk` that fits in `room` bytes, and whether any was cut.
fn cap_chunk(chunk: &[u8], room: usize) -> (&[u8], bool) {
    if chunk.len() > room {
        (&chunk[..room], true)
    } else {
        (chunk, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunks_stop_at_the_cap() {
        assert_eq!(cap_chunk(b"abcdef", 10), (&b"abcdef"[..], false));
        assert_eq!(cap_chunk(b"abcdef", 4), (&b"abcd"[..], true));
        assert_eq!(cap_chunk(b"abcdef", 0), (&b""[..], true));
        assert_eq!(cap_chunk(b"", 0), (&b""[..], false));
    }

    #[tokio::test]
    async fn rejects_other_kinds_and_bad_methods() {
        let provider = HttpFetchProvider::new();
        assert!(matches!(
            provider.execute(&ActionParams::log("x")).await,
            Err(ProviderError::Unsupported(_))
        ));
        let params = ActionParams::NetworkFetch {
            url: "https://example.com".into(),
            method: "GE T".into(),
        };
        assert!(matches!(provider.execute(&params).await, Err(ProviderError::InvalidInput(_))));
    }
}
