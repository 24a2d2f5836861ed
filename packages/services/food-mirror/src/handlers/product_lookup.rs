use std::time::Duration;

use serde_json::Value;
use url::Url;

use crate::clients::Transport;
use crate::config::Config;
use crate::handlers::recent_pages::{RetryPolicy, DISPLAY_FIELDS};
use crate::mapping::is_valid_code;
use crate::models::*;

/// Fetches single products from the catalog's product endpoint.
pub struct ProductLookup<T> {
    transport: T,
    base: Url,
    policy: RetryPolicy,
    timeout: Duration,
}

impl<T: Transport> ProductLookup<T> {
    pub fn new(transport: T, cfg: &Config) -> Result<Self> {
        let base = Url::parse(&cfg.base_url)
            .map_err(|e| MirrorError::Configuration(format!("invalid base URL {:?}: {}", cfg.base_url, e)))?;
        if base.cannot_be_a_base() {
            return Err(MirrorError::Configuration(format!("base URL {:?} cannot carry a path", cfg.base_url)));
        }

        Ok(Self {
            transport,
            base,
            policy: RetryPolicy {
                max_attempts: cfg.page_max_attempts.max(1),
                base_backoff: Duration::from_millis(cfg.http_retry_backoff_ms),
            },
            timeout: Duration::from_millis(cfg.http_timeout_ms),
        })
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// `{base}/api/v2/product/{code}.json`, with the code as one escaped path segment.
    pub fn product_url(&self, code: &str) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments
                .pop_if_empty()
                .extend(["api", "v2", "product", &format!("{}.json", code)]);
        }
        url.query_pairs_mut().append_pair("fields", DISPLAY_FIELDS);
        url
    }

    /// The raw product for `code`, or `None` when the catalog does not know it.
    ///
    /// Transport, decode and 5xx/429 failures are retried like page fetches;
    /// the last error is returned once attempts run out.
    pub async fn fetch_product(&self, code: &str) -> Result<Option<Value>> {
        let code = code.trim();
        if !is_valid_code(code) {
            return Err(MirrorError::Configuration(format!("{:?} is not a product code", code)));
        }

        let url = self.product_url(code);
        let mut attempts: u32 = 0;
        loop {
            attempts += 1;
            match self.fetch_once(&url).await {
                Ok(product) => {
                    tracing::info!(code, found = product.is_some(), attempt = attempts, "product lookup");
                    return Ok(product);
                }
                Err(e) if e.is_retryable() && attempts < self.policy.max_attempts => {
                    let backoff = self.policy.backoff(attempts);
                    tracing::warn!(
                        code,
                        error = %e,
                        attempt = attempts,
                        backoff_ms = backoff.as_millis() as u64,
                        "product lookup failed; retrying"
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn fetch_once(&self, url: &Url) -> Result<Option<Value>> {
        let response = self.transport.fetch(url, self.timeout).await?;
        if response.status == 404 {
            return Ok(None);
        }
        if !response.is_success() {
            return Err(MirrorError::Remote {
                status: response.status,
                body_preview: response.body_preview(),
            });
        }
        extract_product(&response.body)
    }
}

/// The `product` object of a product response, if it carries a non-empty code.
pub fn extract_product(body: &[u8]) -> Result<Option<Value>> {
    let value: Value = serde_json::from_slice(body)
        .map_err(|e| MirrorError::Decode(format!("response is not JSON: {}", e)))?;
    let Value::Object(mut map) = value else {
        return Err(MirrorError::Decode("response is not a JSON object".into()));
    };

    let product = match map.remove("product") {
        Some(product @ Value::Object(_)) => product,
        _ => return Ok(None),
    };
    let has_code = RawProduct::from_value(product.clone())
        .code
        .as_ref()
        .and_then(RawField::as_text)
        .is_some();
    Ok(has_code.then_some(product))
}
