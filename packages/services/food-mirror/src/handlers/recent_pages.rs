use std::time::Duration;

use futures::stream::{self, Stream};
use serde_json::Value;
use url::Url;

use crate::clients::Transport;
use crate::config::Config;
use crate::models::*;

/// Fields requested from the catalog; enough for display and the raw payload.
pub const DISPLAY_FIELDS: &str = "code,product_name,brands,categories,countries,nutriscore_grade,\
ecoscore_grade,nova_group,ecoscore_data,environmental_score,image_small_url,image_front_small_url,\
origins,origins_tags,manufacturing_places,manufacturing_places_tags,countries_tags,additives_n,\
additives_tags,nutriments,last_modified_t,created_t,quantity";

const SEARCH_PATH: &str = "/cgi/search.pl";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_backoff: Duration,
}

impl RetryPolicy {
    /// Delay after the given failed attempt (1-based): base, 2x base, 4x base...
    pub fn backoff(&self, failed_attempt: u32) -> Duration {
        let shift = failed_attempt.saturating_sub(1).min(16);
        self.base_backoff.saturating_mul(1u32 << shift)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageQuery {
    pub country: String,
    pub page_size: u32,
    pub max_pages: u32,
}

enum PageFailure {
    Fatal(MirrorError),
    Exhausted { attempts: u32, error: MirrorError },
}

struct Cursor {
    query: PageQuery,
    next_page: u32,
    country_filter: bool,
    done: bool,
}

/// Pulls the "most recently modified" listing one page at a time.
pub struct RecentPagesFetcher<T> {
    transport: T,
    endpoint: Url,
    policy: RetryPolicy,
    timeout: Duration,
    request_delay: Duration,
}

impl<T: Transport> RecentPagesFetcher<T> {
    pub fn new(transport: T, cfg: &Config) -> Result<Self> {
        let endpoint = Url::parse(&cfg.base_url)
            .and_then(|base| base.join(SEARCH_PATH))
            .map_err(|e| MirrorError::Configuration(format!("invalid base URL {:?}: {}", cfg.base_url, e)))?;

        Ok(Self {
            transport,
            endpoint,
            policy: RetryPolicy {
                max_attempts: cfg.page_max_attempts.max(1),
                base_backoff: Duration::from_millis(cfg.http_retry_backoff_ms),
            },
            timeout: Duration::from_millis(cfg.http_timeout_ms),
            request_delay: Duration::from_millis(cfg.request_delay_ms),
        })
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_request_delay(mut self, delay: Duration) -> Self {
        self.request_delay = delay;
        self
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    pub fn page_url(&self, page: u32, query: &PageQuery, with_country: bool) -> Url {
        let mut url = self.endpoint.clone();
        {
            let mut pairs = url.query_pairs_mut();
            pairs
                .append_pair("action", "process")
                .append_pair("json", "1")
                .append_pair("page", &page.to_string())
                .append_pair("page_size", &query.page_size.to_string())
                .append_pair("sort_by", "last_modified_t")
                .append_pair("fields", DISPLAY_FIELDS);
            if with_country {
                pairs.append_pair("countries_tags_en", &query.country);
            }
        }
        url
    }

    /// Lazily yields one outcome per page, in page order.
    ///
    /// Retryable failures are retried with exponential backoff and then reported as
    /// `PageOutcome::Skipped`. A fatal error is yielded once and ends the stream, as
    /// does a page shorter than `page_size`.
    pub fn fetch_recent_pages(&self, query: PageQuery) -> impl Stream<Item = Result<PageOutcome>> + '_ {
        let cursor = Cursor {
            query,
            next_page: 1,
            country_filter: true,
            done: false,
        };

        stream::unfold(cursor, move |mut cursor| async move {
            if cursor.done || cursor.next_page > cursor.query.max_pages {
                return None;
            }

            let page = cursor.next_page;
            cursor.next_page += 1;
            if page > 1 && !self.request_delay.is_zero() {
                tokio::time::sleep(self.request_delay).await;
            }

            let item = match self.fetch_page(page, &mut cursor).await {
                Ok(records) => {
                    if records.len() < cursor.query.page_size as usize {
                        tracing::debug!(page, records = records.len(), "short page; stopping");
                        cursor.done = true;
                    }
                    Ok(PageOutcome::Fetched { page, records })
                }
                Err(PageFailure::Fatal(e)) => {
                    cursor.done = true;
                    Err(e)
                }
                Err(PageFailure::Exhausted { attempts, error }) => {
                    tracing::warn!(page, attempts, error = %error, "giving up on page; skipping");
                    Ok(PageOutcome::Skipped {
                        page,
                        attempts,
                        reason: error.to_string(),
                    })
                }
            };
            Some((item, cursor))
        })
    }

    async fn fetch_page(&self, page: u32, cursor: &mut Cursor) -> std::result::Result<Vec<Value>, PageFailure> {
        let mut attempts: u32 = 0;
        loop {
            let url = self.page_url(page, &cursor.query, cursor.country_filter);
            match self.fetch_once(&url).await {
                Ok(records) => {
                    tracing::info!(page, records = records.len(), attempt = attempts + 1, "fetched page");
                    return Ok(records);
                }
                Err(MirrorError::Remote { status, .. })
                    if cursor.country_filter && matches!(status, 400 | 404 | 422) =>
                {
                    tracing::warn!(
                        page,
                        status,
                        country = %cursor.query.country,
                        "catalog rejected the country filter; continuing without it"
                    );
                    cursor.country_filter = false;
                }
                Err(e) if e.is_fatal() => return Err(PageFailure::Fatal(e)),
                Err(e) => {
                    attempts += 1;
                    if !e.is_retryable() || attempts >= self.policy.max_attempts {
                        return Err(PageFailure::Exhausted { attempts, error: e });
                    }
                    let backoff = self.policy.backoff(attempts);
                    tracing::warn!(
                        page,
                        error = %e,
                        attempt = attempts,
                        backoff_ms = backoff.as_millis() as u64,
                        "page fetch failed; retrying"
                    );
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }

    async fn fetch_once(&self, url: &Url) -> Result<Vec<Value>> {
        let response = self.transport.fetch(url, self.timeout).await?;
        if !response.is_success() {
            return Err(MirrorError::Remote {
                status: response.status,
                body_preview: response.body_preview(),
            });
        }
        extract_products(&response.body)
    }
}

/// The `products` array of a search response; absent or null means an empty page.
pub fn extract_products(body: &[u8]) -> Result<Vec<Value>> {
    let value: Value = serde_json::from_slice(body)
        .map_err(|e| MirrorError::Decode(format!("response is not JSON: {}", e)))?;
    let Value::Object(mut map) = value else {
        return Err(MirrorError::Decode("response is not a JSON object".into()));
    };
    match map.remove("products") {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(products)) => Ok(products),
        Some(other) => Err(MirrorError::Decode(format!(
            "`products` is not an array (found {})",
            json_type(&other)
        ))),
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
