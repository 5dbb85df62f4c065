use crate::cache::{CacheStore, CachedResponse};
use crate::parser::FeedParser;
use crate::traits::FeedSource;
use crate::types::{Feed, FetchConfig, FetchError, SourceId};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::{
    HeaderMap, CACHE_CONTROL, ETAG, IF_MODIFIED_SINCE, IF_NONE_MATCH, LAST_MODIFIED,
};
use reqwest::{Client, Response, StatusCode};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info};
use url::Url;

/// Fetches feeds over HTTP, consulting a shared [`CacheStore`].
pub struct HttpFetcher {
    client: Client,
    config: FetchConfig,
    cache: Arc<dyn CacheStore>,
}

impl HttpFetcher {
    pub fn new(config: FetchConfig, cache: Arc<dyn CacheStore>) -> Result<Self, FetchError> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .gzip(true)
            .deflate(true)
            .brotli(true)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .build()?;

        Ok(Self {
            client,
            config,
            cache,
        })
    }

    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    async fn fetch_body(&self, source: &SourceId, url: Url) -> Result<String, FetchError> {
        let key = source.as_str();
        let now = Utc::now();
        let cached = self.cache.get(key).await;

        if let Some(cached) = &cached {
            if cached.is_fresh(now) {
                debug!("Serving fresh cached response for {}", source);
                return Ok(cached.body.clone());
            }
        }

        let response = self
            .fetch_with_conditional_headers(url, cached.as_ref())
            .await?;
        let status = response.status();
        let policy = CachePolicy::from_headers(response.headers());

        if status == StatusCode::NOT_MODIFIED {
            if let Some(cached) = cached {
                debug!("Feed not modified: {}", source);
                self.cache
                    .put(key, cached.revalidated(now, policy.max_age))
                    .await;
                return Ok(cached.body);
            }
            // We sent no validators, so a 304 here is a server bug.
            return Err(FetchError::Status {
                status: status.as_u16(),
            });
        }

        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
            });
        }

        let etag = header_string(response.headers(), ETAG.as_str());
        let last_modified = header_string(response.headers(), LAST_MODIFIED.as_str());

        let limit = self.config.max_feed_size_mb * 1024 * 1024;
        if let Some(content_length) = response.content_length() {
            if content_length as usize > limit {
                return Err(FetchError::Malformed(format!(
                    "feed too large: {} bytes",
                    content_length
                )));
            }
        }

        let body = read_limited(response, limit).await?;

        info!("Fetched feed {} ({} bytes)", source, body.len());

        if policy.no_store {
            debug!("Not caching {}: no-store", source);
        } else {
            self.cache
                .put(
                    key,
                    CachedResponse {
                        body: body.clone(),
                        etag,
                        last_modified,
                        stored_at: now,
                        max_age: policy.max_age,
                    },
                )
                .await;
        }

        Ok(body)
    }

    async fn fetch_with_conditional_headers(
        &self,
        url: Url,
        cached: Option<&CachedResponse>,
    ) -> Result<Response, FetchError> {
        let mut request = self.client.get(url);

        if let Some(cached) = cached {
            if let Some(etag) = &cached.etag {
                request = request.header(IF_NONE_MATCH, etag);
            }
            if let Some(last_modified) = &cached.last_modified {
                request = request.header(IF_MODIFIED_SINCE, last_modified);
            }
        }

        let response = request.send().await?;
        Ok(response)
    }
}

#[async_trait]
impl FeedSource for HttpFetcher {
    async fn fetch(&self, source: &SourceId, deadline: Instant) -> Result<Feed, FetchError> {
        let url = Url::parse(source.as_str()).map_err(|e| FetchError::InvalidSource {
            id: source.clone(),
            reason: e.to_string(),
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(FetchError::InvalidSource {
                id: source.clone(),
                reason: format!("unsupported scheme {}", url.scheme()),
            });
        }

        if deadline <= Instant::now() {
            return Err(FetchError::Timeout);
        }

        let body = tokio::time::timeout_at(deadline, self.fetch_body(source, url))
            .await
            .map_err(|_| FetchError::Timeout)??;

        FeedParser::parse(source, body.as_bytes())
    }
}

#[derive(Debug, Default, PartialEq)]
struct CachePolicy {
    no_store: bool,
    max_age: Option<u64>,
}

impl CachePolicy {
    fn from_headers(headers: &HeaderMap) -> Self {
        let mut policy = Self::default();
        let Some(value) = header_string(headers, CACHE_CONTROL.as_str()) else {
            return policy;
        };

        for directive in value.split(',') {
            let directive = directive.trim().to_ascii_lowercase();
            if directive == "no-store" {
                policy.no_store = true;
            } else if directive == "no-cache" {
                policy.max_age = Some(0);
            } else if let Some(secs) = directive.strip_prefix("max-age=") {
                if policy.max_age.is_none() {
                    policy.max_age = secs.trim_matches('"').parse().ok();
                }
            }
        }

        policy
    }
}

/// Reads the body chunk by chunk, giving up as soon as it grows past `limit` bytes.
async fn read_limited(mut response: Response, limit: usize) -> Result<String, FetchError> {
    let mut body = Vec::new();
    while let Some(chunk) = response.chunk().await? {
        if body.len() + chunk.len() > limit {
            return Err(FetchError::Malformed(format!(
                "feed too large: more than {} bytes",
                limit
            )));
        }
        body.extend_from_slice(&chunk);
    }
    Ok(String::from_utf8_lossy(&body).into_owned())
}

fn header_string(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}
