//! Network name sources.

use futures_util::StreamExt;
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue};
use tokio_util::sync::CancellationToken;

use crate::parse::{FieldProbe, extract_display_name};
use crate::{ResolveError, ResolveKey};

const YOUTUBE_BASE: &str = "https://www.youtube.com";

/// Upper bound on bytes read from a single response.
const MAX_BODY_BYTES: usize = 512 * 1024;

/// Bytes before each new chunk that are checked again with it, so a field
/// split across chunks is still seen.
const CHUNK_OVERLAP: usize = 4096;

/// Something that can turn a key into a display name.
///
/// Implementations perform one attempt; retries, timeouts and caching are
/// the resolver's job.
#[async_trait::async_trait]
pub trait NameSource: Send + Sync + 'static {
    async fn lookup(
        &self,
        key: &ResolveKey,
        cancel: &CancellationToken,
    ) -> Result<String, ResolveError>;
}

/// Fetches channel pages and feeds from YouTube.
pub struct YouTubeSource {
    http: reqwest::Client,
    base_url: String,
    placeholders: Vec<String>,
}

impl YouTubeSource {
    pub fn new(placeholders: Vec<String>) -> Self {
        Self::with_base_url(YOUTUBE_BASE, placeholders)
    }

    /// Point the source at another origin (a local test server, a mirror).
    pub fn with_base_url(base_url: impl Into<String>, placeholders: Vec<String>) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("text/html,application/xml"));
        let http = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Falling back to default HTTP client");
                reqwest::Client::new()
            });
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            placeholders,
        }
    }

    /// Profile page for a handle, Atom feed for a channel id.
    pub fn url_for(&self, key: &ResolveKey) -> Result<url::Url, ResolveError> {
        let parse = |s: &str| {
            url::Url::parse(s).map_err(|e| ResolveError::NetworkFailure(format!("bad URL: {e}")))
        };
        match key {
            ResolveKey::Handle(handle) => {
                let mut url = parse(&self.base_url)?;
                url.path_segments_mut()
                    .map_err(|_| ResolveError::NetworkFailure("base URL cannot be a base".into()))?
                    .pop_if_empty()
                    .push(handle);
                Ok(url)
            }
            ResolveKey::ChannelId(id) => {
                let mut url = parse(&format!("{}/feeds/videos.xml", self.base_url))?;
                url.query_pairs_mut().append_pair("channel_id", id);
                Ok(url)
            }
        }
    }

    fn is_placeholder(&self, name: &str) -> bool {
        self.placeholders
            .iter()
            .any(|p| p.eq_ignore_ascii_case(name.trim()))
    }

    /// Read the body until the name field is complete, then drop the
    /// response so the rest of the transfer is abandoned.
    async fn read_until_field(
        &self,
        resp: reqwest::Response,
        probe: &FieldProbe,
        cancel: &CancellationToken,
    ) -> Result<String, ResolveError> {
        let mut stream = resp.bytes_stream();
        let mut body: Vec<u8> = Vec::new();
        loop {
            let chunk = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ResolveError::Cancelled),
                chunk = stream.next() => chunk,
            };
            let Some(chunk) = chunk else {
                break;
            };
            let window = body.len().saturating_sub(CHUNK_OVERLAP);
            body.extend_from_slice(&chunk?);
            if body.len() >= MAX_BODY_BYTES {
                body.truncate(MAX_BODY_BYTES);
                break;
            }
            if probe.is_complete(&String::from_utf8_lossy(&body[window..])) {
                tracing::trace!(bytes = body.len(), "Name field complete, aborting transfer");
                break;
            }
        }
        Ok(String::from_utf8_lossy(&body).into_owned())
    }
}

#[async_trait::async_trait]
impl NameSource for YouTubeSource {
    async fn lookup(
        &self,
        key: &ResolveKey,
        cancel: &CancellationToken,
    ) -> Result<String, ResolveError> {
        let url = self.url_for(key)?;
        tracing::debug!(key = %key, url = %url, "Fetching display name");

        let resp = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ResolveError::Cancelled),
            resp = self.http.get(url).send() => resp?,
        };

        let status = resp.status();
        if !status.is_success() {
            return Err(if status.is_server_error() || status.as_u16() == 429 {
                ResolveError::NetworkFailure(format!("HTTP {status}"))
            } else {
                ResolveError::NotFound
            });
        }

        let probe = FieldProbe::for_key(key);
        let body = self.read_until_field(resp, &probe, cancel).await?;
        extract_display_name(&body, key, |n| self.is_placeholder(n))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handle_url_is_percent_encoded() {
        let source = YouTubeSource::new(vec![]);
        let url = source
            .url_for(&ResolveKey::Handle("@日本".into()))
            .unwrap();
        assert_eq!(url.as_str(), "https://www.youtube.com/@%E6%97%A5%E6%9C%AC");
    }

    #[test]
    fn channel_url_targets_feed() {
        let source = YouTubeSource::with_base_url("http://127.0.0.1:9/", vec![]);
        let url = source
            .url_for(&ResolveKey::ChannelId("UCabcdefghijklmnopqrstuv".into()))
            .unwrap();
        assert_eq!(
            url.as_str(),
            "http://127.0.0.1:9/feeds/videos.xml?channel_id=UCabcdefghijklmnopqrstuv"
        );
    }

    #[tokio::test]
    async fn connection_refused_is_transient() {
        // Port 9 (discard) is closed on test machines.
        let source = YouTubeSource::with_base_url("http://127.0.0.1:9", vec![]);
        let err = source
            .lookup(&ResolveKey::Handle("@x".into()), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.is_transient(), "{err:?}");
    }

    #[tokio::test]
    async fn cancelled_before_send() {
        let source = YouTubeSource::with_base_url("http://127.0.0.1:9", vec![]);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = source
            .lookup(&ResolveKey::Handle("@x".into()), &cancel)
            .await
            .unwrap_err();
        assert_eq!(err, ResolveError::Cancelled);
    }
}
