//! Shared HTTP client, built on `ureq::Agent` (`Agent::new_with_config`,
//! `user_agent`, `timeout_global`) with `http_status_as_error(false)` since
//! the engine needs to read non-200 statuses (429 in particular) itself
//! rather than have `ureq` turn them into errors.

use std::sync::RwLock;
use std::time::Duration;

use serde_json::Value;
use ureq::Agent;

use crate::error::FetchError;

const DESKTOP_USER_AGENT: &str =
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";
const ACCEPT: &str = "application/json,text/html,application/xml;q=0.9,*/*;q=0.8";
const ACCEPT_LANGUAGE: &str = "en-US,en;q=0.9";

/// A fetched response, normalized to status, headers and body.
pub struct FetchedResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl FetchedResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json(&self) -> Result<Value, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }
}

/// One `ureq::Agent` shared across every request this process makes, plus
/// the Vatican warm-up/Referer state. A single `HttpClient` is shared across
/// the whole engine, which already keeps per-host behavior (pooling,
/// keep-alive) inside `ureq` itself.
pub struct HttpClient {
    agent: Agent,
    vatican_referer: RwLock<Option<String>>,
}

impl HttpClient {
    pub fn new() -> Self {
        let agent: Agent = Agent::config_builder()
            .user_agent(DESKTOP_USER_AGENT)
            .http_status_as_error(false)
            .timeout_global(Some(Duration::from_secs(30)))
            .build()
            .into();
        Self {
            agent,
            vatican_referer: RwLock::new(None),
        }
    }

    /// Performs a one-time warm-up GET against the Vatican viewer URL for
    /// `doc_id` and remembers it as the `Referer` for subsequent Vatican
    /// requests on this client.
    pub fn warm_up_vatican(&self, viewer_url: &str, timeout: Duration) {
        if self.vatican_referer.read().unwrap().is_some() {
            return;
        }
        if self.get(viewer_url, timeout).is_ok() {
            *self.vatican_referer.write().unwrap() = Some(viewer_url.to_string());
        }
    }

    pub fn get(&self, url: &str, timeout: Duration) -> Result<FetchedResponse, FetchError> {
        let mut request = self
            .agent
            .get(url)
            .header("Accept", ACCEPT)
            .header("Accept-Language", ACCEPT_LANGUAGE)
            .config()
            .timeout_global(Some(timeout))
            .build();

        if url.contains("digi.vatlib.it") {
            if let Some(referer) = self.vatican_referer.read().unwrap().as_deref() {
                request = request.header("Referer", referer);
            }
        }

        let mut response = request
            .call()
            .map_err(|source| FetchError::Transport {
                url: url.to_string(),
                source: Box::new(source),
            })?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .map(|(name, value)| (name.to_string(), value.to_str().unwrap_or_default().to_string()))
            .collect();
        let mut body = Vec::new();
        std::io::copy(&mut response.body_mut().as_reader(), &mut body)?;

        Ok(FetchedResponse { status, headers, body })
    }

    /// Convenience wrapper over `get` that also parses and validates the
    /// response as JSON.
    pub fn get_json(&self, url: &str, timeout: Duration) -> Result<Value, FetchError> {
        let response = self.get(url, timeout)?;
        if !response.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: response.status,
            });
        }
        response
            .json()
            .map_err(|_| FetchError::Status { url: url.to_string(), status: response.status })
    }
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::new()
    }
}
