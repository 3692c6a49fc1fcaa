//! Thin REST client wrapper: the HTTP transport contract described in
//! `spec.md` §6. Authentication itself (token acquisition/refresh) is out
//! of scope; this client only carries an opaque bearer string.

use std::time::Duration;

use serde_json::Value;

use crate::Error;

/// Configuration the core accepts; sourced externally (profile/env, CLI
/// flags) and handed to [`RemoteClient::new`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    pub bearer_token: String,
    pub request_timeout: Duration,
    /// Concurrency for object GETs, independent of list-page concurrency
    /// (`spec.md` §5: "object fetches may parallelize up to 8").
    pub object_fetch_concurrency: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            bearer_token: String::new(),
            request_timeout: Duration::from_secs(30),
            object_fetch_concurrency: 8,
        }
    }
}

/// A thin wrapper over [`reqwest::Client`] exposing the JSON verbs the
/// State Client and adapters need. Every method returns a transport-level
/// [`Error`]; HTTP status interpretation (retryable vs fatal) is left to
/// the caller, per `spec.md` §4.3 step 4 (the Executor owns retry policy).
#[derive(Clone)]
pub struct RemoteClient {
    http: reqwest::Client,
    config: ClientConfig,
}

/// A raw response: status code plus parsed JSON body (or `Value::Null` if
/// the body was empty).
pub struct RawResponse {
    pub status: u16,
    pub body: Value,
}

impl RemoteClient {
    pub fn new(config: ClientConfig) -> Result<Self, Error> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(Error::Transport)?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path.trim_start_matches('/'))
    }

    async fn send(&self, req: reqwest::RequestBuilder) -> Result<RawResponse, Error> {
        let resp = req
            .bearer_auth(&self.config.bearer_token)
            .header("accept", "application/json")
            .send()
            .await
            .map_err(Error::Transport)?;
        let status = resp.status().as_u16();
        let bytes = resp.bytes().await.map_err(Error::Transport)?;
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).map_err(Error::Decode)?
        };
        Ok(RawResponse { status, body })
    }

    pub async fn get(&self, path: &str) -> Result<RawResponse, Error> {
        self.send(self.http.get(self.url(path))).await
    }

    pub async fn post(&self, path: &str, body: &Value) -> Result<RawResponse, Error> {
        self.send(self.http.post(self.url(path)).json(body)).await
    }

    pub async fn patch(&self, path: &str, body: &Value) -> Result<RawResponse, Error> {
        self.send(self.http.patch(self.url(path)).json(body)).await
    }

    pub async fn delete(&self, path: &str) -> Result<RawResponse, Error> {
        self.send(self.http.delete(self.url(path))).await
    }
}

/// Classification used by the Executor's retry policy (`spec.md` §4.3
/// step 4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Success,
    NotFound,
    Transient,
    Fatal,
}

pub fn classify(status: u16) -> Disposition {
    match status {
        200..=299 => Disposition::Success,
        404 => Disposition::NotFound,
        408 | 429 => Disposition::Transient,
        500..=599 if status != 501 && status != 505 => Disposition::Transient,
        _ => Disposition::Fatal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_status_codes() {
        assert_eq!(classify(200), Disposition::Success);
        assert_eq!(classify(404), Disposition::NotFound);
        assert_eq!(classify(429), Disposition::Transient);
        assert_eq!(classify(503), Disposition::Transient);
        assert_eq!(classify(501), Disposition::Fatal);
        assert_eq!(classify(400), Disposition::Fatal);
        assert_eq!(classify(408), Disposition::Transient);
    }
}
