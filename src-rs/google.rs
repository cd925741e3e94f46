//! Authenticated JSON plumbing shared by the Drive and Sheets clients.

use crate::error::RemoteError;
use anyhow::{Context, Result};
use reqwest::blocking::{Client, RequestBuilder};
use reqwest::{Method, Url};
use serde_json::Value;
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Clone)]
pub struct GoogleClient {
    http: Client,
    token: String,
}

impl GoogleClient {
    pub fn new(access_token: &str) -> Result<Self> {
        let http = Client::builder()
            .user_agent(concat!("annot-publish/", env!("CARGO_PKG_VERSION")))
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            http,
            token: access_token.trim().to_string(),
        })
    }

    pub fn request(&self, method: Method, url: Url) -> RequestBuilder {
        self.http.request(method, url).bearer_auth(&self.token)
    }

    /// Sends the request and decodes the JSON body. An empty body is `Null`.
    pub fn execute(&self, builder: RequestBuilder) -> Result<Value, RemoteError> {
        let request = builder.build().map_err(|source| RemoteError::Transport {
            url: "<request>".to_string(),
            source,
        })?;
        let url = request.url().to_string();
        let response = self
            .http
            .execute(request)
            .map_err(|source| RemoteError::Transport {
                url: url.clone(),
                source,
            })?;

        let status = response.status();
        let body = response.text().map_err(|source| RemoteError::Transport {
            url: url.clone(),
            source,
        })?;
        if !status.is_success() {
            return Err(RemoteError::Status {
                url,
                status: status.as_u16(),
                body,
            });
        }
        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&body).map_err(|err| RemoteError::Decode {
            url,
            reason: err.to_string(),
        })
    }
}

/// Joins percent-encoded path segments onto a fixed API base.
pub fn endpoint(base: &str, segments: &[&str]) -> Result<Url, RemoteError> {
    let invalid = || RemoteError::InvalidUrl(base.to_string());
    let mut url = Url::parse(base).map_err(|_| invalid())?;
    url.path_segments_mut()
        .map_err(|_| invalid())?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

pub fn string_field(value: &Value, field: &'static str, url: &str) -> Result<String, RemoteError> {
    value
        .get(field)
        .and_then(Value::as_str)
        .map(ToString::to_string)
        .ok_or_else(|| RemoteError::MissingField {
            url: url.to_string(),
            field,
        })
}
