//! Zabbix JSON-RPC API client.

use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;

/// API error types.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{method} failed ({code}): {message} {data}")]
    Rpc {
        method: String,
        code: i64,
        message: String,
        data: String,
    },
    #[error("{0} returned no result")]
    MissingResult(String),
    #[error("session is not authenticated")]
    NotAuthenticated,
}

/// Thin JSON-RPC client bound to one API endpoint.
#[derive(Debug)]
pub struct ApiClient {
    url: String,
    http: reqwest::Client,
    next_id: AtomicU64,
}

impl ApiClient {
    pub fn new(url: &str, timeout: Duration) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            url: url.to_string(),
            http,
            next_id: AtomicU64::new(1),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Call `method` and return its `result` member.
    ///
    /// `auth` is attached verbatim when present.
    pub async fn call(&self, method: &str, params: Value, auth: Option<&str>) -> Result<Value, ApiError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut payload = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": id,
        });
        if let Some(token) = auth {
            payload["auth"] = Value::String(token.to_string());
        }

        let mut response: Value = self
            .http
            .post(&self.url)
            .json(&payload)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if let Some(error) = response.get("error") {
            return Err(ApiError::Rpc {
                method: method.to_string(),
                code: error["code"].as_i64().unwrap_or_default(),
                message: error["message"].as_str().unwrap_or_default().to_string(),
                data: error["data"].as_str().unwrap_or_default().to_string(),
            });
        }

        match response.get_mut("result") {
            Some(result) => Ok(result.take()),
            None => Err(ApiError::MissingResult(method.to_string())),
        }
    }

    /// `user.login`: exchange credentials for an auth token.
    pub async fn login(&self, user: &str, password: &str) -> Result<String, ApiError> {
        let result = self
            .call("user.login", json!({"user": user, "password": password}), None)
            .await?;
        result
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| ApiError::MissingResult("user.login".to_string()))
    }

    /// `user.checkAuthentication`: whether `token` is still a live session.
    pub async fn check_authentication(&self, token: &str) -> Result<bool, ApiError> {
        match self
            .call("user.checkAuthentication", json!({"sessionid": token}), None)
            .await
        {
            Ok(_) => Ok(true),
            Err(ApiError::Rpc { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }
}
