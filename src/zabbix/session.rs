//! Authenticated Zabbix session shared by every source task.

use super::api::{ApiClient, ApiError};
use super::protocol::{SenderError, SenderItem, SenderResponse};
use super::sender::Sender;
use crate::config::AgentConfig;
use crate::retry::RetryPolicy;

use serde_json::Value;
use std::sync::{PoisonError, RwLock};

/// Session to one Zabbix server: trapper endpoint, API endpoint and token.
///
/// The token is opaque. Re-authentication replaces it wholesale, so two
/// tasks re-authenticating at once just leave the later token in place.
#[derive(Debug)]
pub struct ZabbixSession {
    api: ApiClient,
    sender: Sender,
    user: String,
    password: String,
    auth: RwLock<Option<String>>,
}

impl ZabbixSession {
    /// Build an unauthenticated session.
    pub fn new(api: ApiClient, sender: Sender, user: &str, password: &str) -> Self {
        Self {
            api,
            sender,
            user: user.to_string(),
            password: password.to_string(),
            auth: RwLock::new(None),
        }
    }

    pub fn from_config(cfg: &AgentConfig) -> Result<Self, ApiError> {
        let api = ApiClient::new(&cfg.api_url(), cfg.send_timeout)?;
        let sender = Sender::new(&cfg.zabbix_host, cfg.zabbix_port, cfg.send_timeout);
        Ok(Self::new(api, sender, &cfg.zabbix_user, &cfg.zabbix_user_pwd))
    }

    /// Build a session and log in, retrying per `policy`.
    pub async fn connect(cfg: &AgentConfig, policy: RetryPolicy) -> Result<Self, ApiError> {
        let session = Self::from_config(cfg)?;
        policy
            .run("authenticate against zabbix", || session.authenticate())
            .await?;
        tracing::info!("Authenticated against zabbix API {}", session.api.url());
        Ok(session)
    }

    /// Log in and store a fresh token.
    ///
    /// A failed login leaves the session unauthenticated.
    pub async fn authenticate(&self) -> Result<(), ApiError> {
        match self.api.login(&self.user, &self.password).await {
            Ok(token) => {
                *self.auth.write().unwrap_or_else(PoisonError::into_inner) = Some(token);
                Ok(())
            }
            Err(e) => {
                if matches!(e, ApiError::Rpc { .. }) {
                    tracing::error!("Incorrect zabbix user or password, please check it again: {}", e);
                }
                *self.auth.write().unwrap_or_else(PoisonError::into_inner) = None;
                Err(e)
            }
        }
    }

    pub fn token(&self) -> Option<String> {
        self.auth.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.token().is_some()
    }

    /// Check the current token and log in again if it has gone stale.
    pub async fn ensure_authenticated(&self) -> Result<(), ApiError> {
        if let Some(token) = self.token() {
            if self.api.check_authentication(&token).await? {
                return Ok(());
            }
            tracing::warn!("Zabbix session expired, re-authenticating");
        }
        self.authenticate().await
    }

    /// Call an API method with the session token attached.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value, ApiError> {
        let token = self.token().ok_or(ApiError::NotAuthenticated)?;
        self.api.call(method, params, Some(&token)).await
    }

    /// Push a batch to the trapper.
    pub async fn send(&self, items: &[SenderItem]) -> Result<SenderResponse, SenderError> {
        self.sender.send(items).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zabbix::testing::spawn_fake_api;
    use serde_json::json;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    fn session_for(url: &str, password: &str) -> ZabbixSession {
        let api = ApiClient::new(url, Duration::from_secs(5)).unwrap();
        let sender = Sender::new("127.0.0.1", 10051, Duration::from_secs(1));
        ZabbixSession::new(api, sender, "Admin", password)
    }

    fn handler(method: &str, params: &Value, auth: Option<&str>) -> Result<Value, (i64, String)> {
        match method {
            "user.login" if params["password"] == "zabbix" => Ok(json!("0424bd59b807674191e7d77572075f33")),
            "user.login" => Err((-32602, "Login name or password is incorrect.".to_string())),
            "host.get" if auth == Some("0424bd59b807674191e7d77572075f33") => {
                Ok(json!([{"hostid": "10084", "host": "node-1", "status": "0", "error": ""}]))
            }
            _ => Err((-32602, "Not authorised.".to_string())),
        }
    }

    #[tokio::test]
    async fn test_authenticate_twice_is_idempotent() {
        let api = spawn_fake_api(handler).await;
        let session = session_for(&api.url, "zabbix");

        session.authenticate().await.unwrap();
        let once = session.call("host.get", json!({"output": "extend"})).await.unwrap();
        let first_token = session.token();

        session.authenticate().await.unwrap();
        let twice = session.call("host.get", json!({"output": "extend"})).await.unwrap();

        assert_eq!(once, twice);
        assert_eq!(session.token(), first_token);
        assert_eq!(api.logins.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_bad_credentials_leave_session_unauthenticated() {
        let api = spawn_fake_api(handler).await;
        let session = session_for(&api.url, "wrong");

        assert!(session.authenticate().await.is_err());
        assert!(!session.is_authenticated());

        let err = session.call("host.get", json!({})).await.unwrap_err();
        assert!(matches!(err, ApiError::NotAuthenticated));
    }

    #[tokio::test]
    async fn test_ensure_authenticated_logs_in_when_stale() {
        let api = spawn_fake_api(|method, params, _| match method {
            "user.login" => Ok(json!("fresh")),
            "user.checkAuthentication" if params["sessionid"] == "fresh" => Ok(json!({})),
            _ => Err((-32602, "Session terminated, re-login, please.".to_string())),
        })
        .await;
        let session = session_for(&api.url, "zabbix");

        // No token yet: logs in.
        session.ensure_authenticated().await.unwrap();
        assert_eq!(session.token().as_deref(), Some("fresh"));
        assert_eq!(api.logins.load(Ordering::SeqCst), 1);

        // Live token: nothing to do.
        session.ensure_authenticated().await.unwrap();
        assert_eq!(api.logins.load(Ordering::SeqCst), 1);

        // Stale token: logs in again.
        *session.auth.write().unwrap() = Some("stale".to_string());
        session.ensure_authenticated().await.unwrap();
        assert_eq!(session.token().as_deref(), Some("fresh"));
        assert_eq!(api.logins.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_connect_retries_then_gives_up() {
        let api = spawn_fake_api(handler).await;
        let cfg = AgentConfig {
            zabbix_api_url: Some(api.url.clone()),
            zabbix_user_pwd: "wrong".to_string(),
            ..Default::default()
        };

        let policy = RetryPolicy::new(2, Duration::from_millis(1));
        let err = ZabbixSession::connect(&cfg, policy).await.unwrap_err();
        assert!(matches!(err, ApiError::Rpc { .. }));
        assert_eq!(api.logins.load(Ordering::SeqCst), 2);
    }
}
