//! Session registry client
//!
//! The registry is a small HTTP service that lists the live debuggee
//! sessions (`GET /sessions`) and reports whether it is up (`GET /status`).
//! The backend polls `/status` before declaring itself ready.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::common::{Error, Result};

/// Env var that overrides the configured registry URL
pub const URL_ENV: &str = "SESSIONS_COMMANDS_API_URL";

/// One live debuggee session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub sid: u32,
    #[serde(default)]
    pub alias: String,
    #[serde(default)]
    pub tag: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub group_id: String,
}

#[derive(Debug, Deserialize)]
struct Status {
    status: String,
}

#[async_trait]
pub trait SessionRegistry: Send + Sync {
    /// Whether the service reports `{"status": "up"}`
    async fn is_up(&self) -> Result<bool>;

    async fn sessions(&self) -> Result<Vec<Session>>;
}

pub struct HttpRegistry {
    client: reqwest::Client,
    base_url: String,
}

impl HttpRegistry {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get(&self, endpoint: &str) -> Result<reqwest::Response> {
        let response = self
            .client
            .get(format!("{}{}", self.base_url, endpoint))
            .send()
            .await?;
        check_status(endpoint, response.status())?;
        Ok(response)
    }
}

fn check_status(endpoint: &str, status: reqwest::StatusCode) -> Result<()> {
    if status.is_success() {
        Ok(())
    } else {
        Err(Error::Registry(format!("GET {endpoint} returned {status}")))
    }
}

#[async_trait]
impl SessionRegistry for HttpRegistry {
    async fn is_up(&self) -> Result<bool> {
        let status: Status = self.get("/status").await?.json().await?;
        Ok(status.status == "up")
    }

    async fn sessions(&self) -> Result<Vec<Session>> {
        let sessions = self.get("/sessions").await?.json().await?;
        Ok(sessions)
    }
}

/// Poll `registry` until it reports up
///
/// Connection errors count as "not yet". Gives up with
/// [`Error::ServiceNotReady`] after `max_attempts` polls.
pub async fn wait_until_ready(
    registry: &dyn SessionRegistry,
    interval: Duration,
    max_attempts: u32,
) -> Result<()> {
    for attempt in 1..=max_attempts {
        match registry.is_up().await {
            Ok(true) => {
                tracing::info!(attempt, "Session service is up");
                return Ok(());
            }
            Ok(false) => tracing::debug!(attempt, "Session service not up yet"),
            Err(e) => tracing::debug!(attempt, error = %e, "Session service unreachable"),
        }
        if attempt < max_attempts {
            tokio::time::sleep(interval).await;
        }
    }
    Err(Error::ServiceNotReady {
        attempts: max_attempts,
    })
}
