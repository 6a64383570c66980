//! Client for the authoritative user service.

use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use reqwest::StatusCode;
use thiserror::Error;
use tracing::warn;

use crate::models::User;

/// Failure modes of a remote user lookup. The aggregator treats all three
/// identically when deciding whether to fall back to a stale cache record.
#[derive(Debug, Error)]
pub enum UserClientError {
    #[error("user {0} not found")]
    NotFound(i64),

    #[error("user service timed out resolving user {0}")]
    Timeout(i64),

    #[error("user service unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait UserServiceClient: Send + Sync {
    /// Resolve a single user. Bound by the client's request timeout.
    async fn get_user(&self, user_id: i64) -> Result<User, UserClientError>;

    /// Best-effort batch resolution: a per-id failure is logged and that
    /// id skipped, it never fails the whole batch.
    async fn get_users(&self, user_ids: &[i64]) -> Vec<User>;
}

pub struct HttpUserServiceClient {
    http: reqwest::Client,
    base_url: String,
}

impl HttpUserServiceClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl UserServiceClient for HttpUserServiceClient {
    async fn get_user(&self, user_id: i64) -> Result<User, UserClientError> {
        let url = format!("{}/api/users/{}", self.base_url, user_id);

        let response = self.http.get(&url).send().await.map_err(|err| {
            if err.is_timeout() {
                UserClientError::Timeout(user_id)
            } else {
                UserClientError::Unavailable(err.to_string())
            }
        })?;

        match response.status() {
            StatusCode::NOT_FOUND => Err(UserClientError::NotFound(user_id)),
            status if !status.is_success() => Err(UserClientError::Unavailable(format!(
                "user service returned {} for user {}",
                status, user_id
            ))),
            _ => response
                .json::<User>()
                .await
                .map_err(|err| UserClientError::Unavailable(err.to_string())),
        }
    }

    async fn get_users(&self, user_ids: &[i64]) -> Vec<User> {
        let lookups = user_ids.iter().map(|id| self.get_user(*id));

        join_all(lookups)
            .await
            .into_iter()
            .zip(user_ids)
            .filter_map(|(outcome, user_id)| match outcome {
                Ok(user) => Some(user),
                Err(err) => {
                    warn!(user_id, error = %err, "skipping user in batch resolution");
                    None
                }
            })
            .collect()
    }
}
