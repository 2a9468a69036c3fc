//! Conversation history from the forum REST API

use crate::storage::message::{Conversation, Message, User, UserId};
use crate::{FetchError, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Source of the message history of a conversation
#[async_trait]
pub trait HistorySource: Send + Sync {
    /// Messages between `user` and `contact_id`, in server order
    async fn fetch_history(&self, user: &User, contact_id: UserId) -> Result<Vec<Message>>;
}

/// `GET /messages/{userId}/{contactId}` with bearer authentication
#[derive(Debug, Clone)]
pub struct RestHistory {
    client: reqwest::Client,
    base_url: String,
}

impl RestHistory {
    /// Create a client for the API at `base_url`, bounded by `timeout`
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::Request(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Full URL of a conversation's history
    pub fn history_url(&self, user_id: UserId, contact_id: UserId) -> String {
        let conversation = Conversation {
            user_id,
            contact_id,
        };
        format!("{}{}", self.base_url, conversation.history_path())
    }
}

#[async_trait]
impl HistorySource for RestHistory {
    async fn fetch_history(&self, user: &User, contact_id: UserId) -> Result<Vec<Message>> {
        let token = user.bearer_token().ok_or(FetchError::Unauthorized)?;
        let url = self.history_url(user.id, contact_id);
        debug!("Fetching chat history from {}", url);

        let response = self
            .client
            .get(&url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(request_error)?;

        let status = response.status();
        if !status.is_success() {
            warn!("History request to {} failed with {}", url, status);
            let error = match status {
                StatusCode::NOT_FOUND => FetchError::NotFound,
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => FetchError::Unauthorized,
                other => FetchError::Status(other.as_u16()),
            };
            return Err(error.into());
        }

        let messages: Vec<Message> = response.json().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout
            } else {
                FetchError::Decode(e.to_string())
            }
        })?;

        info!(
            "Loaded {} messages for conversation {}/{}",
            messages.len(),
            user.id,
            contact_id
        );
        Ok(messages)
    }
}

fn request_error(e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::Timeout
    } else {
        FetchError::Request(e.to_string())
    }
}
