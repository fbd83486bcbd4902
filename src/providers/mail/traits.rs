//! Mail service trait definition.
//!
//! This module defines the [`MailService`] trait, the capability object every
//! pipeline stage receives. It covers exactly the operations discovery,
//! provisioning and removal need: search, header metadata, labels, filters and
//! bulk label modification.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::{
    FilterId, FilterSpec, LabelId, LabelMutation, MailFilter, MailLabel, MessageId, SearchQuery,
};

/// Result type alias for mail service operations.
pub type Result<T> = std::result::Result<T, ProviderError>;

/// Errors that can occur during mail service operations.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// Authentication failed, credentials expired, or scopes are missing.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Network or connection error.
    #[error("connection error: {0}")]
    Connection(String),

    /// Rate limit exceeded.
    #[error("rate limit exceeded, retry after {retry_after_secs:?} seconds")]
    RateLimited {
        /// Seconds to wait before retrying, if known.
        retry_after_secs: Option<u64>,
    },

    /// Requested resource was not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Invalid request or parameters.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Provider-specific error.
    #[error("provider error: {0}")]
    Provider(String),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ProviderError {
    /// Whether the error means the resource does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// One page of search results.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchPage {
    /// Matching message identifiers on this page.
    pub ids: Vec<MessageId>,
    /// Cursor for the next page, absent on the last page.
    pub next_page_token: Option<String>,
    /// Provider's estimate of the total result size.
    pub result_size_estimate: u32,
}

/// Selected headers of one message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageMetadata {
    /// Message identifier.
    pub id: MessageId,
    /// Requested headers as `(name, value)` pairs, in provider order.
    pub headers: Vec<(String, String)>,
}

impl MessageMetadata {
    /// Creates metadata with `From` and `Subject` headers.
    pub fn new(id: impl Into<MessageId>, from: &str, subject: &str) -> Self {
        Self {
            id: id.into(),
            headers: vec![
                ("From".to_string(), from.to_string()),
                ("Subject".to_string(), subject.to_string()),
            ],
        }
    }

    /// Looks up a header by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// The `From` header, if present.
    pub fn from_header(&self) -> Option<&str> {
        self.header("From")
    }

    /// The `Subject` header, if present.
    pub fn subject(&self) -> Option<&str> {
        self.header("Subject")
    }
}

/// Capability interface over a mail provider.
///
/// Implementations are passed explicitly into every pipeline component so the
/// provider can be swapped for an in-memory mailbox in tests.
///
/// # Example
///
/// ```ignore
/// use spamguard::domain::SearchQuery;
/// use spamguard::providers::mail::MailService;
///
/// async fn count_unread(mail: &dyn MailService) -> spamguard::providers::mail::Result<usize> {
///     let page = mail
///         .search_messages(&SearchQuery::text("is:unread"), None, 500)
///         .await?;
///     Ok(page.ids.len())
/// }
/// ```
#[async_trait]
pub trait MailService: Send + Sync {
    /// Checks that the session is signed in with every scope the pipeline needs.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Authentication`] when credentials are missing,
    /// expired, or lack a required scope.
    async fn verify_access(&self) -> Result<()>;

    /// Fetches one page of message identifiers matching `query`.
    ///
    /// # Arguments
    ///
    /// * `query` - Search expression, label restriction and folder scope
    /// * `page_token` - Cursor returned by the previous page, if any
    /// * `page_size` - Maximum identifiers to return (at most 500)
    async fn search_messages(
        &self,
        query: &SearchQuery,
        page_token: Option<&str>,
        page_size: u32,
    ) -> Result<SearchPage>;

    /// Fetches the named headers of a message.
    async fn get_message_metadata(
        &self,
        id: &MessageId,
        header_names: &[&str],
    ) -> Result<MessageMetadata>;

    /// Lists every label in the account.
    async fn list_labels(&self) -> Result<Vec<MailLabel>>;

    /// Creates a label, optionally hidden from the label and message lists.
    async fn create_label(&self, name: &str, hidden: bool) -> Result<MailLabel>;

    /// Deletes a label.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::NotFound`] if the label does not exist.
    async fn delete_label(&self, id: &LabelId) -> Result<()>;

    /// Creates a server-side filter.
    async fn create_filter(&self, filter: &FilterSpec) -> Result<MailFilter>;

    /// Lists every filter in the account.
    async fn list_filters(&self) -> Result<Vec<MailFilter>>;

    /// Deletes a filter.
    async fn delete_filter(&self, id: &FilterId) -> Result<()>;

    /// Adds and removes labels on up to 1000 messages at once.
    async fn bulk_modify(&self, ids: &[MessageId], mutation: &LabelMutation) -> Result<()>;
}
