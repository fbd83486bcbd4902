//! Gmail API provider implementation.
//!
//! This module provides a [`MailService`] implementation on top of the Gmail
//! REST API.
//!
//! # Authentication
//!
//! Gmail uses OAuth 2.0. The refresh token and client credentials are stored in
//! the system keychain, referenced by account name. [`GmailProvider::authenticate`]
//! exchanges the refresh token for an access token and records the scopes
//! Google reports as granted, which [`MailService::verify_access`] checks.
//!
//! # API Usage
//!
//! - `users.messages.list` and `users.messages.get` (metadata format)
//! - `users.messages.batchModify`
//! - `users.labels.list`, `users.labels.create`, `users.labels.delete`
//! - `users.settings.filters.list`, `create`, `delete`

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, RETRY_AFTER};
use serde::{Deserialize, Serialize};

use super::{MailService, MessageMetadata, ProviderError, Result, SearchPage};
use crate::domain::{
    FilterCriteria, FilterId, FilterSpec, LabelId, LabelMutation, MailFilter, MailLabel,
    MessageId, SearchQuery,
};

const GMAIL_API_BASE: &str = "https://gmail.googleapis.com/gmail/v1/users/me";
const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const DEFAULT_KEYCHAIN_SERVICE: &str = "spamguard";

/// Scopes the pipeline needs: message modification and filter settings.
pub const REQUIRED_SCOPES: [&str; 2] = [
    "https://www.googleapis.com/auth/gmail.modify",
    "https://www.googleapis.com/auth/gmail.settings.basic",
];

/// Gmail API message list response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageListResponse {
    messages: Option<Vec<GmailMessageRef>>,
    next_page_token: Option<String>,
    result_size_estimate: Option<u32>,
}

/// Gmail message reference from a list call.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GmailMessageRef {
    id: String,
    #[allow(dead_code)]
    thread_id: Option<String>,
}

/// Gmail API message in metadata format.
#[derive(Debug, Deserialize)]
struct GmailMessage {
    id: String,
    payload: Option<GmailMessagePayload>,
}

/// Gmail message payload (headers only in metadata format).
#[derive(Debug, Deserialize)]
struct GmailMessagePayload {
    headers: Option<Vec<GmailHeader>>,
}

/// Gmail message header.
#[derive(Debug, Deserialize)]
struct GmailHeader {
    name: String,
    value: String,
}

/// Gmail API label.
#[derive(Debug, Deserialize)]
struct GmailLabel {
    id: String,
    name: String,
}

/// Gmail labels list response.
#[derive(Debug, Deserialize)]
struct LabelsListResponse {
    labels: Option<Vec<GmailLabel>>,
}

/// Gmail label creation request body.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateLabelRequest<'a> {
    name: &'a str,
    label_list_visibility: &'static str,
    message_list_visibility: &'static str,
}

/// Gmail filter resource.
#[derive(Debug, Serialize, Deserialize)]
struct GmailFilter {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    #[serde(default)]
    criteria: GmailFilterCriteria,
    #[serde(default)]
    action: GmailFilterAction,
}

/// Gmail filter criteria.
#[derive(Debug, Default, Serialize, Deserialize)]
struct GmailFilterCriteria {
    #[serde(skip_serializing_if = "Option::is_none")]
    from: Option<String>,
}

/// Gmail filter action.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GmailFilterAction {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    add_label_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    remove_label_ids: Vec<String>,
}

/// Gmail filters list response.
#[derive(Debug, Deserialize)]
struct FiltersListResponse {
    filter: Option<Vec<GmailFilter>>,
}

/// Gmail batch modify request body.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BatchModifyRequest<'a> {
    ids: Vec<&'a str>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    add_label_ids: Vec<&'a str>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    remove_label_ids: Vec<&'a str>,
}

/// OAuth token response.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[allow(dead_code)]
    expires_in: u64,
    #[allow(dead_code)]
    token_type: String,
    scope: Option<String>,
}

/// OAuth credentials stored in keychain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GmailCredentials {
    /// OAuth refresh token.
    pub refresh_token: String,
    /// OAuth client ID.
    pub client_id: String,
    /// OAuth client secret.
    pub client_secret: String,
}

impl From<GmailFilter> for MailFilter {
    fn from(filter: GmailFilter) -> Self {
        Self {
            id: FilterId::from(filter.id.unwrap_or_default()),
            criteria: FilterCriteria {
                from: filter.criteria.from,
            },
            action: LabelMutation::new(
                filter
                    .action
                    .add_label_ids
                    .into_iter()
                    .map(LabelId::from)
                    .collect(),
                filter
                    .action
                    .remove_label_ids
                    .into_iter()
                    .map(LabelId::from)
                    .collect(),
            ),
        }
    }
}

impl From<&FilterSpec> for GmailFilter {
    fn from(spec: &FilterSpec) -> Self {
        Self {
            id: None,
            criteria: GmailFilterCriteria {
                from: spec.criteria.from.clone(),
            },
            action: GmailFilterAction {
                add_label_ids: spec.action.add_labels.iter().map(|l| l.0.clone()).collect(),
                remove_label_ids: spec
                    .action
                    .remove_labels
                    .iter()
                    .map(|l| l.0.clone())
                    .collect(),
            },
        }
    }
}

/// Gmail API provider.
///
/// Implements [`MailService`] using the Gmail REST API with OAuth 2.0 authentication.
///
/// # Example
///
/// ```ignore
/// use spamguard::providers::mail::{GmailProvider, MailService};
///
/// let mut provider = GmailProvider::new("me@example.com");
/// provider.authenticate().await?;
/// provider.verify_access().await?;
/// ```
pub struct GmailProvider {
    /// Account name for keychain credential lookup.
    account: String,
    /// Keychain service the credentials are stored under.
    keychain_service: String,
    /// HTTP client for API requests.
    client: reqwest::Client,
    /// OAuth credentials.
    credentials: Option<GmailCredentials>,
    /// Current OAuth access token.
    access_token: Option<String>,
    /// Scopes granted with the current access token, when Google reported them.
    granted_scopes: Option<Vec<String>>,
}

impl GmailProvider {
    /// Creates a new Gmail provider for the specified account.
    ///
    /// The provider is not authenticated until [`authenticate`](Self::authenticate) is called.
    pub fn new(account: impl Into<String>) -> Self {
        Self {
            account: account.into(),
            keychain_service: DEFAULT_KEYCHAIN_SERVICE.to_string(),
            client: reqwest::Client::new(),
            credentials: None,
            access_token: None,
            granted_scopes: None,
        }
    }

    /// Creates a new Gmail provider with explicit credentials.
    pub fn with_credentials(account: impl Into<String>, credentials: GmailCredentials) -> Self {
        Self {
            credentials: Some(credentials),
            ..Self::new(account)
        }
    }

    /// Overrides the keychain service name.
    pub fn with_keychain_service(mut self, service: impl Into<String>) -> Self {
        self.keychain_service = service.into();
        self
    }

    /// Returns whether the provider holds an access token.
    pub fn is_authenticated(&self) -> bool {
        self.access_token.is_some()
    }

    /// Returns the account name for this provider.
    pub fn account(&self) -> &str {
        &self.account
    }

    fn keychain_entry(&self) -> Result<keyring::Entry> {
        keyring::Entry::new(&self.keychain_service, &format!("gmail-{}", self.account))
            .map_err(|e| ProviderError::Authentication(format!("keyring error: {}", e)))
    }

    /// Loads credentials from the system keychain.
    fn load_credentials_from_keychain(&self) -> Result<GmailCredentials> {
        let creds_json = self
            .keychain_entry()?
            .get_password()
            .map_err(|e| ProviderError::Authentication(format!("no credentials found: {}", e)))?;

        serde_json::from_str(&creds_json)
            .map_err(|e| ProviderError::Authentication(format!("invalid credentials: {}", e)))
    }

    /// Saves credentials to the system keychain.
    pub fn save_credentials_to_keychain(&self, credentials: &GmailCredentials) -> Result<()> {
        let creds_json = serde_json::to_string(credentials)
            .map_err(|e| ProviderError::Authentication(format!("serialize error: {}", e)))?;

        self.keychain_entry()?
            .set_password(&creds_json)
            .map_err(|e| ProviderError::Authentication(format!("keyring error: {}", e)))?;

        Ok(())
    }

    /// Loads credentials if needed and exchanges the refresh token for an
    /// access token.
    pub async fn authenticate(&mut self) -> Result<()> {
        if self.credentials.is_none() {
            self.credentials = Some(self.load_credentials_from_keychain()?);
        }

        self.refresh_access_token().await?;
        tracing::info!(account = %self.account, "Gmail provider authenticated");
        Ok(())
    }

    /// Refreshes the OAuth access token using the refresh token.
    async fn refresh_access_token(&mut self) -> Result<String> {
        let credentials = self
            .credentials
            .as_ref()
            .ok_or_else(|| ProviderError::Authentication("no credentials available".to_string()))?;

        let params = [
            ("client_id", credentials.client_id.as_str()),
            ("client_secret", credentials.client_secret.as_str()),
            ("refresh_token", credentials.refresh_token.as_str()),
            ("grant_type", "refresh_token"),
        ];

        let response = self
            .client
            .post(GOOGLE_TOKEN_URL)
            .form(&params)
            .send()
            .await
            .map_err(|e| ProviderError::Connection(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Authentication(format!(
                "token refresh failed ({}): {}",
                status, body
            )));
        }

        let token_response: TokenResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Internal(format!("parse token response: {}", e)))?;

        self.granted_scopes = token_response
            .scope
            .map(|s| s.split_whitespace().map(str::to_string).collect());
        self.access_token = Some(token_response.access_token.clone());
        Ok(token_response.access_token)
    }

    /// Builds authorization headers for API requests.
    fn auth_headers(&self) -> Result<HeaderMap> {
        let token = self
            .access_token
            .as_ref()
            .ok_or_else(|| ProviderError::Authentication("not authenticated".to_string()))?;

        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|e| ProviderError::Internal(format!("invalid header: {}", e)))?,
        );
        Ok(headers)
    }

    /// Makes an authenticated GET request to the Gmail API.
    async fn get<T: for<'de> Deserialize<'de>>(
        &self,
        endpoint: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let url = format!("{}{}", GMAIL_API_BASE, endpoint);
        let headers = self.auth_headers()?;

        let response = self
            .client
            .get(&url)
            .headers(headers)
            .query(query)
            .send()
            .await
            .map_err(|e| ProviderError::Connection(e.to_string()))?;

        self.handle_response(response).await
    }

    /// Makes an authenticated POST request to the Gmail API.
    async fn post<T: for<'de> Deserialize<'de>, B: Serialize>(
        &self,
        endpoint: &str,
        body: &B,
    ) -> Result<T> {
        let url = format!("{}{}", GMAIL_API_BASE, endpoint);
        let headers = self.auth_headers()?;

        let response = self
            .client
            .post(&url)
            .headers(headers)
            .json(body)
            .send()
            .await
            .map_err(|e| ProviderError::Connection(e.to_string()))?;

        self.handle_response(response).await
    }

    /// Makes an authenticated POST request that doesn't return a body.
    async fn post_no_response<B: Serialize>(&self, endpoint: &str, body: &B) -> Result<()> {
        let url = format!("{}{}", GMAIL_API_BASE, endpoint);
        let headers = self.auth_headers()?;

        let response = self
            .client
            .post(&url)
            .headers(headers)
            .json(body)
            .send()
            .await
            .map_err(|e| ProviderError::Connection(e.to_string()))?;

        if !response.status().is_success() {
            return Err(self.handle_error(response).await);
        }
        Ok(())
    }

    /// Makes an authenticated DELETE request.
    async fn delete(&self, endpoint: &str) -> Result<()> {
        let url = format!("{}{}", GMAIL_API_BASE, endpoint);
        let headers = self.auth_headers()?;

        let response = self
            .client
            .delete(&url)
            .headers(headers)
            .send()
            .await
            .map_err(|e| ProviderError::Connection(e.to_string()))?;

        if !response.status().is_success() {
            return Err(self.handle_error(response).await);
        }
        Ok(())
    }

    /// Handles API response, checking for errors.
    async fn handle_response<T: for<'de> Deserialize<'de>>(
        &self,
        response: reqwest::Response,
    ) -> Result<T> {
        if !response.status().is_success() {
            return Err(self.handle_error(response).await);
        }

        response
            .json()
            .await
            .map_err(|e| ProviderError::Internal(format!("parse response: {}", e)))
    }

    /// Handles API error responses.
    async fn handle_error(&self, response: reqwest::Response) -> ProviderError {
        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok());
        let body = response.text().await.unwrap_or_default();

        error_for_status(status, body, retry_after)
    }

    fn search_params(
        query: &SearchQuery,
        page_token: Option<&str>,
        page_size: u32,
    ) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("maxResults", page_size.min(500).to_string()),
            ("includeSpamTrash", query.include_spam_trash.to_string()),
        ];
        if let Some(q) = &query.q {
            params.push(("q", q.clone()));
        }
        for label in &query.label_ids {
            params.push(("labelIds", label.0.clone()));
        }
        if let Some(token) = page_token {
            params.push(("pageToken", token.to_string()));
        }
        params
    }
}

/// Maps an HTTP error status to a provider error.
fn error_for_status(status: u16, body: String, retry_after_secs: Option<u64>) -> ProviderError {
    match status {
        401 => ProviderError::Authentication(format!("unauthorized: {}", body)),
        403 if body.contains("insufficient") || body.contains("PERMISSION_DENIED") => {
            ProviderError::Authentication(format!("insufficient permissions: {}", body))
        }
        400 => ProviderError::InvalidRequest(body),
        404 => ProviderError::NotFound(body),
        429 => ProviderError::RateLimited { retry_after_secs },
        403 => ProviderError::RateLimited { retry_after_secs },
        _ => ProviderError::Provider(format!("API error ({}): {}", status, body)),
    }
}

#[async_trait]
impl MailService for GmailProvider {
    async fn verify_access(&self) -> Result<()> {
        if self.access_token.is_none() {
            return Err(ProviderError::Authentication(
                "not authenticated".to_string(),
            ));
        }

        if let Some(granted) = &self.granted_scopes {
            if let Some(missing) = REQUIRED_SCOPES
                .iter()
                .find(|scope| !granted.iter().any(|g| g == *scope))
            {
                return Err(ProviderError::Authentication(format!(
                    "missing scope {}",
                    missing
                )));
            }
        }

        Ok(())
    }

    async fn search_messages(
        &self,
        query: &SearchQuery,
        page_token: Option<&str>,
        page_size: u32,
    ) -> Result<SearchPage> {
        let params = Self::search_params(query, page_token, page_size);
        let response: MessageListResponse = self.get("/messages", &params).await?;

        Ok(SearchPage {
            ids: response
                .messages
                .unwrap_or_default()
                .into_iter()
                .map(|m| MessageId::from(m.id))
                .collect(),
            next_page_token: response.next_page_token,
            result_size_estimate: response.result_size_estimate.unwrap_or(0),
        })
    }

    async fn get_message_metadata(
        &self,
        id: &MessageId,
        header_names: &[&str],
    ) -> Result<MessageMetadata> {
        let mut params = vec![("format", "metadata".to_string())];
        params.extend(
            header_names
                .iter()
                .map(|name| ("metadataHeaders", name.to_string())),
        );

        let endpoint = format!("/messages/{}", id);
        let message: GmailMessage = self.get(&endpoint, &params).await?;

        let headers = message
            .payload
            .and_then(|p| p.headers)
            .unwrap_or_default()
            .into_iter()
            .map(|h| (h.name, h.value))
            .collect();

        Ok(MessageMetadata {
            id: MessageId::from(message.id),
            headers,
        })
    }

    async fn list_labels(&self) -> Result<Vec<MailLabel>> {
        let response: LabelsListResponse = self.get("/labels", &[]).await?;

        Ok(response
            .labels
            .unwrap_or_default()
            .into_iter()
            .map(|l| MailLabel {
                id: LabelId::from(l.id),
                name: l.name,
            })
            .collect())
    }

    async fn create_label(&self, name: &str, hidden: bool) -> Result<MailLabel> {
        let body = CreateLabelRequest {
            name,
            label_list_visibility: if hidden { "labelHide" } else { "labelShow" },
            message_list_visibility: if hidden { "hide" } else { "show" },
        };
        let label: GmailLabel = self.post("/labels", &body).await?;

        tracing::info!(label_id = %label.id, name = %label.name, "Created Gmail label");
        Ok(MailLabel {
            id: LabelId::from(label.id),
            name: label.name,
        })
    }

    async fn delete_label(&self, id: &LabelId) -> Result<()> {
        self.delete(&format!("/labels/{}", id)).await
    }

    async fn create_filter(&self, filter: &FilterSpec) -> Result<MailFilter> {
        let created: GmailFilter = self
            .post("/settings/filters", &GmailFilter::from(filter))
            .await?;
        Ok(created.into())
    }

    async fn list_filters(&self) -> Result<Vec<MailFilter>> {
        let response: FiltersListResponse = self.get("/settings/filters", &[]).await?;

        Ok(response
            .filter
            .unwrap_or_default()
            .into_iter()
            .map(MailFilter::from)
            .collect())
    }

    async fn delete_filter(&self, id: &FilterId) -> Result<()> {
        self.delete(&format!("/settings/filters/{}", id)).await
    }

    async fn bulk_modify(&self, ids: &[MessageId], mutation: &LabelMutation) -> Result<()> {
        let body = BatchModifyRequest {
            ids: ids.iter().map(|id| id.0.as_str()).collect(),
            add_label_ids: mutation.add_labels.iter().map(|l| l.0.as_str()).collect(),
            remove_label_ids: mutation.remove_labels.iter().map(|l| l.0.as_str()).collect(),
        };

        self.post_no_response("/messages/batchModify", &body).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::FilterAction;

    #[test]
    fn gmail_provider_creation() {
        let provider = GmailProvider::new("student@example.com");
        assert_eq!(provider.account(), "student@example.com");
        assert!(!provider.is_authenticated());
    }

    #[tokio::test]
    async fn gmail_provider_requires_auth() {
        let provider = GmailProvider::new("student@example.com");

        let result = provider
            .search_messages(&SearchQuery::text("from:x"), None, 10)
            .await;
        assert!(matches!(result, Err(ProviderError::Authentication(_))));

        let access = provider.verify_access().await;
        assert!(matches!(access, Err(ProviderError::Authentication(_))));
    }

    #[tokio::test]
    async fn verify_access_reports_missing_scope() {
        let mut provider = GmailProvider::new("student@example.com");
        provider.access_token = Some("token".to_string());
        provider.granted_scopes = Some(vec![REQUIRED_SCOPES[0].to_string()]);

        let err = provider.verify_access().await.unwrap_err();
        assert!(err.to_string().contains("gmail.settings.basic"));

        provider.granted_scopes = Some(REQUIRED_SCOPES.iter().map(|s| s.to_string()).collect());
        assert!(provider.verify_access().await.is_ok());
    }

    #[test]
    fn search_params_include_labels_and_token() {
        let query = SearchQuery::labelled(LabelId::from("Label_5"));
        let params = GmailProvider::search_params(&query, Some("next"), 800);

        assert!(params.contains(&("maxResults", "500".to_string())));
        assert!(params.contains(&("includeSpamTrash", "true".to_string())));
        assert!(params.contains(&("labelIds", "Label_5".to_string())));
        assert!(params.contains(&("pageToken", "next".to_string())));
        assert!(!params.iter().any(|(k, _)| *k == "q"));
    }

    #[test]
    fn message_list_without_messages_parses() {
        let json = r#"{"resultSizeEstimate":0}"#;
        let response: MessageListResponse = serde_json::from_str(json).unwrap();
        assert!(response.messages.is_none());
        assert_eq!(response.result_size_estimate, Some(0));
    }

    #[test]
    fn filter_spec_serializes_to_gmail_shape() {
        let spec = FilterSpec {
            criteria: FilterCriteria {
                from: Some("{a@x.edu b@y.edu}".to_string()),
            },
            action: FilterAction::Trash.provisioning_mutation(&LabelId::from("Label_1")),
        };

        let json = serde_json::to_value(GmailFilter::from(&spec)).unwrap();
        assert_eq!(json["criteria"]["from"], "{a@x.edu b@y.edu}");
        assert_eq!(json["action"]["addLabelIds"][0], "Label_1");
        assert_eq!(json["action"]["addLabelIds"][1], "TRASH");
        assert_eq!(json["action"]["removeLabelIds"][0], "INBOX");
        assert!(json.get("id").is_none());
    }

    #[test]
    fn filter_list_converts_to_domain() {
        let json = r#"{"filter":[{"id":"f1","criteria":{"from":"{a@x.edu}"},"action":{"addLabelIds":["Label_1"],"removeLabelIds":["INBOX"]}},{"id":"f2","criteria":{"query":"x"},"action":{"forward":"me@x.org"}}]}"#;
        let response: FiltersListResponse = serde_json::from_str(json).unwrap();
        let filters: Vec<MailFilter> = response
            .filter
            .unwrap()
            .into_iter()
            .map(MailFilter::from)
            .collect();

        assert_eq!(filters.len(), 2);
        assert!(filters[0].references(&LabelId::from("Label_1")));
        assert_eq!(filters[1].criteria.from, None);
        assert!(filters[1].action.add_labels.is_empty());
    }

    #[test]
    fn error_status_mapping() {
        assert!(matches!(
            error_for_status(401, String::new(), None),
            ProviderError::Authentication(_)
        ));
        assert!(matches!(
            error_for_status(403, "insufficient authentication scopes".into(), None),
            ProviderError::Authentication(_)
        ));
        assert!(matches!(
            error_for_status(404, String::new(), None),
            ProviderError::NotFound(_)
        ));
        assert!(matches!(
            error_for_status(429, String::new(), Some(3)),
            ProviderError::RateLimited {
                retry_after_secs: Some(3)
            }
        ));
        assert!(matches!(
            error_for_status(500, String::new(), None),
            ProviderError::Provider(_)
        ));
    }
}
