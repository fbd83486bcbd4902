//! HTTP client for the college directory service.
//!
//! The directory is a small JSON REST service:
//!
//! - `GET  college-urls`    known college domains
//! - `GET  blocked-emails`  legacy list of individually blocked addresses
//! - `POST unknown-school`  report a domain the directory does not know

use async_trait::async_trait;
use serde::Serialize;
use url::Url;

use crate::domain::{BlockedEmail, DirectoryEntry};

/// Result type alias for directory operations.
pub type Result<T> = std::result::Result<T, DirectoryError>;

/// Errors that can occur talking to the directory service.
#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    /// Transport failure.
    #[error("directory request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-success HTTP status.
    #[error("directory returned {status} for {url}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Requested URL.
        url: String,
    },

    /// Response body did not match the expected shape.
    #[error("could not decode directory response: {0}")]
    Decode(String),

    /// Invalid base URL.
    #[error("invalid directory url: {0}")]
    Url(#[from] url::ParseError),
}

/// Read access to the directory plus unknown-domain reporting.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DirectoryApi: Send + Sync {
    /// Fetches every known college domain.
    async fn college_domains(&self) -> Result<Vec<DirectoryEntry>>;

    /// Fetches the legacy blocked-address list.
    async fn blocked_emails(&self) -> Result<Vec<BlockedEmail>>;

    /// Reports a sender domain the directory did not recognise.
    async fn report_unknown_domain(&self, domain: &str) -> Result<()>;
}

#[derive(Debug, Serialize)]
struct UnknownSchoolRequest<'a> {
    url: &'a str,
}

/// Directory client over HTTP.
#[derive(Debug, Clone)]
pub struct HttpDirectoryClient {
    base: Url,
    client: reqwest::Client,
}

impl HttpDirectoryClient {
    /// Creates a client rooted at `base_url`.
    ///
    /// Endpoint paths are resolved relative to the base, so a base of
    /// `https://api.example.org/v1` reaches `https://api.example.org/v1/college-urls`.
    pub fn new(base_url: &str) -> Result<Self> {
        let mut base = Url::parse(base_url)?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Ok(Self {
            base,
            client: reqwest::Client::new(),
        })
    }

    /// Resolves an endpoint against the base URL.
    pub fn endpoint(&self, path: &str) -> Result<Url> {
        Ok(self.base.join(path)?)
    }

    async fn get_json<T: for<'de> serde::Deserialize<'de>>(&self, path: &str) -> Result<T> {
        let url = self.endpoint(path)?;
        tracing::debug!(url = %url, "Fetching directory listing");

        let response = self.client.get(url.clone()).send().await?;
        if !response.status().is_success() {
            return Err(DirectoryError::Status {
                status: response.status().as_u16(),
                url: url.to_string(),
            });
        }

        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|e| DirectoryError::Decode(e.to_string()))
    }
}

#[async_trait]
impl DirectoryApi for HttpDirectoryClient {
    async fn college_domains(&self) -> Result<Vec<DirectoryEntry>> {
        self.get_json("college-urls").await
    }

    async fn blocked_emails(&self) -> Result<Vec<BlockedEmail>> {
        self.get_json("blocked-emails").await
    }

    async fn report_unknown_domain(&self, domain: &str) -> Result<()> {
        let url = self.endpoint("unknown-school")?;
        let response = self
            .client
            .post(url.clone())
            .json(&UnknownSchoolRequest { url: domain })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(DirectoryError::Status {
                status: response.status().as_u16(),
                url: url.to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoints_resolve_under_base_path() {
        let client = HttpDirectoryClient::new("https://api.example.org/v1").unwrap();
        assert_eq!(
            client.endpoint("college-urls").unwrap().as_str(),
            "https://api.example.org/v1/college-urls"
        );

        let client = HttpDirectoryClient::new("https://api.example.org/").unwrap();
        assert_eq!(
            client.endpoint("unknown-school").unwrap().as_str(),
            "https://api.example.org/unknown-school"
        );
    }

    #[test]
    fn invalid_base_url_is_rejected() {
        assert!(matches!(
            HttpDirectoryClient::new("not a url"),
            Err(DirectoryError::Url(_))
        ));
    }

    #[test]
    fn unknown_school_body_shape() {
        let body = serde_json::to_value(UnknownSchoolRequest { url: "newcollege.edu" }).unwrap();
        assert_eq!(body, serde_json::json!({ "url": "newcollege.edu" }));
    }

    #[tokio::test]
    async fn mock_directory_reports_domains() {
        let mut mock = MockDirectoryApi::new();
        mock.expect_report_unknown_domain()
            .withf(|domain: &str| domain == "random.biz")
            .times(1)
            .returning(|_| Ok(()));

        tokio_test::assert_ok!(mock.report_unknown_domain("random.biz").await);
    }
}
