//! Upstream release lookup.
//!
//! "Latest" is whatever the GitHub releases feed reports at call time. Nothing
//! is cached; the resolved tag is recorded in the commit message of the
//! component that uses it.

use serde::Deserialize;
use tracing::{debug, info};

use crate::error::{Error, Result};

/// User-Agent sent with every request (GitHub rejects anonymous agents).
pub const USER_AGENT: &str = concat!("pivot/", env!("CARGO_PKG_VERSION"));

/// Build the HTTP client used for release metadata and manifest downloads.
///
/// # Errors
///
/// Returns an error if the TLS backend cannot be initialized.
pub fn http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .build()
        .map_err(|source| Error::Fetch {
            url: String::from("<client>"),
            source,
        })
}

#[derive(Debug, Deserialize)]
struct LatestRelease {
    tag_name: String,
}

/// Resolves the latest release tag of an upstream project.
#[derive(Debug, Clone)]
pub struct ReleaseResolver {
    client: reqwest::Client,
}

impl ReleaseResolver {
    /// Create a resolver on top of an existing client.
    #[must_use]
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Fetch `api_url` and return its `tag_name` verbatim.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Fetch`] on transport or HTTP status errors and
    /// [`Error::Parse`] when the body has no tag.
    pub async fn latest_tag(&self, api_url: &str) -> Result<String> {
        debug!(url = %api_url, "Resolving latest release");

        let fetch_err = |source| Error::Fetch {
            url: api_url.to_string(),
            source,
        };

        let body = self
            .client
            .get(api_url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(fetch_err)?
            .text()
            .await
            .map_err(fetch_err)?;

        let release: LatestRelease = serde_json::from_str(&body)
            .map_err(|e| Error::parse(format!("release metadata from {api_url}"), e))?;

        info!(url = %api_url, tag = %release.tag_name, "Resolved latest release");
        Ok(release.tag_name)
    }
}
