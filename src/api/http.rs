//! Shared HTTP plumbing for the platform readers.

use std::time::Duration;

use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Utc};
use reqwest::header::{HeaderMap, HeaderValue, COOKIE, USER_AGENT};
use reqwest::Client;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::errors::{SyncError, SyncResult};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const BROWSER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36";

/// Seconds east of UTC for China Standard Time.
const CST_OFFSET_SECS: i32 = 8 * 3600;

/// GET-only JSON client bound to one platform.
pub struct PlatformClient {
    client: Client,
    base_url: String,
}

impl PlatformClient {
    /// Build a client; `cookie` is the logged-in session cookie, if the
    /// platform needs one.
    pub fn new(base_url: impl Into<String>, cookie: Option<&str>) -> SyncResult<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(BROWSER_AGENT));
        if let Some(cookie) = cookie {
            let value = HeaderValue::from_str(cookie)
                .map_err(|e| SyncError::config(format!("invalid cookie header: {}", e)))?;
            headers.insert(COOKIE, value);
        }

        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .default_headers(headers)
            .build()
            .map_err(|e| SyncError::config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// GET `path` with query parameters and decode the JSON body.
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> SyncResult<T> {
        let url = format!("{}{}", self.base_url, path);
        debug!(url = %url, "Fetching");

        let response = self.client.get(&url).query(query).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(SyncError::from_platform_status(status, &body));
        }

        let body = response.text().await?;
        serde_json::from_str(&body)
            .map_err(|e| SyncError::transient(format!("unexpected response from {}: {}", path, e)))
    }
}

/// Parse an exchange-local "YYYY-MM-DD HH:MM:SS" timestamp.
pub fn parse_cst(raw: &str) -> Option<DateTime<Utc>> {
    let naive = NaiveDateTime::parse_from_str(raw.trim(), "%Y-%m-%d %H:%M:%S").ok()?;
    let cst = FixedOffset::east_opt(CST_OFFSET_SECS)?;
    cst.from_local_datetime(&naive)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Today's date in exchange local time, as "YYYY-MM-DD".
pub fn cst_today() -> String {
    let now = match FixedOffset::east_opt(CST_OFFSET_SECS) {
        Some(cst) => Utc::now().with_timezone(&cst).date_naive(),
        None => Utc::now().date_naive(),
    };
    now.format("%Y-%m-%d").to_string()
}
