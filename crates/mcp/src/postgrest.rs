// Token store backed by the PostgREST interface of the auth database

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use fastnow_core::{ScopeSet, StoreError, TokenRecord, TokenStore};
use reqwest::{header, Client};
use serde::{Deserialize, Deserializer};
use std::time::Duration;
use url::Url;

pub const DEFAULT_TOKEN_TABLE: &str = "oauth_access_tokens";

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ScopeColumn {
    Text(String),
    List(Vec<String>),
}

impl ScopeColumn {
    fn into_set(self) -> ScopeSet {
        match self {
            Self::Text(text) => text.split_whitespace().map(str::to_string).collect(),
            Self::List(items) => items.into_iter().filter(|s| !s.is_empty()).collect(),
        }
    }
}

fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_timestamp(&raw).ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {}", raw)))
}

/// `timestamptz` values carry an offset; plain `timestamp` columns are read as UTC
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    if let Ok(ts) = DateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f%#z") {
        return Some(ts.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .map(|naive| naive.and_utc())
}

#[derive(Debug, Deserialize)]
struct TokenRow {
    user_id: String,
    #[serde(deserialize_with = "deserialize_timestamp")]
    expires_at: DateTime<Utc>,
    #[serde(default)]
    revoked: Option<bool>,
    #[serde(default)]
    scope: Option<ScopeColumn>,
}

impl From<TokenRow> for TokenRecord {
    fn from(row: TokenRow) -> Self {
        TokenRecord {
            user_id: row.user_id,
            expires_at: row.expires_at,
            revoked: row.revoked.unwrap_or(false),
            scopes: row.scope.map(ScopeColumn::into_set).unwrap_or_default(),
        }
    }
}

/// Looks tokens up with one REST query per validation. Nothing is cached.
#[derive(Debug, Clone)]
pub struct PostgrestTokenStore {
    client: Client,
    endpoint: Url,
}

impl PostgrestTokenStore {
    pub fn new(
        rest_url: &str,
        service_key: &str,
        table: &str,
        timeout: Duration,
    ) -> Result<Self, StoreError> {
        let endpoint = Url::parse(&format!("{}/{}", rest_url.trim_end_matches('/'), table))
            .map_err(|e| StoreError(format!("invalid token store URL: {}", e)))?;

        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::HeaderName::from_static("apikey"),
            header::HeaderValue::from_str(service_key)
                .map_err(|_| StoreError("invalid service key format".to_string()))?,
        );
        headers.insert(
            header::AUTHORIZATION,
            header::HeaderValue::from_str(&format!("Bearer {}", service_key))
                .map_err(|_| StoreError("invalid service key format".to_string()))?,
        );
        headers.insert(
            header::ACCEPT,
            header::HeaderValue::from_static("application/json"),
        );

        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| StoreError(e.to_string()))?;

        Ok(Self { client, endpoint })
    }

    fn lookup_url(&self, token: &str) -> Url {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut()
            .append_pair("select", "user_id,expires_at,revoked,scope")
            .append_pair("access_token", &format!("eq.{}", token))
            .append_pair("limit", "1");
        url
    }
}

#[async_trait]
impl TokenStore for PostgrestTokenStore {
    async fn lookup(&self, token: &str) -> Result<Option<TokenRecord>, StoreError> {
        let response = self
            .client
            .get(self.lookup_url(token))
            .send()
            .await
            .map_err(|e| StoreError(format!("token lookup failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError(format!(
                "token lookup returned HTTP {}: {}",
                status.as_u16(),
                body
            )));
        }

        let rows: Vec<TokenRow> = response
            .json()
            .await
            .map_err(|e| StoreError(format!("malformed token row: {}", e)))?;

        Ok(rows.into_iter().next().map(TokenRecord::from))
    }
}
