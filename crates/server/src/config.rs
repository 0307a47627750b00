use anyhow::{bail, Context, Result};
use fastnow_core::{
    Catalog, EndpointResolver, ResourcePayload, ResourceRegistry, ScopeSet, TokenValidator,
    ToolRegistry,
};
use fastnow_mcp::postgrest::{PostgrestTokenStore, DEFAULT_TOKEN_TABLE};
use fastnow_mcp::protocol::AuthorizationMetadata;
use fastnow_mcp::{HttpUpstream, McpServer};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub server: HttpConfig,

    #[serde(default)]
    pub upstream: UpstreamConfig,

    #[serde(default)]
    pub token_store: TokenStoreConfig,

    #[serde(default)]
    pub oauth: OAuthConfig,

    #[serde(default)]
    pub widgets: WidgetConfig,

    #[serde(default)]
    pub catalog: CatalogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Externally visible origin, used as the auth realm and in discovery links
    #[serde(default = "default_public_url")]
    pub public_url: String,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_public_url() -> String {
    "https://mcp.fastnow.app".to_string()
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            public_url: default_public_url(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// Base URL of the backend functions, e.g. `https://<project>.supabase.co/functions/v1`
    #[serde(default)]
    pub base_url: Option<String>,

    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_upstream_timeout")]
    pub timeout_secs: u64,
}

fn default_upstream_timeout() -> u64 {
    30
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            api_key: None,
            timeout_secs: default_upstream_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenStoreConfig {
    /// PostgREST root, e.g. `https://<project>.supabase.co/rest/v1`
    #[serde(default)]
    pub rest_url: Option<String>,

    /// Falls back to the upstream API key when unset
    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_token_table")]
    pub table: String,

    #[serde(default = "default_token_store_timeout")]
    pub timeout_secs: u64,
}

fn default_token_table() -> String {
    DEFAULT_TOKEN_TABLE.to_string()
}

fn default_token_store_timeout() -> u64 {
    10
}

impl Default for TokenStoreConfig {
    fn default() -> Self {
        Self {
            rest_url: None,
            api_key: None,
            table: default_token_table(),
            timeout_secs: default_token_store_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthConfig {
    #[serde(default = "default_issuer")]
    pub issuer: String,

    #[serde(default = "default_authorization_endpoint")]
    pub authorization_endpoint: String,

    /// Defaults to `<upstream>/oauth-token`
    #[serde(default)]
    pub token_endpoint: Option<String>,

    /// Defaults to `<upstream>/oauth-register`
    #[serde(default)]
    pub registration_endpoint: Option<String>,

    #[serde(default = "default_client_id")]
    pub client_id: String,

    /// Empty means every scope some tool or resource requires
    #[serde(default)]
    pub scopes: Vec<String>,
}

fn default_issuer() -> String {
    "https://go.fastnow.app".to_string()
}

fn default_authorization_endpoint() -> String {
    "https://go.fastnow.app/oauth/authorize".to_string()
}

fn default_client_id() -> String {
    "chatgpt-fastnow".to_string()
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            issuer: default_issuer(),
            authorization_endpoint: default_authorization_endpoint(),
            token_endpoint: None,
            registration_endpoint: None,
            client_id: default_client_id(),
            scopes: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WidgetConfig {
    #[serde(default = "default_cdn_url")]
    pub cdn_url: String,
}

fn default_cdn_url() -> String {
    "https://5663f26e.fastnow-components.pages.dev".to_string()
}

impl Default for WidgetConfig {
    fn default() -> Self {
        Self {
            cdn_url: default_cdn_url(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// Replaces the built-in tool catalog
    #[serde(default)]
    pub tools_path: Option<PathBuf>,
}

impl ServerConfig {
    /// Read the config file if present, then apply environment overrides
    pub fn load(config_path: &Path) -> Result<Self> {
        let mut config = Self::from_file(config_path)?;
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            tracing::info!(path = %config_path.display(), "Configuration file not found, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(config_path)
            .context("Failed to read configuration file")?;
        toml::from_str(&content).context("Failed to parse configuration file")
    }

    /// Apply environment overrides. `SUPABASE_URL` derives both the
    /// functions base and the PostgREST root.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(url) = var("SUPABASE_URL") {
            let url = url.trim_end_matches('/');
            self.upstream.base_url = Some(format!("{}/functions/v1", url));
            self.token_store.rest_url = Some(format!("{}/rest/v1", url));
        }
        if let Some(key) = var("SUPABASE_ANON_KEY") {
            self.upstream.api_key = Some(key);
        }
        if let Some(key) = var("SUPABASE_SERVICE_ROLE_KEY") {
            self.token_store.api_key = Some(key);
        }
        if let Some(url) = var("FASTNOW_PUBLIC_URL") {
            self.server.public_url = url;
        }
        if let Some(url) = var("FASTNOW_COMPONENTS_CDN") {
            self.widgets.cdn_url = url;
        }
        if let Some(port) = var("PORT") {
            match port.parse() {
                Ok(port) => self.server.port = port,
                Err(_) => tracing::warn!(value = %port, "Ignoring invalid PORT"),
            }
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    pub fn public_url(&self) -> &str {
        self.server.public_url.trim_end_matches('/')
    }

    pub fn upstream_base_url(&self) -> Result<&str> {
        match self.upstream.base_url.as_deref() {
            Some(url) if !url.is_empty() => Ok(url.trim_end_matches('/')),
            _ => bail!("upstream base URL not configured (set SUPABASE_URL or [upstream].base_url)"),
        }
    }

    pub fn token_store_url(&self) -> Result<&str> {
        match self.token_store.rest_url.as_deref() {
            Some(url) if !url.is_empty() => Ok(url),
            _ => bail!("token store URL not configured (set SUPABASE_URL or [token_store].rest_url)"),
        }
    }

    pub fn token_store_key(&self) -> Result<&str> {
        self.token_store
            .api_key
            .as_deref()
            .or(self.upstream.api_key.as_deref())
            .filter(|key| !key.is_empty())
            .context("token store key not configured (set SUPABASE_SERVICE_ROLE_KEY or [token_store].api_key)")
    }

    /// Protected-resource metadata. Endpoints not configured explicitly live
    /// next to the backend functions.
    pub fn authorization_metadata(&self, default_scopes: &ScopeSet) -> Result<AuthorizationMetadata> {
        let base = self.upstream_base_url()?;
        let token_endpoint = self
            .oauth
            .token_endpoint
            .clone()
            .unwrap_or_else(|| format!("{}/oauth-token", base));
        let registration_endpoint = self
            .oauth
            .registration_endpoint
            .clone()
            .unwrap_or_else(|| format!("{}/oauth-register", base));
        let scopes = if self.oauth.scopes.is_empty() {
            default_scopes.iter().cloned().collect()
        } else {
            self.oauth.scopes.clone()
        };

        Ok(AuthorizationMetadata::new(
            self.oauth.issuer.clone(),
            self.oauth.authorization_endpoint.clone(),
            token_endpoint,
            registration_endpoint,
            scopes,
        ))
    }
}

/// Every scope some tool or data resource requires
pub fn catalog_scopes(tools: &ToolRegistry, resources: &ResourceRegistry) -> ScopeSet {
    let mut scopes: ScopeSet = tools
        .iter()
        .flat_map(|tool| tool.required_scopes.iter().cloned())
        .collect();
    for entry in resources.iter() {
        if let ResourcePayload::Data(data) = &entry.payload {
            scopes.extend(data.required_scopes.iter().cloned());
        }
    }
    scopes
}

/// Application state shared across handlers
pub struct AppState {
    pub mcp: McpServer,
    pub public_url: String,
    pub client_id: String,
}

impl AppState {
    pub fn new(config: &ServerConfig) -> Result<Self> {
        let catalog = Catalog::load(config.catalog.tools_path.as_deref(), &config.widgets.cdn_url)
            .context("Failed to load catalog")?;
        let resources = Arc::new(
            ResourceRegistry::build(catalog.resources).context("Invalid resource catalog")?,
        );
        let tools = Arc::new(
            ToolRegistry::build(catalog.tools, &resources).context("Invalid tool catalog")?,
        );

        tracing::info!(
            tools = tools.len(),
            resources = resources.len(),
            "Registries built"
        );

        let store = PostgrestTokenStore::new(
            config.token_store_url()?,
            config.token_store_key()?,
            &config.token_store.table,
            Duration::from_secs(config.token_store.timeout_secs),
        )
        .context("Failed to create token store")?;

        let upstream_timeout = Duration::from_secs(config.upstream.timeout_secs);
        let upstream = HttpUpstream::new(config.upstream.api_key.as_deref(), upstream_timeout)
            .context("Failed to create upstream client")?;
        let resolver = EndpointResolver::new(config.upstream_base_url()?)
            .context("Invalid upstream base URL")?;

        let authorization = config.authorization_metadata(&catalog_scopes(&tools, &resources))?;

        let mcp = McpServer::new(
            tools,
            resources,
            TokenValidator::new(Arc::new(store)),
            resolver,
            Arc::new(upstream),
        )
        .with_upstream_timeout(upstream_timeout)
        .with_authorization(authorization);

        Ok(Self {
            mcp,
            public_url: config.public_url().to_string(),
            client_id: config.oauth.client_id.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_file_missing() {
        let config = ServerConfig::from_file(Path::new("/nonexistent/fastnow.toml")).unwrap();

        assert_eq!(config.server.port, 3000);
        assert_eq!(config.upstream.timeout_secs, 30);
        assert_eq!(config.token_store.table, "oauth_access_tokens");
        assert!(config.upstream_base_url().is_err());
    }

    #[test]
    fn test_parse_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[server]
port = 8080
public_url = "https://gateway.example/"

[upstream]
base_url = "https://backend.example/functions/v1/"
api_key = "anon"
timeout_secs = 5

[oauth]
scopes = ["read:fasting"]
"#
        )
        .unwrap();

        let config = ServerConfig::from_file(file.path()).unwrap();
        assert_eq!(config.bind_addr(), "0.0.0.0:8080");
        assert_eq!(config.public_url(), "https://gateway.example");
        assert_eq!(
            config.upstream_base_url().unwrap(),
            "https://backend.example/functions/v1"
        );
        assert_eq!(config.upstream.timeout_secs, 5);
        assert_eq!(config.oauth.scopes, vec!["read:fasting"]);
        assert_eq!(config.token_store_key().unwrap(), "anon");
    }

    #[test]
    fn test_invalid_file_is_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "[server\nport = ").unwrap();

        assert!(ServerConfig::from_file(file.path()).is_err());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = ServerConfig::default();
        config.apply_env(env(&[
            ("SUPABASE_URL", "https://proj.supabase.co/"),
            ("SUPABASE_ANON_KEY", "anon"),
            ("SUPABASE_SERVICE_ROLE_KEY", "service"),
            ("FASTNOW_PUBLIC_URL", "https://mcp.example"),
            ("FASTNOW_COMPONENTS_CDN", "https://cdn.example"),
            ("PORT", "9000"),
        ]));

        assert_eq!(
            config.upstream_base_url().unwrap(),
            "https://proj.supabase.co/functions/v1"
        );
        assert_eq!(config.token_store_url().unwrap(), "https://proj.supabase.co/rest/v1");
        assert_eq!(config.upstream.api_key.as_deref(), Some("anon"));
        assert_eq!(config.token_store_key().unwrap(), "service");
        assert_eq!(config.public_url(), "https://mcp.example");
        assert_eq!(config.widgets.cdn_url, "https://cdn.example");
        assert_eq!(config.server.port, 9000);
    }

    #[test]
    fn test_invalid_port_ignored() {
        let mut config = ServerConfig::default();
        config.apply_env(env(&[("PORT", "not-a-port"), ("SUPABASE_URL", "")]));

        assert_eq!(config.server.port, 3000);
        assert!(config.upstream.base_url.is_none());
    }

    #[test]
    fn test_authorization_metadata_defaults() {
        let mut config = ServerConfig::default();
        config.apply_env(env(&[("SUPABASE_URL", "https://proj.supabase.co")]));

        let scopes: ScopeSet = ["write:food", "read:food"].iter().map(|s| s.to_string()).collect();
        let metadata = config.authorization_metadata(&scopes).unwrap();

        assert_eq!(
            metadata.token_endpoint,
            "https://proj.supabase.co/functions/v1/oauth-token"
        );
        assert_eq!(
            metadata.registration_endpoint,
            "https://proj.supabase.co/functions/v1/oauth-register"
        );
        assert_eq!(metadata.scopes_supported, vec!["read:food", "write:food"]);
        assert_eq!(metadata.issuer, "https://go.fastnow.app");
    }

    #[test]
    fn test_app_state_requires_upstream() {
        assert!(AppState::new(&ServerConfig::default()).is_err());
    }

    #[test]
    fn test_app_state_builds() {
        let mut config = ServerConfig::default();
        config.apply_env(env(&[
            ("SUPABASE_URL", "https://proj.supabase.co"),
            ("SUPABASE_ANON_KEY", "anon"),
        ]));

        let state = AppState::new(&config).unwrap();
        assert_eq!(state.mcp.tools().len(), 76);
        let scopes = &state.mcp.authorization().unwrap().scopes_supported;
        assert!(scopes.contains(&"write:fasting".to_string()));
        assert!(scopes.contains(&"read:profile".to_string()));
    }
}
