// Static tool and resource catalogs shipped with the gateway

use crate::types::{
    DataResource, ResourceEntry, ResourcePayload, ScopeSet, ToolDefinition, WidgetCsp,
    DATA_RESOURCE_MIME, UI_RESOURCE_MIME,
};
use serde::Deserialize;
use std::path::{Path, PathBuf};

const BUILTIN_TOOLS: &str = include_str!("../catalog/tools.json");
const BUILTIN_RESOURCES: &str = include_str!("../catalog/resources.json");

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("failed to read catalog {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {what} catalog: {source}")]
    Parse {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum ResourceRecord {
    Widget {
        uri: String,
        name: String,
        description: String,
        script: String,
    },
    Data {
        uri: String,
        name: String,
        description: String,
        endpoint: String,
        #[serde(default)]
        scopes: ScopeSet,
    },
}

/// Tool and resource tables as loaded at startup, before registry validation
#[derive(Debug, Clone)]
pub struct Catalog {
    pub tools: Vec<ToolDefinition>,
    pub resources: Vec<ResourceEntry>,
}

impl Catalog {
    /// Catalog compiled into the binary, with widgets pointing at `cdn_url`
    pub fn builtin(cdn_url: &str) -> Result<Self, CatalogError> {
        Self::load(None, cdn_url)
    }

    /// Load the catalog, replacing the built-in tool table with the file at
    /// `tools_path` when given.
    pub fn load(tools_path: Option<&Path>, cdn_url: &str) -> Result<Self, CatalogError> {
        let tools = match tools_path {
            Some(path) => {
                let content = std::fs::read_to_string(path).map_err(|source| CatalogError::Io {
                    path: path.to_path_buf(),
                    source,
                })?;
                parse_tools(&content)?
            }
            None => parse_tools(BUILTIN_TOOLS)?,
        };
        let resources = parse_resources(BUILTIN_RESOURCES, cdn_url)?;

        tracing::debug!(
            tools = tools.len(),
            resources = resources.len(),
            "Catalog loaded"
        );

        Ok(Self { tools, resources })
    }
}

fn parse_tools(content: &str) -> Result<Vec<ToolDefinition>, CatalogError> {
    serde_json::from_str(content).map_err(|source| CatalogError::Parse {
        what: "tool",
        source,
    })
}

fn parse_resources(content: &str, cdn_url: &str) -> Result<Vec<ResourceEntry>, CatalogError> {
    let records: Vec<ResourceRecord> =
        serde_json::from_str(content).map_err(|source| CatalogError::Parse {
            what: "resource",
            source,
        })?;

    let cdn_url = cdn_url.trim_end_matches('/');
    let entries = records
        .into_iter()
        .map(|record| match record {
            ResourceRecord::Widget {
                uri,
                name,
                description,
                script,
            } => ResourceEntry {
                uri,
                name,
                description,
                mime_type: UI_RESOURCE_MIME.to_string(),
                payload: ResourcePayload::Static {
                    text: render_widget_html(cdn_url, &script),
                    csp: WidgetCsp {
                        connect_domains: vec![cdn_url.to_string()],
                        resource_domains: vec![cdn_url.to_string()],
                    },
                },
            },
            ResourceRecord::Data {
                uri,
                name,
                description,
                endpoint,
                scopes,
            } => ResourceEntry {
                uri,
                name,
                description,
                mime_type: DATA_RESOURCE_MIME.to_string(),
                payload: ResourcePayload::Data(DataResource {
                    endpoint,
                    required_scopes: scopes,
                }),
            },
        })
        .collect();

    Ok(entries)
}

/// Shell document for a widget; the component bundle itself lives on the CDN
pub fn render_widget_html(cdn_url: &str, script: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
  <meta charset="utf-8">
  <meta name="viewport" content="width=device-width, initial-scale=1">
  <link rel="stylesheet" href="{cdn}/style.css">
</head>
<body>
  <div id="fastnow-root"></div>
  <script type="module" src="{cdn}/{script}"></script>
</body>
</html>"#,
        cdn = cdn_url,
        script = script,
    )
}
