use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// MIME type the apps host expects for widget documents
pub const UI_RESOURCE_MIME: &str = "text/html+skybridge";

/// MIME type of data resources
pub const DATA_RESOURCE_MIME: &str = "application/json";

/// Set of OAuth scope names
pub type ScopeSet = BTreeSet<String>;

/// HTTP verb used to call an upstream endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
}

impl HttpMethod {
    /// Read-style verbs carry their arguments in the query string, write-style
    /// verbs in a JSON body.
    pub fn uses_query(&self) -> bool {
        matches!(self, Self::Get | Self::Delete)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
        }
    }
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A tool exposed over MCP and the upstream endpoint that backs it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
    /// Path relative to the upstream base URL, may contain `{param}` segments
    #[serde(rename = "endpoint")]
    pub endpoint_template: String,
    #[serde(rename = "method")]
    pub http_method: HttpMethod,
    #[serde(rename = "scopes", default)]
    pub required_scopes: ScopeSet,
    #[serde(rename = "resource", default, skip_serializing_if = "Option::is_none")]
    pub linked_resource_uri: Option<String>,
    #[serde(default)]
    pub read_only: bool,
}

/// Content security policy hints attached to a widget
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WidgetCsp {
    pub connect_domains: Vec<String>,
    pub resource_domains: Vec<String>,
}

/// Upstream read that produces a data resource on demand
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataResource {
    pub endpoint: String,
    pub required_scopes: ScopeSet,
}

/// Where the body of a resource comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourcePayload {
    /// Rendered once at startup and served as-is
    Static { text: String, csp: WidgetCsp },
    /// Fetched per request for the authenticated caller
    Data(DataResource),
}

/// A URI-addressed resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceEntry {
    pub uri: String,
    pub name: String,
    pub description: String,
    pub mime_type: String,
    pub payload: ResourcePayload,
}

impl ResourceEntry {
    pub fn is_ui(&self) -> bool {
        matches!(self.payload, ResourcePayload::Static { .. })
    }

    pub fn static_text(&self) -> Option<&str> {
        match &self.payload {
            ResourcePayload::Static { text, .. } => Some(text),
            ResourcePayload::Data(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_method_routing() {
        assert!(HttpMethod::Get.uses_query());
        assert!(HttpMethod::Delete.uses_query());
        assert!(!HttpMethod::Post.uses_query());
        assert!(!HttpMethod::Put.uses_query());
    }

    #[test]
    fn test_tool_definition_from_catalog_record() {
        let tool: ToolDefinition = serde_json::from_value(serde_json::json!({
            "name": "delete_food",
            "description": "Delete a food entry",
            "input_schema": {"type": "object", "properties": {"food_id": {"type": "string"}}, "required": ["food_id"]},
            "endpoint": "/gpt-food/{food_id}",
            "method": "DELETE",
            "scopes": ["write:food"]
        }))
        .unwrap();

        assert_eq!(tool.http_method, HttpMethod::Delete);
        assert_eq!(tool.endpoint_template, "/gpt-food/{food_id}");
        assert!(tool.required_scopes.contains("write:food"));
        assert!(tool.linked_resource_uri.is_none());
        assert!(!tool.read_only);
    }

    #[test]
    fn test_unknown_http_method_rejected() {
        let result = serde_json::from_value::<HttpMethod>(serde_json::json!("PATCH"));
        assert!(result.is_err());
    }
}
