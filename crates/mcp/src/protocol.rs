// MCP protocol types and definitions (JSON-RPC 2.0 over HTTP POST)

use fastnow_core::{ResourceEntry, ResourcePayload, ResourceRegistry, ToolDefinition};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::str::FromStr;

pub const JSONRPC_VERSION: &str = "2.0";

/// Protocol revision announced in `initialize`
pub const PROTOCOL_VERSION: &str = "2024-11-05";

fn default_jsonrpc() -> String {
    JSONRPC_VERSION.to_string()
}

/// JSON-RPC 2.0 Request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    #[serde(default = "default_jsonrpc")]
    pub jsonrpc: String,
    /// Correlation token, echoed back untouched
    #[serde(default)]
    pub id: Value,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn new(id: impl Into<Value>, method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: default_jsonrpc(),
            id: id.into(),
            method: method.into(),
            params: Some(params),
        }
    }
}

/// JSON-RPC 2.0 Response. Exactly one of `result` and `error` is set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: default_jsonrpc(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: Value, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: default_jsonrpc(),
            id,
            result: None,
            error: Some(error),
        }
    }
}

/// JSON-RPC 2.0 Error
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// The closed set of methods the gateway answers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Initialize,
    Initialized,
    Ping,
    ToolsList,
    ToolsCall,
    ResourcesList,
    ResourcesRead,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initialize => "initialize",
            Self::Initialized => "notifications/initialized",
            Self::Ping => "ping",
            Self::ToolsList => "tools/list",
            Self::ToolsCall => "tools/call",
            Self::ResourcesList => "resources/list",
            Self::ResourcesRead => "resources/read",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownMethod(pub String);

impl FromStr for Method {
    type Err = UnknownMethod;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "initialize" => Ok(Self::Initialize),
            "notifications/initialized" => Ok(Self::Initialized),
            "ping" => Ok(Self::Ping),
            "tools/list" => Ok(Self::ToolsList),
            "tools/call" => Ok(Self::ToolsCall),
            "resources/list" => Ok(Self::ResourcesList),
            "resources/read" => Ok(Self::ResourcesRead),
            other => Err(UnknownMethod(other.to_string())),
        }
    }
}

// MCP-specific protocol messages

/// Tool definition as listed to clients
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub annotations: Option<Value>,
    #[serde(rename = "_meta", skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

impl ToolSchema {
    /// Project a registry entry into its protocol-visible shape. Tools with a
    /// linked widget advertise it as their output template.
    pub fn from_definition(tool: &ToolDefinition, resources: &ResourceRegistry) -> Self {
        let meta = tool
            .linked_resource_uri
            .as_deref()
            .and_then(|uri| resources.get(uri))
            .map(|widget| {
                json!({
                    "openai/outputTemplate": widget.uri,
                    "openai/toolInvocation/invoking": format!("Loading {}...", widget.name),
                    "openai/toolInvocation/invoked": format!("{} ready", widget.name),
                    "openai/widgetAccessible": true,
                })
            });

        Self {
            name: tool.name.clone(),
            description: tool.description.clone(),
            input_schema: tool.input_schema.clone(),
            annotations: Some(json!({ "readOnlyHint": tool.read_only })),
            meta,
        }
    }
}

/// List tools response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListToolsResult {
    pub tools: Vec<ToolSchema>,
}

/// Call tool request params
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CallToolParams {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub arguments: Option<Value>,
}

/// Call tool response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallToolResult {
    pub content: Vec<ToolContent>,
    #[serde(rename = "isError", skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ToolContent {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "resource")]
    Resource {
        resource: EmbeddedResource,
        #[serde(rename = "structuredContent", skip_serializing_if = "Option::is_none")]
        structured_content: Option<Value>,
    },
}

impl ToolContent {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddedResource {
    pub uri: String,
    #[serde(rename = "mimeType")]
    pub mime_type: String,
    pub text: String,
}

/// Read resource request params
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReadResourceParams {
    #[serde(default)]
    pub uri: Option<String>,
}

/// Resource as listed to clients
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    pub uri: String,
    pub name: String,
    pub description: String,
    #[serde(rename = "mimeType")]
    pub mime_type: String,
}

impl From<&ResourceEntry> for ResourceDescriptor {
    fn from(entry: &ResourceEntry) -> Self {
        Self {
            uri: entry.uri.clone(),
            name: entry.name.clone(),
            description: entry.description.clone(),
            mime_type: entry.mime_type.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListResourcesResult {
    pub resources: Vec<ResourceDescriptor>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceContents {
    pub uri: String,
    #[serde(rename = "mimeType")]
    pub mime_type: String,
    pub text: String,
    #[serde(rename = "_meta", skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

impl ResourceContents {
    /// Contents of a widget, with its CSP hints. None for data resources.
    pub fn from_static(entry: &ResourceEntry) -> Option<Self> {
        match &entry.payload {
            ResourcePayload::Static { text, csp } => Some(Self {
                uri: entry.uri.clone(),
                mime_type: entry.mime_type.clone(),
                text: text.clone(),
                meta: Some(json!({ "openai/widgetCSP": csp })),
            }),
            ResourcePayload::Data(_) => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadResourceResult {
    pub contents: Vec<ResourceContents>,
}

/// Initialize response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitializeResult {
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,
    pub capabilities: ServerCapabilities,
    #[serde(rename = "serverInfo")]
    pub server_info: ServerInfo,
    #[serde(
        rename = "protectedResourceMetadata",
        skip_serializing_if = "Option::is_none"
    )]
    pub protected_resource_metadata: Option<AuthorizationMetadata>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerCapabilities {
    pub tools: ListChangedCapability,
    pub resources: ResourcesCapability,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListChangedCapability {
    #[serde(rename = "listChanged")]
    pub list_changed: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourcesCapability {
    pub subscribe: bool,
    #[serde(rename = "listChanged")]
    pub list_changed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
}

impl Default for ServerInfo {
    fn default() -> Self {
        Self {
            name: "FastNow MCP Server".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// OAuth protected-resource metadata advertised to clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationMetadata {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub registration_endpoint: String,
    pub scopes_supported: Vec<String>,
    pub response_types_supported: Vec<String>,
    pub grant_types_supported: Vec<String>,
    pub code_challenge_methods_supported: Vec<String>,
    pub token_endpoint_auth_methods_supported: Vec<String>,
}

impl AuthorizationMetadata {
    /// Authorization-code flow with PKCE and refresh tokens
    pub fn new(
        issuer: impl Into<String>,
        authorization_endpoint: impl Into<String>,
        token_endpoint: impl Into<String>,
        registration_endpoint: impl Into<String>,
        scopes_supported: Vec<String>,
    ) -> Self {
        Self {
            issuer: issuer.into(),
            authorization_endpoint: authorization_endpoint.into(),
            token_endpoint: token_endpoint.into(),
            registration_endpoint: registration_endpoint.into(),
            scopes_supported,
            response_types_supported: vec!["code".to_string()],
            grant_types_supported: vec![
                "authorization_code".to_string(),
                "refresh_token".to_string(),
            ],
            code_challenge_methods_supported: vec!["S256".to_string()],
            token_endpoint_auth_methods_supported: vec![
                "client_secret_post".to_string(),
                "none".to_string(),
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_round_trip() {
        for method in [
            Method::Initialize,
            Method::Initialized,
            Method::Ping,
            Method::ToolsList,
            Method::ToolsCall,
            Method::ResourcesList,
            Method::ResourcesRead,
        ] {
            assert_eq!(method.as_str().parse::<Method>(), Ok(method));
        }
    }

    #[test]
    fn test_unknown_method() {
        assert_eq!(
            "tools/delete".parse::<Method>(),
            Err(UnknownMethod("tools/delete".to_string()))
        );
        assert!("Tools/List".parse::<Method>().is_err());
        assert!("tools/list ".parse::<Method>().is_err());
    }

    #[test]
    fn test_request_defaults() {
        let request: JsonRpcRequest =
            serde_json::from_value(json!({"method": "tools/list"})).unwrap();

        assert_eq!(request.jsonrpc, "2.0");
        assert_eq!(request.id, Value::Null);
        assert!(request.params.is_none());
    }

    #[test]
    fn test_response_serialization_is_exclusive() {
        let ok = serde_json::to_value(JsonRpcResponse::success(json!(7), json!({}))).unwrap();
        assert_eq!(ok, json!({"jsonrpc": "2.0", "id": 7, "result": {}}));

        let err = serde_json::to_value(JsonRpcResponse::error(
            json!("abc"),
            JsonRpcError {
                code: -32601,
                message: "Method not found: x".to_string(),
                data: None,
            },
        ))
        .unwrap();
        assert_eq!(
            err,
            json!({"jsonrpc": "2.0", "id": "abc", "error": {"code": -32601, "message": "Method not found: x"}})
        );
    }

    #[test]
    fn test_tool_content_serialization() {
        let content = vec![
            ToolContent::text("{}"),
            ToolContent::Resource {
                resource: EmbeddedResource {
                    uri: "ui://widget/a.html".to_string(),
                    mime_type: "text/html+skybridge".to_string(),
                    text: "<html></html>".to_string(),
                },
                structured_content: Some(json!({"x": 1})),
            },
        ];

        assert_eq!(
            serde_json::to_value(&content).unwrap(),
            json!([
                {"type": "text", "text": "{}"},
                {
                    "type": "resource",
                    "resource": {"uri": "ui://widget/a.html", "mimeType": "text/html+skybridge", "text": "<html></html>"},
                    "structuredContent": {"x": 1}
                }
            ])
        );
    }
}
