// MCP protocol dispatcher: one envelope in, exactly one reply out

use crate::composer::compose;
use crate::error::GatewayError;
use crate::protocol::*;
use crate::upstream::{UpstreamClient, UpstreamError, DEFAULT_UPSTREAM_TIMEOUT};
use fastnow_core::{
    token_fingerprint, AuthError, EndpointResolver, HttpMethod, OutboundCall, Principal,
    ResourcePayload, ResourceRegistry, ScopeSet, ToolRegistry, TokenValidator,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Outcome of handling one envelope, before it is serialised
#[derive(Debug)]
pub struct Reply {
    pub id: Value,
    pub outcome: Result<Value, GatewayError>,
}

impl Reply {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn error(&self) -> Option<&GatewayError> {
        self.outcome.as_ref().err()
    }

    pub fn http_status(&self) -> u16 {
        self.error().map(GatewayError::http_status).unwrap_or(200)
    }

    pub fn to_response(&self) -> JsonRpcResponse {
        match &self.outcome {
            Ok(result) => JsonRpcResponse::success(self.id.clone(), result.clone()),
            Err(err) => JsonRpcResponse::error(self.id.clone(), err.to_rpc_error()),
        }
    }
}

/// The gateway's protocol handler. Registries are shared read-only; all
/// per-request state lives on the stack of the handling task.
pub struct McpServer {
    tools: Arc<ToolRegistry>,
    resources: Arc<ResourceRegistry>,
    validator: TokenValidator,
    resolver: EndpointResolver,
    upstream: Arc<dyn UpstreamClient>,
    upstream_timeout: Duration,
    server_info: ServerInfo,
    authorization: Option<AuthorizationMetadata>,
}

impl McpServer {
    pub fn new(
        tools: Arc<ToolRegistry>,
        resources: Arc<ResourceRegistry>,
        validator: TokenValidator,
        resolver: EndpointResolver,
        upstream: Arc<dyn UpstreamClient>,
    ) -> Self {
        Self {
            tools,
            resources,
            validator,
            resolver,
            upstream,
            upstream_timeout: DEFAULT_UPSTREAM_TIMEOUT,
            server_info: ServerInfo::default(),
            authorization: None,
        }
    }

    /// Upper bound on a single upstream call, independent of the client
    pub fn with_upstream_timeout(mut self, timeout: Duration) -> Self {
        self.upstream_timeout = timeout;
        self
    }

    pub fn with_server_info(mut self, server_info: ServerInfo) -> Self {
        self.server_info = server_info;
        self
    }

    pub fn with_authorization(mut self, metadata: AuthorizationMetadata) -> Self {
        self.authorization = Some(metadata);
        self
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn resources(&self) -> &ResourceRegistry {
        &self.resources
    }

    pub fn server_info(&self) -> &ServerInfo {
        &self.server_info
    }

    pub fn authorization(&self) -> Option<&AuthorizationMetadata> {
        self.authorization.as_ref()
    }

    /// Handle a raw request body. `bearer` is the token from the transport's
    /// `Authorization` header, if any.
    pub async fn handle_bytes(&self, body: &[u8], bearer: Option<&str>) -> Reply {
        let value: Value = match serde_json::from_slice(body) {
            Ok(value) => value,
            Err(e) => {
                debug!(error = %e, "Unparsable request body");
                return Reply {
                    id: Value::Null,
                    outcome: Err(GatewayError::Parse(e.to_string())),
                };
            }
        };

        if !value.is_object() {
            return Reply {
                id: Value::Null,
                outcome: Err(GatewayError::Parse(
                    "request must be a JSON object".to_string(),
                )),
            };
        }

        let id = value.get("id").cloned().unwrap_or(Value::Null);
        match serde_json::from_value::<JsonRpcRequest>(value) {
            Ok(request) => self.handle(request, bearer).await,
            Err(e) => Reply {
                id,
                outcome: Err(GatewayError::InvalidRequest(format!(
                    "malformed envelope: {}",
                    e
                ))),
            },
        }
    }

    pub async fn handle(&self, request: JsonRpcRequest, bearer: Option<&str>) -> Reply {
        let JsonRpcRequest {
            id, method, params, ..
        } = request;

        let outcome = match method.parse::<Method>() {
            Ok(method) => {
                debug!(method = method.as_str(), id = %id, "Dispatching request");
                self.dispatch(method, params, bearer).await
            }
            Err(UnknownMethod(name)) => Err(GatewayError::MethodNotFound(name)),
        };

        if let Err(err) = &outcome {
            log_failure(&method, &id, err);
        }

        Reply { id, outcome }
    }

    async fn dispatch(
        &self,
        method: Method,
        params: Option<Value>,
        bearer: Option<&str>,
    ) -> Result<Value, GatewayError> {
        match method {
            Method::Initialize => self.initialize(),
            Method::Initialized | Method::Ping => Ok(json!({})),
            Method::ToolsList => self.list_tools(),
            Method::ResourcesList => self.list_resources(),
            Method::ResourcesRead => self.read_resource(parse_params(params)?, bearer).await,
            Method::ToolsCall => self.call_tool(parse_params(params)?, bearer).await,
        }
    }

    fn initialize(&self) -> Result<Value, GatewayError> {
        to_result(&InitializeResult {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: ServerCapabilities {
                tools: ListChangedCapability::default(),
                resources: ResourcesCapability::default(),
            },
            server_info: self.server_info.clone(),
            protected_resource_metadata: self.authorization.clone(),
        })
    }

    fn list_tools(&self) -> Result<Value, GatewayError> {
        let tools = self
            .tools
            .iter()
            .map(|tool| ToolSchema::from_definition(tool, &self.resources))
            .collect();

        to_result(&ListToolsResult { tools })
    }

    fn list_resources(&self) -> Result<Value, GatewayError> {
        let resources = self.resources.iter().map(ResourceDescriptor::from).collect();

        to_result(&ListResourcesResult { resources })
    }

    async fn read_resource(
        &self,
        params: ReadResourceParams,
        bearer: Option<&str>,
    ) -> Result<Value, GatewayError> {
        let uri = params
            .uri
            .filter(|uri| !uri.is_empty())
            .ok_or_else(|| GatewayError::InvalidRequest("missing required parameter 'uri'".to_string()))?;

        let entry = self
            .resources
            .get(&uri)
            .ok_or_else(|| GatewayError::ResourceNotFound(uri.clone()))?;

        let contents = match &entry.payload {
            ResourcePayload::Static { .. } => ResourceContents::from_static(entry)
                .ok_or_else(|| GatewayError::Internal(format!("resource {} has no payload", uri)))?,
            ResourcePayload::Data(data) => {
                let (principal, token) = self.authenticate(bearer).await?;
                authorize(&principal, &data.required_scopes)?;

                let call = self
                    .resolver
                    .resolve_endpoint(HttpMethod::Get, &data.endpoint, &Map::new())?
                    .forward_bearer(token);
                let body = self.call_upstream(&call).await?;

                info!(uri = %uri, user_id = %principal.user_id, "Data resource read");

                ResourceContents {
                    uri: entry.uri.clone(),
                    mime_type: entry.mime_type.clone(),
                    text: serde_json::to_string_pretty(&body)
                        .map_err(|e| GatewayError::Internal(e.to_string()))?,
                    meta: None,
                }
            }
        };

        to_result(&ReadResourceResult {
            contents: vec![contents],
        })
    }

    async fn call_tool(
        &self,
        params: CallToolParams,
        bearer: Option<&str>,
    ) -> Result<Value, GatewayError> {
        let name = params
            .name
            .filter(|name| !name.is_empty())
            .ok_or_else(|| GatewayError::InvalidRequest("missing required parameter 'name'".to_string()))?;

        let tool = self
            .tools
            .get(&name)
            .ok_or_else(|| GatewayError::ToolNotFound(name.clone()))?;
        let definition = tool.definition();

        // Token validation completes before anything is sent upstream
        let (principal, token) = self.authenticate(bearer).await?;
        authorize(&principal, &definition.required_scopes)?;

        let arguments = match params.arguments {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(arguments)) => arguments,
            Some(_) => {
                return Err(GatewayError::InvalidRequest(
                    "arguments must be an object".to_string(),
                ))
            }
        };

        tool.validate_arguments(&Value::Object(arguments.clone()))
            .map_err(|violations| GatewayError::InvalidRequest(violations.join("; ")))?;

        let call = self.resolver.resolve(definition, &arguments)?.forward_bearer(token);
        debug!(
            tool = %name,
            method = %call.method,
            path = %call.path(),
            "Resolved tool call"
        );

        let result = self.call_upstream(&call).await?;

        info!(tool = %name, user_id = %principal.user_id, "Tool call succeeded");

        let content = compose(
            &result,
            definition.linked_resource_uri.as_deref(),
            &self.resources,
        );

        to_result(&CallToolResult {
            content,
            is_error: None,
        })
    }

    async fn authenticate<'a>(
        &self,
        bearer: Option<&'a str>,
    ) -> Result<(Principal, &'a str), GatewayError> {
        let token = bearer
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .ok_or(GatewayError::Unauthorized(AuthError::MissingToken))?;

        let principal = self.validator.validate(token).await?;
        debug!(token = %token_fingerprint(token), user_id = %principal.user_id, "Caller authenticated");

        Ok((principal, token))
    }

    async fn call_upstream(&self, call: &OutboundCall) -> Result<Value, GatewayError> {
        match tokio::time::timeout(self.upstream_timeout, self.upstream.execute(call)).await {
            Ok(response) => Ok(response?.into_result()?),
            Err(_) => Err(UpstreamError::Timeout(self.upstream_timeout).into()),
        }
    }
}

fn authorize(principal: &Principal, required: &ScopeSet) -> Result<(), GatewayError> {
    principal.authorize(required).map_err(GatewayError::Unauthorized)
}

fn parse_params<T: DeserializeOwned + Default>(params: Option<Value>) -> Result<T, GatewayError> {
    match params {
        None | Some(Value::Null) => Ok(T::default()),
        Some(value) => serde_json::from_value(value)
            .map_err(|e| GatewayError::InvalidRequest(format!("invalid params: {}", e))),
    }
}

fn to_result<T: Serialize>(value: &T) -> Result<Value, GatewayError> {
    serde_json::to_value(value).map_err(|e| GatewayError::Internal(e.to_string()))
}

fn log_failure(method: &str, id: &Value, err: &GatewayError) {
    match err {
        GatewayError::Internal(_) => {
            error!(method = method, id = %id, code = err.code(), error = %err, "Request failed")
        }
        GatewayError::Upstream(upstream) => {
            let status = match upstream {
                UpstreamError::Status { status, .. } => Some(*status),
                _ => None,
            };
            warn!(method = method, id = %id, upstream_status = ?status, error = %err, "Upstream call failed")
        }
        GatewayError::Unauthorized(auth) => {
            info!(method = method, id = %id, reason = auth.challenge_code(), error = %err, "Request rejected")
        }
        _ => debug!(method = method, id = %id, code = err.code(), error = %err, "Client error"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upstream::UpstreamResponse;
    use async_trait::async_trait;
    use fastnow_core::{Catalog, InMemoryTokenStore};

    struct NoUpstream;

    #[async_trait]
    impl UpstreamClient for NoUpstream {
        async fn execute(&self, _call: &OutboundCall) -> Result<UpstreamResponse, UpstreamError> {
            Err(UpstreamError::Transport("not reachable in tests".to_string()))
        }
    }

    fn server() -> McpServer {
        let catalog = Catalog::builtin("https://cdn.example").unwrap();
        let resources = Arc::new(ResourceRegistry::build(catalog.resources).unwrap());
        let tools = Arc::new(ToolRegistry::build(catalog.tools, &resources).unwrap());

        McpServer::new(
            tools,
            resources,
            TokenValidator::new(Arc::new(InMemoryTokenStore::new())),
            EndpointResolver::new("https://project.supabase.co/functions/v1").unwrap(),
            Arc::new(NoUpstream),
        )
    }

    #[tokio::test]
    async fn test_parse_error_has_null_id() {
        let reply = server().handle_bytes(b"{not json", None).await;

        assert_eq!(reply.id, Value::Null);
        assert!(matches!(reply.error(), Some(GatewayError::Parse(_))));
        assert_eq!(reply.http_status(), 400);
    }

    #[tokio::test]
    async fn test_non_object_body_is_parse_error() {
        let reply = server().handle_bytes(b"[1, 2]", None).await;
        assert!(matches!(reply.error(), Some(GatewayError::Parse(_))));
    }

    #[tokio::test]
    async fn test_missing_method_echoes_id() {
        let reply = server().handle_bytes(br#"{"jsonrpc":"2.0","id":9}"#, None).await;

        assert_eq!(reply.id, json!(9));
        assert!(matches!(reply.error(), Some(GatewayError::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn test_ping_and_initialized() {
        let server = server();

        for method in ["ping", "notifications/initialized"] {
            let reply = server
                .handle(JsonRpcRequest::new(1, method, Value::Null), None)
                .await;
            assert_eq!(reply.outcome.unwrap(), json!({}));
        }
    }

    #[tokio::test]
    async fn test_unknown_method() {
        let reply = server()
            .handle(JsonRpcRequest::new("x", "tools/delete", json!({})), None)
            .await;

        let response = serde_json::to_value(reply.to_response()).unwrap();
        assert_eq!(response["id"], "x");
        assert_eq!(response["error"]["code"], -32601);
        assert!(response.get("result").is_none());
        assert_eq!(reply.http_status(), 200);
    }

    #[tokio::test]
    async fn test_initialize_without_authorization_metadata() {
        let reply = server()
            .handle(JsonRpcRequest::new(1, "initialize", json!({})), None)
            .await;

        let result = reply.outcome.unwrap();
        assert_eq!(result["protocolVersion"], PROTOCOL_VERSION);
        assert!(result.get("protectedResourceMetadata").is_none());
    }

    #[tokio::test]
    async fn test_invalid_params_shape() {
        let reply = server()
            .handle(JsonRpcRequest::new(1, "tools/call", json!({"name": 42})), None)
            .await;

        assert!(matches!(reply.error(), Some(GatewayError::InvalidRequest(_))));
    }
}
