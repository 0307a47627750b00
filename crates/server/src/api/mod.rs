use crate::config::AppState;
use anyhow::Result;
use axum::{
    http::{header, Method},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};

mod handlers;

/// Start the API server
pub async fn serve(addr: &str, state: AppState) -> Result<()> {
    let app = create_router(Arc::new(state));

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("MCP gateway listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

/// Create the API router
fn create_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    Router::new()
        .route("/", get(handlers::root))
        .route("/health", get(health_check))
        .route("/mcp", get(handlers::get_mcp).post(handlers::post_mcp))
        .route("/.well-known/mcp.json", get(handlers::mcp_manifest))
        .route(
            "/.well-known/oauth-protected-resource",
            get(handlers::protected_resource),
        )
        // Middleware
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new())
                .on_response(DefaultOnResponse::new()),
        )
        .layer(cors)
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "fastnow-mcp",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use chrono::{Duration, Utc};
    use fastnow_core::{
        Catalog, EndpointResolver, InMemoryTokenStore, OutboundCall, ResourceRegistry,
        TokenRecord, TokenValidator, ToolRegistry,
    };
    use fastnow_mcp::protocol::AuthorizationMetadata;
    use fastnow_mcp::{McpServer, UpstreamClient, UpstreamError, UpstreamResponse};
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    struct EchoUpstream;

    #[async_trait]
    impl UpstreamClient for EchoUpstream {
        async fn execute(&self, call: &OutboundCall) -> Result<UpstreamResponse, UpstreamError> {
            Ok(UpstreamResponse {
                status: 200,
                body: json!({"path": call.path(), "data": {"ok": true}}),
            })
        }
    }

    fn app() -> Router {
        let catalog = Catalog::builtin("https://cdn.example").unwrap();
        let resources = Arc::new(ResourceRegistry::build(catalog.resources).unwrap());
        let tools = Arc::new(ToolRegistry::build(catalog.tools, &resources).unwrap());

        let store = Arc::new(InMemoryTokenStore::new());
        store.insert(
            "good-token",
            TokenRecord {
                user_id: "user-1".to_string(),
                expires_at: Utc::now() + Duration::hours(1),
                revoked: false,
                scopes: ["read:fasting".to_string()].into_iter().collect(),
            },
        );

        let mcp = McpServer::new(
            tools,
            resources,
            TokenValidator::new(store),
            EndpointResolver::new("https://backend.example/functions/v1").unwrap(),
            Arc::new(EchoUpstream),
        )
        .with_authorization(AuthorizationMetadata::new(
            "https://auth.example",
            "https://auth.example/oauth/authorize",
            "https://backend.example/functions/v1/oauth-token",
            "https://backend.example/functions/v1/oauth-register",
            vec!["read:fasting".to_string(), "write:fasting".to_string()],
        ));

        create_router(Arc::new(AppState {
            mcp,
            public_url: "https://mcp.example".to_string(),
            client_id: "test-client".to_string(),
        }))
    }

    fn rpc(body: Value, token: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/mcp")
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_check() {
        let response = app()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_tools_list() {
        let response = app()
            .oneshot(rpc(json!({"jsonrpc": "2.0", "id": 1, "method": "tools/list"}), None))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["id"], 1);
        assert_eq!(body["result"]["tools"].as_array().unwrap().len(), 76);
    }

    #[tokio::test]
    async fn test_tool_call_with_token() {
        let response = app()
            .oneshot(rpc(
                json!({"jsonrpc": "2.0", "id": "a", "method": "tools/call", "params": {"name": "get_current_fast"}}),
                Some("good-token"),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        let content = body["result"]["content"].as_array().unwrap();
        assert_eq!(content.len(), 2);
        assert_eq!(content[1]["structuredContent"], json!({"ok": true}));
    }

    #[tokio::test]
    async fn test_unauthorized_carries_challenge() {
        let response = app()
            .oneshot(rpc(
                json!({"jsonrpc": "2.0", "id": 2, "method": "tools/call", "params": {"name": "get_current_fast"}}),
                Some("expired-or-unknown"),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let challenge = response
            .headers()
            .get(header::WWW_AUTHENTICATE)
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();
        assert!(challenge.starts_with("Bearer realm=\"https://mcp.example\""));
        assert!(challenge.contains("error=\"invalid_token\""));
        assert_eq!(
            response.headers().get(header::LINK).unwrap(),
            "<https://mcp.example/.well-known/mcp.json>; rel=\"oauth-authorization-server\""
        );

        let body = body_json(response).await;
        assert_eq!(body["id"], 2);
        assert_eq!(body["error"]["code"], -32001);
    }

    #[tokio::test]
    async fn test_insufficient_scope_challenge() {
        let response = app()
            .oneshot(rpc(
                json!({"jsonrpc": "2.0", "id": 3, "method": "tools/call", "params": {"name": "end_fast"}}),
                Some("good-token"),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let challenge = response.headers().get(header::WWW_AUTHENTICATE).unwrap();
        assert!(challenge.to_str().unwrap().contains("error=\"insufficient_scope\""));
    }

    #[tokio::test]
    async fn test_malformed_body_is_bad_request() {
        let request = Request::builder()
            .method("POST")
            .uri("/mcp")
            .body(Body::from("{oops"))
            .unwrap();
        let response = app().oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["id"], Value::Null);
        assert_eq!(body["error"]["code"], -32700);
    }

    #[tokio::test]
    async fn test_method_not_found_is_ok_status() {
        let response = app()
            .oneshot(rpc(json!({"jsonrpc": "2.0", "id": 4, "method": "prompts/list"}), None))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get(header::WWW_AUTHENTICATE).is_none());
        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], -32601);
    }

    #[tokio::test]
    async fn test_discovery_documents() {
        let response = app()
            .oneshot(
                Request::builder()
                    .uri("/.well-known/mcp.json")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let manifest = body_json(response).await;
        assert_eq!(manifest["transports"]["http"]["url"], "https://mcp.example/mcp");
        assert_eq!(manifest["authentication"]["client_id"], "test-client");
        assert_eq!(manifest["authentication"]["scopes"], "read:fasting write:fasting");

        let response = app()
            .oneshot(
                Request::builder()
                    .uri("/.well-known/oauth-protected-resource")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let metadata = body_json(response).await;
        assert_eq!(metadata["resource"], "https://mcp.example");
        assert_eq!(metadata["authorization_servers"], json!(["https://auth.example"]));
    }

    #[tokio::test]
    async fn test_get_mcp_and_root() {
        let response = app()
            .oneshot(Request::builder().uri("/mcp").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(body_json(response).await["method"], "POST");

        let response = app()
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let root = body_json(response).await;
        assert_eq!(root["endpoints"]["mcp"], "/mcp");
        assert_eq!(root["protectedResourceMetadata"]["issuer"], "https://auth.example");
    }
}
