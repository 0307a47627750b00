use crate::config::AppState;
use crate::middleware::auth::{challenge_headers, extract_bearer_token};
use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use fastnow_mcp::GatewayError;
use serde_json::{json, Value};
use std::sync::Arc;

/// POST /mcp: one envelope in, one envelope out
pub async fn post_mcp(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let bearer = extract_bearer_token(&headers);
    let reply = state.mcp.handle_bytes(&body, bearer).await;

    let status =
        StatusCode::from_u16(reply.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut response = (status, Json(reply.to_response())).into_response();

    if let Some(auth) = reply.error().and_then(GatewayError::auth_error) {
        response
            .headers_mut()
            .extend(challenge_headers(&state.public_url, auth));
    }

    response
}

/// GET /mcp, for people poking at the endpoint from a browser
pub async fn get_mcp() -> Json<Value> {
    Json(json!({
        "service": "MCP Endpoint",
        "method": "POST",
        "description": "This endpoint accepts MCP protocol requests via POST",
        "status": "ready",
    }))
}

/// GET /
pub async fn root(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "service": state.mcp.server_info().name,
        "status": "running",
        "version": state.mcp.server_info().version,
        "transport": "HTTP POST (request/response)",
        "endpoints": {
            "health": "/health",
            "mcp": "/mcp",
            "manifest": "/.well-known/mcp.json",
        },
        "protectedResourceMetadata": state.mcp.authorization(),
    }))
}

/// GET /.well-known/mcp.json
pub async fn mcp_manifest(State(state): State<Arc<AppState>>) -> Json<Value> {
    let mut manifest = json!({
        "$schema": "https://modelcontextprotocol.io/schemas/mcp.json",
        "name": state.mcp.server_info().name,
        "description": "Track your fasting, nutrition, and weight with AI assistance through FastNow",
        "version": state.mcp.server_info().version,
        "capabilities": {
            "resources": true,
            "tools": true,
            "prompts": false,
        },
        "transports": {
            "http": {
                "url": format!("{}/mcp", state.public_url),
                "method": "POST",
            }
        },
    });

    if let Some(metadata) = state.mcp.authorization() {
        manifest["authentication"] = json!({
            "type": "oauth2",
            "authorization_url": metadata.authorization_endpoint,
            "token_url": metadata.token_endpoint,
            "registration_url": metadata.registration_endpoint,
            "client_id": state.client_id,
            "scopes": metadata.scopes_supported.join(" "),
        });
        manifest["protectedResourceMetadata"] = json!(metadata);
    }

    Json(manifest)
}

/// GET /.well-known/oauth-protected-resource (RFC 9728)
pub async fn protected_resource(State(state): State<Arc<AppState>>) -> Json<Value> {
    let (servers, scopes) = match state.mcp.authorization() {
        Some(metadata) => (
            vec![metadata.issuer.clone()],
            metadata.scopes_supported.clone(),
        ),
        None => (Vec::new(), Vec::new()),
    };

    Json(json!({
        "resource": state.public_url,
        "authorization_servers": servers,
        "scopes_supported": scopes,
        "bearer_methods_supported": ["header"],
    }))
}
