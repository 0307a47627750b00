// Turns a tool definition plus call arguments into a concrete upstream request

use crate::types::{HttpMethod, ToolDefinition};
use serde_json::{Map, Value};
use std::collections::HashSet;
use url::Url;

/// Header carrying the caller's bearer token to the upstream functions.
///
/// The upstream runs its own session middleware on `Authorization`, so the
/// caller's token travels under this name instead and `Authorization` stays
/// free for the gateway's native credentials.
pub const FORWARDED_TOKEN_HEADER: &str = "x-mcp-access-token";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    #[error("invalid endpoint template {template:?}: {reason}")]
    InvalidTemplate { template: String, reason: String },

    #[error("missing value for path parameter '{0}'")]
    MissingPathParameter(String),

    #[error("invalid value {value:?} for path parameter '{name}'")]
    InvalidPathParameter { name: String, value: String },

    #[error("invalid upstream URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
}

fn parse_template(template: &str) -> Result<Vec<Segment>, ResolveError> {
    let invalid = |reason: &str| ResolveError::InvalidTemplate {
        template: template.to_string(),
        reason: reason.to_string(),
    };

    if !template.starts_with('/') {
        return Err(invalid("must start with '/'"));
    }

    let mut segments = Vec::new();
    let mut literal = String::new();
    let mut chars = template.chars();

    while let Some(c) = chars.next() {
        match c {
            '{' => {
                let mut name = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some(c) if c.is_ascii_alphanumeric() || c == '_' => name.push(c),
                        Some(_) => return Err(invalid("placeholder names may only contain [A-Za-z0-9_]")),
                        None => return Err(invalid("unterminated placeholder")),
                    }
                }
                if name.is_empty() {
                    return Err(invalid("empty placeholder"));
                }
                if !literal.is_empty() {
                    segments.push(Segment::Literal(std::mem::take(&mut literal)));
                }
                segments.push(Segment::Param(name));
            }
            '}' => return Err(invalid("unmatched '}'")),
            c => literal.push(c),
        }
    }

    if !literal.is_empty() {
        segments.push(Segment::Literal(literal));
    }

    Ok(segments)
}

/// Names of the `{placeholder}` segments in an endpoint template, in order
pub fn template_placeholders(template: &str) -> Result<Vec<String>, ResolveError> {
    Ok(parse_template(template)?
        .into_iter()
        .filter_map(|segment| match segment {
            Segment::Param(name) => Some(name),
            Segment::Literal(_) => None,
        })
        .collect())
}

/// Render an argument value the way it appears in a path or query string.
/// Strings are used verbatim, not JSON-quoted.
fn stringify(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        other => Some(other.to_string()),
    }
}

/// A fully resolved request to the upstream backend. Built per tool call and
/// dropped once the response is read.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundCall {
    pub method: HttpMethod,
    /// Absolute URL including the query string
    pub url: Url,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
    pub headers: Vec<(String, String)>,
}

impl OutboundCall {
    pub fn path(&self) -> &str {
        self.url.path()
    }

    /// Attach the caller's bearer token under [`FORWARDED_TOKEN_HEADER`].
    ///
    /// The token is never placed in `Authorization` on the outbound side.
    pub fn forward_bearer(mut self, token: &str) -> Self {
        self.headers
            .retain(|(name, _)| !name.eq_ignore_ascii_case(FORWARDED_TOKEN_HEADER));
        self.headers
            .push((FORWARDED_TOKEN_HEADER.to_string(), token.to_string()));
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Builds [`OutboundCall`]s against a fixed upstream base URL
#[derive(Debug, Clone)]
pub struct EndpointResolver {
    base_url: String,
}

impl EndpointResolver {
    pub fn new(base_url: &str) -> Result<Self, ResolveError> {
        Url::parse(base_url)?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn resolve(
        &self,
        tool: &ToolDefinition,
        args: &Map<String, Value>,
    ) -> Result<OutboundCall, ResolveError> {
        self.resolve_endpoint(tool.http_method, &tool.endpoint_template, args)
    }

    /// Substitute path parameters first; whatever is left goes to the query
    /// string for GET/DELETE or to a JSON body for POST/PUT. A key consumed by
    /// a placeholder never reaches the query or body.
    pub fn resolve_endpoint(
        &self,
        method: HttpMethod,
        template: &str,
        args: &Map<String, Value>,
    ) -> Result<OutboundCall, ResolveError> {
        let segments = parse_template(template)?;

        let mut path = String::with_capacity(template.len());
        let mut consumed = HashSet::new();
        for segment in &segments {
            match segment {
                Segment::Literal(text) => path.push_str(text),
                Segment::Param(name) => {
                    let value = args
                        .get(name)
                        .and_then(stringify)
                        .ok_or_else(|| ResolveError::MissingPathParameter(name.clone()))?;
                    // URL parsing collapses dot segments, which would retarget the call
                    if matches!(value.as_str(), "" | "." | "..") {
                        return Err(ResolveError::InvalidPathParameter {
                            name: name.clone(),
                            value,
                        });
                    }
                    path.push_str(&urlencoding::encode(&value));
                    consumed.insert(name.as_str());
                }
            }
        }

        let remaining: Map<String, Value> = args
            .iter()
            .filter(|(key, _)| !consumed.contains(key.as_str()))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        let mut url = Url::parse(&format!("{}{}", self.base_url, path))?;

        let (query, body) = if method.uses_query() {
            let query: Vec<(String, String)> = remaining
                .iter()
                .filter_map(|(key, value)| stringify(value).map(|v| (key.clone(), v)))
                .collect();
            (query, None)
        } else {
            (Vec::new(), Some(Value::Object(remaining)))
        };

        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query.iter());
        }

        Ok(OutboundCall {
            method,
            url,
            query,
            body,
            headers: Vec::new(),
        })
    }
}
