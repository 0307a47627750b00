// MCP (Model Context Protocol) gateway: envelope handling, method dispatch
// and the upstream collaborators the dispatcher talks to.

pub mod composer;
pub mod error;
pub mod postgrest;
pub mod protocol;
pub mod server;
pub mod upstream;

pub use error::GatewayError;
pub use postgrest::PostgrestTokenStore;
pub use server::{McpServer, Reply};
pub use upstream::{HttpUpstream, UpstreamClient, UpstreamError, UpstreamResponse};
