// Core types for the FastNow MCP gateway: catalogs, registries, token
// validation and upstream endpoint resolution.

pub mod auth;
pub mod catalog;
pub mod registry;
pub mod resolver;
pub mod types;

pub use auth::{
    token_fingerprint, AuthError, InMemoryTokenStore, Principal, StoreError, TokenRecord,
    TokenStore, TokenValidator,
};
pub use catalog::{Catalog, CatalogError};
pub use registry::{RegisteredTool, RegistryError, ResourceRegistry, ToolRegistry};
pub use resolver::{EndpointResolver, OutboundCall, ResolveError, FORWARDED_TOKEN_HEADER};
pub use types::*;
