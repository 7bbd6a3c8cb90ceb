pub mod access_context;
pub mod auth;

pub use access_context::access_context_middleware;
pub use auth::{auth_middleware, optional_auth_middleware, AuthUser, Authenticated, ClientIp};
