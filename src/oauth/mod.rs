//! # OAuth Module
//!
//! Authorization Code + PKCE client flow with server-side token custody:
//! - `pkce` - verifier, S256 challenge and state generation
//! - `flow` - initiation, callback exchange, refresh, connection status
//! - provider connection endpoints under `/api/auth/:provider`

pub mod flow;
pub mod handlers;
pub mod models;
pub mod pkce;
pub mod routes;


pub use flow::{CallbackOutcome, FlowError, OAuthService};
pub use routes::oauth_routes;
