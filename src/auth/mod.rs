//! # Auth Module
//!
//! Local accounts and session credentials:
//! - Argon2id password hashing
//! - HS256 JWT sessions with per-user version revocation
//! - AuthedUser extractor for protected routes
//! - register / login / logout / sign-in handoff endpoints

pub mod extractors;
pub mod handlers;
pub mod models;
pub mod password;
pub mod routes;
pub mod session;
pub mod validators;

#[cfg(test)]
mod tests;

pub use extractors::AuthedUser;
pub use models::User;
pub use routes::auth_routes;
pub use session::SessionIssuer;
