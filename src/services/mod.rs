// src/services/mod.rs
//
// Shared services used by the auth and oauth modules

pub mod encryption;
pub mod provider;

// Re-export commonly used types for convenience
pub use encryption::EncryptionService;
pub use provider::{ProviderClient, ProviderError};
