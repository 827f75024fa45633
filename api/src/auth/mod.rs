//! Authentication and identity

pub mod identity;
pub mod token;

pub use identity::{identity_from_headers, identity_middleware, Identity};
pub use token::TokenClient;
