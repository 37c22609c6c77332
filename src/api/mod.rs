mod auth;
mod client;
mod error;
#[cfg(test)]
pub(crate) mod mock;
mod types;

pub use auth::{AuthSession, AuthState, Credentials};
pub use client::ApiClient;
pub use error::ApiError;
pub use types::{BatchPosition, BatchRequest};
