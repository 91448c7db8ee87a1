//! API request handlers

pub mod token;

use std::sync::Arc;

use crate::core::TokenIssuer;

pub use token::{refresh_token, TokenParams};

/// Application state shared across handlers
pub struct AppState {
    pub issuer: Arc<TokenIssuer>,
}
