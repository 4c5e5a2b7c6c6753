//! Application state shared across handlers

use jsonwebtoken::DecodingKey;
use std::sync::Arc;
use voting::SessionEngine;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub engine: SessionEngine,
    /// Parsed once at startup
    pub decoding_key: Arc<DecodingKey>,
}
