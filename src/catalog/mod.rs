//! The photo catalog the engine reads from. The engine never writes to it.

pub mod immich;
pub mod local;

#[cfg(test)]
pub(crate) mod fake;

use crate::core::asset::Asset;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub use immich::ImmichClient;
pub use local::LocalCatalog;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Catalog unreachable: {0}")]
    Connectivity(String),

    #[error("Catalog rejected credentials: {0}")]
    Auth(String),

    #[error("Asset not found: {0}")]
    NotFound(String),

    #[error("Unexpected catalog response: {0}")]
    Decode(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Opaque resume position in the catalog listing. Only the catalog that
/// produced a token knows what it means.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "token", rename_all = "snake_case")]
pub enum Cursor {
    #[default]
    Head,
    At(String),
}

impl Cursor {
    pub fn at(token: impl Into<String>) -> Self {
        Cursor::At(token.into())
    }

    pub fn token(&self) -> Option<&str> {
        match self {
            Cursor::Head => None,
            Cursor::At(token) => Some(token),
        }
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cursor::Head => f.write_str("head"),
            Cursor::At(token) => write!(f, "@{}", token),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AssetPage {
    pub assets: Vec<Asset>,
    pub next_cursor: Cursor,
    pub has_more: bool,
}

#[async_trait]
pub trait Catalog: Send + Sync {
    async fn list_assets(&self, cursor: &Cursor, page_size: usize)
    -> Result<AssetPage, CatalogError>;

    async fn get_thumbnail(&self, asset_id: &str) -> Result<Vec<u8>, CatalogError>;

    /// Total number of assets, when the catalog can tell cheaply.
    async fn count_assets(&self) -> Result<Option<u64>, CatalogError> {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cursor_serializes_as_token() {
        let json = serde_json::to_string(&Cursor::at("3")).unwrap();
        assert_eq!(json, r#"{"kind":"at","token":"3"}"#);
        let back: Cursor = serde_json::from_str(&json).unwrap();
        assert_eq!(back.token(), Some("3"));
        assert_eq!(Cursor::default(), Cursor::Head);
    }
}
