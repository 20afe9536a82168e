//! Scripted in-memory catalog for tests.

use super::{AssetPage, Catalog, CatalogError, Cursor};
use crate::core::asset::Asset;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

pub struct FakeCatalog {
    assets: Mutex<Vec<Asset>>,
    thumbnails: HashMap<String, Vec<u8>>,
    thumbnail_delay: Option<Duration>,
    listing_delay: Option<Duration>,
    fail_listing_at: Mutex<Option<usize>>,
    reject_auth: bool,
    stall: bool,
    thumbnail_fetches: AtomicUsize,
    list_calls: AtomicUsize,
}

impl FakeCatalog {
    pub fn new(assets: Vec<Asset>) -> Self {
        Self {
            assets: Mutex::new(assets),
            thumbnails: HashMap::new(),
            thumbnail_delay: None,
            listing_delay: None,
            fail_listing_at: Mutex::new(None),
            reject_auth: false,
            stall: false,
            thumbnail_fetches: AtomicUsize::new(0),
            list_calls: AtomicUsize::new(0),
        }
    }

    /// `count` plain camera photos with ids `asset-000`, `asset-001`, ...
    pub fn with_photos(count: usize) -> Self {
        let assets = (0..count)
            .map(|i| {
                Asset::new(format!("asset-{:03}", i), format!("IMG_{:04}.JPG", i))
                    .with_resolution(4032, 3024)
                    .with_size(3_000_000)
                    .with_camera("Canon EOS R6")
                    .with_taken_at(Utc::now())
            })
            .collect();
        Self::new(assets)
    }

    pub fn with_thumbnail(mut self, asset_id: &str, bytes: Vec<u8>) -> Self {
        self.thumbnails.insert(asset_id.to_string(), bytes);
        self
    }

    pub fn with_thumbnail_delay(mut self, delay: Duration) -> Self {
        self.thumbnail_delay = Some(delay);
        self
    }

    pub fn with_listing_delay(mut self, delay: Duration) -> Self {
        self.listing_delay = Some(delay);
        self
    }

    /// Listing from this offset fails with a connectivity error.
    pub fn failing_at(self, offset: usize) -> Self {
        self.fail_listing_at(Some(offset));
        self
    }

    pub fn fail_listing_at(&self, offset: Option<usize>) {
        if let Ok(mut guard) = self.fail_listing_at.lock() {
            *guard = offset;
        }
    }

    pub fn rejecting_auth(mut self) -> Self {
        self.reject_auth = true;
        self
    }

    /// Every listing is empty but claims more assets at the same cursor.
    pub fn stalling(mut self) -> Self {
        self.stall = true;
        self
    }

    pub fn push_asset(&self, asset: Asset) {
        self.assets.lock().unwrap().push(asset);
    }

    pub fn thumbnail_fetches(&self) -> usize {
        self.thumbnail_fetches.load(Ordering::SeqCst)
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }
}

fn offset_of(cursor: &Cursor) -> Result<usize, CatalogError> {
    match cursor.token() {
        None => Ok(0),
        Some(token) => token
            .parse()
            .map_err(|_| CatalogError::Decode(format!("bad cursor token {:?}", token))),
    }
}

#[async_trait]
impl Catalog for FakeCatalog {
    async fn list_assets(
        &self,
        cursor: &Cursor,
        page_size: usize,
    ) -> Result<AssetPage, CatalogError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if self.reject_auth {
            return Err(CatalogError::Auth("401 Unauthorized".to_string()));
        }
        if let Some(delay) = self.listing_delay {
            tokio::time::sleep(delay).await;
        }

        if self.stall {
            return Ok(AssetPage {
                assets: vec![],
                next_cursor: cursor.clone(),
                has_more: true,
            });
        }

        let offset = offset_of(cursor)?;
        if *self.fail_listing_at.lock().unwrap() == Some(offset) {
            return Err(CatalogError::Connectivity(format!(
                "connection reset at offset {}",
                offset
            )));
        }

        let assets = self.assets.lock().unwrap();
        let end = (offset + page_size).min(assets.len());
        let page: Vec<Asset> = assets.get(offset..end).unwrap_or_default().to_vec();
        Ok(AssetPage {
            assets: page,
            next_cursor: Cursor::at(end.to_string()),
            has_more: end < assets.len(),
        })
    }

    async fn get_thumbnail(&self, asset_id: &str) -> Result<Vec<u8>, CatalogError> {
        self.thumbnail_fetches.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.thumbnail_delay {
            tokio::time::sleep(delay).await;
        }
        self.thumbnails
            .get(asset_id)
            .cloned()
            .ok_or_else(|| CatalogError::NotFound(asset_id.to_string()))
    }

    async fn count_assets(&self) -> Result<Option<u64>, CatalogError> {
        Ok(Some(self.assets.lock().unwrap().len() as u64))
    }
}
