//! Read-only client for an Immich server.

use super::{AssetPage, Catalog, CatalogError, Cursor};
use crate::core::asset::Asset;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub struct ImmichClient {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SearchRequest {
    page: u32,
    size: usize,
    with_exif: bool,
    with_people: bool,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    assets: SearchPage,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchPage {
    #[serde(default)]
    items: Vec<WireAsset>,
    next_page: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireAsset {
    id: String,
    original_file_name: String,
    #[serde(default)]
    original_path: String,
    file_created_at: Option<DateTime<Utc>>,
    exif_info: Option<WireExif>,
    #[serde(default)]
    people: Vec<serde_json::Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireExif {
    make: Option<String>,
    model: Option<String>,
    exif_image_width: Option<u32>,
    exif_image_height: Option<u32>,
    file_size_in_byte: Option<u64>,
    date_time_original: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct StatisticsResponse {
    total: u64,
}

impl From<WireAsset> for Asset {
    fn from(wire: WireAsset) -> Self {
        let exif = wire.exif_info.unwrap_or_default();
        let camera = [exif.make, exif.model]
            .into_iter()
            .flatten()
            .map(|part| part.trim().to_string())
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join(" ");

        let path = if wire.original_path.is_empty() {
            wire.original_file_name.clone()
        } else {
            wire.original_path
        };

        Asset {
            id: wire.id,
            filename: wire.original_file_name,
            path,
            taken_at: exif.date_time_original.or(wire.file_created_at),
            width: exif.exif_image_width.unwrap_or(0),
            height: exif.exif_image_height.unwrap_or(0),
            file_size: exif.file_size_in_byte.unwrap_or(0),
            camera: (!camera.is_empty()).then_some(camera),
            software: None,
            face_count: wire.people.len() as u32,
        }
    }
}

/// Maps a non-success status to the catalog error it stands for.
fn status_error(status: StatusCode, what: &str) -> CatalogError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            CatalogError::Auth(format!("{} returned {}", what, status))
        }
        StatusCode::NOT_FOUND => CatalogError::NotFound(what.to_string()),
        _ => CatalogError::Connectivity(format!("{} returned {}", what, status)),
    }
}

fn transport_error(e: reqwest::Error) -> CatalogError {
    if e.is_decode() {
        CatalogError::Decode(e.to_string())
    } else {
        CatalogError::Connectivity(e.to_string())
    }
}

impl ImmichClient {
    pub fn new(base_url: &str, api_key: &str) -> Result<Self, CatalogError> {
        let mut headers = HeaderMap::new();
        let mut key = HeaderValue::from_str(api_key)
            .map_err(|_| CatalogError::Auth("API key contains invalid characters".to_string()))?;
        key.set_sensitive(true);
        headers.insert("x-api-key", key);

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(transport_error)?;

        Ok(Self {
            client,
            base_url: normalize_base_url(base_url),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

/// Accepts the server root with or without a trailing `/api`.
fn normalize_base_url(base_url: &str) -> String {
    let trimmed = base_url.trim().trim_end_matches('/');
    let root = trimmed.strip_suffix("/api").unwrap_or(trimmed);
    format!("{}/api", root)
}

/// Cursor tokens are the number of assets already listed, independent of
/// page size.
fn offset_of(cursor: &Cursor) -> Result<usize, CatalogError> {
    match cursor.token() {
        None => Ok(0),
        Some(token) => token
            .parse()
            .map_err(|_| CatalogError::Decode(format!("bad offset token {:?}", token))),
    }
}

/// The server pages by number, so the page size must divide the offset.
/// Picks the largest such size up to `page_size`.
fn page_request(offset: usize, page_size: usize) -> Result<(u32, usize), CatalogError> {
    let page_size = page_size.max(1);
    if offset == 0 {
        return Ok((1, page_size));
    }
    let size = (1..=page_size.min(offset))
        .rev()
        .find(|size| offset % size == 0)
        .unwrap_or(1);
    (offset / size)
        .checked_add(1)
        .and_then(|page| u32::try_from(page).ok())
        .map(|page| (page, size))
        .ok_or_else(|| CatalogError::Decode(format!("offset {} is out of range", offset)))
}

#[async_trait]
impl Catalog for ImmichClient {
    async fn list_assets(
        &self,
        cursor: &Cursor,
        page_size: usize,
    ) -> Result<AssetPage, CatalogError> {
        let offset = offset_of(cursor)?;
        let (page, size) = page_request(offset, page_size)?;
        if size < page_size {
            log::debug!("Offset {} needs page size {} instead of {}", offset, size, page_size);
        }
        let request = SearchRequest {
            page,
            size,
            with_exif: true,
            with_people: true,
        };

        let response = self
            .client
            .post(self.url("/search/metadata"))
            .json(&request)
            .send()
            .await
            .map_err(transport_error)?;
        if !response.status().is_success() {
            return Err(status_error(response.status(), "asset search"));
        }

        let body: SearchResponse = response.json().await.map_err(transport_error)?;
        let next = body.assets.next_page;
        log::debug!(
            "Fetched page {} with {} assets (next: {:?})",
            page,
            body.assets.items.len(),
            next
        );

        let assets: Vec<Asset> = body.assets.items.into_iter().map(Asset::from).collect();
        Ok(AssetPage {
            next_cursor: Cursor::at((offset + assets.len()).to_string()),
            has_more: next.is_some(),
            assets,
        })
    }

    async fn get_thumbnail(&self, asset_id: &str) -> Result<Vec<u8>, CatalogError> {
        let response = self
            .client
            .get(self.url(&format!("/assets/{}/thumbnail", asset_id)))
            .send()
            .await
            .map_err(transport_error)?;
        if !response.status().is_success() {
            return Err(status_error(response.status(), &format!("thumbnail {}", asset_id)));
        }
        let bytes = response.bytes().await.map_err(transport_error)?;
        Ok(bytes.to_vec())
    }

    async fn count_assets(&self) -> Result<Option<u64>, CatalogError> {
        let response = self
            .client
            .get(self.url("/assets/statistics"))
            .send()
            .await
            .map_err(transport_error)?;
        if !response.status().is_success() {
            return Err(status_error(response.status(), "asset statistics"));
        }
        let stats: StatisticsResponse = response.json().await.map_err(transport_error)?;
        Ok(Some(stats.total))
    }
}
