//! A directory tree treated as a catalog. Useful for libraries that are not
//! managed by a photo server.

use super::{AssetPage, Catalog, CatalogError, Cursor};
use crate::core::asset::Asset;
use crate::core::exif::ExifReader;
use async_trait::async_trait;
use rayon::prelude::*;
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::OnceCell;
use walkdir::WalkDir;

const IMAGE_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "bmp", "webp", "heic", "tif", "tiff", "dng", "cr2", "cr3",
    "nef", "arw",
];

/// Sorted file list, built on first use.
struct Index {
    paths: Vec<PathBuf>,
    by_id: HashMap<String, usize>,
}

pub struct LocalCatalog {
    root: PathBuf,
    index: OnceCell<Arc<Index>>,
}

impl LocalCatalog {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            index: OnceCell::new(),
        }
    }

    async fn index(&self) -> Result<Arc<Index>, CatalogError> {
        self.index
            .get_or_try_init(|| async {
                let root = self.root.clone();
                tokio::task::spawn_blocking(move || build_index(&root))
                    .await
                    .map_err(|e| CatalogError::Io(io::Error::other(e)))?
                    .map(Arc::new)
            })
            .await
            .cloned()
    }
}

/// Stable id for a file: the blake3 digest of its path.
pub fn asset_id_for(path: &Path) -> String {
    blake3::hash(path.to_string_lossy().as_bytes()).to_hex().to_string()
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
}

fn build_index(root: &Path) -> Result<Index, CatalogError> {
    if !root.is_dir() {
        return Err(CatalogError::Io(io::Error::new(
            io::ErrorKind::NotFound,
            format!("{} is not a directory", root.display()),
        )));
    }

    let mut paths: Vec<PathBuf> = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                log::warn!("Skipping unreadable entry under {}: {}", root.display(), e);
                None
            }
        })
        .filter(|entry| entry.file_type().is_file() && is_image(entry.path()))
        .map(|entry| entry.into_path())
        .collect();
    paths.sort();

    let by_id = paths
        .iter()
        .enumerate()
        .map(|(i, path)| (asset_id_for(path), i))
        .collect();

    log::info!("Indexed {} images under {}", paths.len(), root.display());
    Ok(Index { paths, by_id })
}

fn describe(path: &Path, exif: &ExifReader) -> Asset {
    let filename = path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default();
    let mut asset =
        Asset::new(asset_id_for(path), filename).with_path(path.to_string_lossy().to_string());

    match std::fs::metadata(path) {
        Ok(meta) => asset.file_size = meta.len(),
        Err(e) => log::warn!("Cannot stat {}: {}", path.display(), e),
    }

    match image::image_dimensions(path) {
        Ok((width, height)) => {
            asset.width = width;
            asset.height = height;
        }
        Err(e) => log::debug!("No dimensions for {}: {}", path.display(), e),
    }

    let meta = exif.read(path);
    asset.camera = meta.camera;
    asset.software = meta.software;
    asset.taken_at = meta.taken_at;
    asset
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
impl Catalog for LocalCatalog {
    async fn list_assets(
        &self,
        cursor: &Cursor,
        page_size: usize,
    ) -> Result<AssetPage, CatalogError> {
        let index = self.index().await?;
        let offset = offset_of(cursor)?.min(index.paths.len());
        let end = (offset + page_size).min(index.paths.len());
        let page: Vec<PathBuf> = index.paths[offset..end].to_vec();

        let assets = tokio::task::spawn_blocking(move || {
            let exif = ExifReader::new();
            page.par_iter().map(|path| describe(path, &exif)).collect::<Vec<_>>()
        })
        .await
        .map_err(|e| CatalogError::Io(io::Error::other(e)))?;

        Ok(AssetPage {
            assets,
            next_cursor: Cursor::at(end.to_string()),
            has_more: end < index.paths.len(),
        })
    }

    async fn get_thumbnail(&self, asset_id: &str) -> Result<Vec<u8>, CatalogError> {
        let index = self.index().await?;
        let path = index
            .by_id
            .get(asset_id)
            .map(|&i| index.paths[i].clone())
            .ok_or_else(|| CatalogError::NotFound(asset_id.to_string()))?;

        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(CatalogError::NotFound(path.display().to_string()))
            }
            Err(e) => Err(CatalogError::Io(e)),
        }
    }

    async fn count_assets(&self) -> Result<Option<u64>, CatalogError> {
        Ok(Some(self.index().await?.paths.len() as u64))
    }
}
