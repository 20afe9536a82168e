use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One photo entry as indexed by the catalog. Read-only to the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Asset {
    pub id: String,
    pub filename: String,
    pub path: String,
    pub taken_at: Option<DateTime<Utc>>,
    pub width: u32,
    pub height: u32,
    pub file_size: u64,
    /// Camera make and model joined, when the file carries them in EXIF.
    pub camera: Option<String>,
    /// EXIF `Software` tag.
    pub software: Option<String>,
    /// Faces already detected by the photo platform.
    pub face_count: u32,
}

impl Asset {
    pub fn new(id: impl Into<String>, filename: impl Into<String>) -> Self {
        let filename = filename.into();
        Self {
            id: id.into(),
            path: filename.clone(),
            filename,
            taken_at: None,
            width: 0,
            height: 0,
            file_size: 0,
            camera: None,
            software: None,
            face_count: 0,
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    pub fn with_resolution(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn with_size(mut self, file_size: u64) -> Self {
        self.file_size = file_size;
        self
    }

    pub fn with_camera(mut self, camera: impl Into<String>) -> Self {
        self.camera = Some(camera.into());
        self
    }

    pub fn with_software(mut self, software: impl Into<String>) -> Self {
        self.software = Some(software.into());
        self
    }

    pub fn with_taken_at(mut self, taken_at: DateTime<Utc>) -> Self {
        self.taken_at = Some(taken_at);
        self
    }

    pub fn has_camera_exif(&self) -> bool {
        self.camera
            .as_deref()
            .map(|c| !c.trim().is_empty())
            .unwrap_or(false)
    }

    pub fn has_resolution(&self) -> bool {
        self.width > 0 && self.height > 0
    }

    pub fn pixel_count(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Filename without its extension, lowercased.
    pub fn stem(&self) -> String {
        let lower = self.filename.to_lowercase();
        match lower.rfind('.') {
            Some(idx) if idx > 0 => lower[..idx].to_string(),
            _ => lower,
        }
    }

    /// Lowercased directory part of the stored path.
    pub fn directory(&self) -> String {
        let normalized = self.path.replace('\\', "/").to_lowercase();
        match normalized.rfind('/') {
            Some(idx) => normalized[..idx].to_string(),
            None => String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stem_and_directory() {
        let asset = Asset::new("a1", "Screenshot_2023.PNG")
            .with_path("/Library/Cache/Thumbnails/Screenshot_2023.PNG");

        assert_eq!(asset.stem(), "screenshot_2023");
        assert_eq!(asset.directory(), "/library/cache/thumbnails");
    }

    #[test]
    fn test_windows_path_directory() {
        let asset = Asset::new("a1", "x.jpg").with_path(r"C:\Users\me\Temp\x.jpg");
        assert_eq!(asset.directory(), "c:/users/me/temp");
    }

    #[test]
    fn test_blank_camera_is_not_camera_exif() {
        let asset = Asset::new("a1", "x.jpg").with_camera("   ");
        assert!(!asset.has_camera_exif());
        assert!(Asset::new("a2", "y.jpg").with_camera("Canon EOS R5").has_camera_exif());
    }
}
