use chrono::{DateTime, NaiveDateTime, Utc};
use exif::{In, Reader, Tag, Value};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// The EXIF fields the classifier cares about.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CaptureMetadata {
    pub camera: Option<String>,
    pub software: Option<String>,
    pub taken_at: Option<DateTime<Utc>>,
}

impl CaptureMetadata {
    pub fn is_empty(&self) -> bool {
        self.camera.is_none() && self.software.is_none() && self.taken_at.is_none()
    }
}

/// Reads capture metadata from image files on disk.
pub struct ExifReader;

impl ExifReader {
    pub fn new() -> Self {
        Self
    }

    /// Unreadable files and files without an EXIF container yield empty metadata.
    pub fn read(&self, path: &Path) -> CaptureMetadata {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) => {
                log::debug!("Cannot open {} for EXIF: {}", path.display(), e);
                return CaptureMetadata::default();
            }
        };

        let exif = match Reader::new().read_from_container(&mut BufReader::new(file)) {
            Ok(exif) => exif,
            Err(_) => return CaptureMetadata::default(),
        };

        let text = |tag: Tag| {
            exif.get_field(tag, In::PRIMARY)
                .and_then(|field| ascii_value(&field.value))
                .filter(|s| !s.is_empty())
        };

        let camera_parts: Vec<String> = [Tag::Make, Tag::Model].into_iter().filter_map(text).collect();
        let taken_at = text(Tag::DateTimeOriginal)
            .or_else(|| text(Tag::DateTime))
            .and_then(|s| parse_exif_datetime(&s));

        CaptureMetadata {
            camera: (!camera_parts.is_empty()).then(|| camera_parts.join(" ")),
            software: text(Tag::Software),
            taken_at,
        }
    }
}

impl Default for ExifReader {
    fn default() -> Self {
        Self::new()
    }
}

fn ascii_value(value: &Value) -> Option<String> {
    match value {
        Value::Ascii(parts) => parts.first().map(|bytes| {
            String::from_utf8_lossy(bytes)
                .trim_end_matches('\0')
                .trim()
                .to_string()
        }),
        _ => None,
    }
}

/// EXIF timestamps look like `2023:12:25 14:30:45` and carry no zone.
pub fn parse_exif_datetime(raw: &str) -> Option<DateTime<Utc>> {
    match NaiveDateTime::parse_from_str(raw.trim(), "%Y:%m:%d %H:%M:%S") {
        Ok(dt) => Some(dt.and_utc()),
        Err(_) => {
            log::warn!("Failed to parse EXIF datetime: {}", raw);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_gives_empty_metadata() {
        let meta = ExifReader::new().read(Path::new("/non/existent/file.jpg"));
        assert!(meta.is_empty());
    }

    #[test]
    fn test_non_image_gives_empty_metadata() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("notes.jpg");
        fs::write(&path, b"This is not an image file").unwrap();

        assert!(ExifReader::new().read(&path).is_empty());
    }

    #[test]
    fn test_parse_exif_datetime() {
        use chrono::{Datelike, Timelike};

        let parsed = parse_exif_datetime("2023:12:25 14:30:45").unwrap();
        assert_eq!(parsed.year(), 2023);
        assert_eq!(parsed.month(), 12);
        assert_eq!(parsed.day(), 25);
        assert_eq!(parsed.hour(), 14);
        assert_eq!(parsed.second(), 45);

        assert!(parse_exif_datetime("yesterday").is_none());
    }
}
