//! Cheap signal extractors. Each one looks at already-fetched asset metadata
//! and yields at most one signal of its kind. None of them perform I/O; the
//! thumbnail-based check lives in [`crate::core::pixel`].

use super::asset::Asset;
use super::category::Category;
use super::signal::{Signal, SignalKind, SignalSet};
use regex::Regex;
use std::sync::LazyLock;

/// Files below this many bytes look like thumbnails or cache entries.
pub const MIN_FILE_BYTES: u64 = 10 * 1024;

/// Compressed photos rarely drop below this many bytes per pixel; less than
/// that usually means a truncated or otherwise damaged file.
pub const MIN_BYTES_PER_PIXEL: f64 = 0.01;

/// Both sides at or below this are in the thumbnail/avatar band.
pub const THUMBNAIL_MAX_SIDE: u32 = 200;

/// Width/height ratios outside [1/MAX_ASPECT, MAX_ASPECT] are outliers.
pub const MAX_ASPECT: f64 = 5.0;

/// Camera sensors land at or above this many pixels.
const CAMERA_MIN_PIXELS: u64 = 2_000_000;

const EXACT_TOKEN_STRENGTH: f64 = 1.0;
const PARTIAL_TOKEN_STRENGTH: f64 = 0.6;

/// Ordered, category-tagged filename patterns. The first match wins, so more
/// specific tokens come before generic ones.
static FILENAME_PATTERNS: LazyLock<Vec<(Category, Regex)>> = LazyLock::new(|| {
    let table: &[(Category, &str)] = &[
        // screenshot tools and OS capture names
        (Category::Screenshot, r"screen[-_ ]?shot"),
        (Category::Screenshot, r"screen[-_ ]?capture"),
        (Category::Screenshot, r"vlcsnap"),
        (Category::Screenshot, r"greenshot"),
        (Category::Screenshot, r"lightshot"),
        (Category::Screenshot, r"prtscr"),
        (Category::Screenshot, r"snip(ping)?"),
        (Category::Screenshot, r"clipboard"),
        (Category::Screenshot, r"capture"),
        (Category::Screenshot, r"^scr[-_]?\d+"),
        (Category::Screenshot, r"^ss[-_]\d+"),
        // recovery tools and duplicate-on-copy artifacts
        (Category::RecoveryJunk, r"^f\d{6,}$"),
        (Category::RecoveryJunk, r"^found\.\d+"),
        (Category::RecoveryJunk, r"^file\d+$"),
        (Category::RecoveryJunk, r"recup"),
        (Category::RecoveryJunk, r"recovered"),
        (Category::RecoveryJunk, r"restored"),
        (Category::RecoveryJunk, r"corrupt(ed)?"),
        (Category::RecoveryJunk, r"damaged"),
        (Category::RecoveryJunk, r"copy[-_ ]of"),
        (Category::RecoveryJunk, r"untitled"),
        (Category::RecoveryJunk, r"noname"),
        (Category::RecoveryJunk, r"\(\d+\)$"),
        // browser, messenger and social-media cache entries
        (Category::WebCache, r"thumb(nail)?s?"),
        (Category::WebCache, r"cache[ds]?"),
        (Category::WebCache, r"avatar"),
        (Category::WebCache, r"profile[-_ ]?pic"),
        (Category::WebCache, r"favicon"),
        (Category::WebCache, r"preview"),
        (Category::WebCache, r"banner"),
        (Category::WebCache, r"sticker"),
        (Category::WebCache, r"emoji"),
        (Category::WebCache, r"advert(isement)?"),
        (Category::WebCache, r"popup"),
        (Category::WebCache, r"fb[-_]img"),
        (Category::WebCache, r"^received_\d+"),
        (Category::WebCache, r"whatsapp[-_ ]image"),
        (Category::WebCache, r"download(ed)?"),
        (Category::WebCache, r"te?mp"),
        // explicit low-quality markers
        (Category::LowQuality, r"low[-_ ]?res"),
        (Category::LowQuality, r"low[-_ ]?quality"),
        (Category::LowQuality, r"compressed"),
        (Category::LowQuality, r"blurry"),
        (Category::LowQuality, r"pixelated"),
    ];

    table
        .iter()
        .filter_map(|(category, pattern)| match Regex::new(pattern) {
            Ok(regex) => Some((*category, regex)),
            Err(e) => {
                log::error!("Invalid filename pattern {}: {}", pattern, e);
                None
            }
        })
        .collect()
});

/// Device and desktop resolutions screenshots are taken at, one orientation
/// each; lookups check both.
const SCREENSHOT_RESOLUTIONS: &[(u32, u32)] = &[
    // phones
    (320, 568),
    (360, 640),
    (375, 667),
    (414, 896),
    (720, 1280),
    (720, 1600),
    (750, 1334),
    (828, 1792),
    (1080, 1920),
    (1080, 2160),
    (1080, 2280),
    (1080, 2340),
    (1080, 2400),
    (1125, 2436),
    (1170, 2532),
    (1179, 2556),
    (1242, 2208),
    (1242, 2688),
    (1284, 2778),
    (1290, 2796),
    (1440, 2560),
    (1440, 3040),
    (1440, 3120),
    (1440, 3200),
    // tablets
    (768, 1024),
    (1536, 2048),
    (1620, 2160),
    (1640, 2360),
    (1668, 2388),
    (2048, 2732),
    // desktops and laptops
    (1024, 768),
    (1280, 720),
    (1280, 800),
    (1366, 768),
    (1440, 900),
    (1536, 864),
    (1600, 900),
    (1680, 1050),
    (1920, 1080),
    (1920, 1200),
    (2560, 1440),
    (2560, 1600),
    (2880, 1800),
    (3024, 1964),
    (3456, 2234),
    (3840, 2160),
];

/// Ordered directory-name fragments that give away where a file came from.
const PATH_HINTS: &[(Category, &str)] = &[
    (Category::RecoveryJunk, "recup_dir"),
    (Category::RecoveryJunk, "photorec"),
    (Category::RecoveryJunk, "lost+found"),
    (Category::RecoveryJunk, "found.0"),
    (Category::RecoveryJunk, "recovered"),
    (Category::RecoveryJunk, "$recycle.bin"),
    (Category::RecoveryJunk, "recycle"),
    (Category::RecoveryJunk, ".trash"),
    (Category::RecoveryJunk, "trash"),
    (Category::RecoveryJunk, "deleted"),
    (Category::WebCache, "cache"),
    (Category::WebCache, "thumbnails"),
    (Category::WebCache, "thumbs"),
    (Category::WebCache, "temp"),
    (Category::WebCache, "tmp"),
    (Category::WebCache, "browser"),
    (Category::WebCache, "chrome"),
    (Category::WebCache, "firefox"),
    (Category::WebCache, "safari"),
    (Category::WebCache, "telegram"),
    (Category::WebCache, "whatsapp"),
    (Category::Screenshot, "screenshots"),
    (Category::Screenshot, "screen captures"),
    (Category::Screenshot, "captures"),
];

const CAPTURE_TOOLS: &[&str] = &[
    "screenshot",
    "snipping",
    "snip & sketch",
    "greenshot",
    "lightshot",
    "sharex",
    "flameshot",
    "capture",
];

const OPERATING_SYSTEMS: &[&str] = &["android", "ios", "windows", "macos", "mac os"];

/// Runs every metadata-only extractor.
pub fn eager_signals(asset: &Asset) -> SignalSet {
    let mut signals = SignalSet::new();
    signals.push(filename_pattern(asset));
    signals.push(resolution_match(asset));
    signals.push(missing_exif(asset));
    signals.push(size_anomaly(asset));
    signals.push(path_hint(asset));
    signals.push(software_hint(asset));
    signals.push(missing_capture_date(asset));
    signals.push(aspect_ratio(asset));
    signals
}

pub fn filename_pattern(asset: &Asset) -> Option<Signal> {
    let stem = asset.stem();
    if stem.is_empty() {
        return None;
    }

    // First pattern in table order decides the category
    FILENAME_PATTERNS.iter().find_map(|(category, regex)| {
        let found = regex.find(&stem)?;
        let exact = is_token_boundary(&stem, found.start(), found.end());
        let strength = if exact {
            EXACT_TOKEN_STRENGTH
        } else {
            PARTIAL_TOKEN_STRENGTH
        };
        Some(
            Signal::new(
                SignalKind::FilenamePattern,
                strength,
                format!(
                    "Filename {} {} pattern '{}'",
                    if exact { "matches" } else { "contains" },
                    category,
                    regex.as_str()
                ),
            )
            .targeting(*category),
        )
    })
}

fn is_token_boundary(text: &str, start: usize, end: usize) -> bool {
    let before = text[..start].chars().next_back();
    let after = text[end..].chars().next();
    !before.is_some_and(char::is_alphanumeric) && !after.is_some_and(char::is_alphanumeric)
}

pub fn resolution_match(asset: &Asset) -> Option<Signal> {
    if !asset.has_resolution() {
        return None;
    }
    let (w, h) = (asset.width, asset.height);

    if is_screenshot_resolution(w, h) {
        return Some(
            Signal::new(
                SignalKind::ResolutionMatch,
                1.0,
                format!("{}x{} is a known device screen resolution", w, h),
            )
            .targeting(Category::Screenshot),
        );
    }

    let long_side = w.max(h);
    if long_side <= THUMBNAIL_MAX_SIDE {
        return Some(
            Signal::new(
                SignalKind::ResolutionMatch,
                1.0,
                format!("{}x{} is thumbnail sized", w, h),
            )
            .targeting(Category::WebCache),
        );
    }

    // Near the band: fade out linearly until twice the band size.
    let overshoot = (long_side - THUMBNAIL_MAX_SIDE) as f64 / THUMBNAIL_MAX_SIDE as f64;
    if overshoot < 1.0 {
        return Some(
            Signal::new(
                SignalKind::ResolutionMatch,
                1.0 - overshoot,
                format!("{}x{} is close to thumbnail size", w, h),
            )
            .targeting(Category::WebCache),
        );
    }

    None
}

pub fn is_screenshot_resolution(width: u32, height: u32) -> bool {
    SCREENSHOT_RESOLUTIONS
        .iter()
        .any(|&(w, h)| (w, h) == (width, height) || (h, w) == (width, height))
}

/// Whether the shape and pixel count are what a camera sensor produces.
pub fn is_camera_like_resolution(width: u32, height: u32) -> bool {
    if width == 0 || height == 0 || is_screenshot_resolution(width, height) {
        return false;
    }
    if (width as u64 * height as u64) < CAMERA_MIN_PIXELS {
        return false;
    }
    let ratio = width.max(height) as f64 / width.min(height) as f64;
    [4.0 / 3.0, 3.0 / 2.0]
        .iter()
        .any(|sensor| (ratio - sensor).abs() < 0.03)
}

pub fn missing_exif(asset: &Asset) -> Option<Signal> {
    // Camera EXIF is recorded as a zero-strength signal for damping
    if let Some(camera) = asset.camera.as_deref().filter(|_| asset.has_camera_exif()) {
        return Some(Signal::new(
            SignalKind::MissingExif,
            0.0,
            format!("Camera EXIF present ({})", camera.trim()),
        ));
    }

    if asset.has_resolution() && !is_camera_like_resolution(asset.width, asset.height) {
        Some(Signal::new(
            SignalKind::MissingExif,
            1.0,
            "No camera EXIF and resolution is not a camera sensor shape",
        ))
    } else {
        Some(Signal::new(
            SignalKind::MissingExif,
            0.5,
            "No camera EXIF",
        ))
    }
}

pub fn size_anomaly(asset: &Asset) -> Option<Signal> {
    let size = asset.file_size;
    if size == 0 {
        return None;
    }

    // Check compression density first
    if asset.has_resolution() {
        let bytes_per_pixel = size as f64 / asset.pixel_count() as f64;
        if bytes_per_pixel < MIN_BYTES_PER_PIXEL {
            let shortfall = 1.0 - bytes_per_pixel / MIN_BYTES_PER_PIXEL;
            return Some(
                Signal::new(
                    SignalKind::SizeAnomaly,
                    0.5 + 0.5 * shortfall,
                    format!(
                        "{} bytes for {}x{} ({:.4} B/px) looks truncated",
                        size, asset.width, asset.height, bytes_per_pixel
                    ),
                )
                .targeting(Category::RecoveryJunk),
            );
        }
    }

    // Then absolute size
    if size < MIN_FILE_BYTES {
        let shortfall = 1.0 - size as f64 / MIN_FILE_BYTES as f64;
        return Some(
            Signal::new(
                SignalKind::SizeAnomaly,
                shortfall.max(0.5),
                format!("Very small file ({} bytes)", size),
            )
            .targeting(Category::WebCache),
        );
    }

    None
}

pub fn path_hint(asset: &Asset) -> Option<Signal> {
    let directory = asset.directory();
    if directory.is_empty() {
        return None;
    }

    PATH_HINTS
        .iter()
        .find(|(_, fragment)| directory.contains(fragment))
        .map(|(category, fragment)| {
            Signal::new(
                SignalKind::PathHint,
                1.0,
                format!("Stored under a '{}' directory", fragment),
            )
            .targeting(*category)
        })
}

pub fn software_hint(asset: &Asset) -> Option<Signal> {
    let software = asset.software.as_deref()?.trim().to_lowercase();
    if software.is_empty() {
        return None;
    }

    // Capture tools outrank a bare OS name
    if let Some(tool) = CAPTURE_TOOLS.iter().find(|t| software.contains(*t)) {
        return Some(
            Signal::new(
                SignalKind::SoftwareHint,
                1.0,
                format!("Written by capture tool '{}'", tool),
            )
            .targeting(Category::Screenshot),
        );
    }

    OPERATING_SYSTEMS
        .iter()
        .find(|os| software.contains(*os))
        .map(|os| {
            Signal::new(
                SignalKind::SoftwareHint,
                0.6,
                format!("Written by operating system '{}'", os),
            )
            .targeting(Category::Screenshot)
        })
}

/// Recovered files usually lose both the EXIF capture time and the original
/// creation time.
pub fn missing_capture_date(asset: &Asset) -> Option<Signal> {
    if asset.taken_at.is_some() {
        return None;
    }
    Some(
        Signal::new(
            SignalKind::MissingCaptureDate,
            1.0,
            "No capture or creation date",
        )
        .targeting(Category::RecoveryJunk),
    )
}

pub fn aspect_ratio(asset: &Asset) -> Option<Signal> {
    if !asset.has_resolution() {
        return None;
    }
    let aspect = asset.width as f64 / asset.height as f64;
    if aspect > MAX_ASPECT || aspect < 1.0 / MAX_ASPECT {
        Some(
            Signal::new(
                SignalKind::AspectRatio,
                1.0,
                format!(
                    "{}x{} has an unusual aspect ratio ({:.2})",
                    asset.width, asset.height, aspect
                ),
            )
            .targeting(Category::LowQuality),
        )
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_screenshot_filename_exact_token() {
        let asset = Asset::new("a", "Screenshot_2023-01-01-12-00-00.png");
        let signal = filename_pattern(&asset).unwrap();
        assert_eq!(signal.target, Some(Category::Screenshot));
        assert_eq!(signal.strength, 1.0);
    }

    #[test]
    fn test_partial_token_is_weaker() {
        let asset = Asset::new("a", "myscreenshot.png");
        let signal = filename_pattern(&asset).unwrap();
        assert_eq!(signal.target, Some(Category::Screenshot));
        assert_eq!(signal.strength, PARTIAL_TOKEN_STRENGTH);
    }

    #[test]
    fn test_first_pattern_wins() {
        // both "thumb" and "cache" are web-cache tokens; "thumb" is listed first
        let asset = Asset::new("a", "thumb_cache_9182.jpg");
        let signal = filename_pattern(&asset).unwrap();
        assert_eq!(signal.target, Some(Category::WebCache));
        assert!(signal.justification.contains("thumb"));
    }

    #[test]
    fn test_recovery_filenames() {
        for name in ["f1234567.jpg", "found.000.jpg", "file0042.jpg", "holiday (1).jpg"] {
            let signal = filename_pattern(&Asset::new("a", name)).unwrap();
            assert_eq!(signal.target, Some(Category::RecoveryJunk), "{}", name);
        }
    }

    #[test]
    fn test_camera_filenames_do_not_match() {
        for name in ["IMG_4521.JPG", "DSC_0001.NEF", "PXL_20230101_120000.jpg"] {
            assert!(filename_pattern(&Asset::new("a", name)).is_none(), "{}", name);
        }
    }

    #[test]
    fn test_resolution_table_both_orientations() {
        let portrait = Asset::new("a", "x.png").with_resolution(1080, 2400);
        let landscape = Asset::new("a", "x.png").with_resolution(2400, 1080);
        for asset in [portrait, landscape] {
            let signal = resolution_match(&asset).unwrap();
            assert_eq!(signal.target, Some(Category::Screenshot));
            assert_eq!(signal.strength, 1.0);
        }
    }

    #[test]
    fn test_thumbnail_band_grading() {
        let inside = resolution_match(&Asset::new("a", "x").with_resolution(150, 150)).unwrap();
        assert_eq!(inside.strength, 1.0);
        assert_eq!(inside.target, Some(Category::WebCache));

        let near = resolution_match(&Asset::new("a", "x").with_resolution(300, 300)).unwrap();
        assert!((near.strength - 0.5).abs() < 1e-9);

        assert!(resolution_match(&Asset::new("a", "x").with_resolution(400, 400)).is_none());
        assert!(resolution_match(&Asset::new("a", "x").with_resolution(4032, 3024)).is_none());
        assert!(resolution_match(&Asset::new("a", "x")).is_none());
    }

    #[test]
    fn test_missing_exif_strengths() {
        let camera = Asset::new("a", "x").with_camera("Apple iPhone 14").with_resolution(4032, 3024);
        assert!(missing_exif(&camera).unwrap().is_camera_evidence());

        let phone_screen = Asset::new("a", "x").with_resolution(1080, 2400);
        assert_eq!(missing_exif(&phone_screen).unwrap().strength, 1.0);

        let sensor_shaped = Asset::new("a", "x").with_resolution(4032, 3024);
        assert_eq!(missing_exif(&sensor_shaped).unwrap().strength, 0.5);
    }

    #[test]
    fn test_size_anomaly_small_file() {
        let asset = Asset::new("a", "x").with_resolution(150, 150).with_size(3 * 1024);
        let signal = size_anomaly(&asset).unwrap();
        assert_eq!(signal.target, Some(Category::WebCache));
        assert!((signal.strength - 0.7).abs() < 1e-9);
    }

    #[test]
    fn test_size_anomaly_truncated_file() {
        let asset = Asset::new("a", "x").with_resolution(4000, 3000).with_size(60_000);
        let signal = size_anomaly(&asset).unwrap();
        assert_eq!(signal.target, Some(Category::RecoveryJunk));
        assert!(signal.strength > 0.5 && signal.strength < 1.0);
    }

    #[test]
    fn test_size_anomaly_normal_photo() {
        let asset = Asset::new("a", "x").with_resolution(4032, 3024).with_size(3_200_000);
        assert!(size_anomaly(&asset).is_none());
        assert!(size_anomaly(&Asset::new("a", "x")).is_none());
    }

    #[test]
    fn test_path_hint_uses_directory_only() {
        let cached = Asset::new("a", "x.jpg").with_path("/data/Library/Cache/Thumbnails/x.jpg");
        let signal = path_hint(&cached).unwrap();
        assert_eq!(signal.target, Some(Category::WebCache));
        assert_eq!(signal.strength, 1.0);

        let named_only = Asset::new("a", "cache.jpg").with_path("/photos/2023/cache.jpg");
        assert!(path_hint(&named_only).is_none());

        let recovered = Asset::new("a", "x.jpg").with_path("/mnt/recup_dir.12/x.jpg");
        assert_eq!(path_hint(&recovered).unwrap().target, Some(Category::RecoveryJunk));
    }

    #[test]
    fn test_software_hint() {
        let tool = Asset::new("a", "x").with_software("Snipping Tool");
        assert_eq!(software_hint(&tool).unwrap().strength, 1.0);

        let os = Asset::new("a", "x").with_software("Android 14");
        assert_eq!(software_hint(&os).unwrap().strength, 0.6);

        assert!(software_hint(&Asset::new("a", "x").with_software("Lightroom 6.1")).is_none());
        assert!(software_hint(&Asset::new("a", "x")).is_none());
    }

    #[test]
    fn test_missing_capture_date() {
        let undated = missing_capture_date(&Asset::new("a", "x.jpg")).unwrap();
        assert_eq!(undated.target, Some(Category::RecoveryJunk));
        assert_eq!(undated.strength, 1.0);

        let taken = chrono::DateTime::parse_from_rfc3339("2023-05-31T18:22:10Z")
            .unwrap()
            .with_timezone(&chrono::Utc);
        let dated = Asset::new("a", "x.jpg").with_taken_at(taken);
        assert!(missing_capture_date(&dated).is_none());
    }

    #[test]
    fn test_metadata_aspect_ratio() {
        let banner = Asset::new("a", "x.png").with_resolution(3000, 400);
        let signal = aspect_ratio(&banner).unwrap();
        assert_eq!(signal.target, Some(Category::LowQuality));

        let strip = Asset::new("a", "x.png").with_resolution(100, 900);
        assert!(aspect_ratio(&strip).is_some());

        assert!(aspect_ratio(&Asset::new("a", "x").with_resolution(4032, 3024)).is_none());
        assert!(aspect_ratio(&Asset::new("a", "x").with_resolution(1080, 2400)).is_none());
        assert!(aspect_ratio(&Asset::new("a", "x")).is_none());
    }
}
