use super::category::Category;
use super::extract::MAX_ASPECT;
use super::signal::{Signal, SignalKind};
use image::{DynamicImage, GenericImageView, GrayImage};

/// Share of pixels in the dominant tone above which a thumbnail counts as blank.
const UNIFORM_RATIO: f64 = 0.8;

/// Lightweight checks on downloaded thumbnail bytes. No model inference, only
/// decode, histogram and shape.
pub struct ThumbnailInspector;

impl ThumbnailInspector {
    pub fn new() -> Self {
        Self
    }

    /// Returns a signal when the thumbnail shows something wrong, `None` when
    /// it decodes to an ordinary picture.
    pub fn inspect(&self, bytes: &[u8]) -> Option<Signal> {
        let image = match image::load_from_memory(bytes) {
            Ok(image) => image,
            Err(e) => {
                return Some(
                    Signal::new(
                        SignalKind::PixelCheck,
                        1.0,
                        format!("Thumbnail failed to decode: {}", e),
                    )
                    .targeting(Category::RecoveryJunk),
                );
            }
        };

        if let Some(signal) = self.check_uniformity(&image) {
            return Some(signal);
        }
        self.check_aspect(&image)
    }

    fn check_uniformity(&self, image: &DynamicImage) -> Option<Signal> {
        let ratio = dominant_tone_ratio(&image.to_luma8());
        if ratio > UNIFORM_RATIO {
            Some(
                Signal::new(
                    SignalKind::PixelCheck,
                    0.7,
                    format!("{:.0}% of thumbnail pixels share one tone", ratio * 100.0),
                )
                .targeting(Category::WebCache),
            )
        } else {
            None
        }
    }

    fn check_aspect(&self, image: &DynamicImage) -> Option<Signal> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return None;
        }
        let aspect = width as f64 / height as f64;
        if aspect > MAX_ASPECT || aspect < 1.0 / MAX_ASPECT {
            Some(
                Signal::new(
                    SignalKind::PixelCheck,
                    0.6,
                    format!("Unusual aspect ratio {:.2}", aspect),
                )
                .targeting(Category::LowQuality),
            )
        } else {
            None
        }
    }
}

impl Default for ThumbnailInspector {
    fn default() -> Self {
        Self::new()
    }
}

/// Fraction of pixels falling in the most populated of 256 luma bins.
fn dominant_tone_ratio(gray: &GrayImage) -> f64 {
    let total = gray.width() as u64 * gray.height() as u64;
    if total == 0 {
        return 0.0;
    }

    let mut histogram = [0u64; 256];
    for pixel in gray.pixels() {
        histogram[pixel[0] as usize] += 1;
    }

    let max_count = histogram.iter().copied().max().unwrap_or(0);
    max_count as f64 / total as f64
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::{ImageBuffer, ImageFormat, Rgb};
    use std::io::Cursor;

    pub(crate) fn encode_png(image: ImageBuffer<Rgb<u8>, Vec<u8>>) -> Vec<u8> {
        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(image)
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        bytes
    }

    pub(crate) fn gradient_png(width: u32, height: u32) -> Vec<u8> {
        encode_png(ImageBuffer::from_fn(width, height, |x, y| {
            let intensity = ((x * 7 + y * 13) % 256) as u8;
            Rgb([intensity, intensity, intensity])
        }))
    }

    pub(crate) fn solid_png(width: u32, height: u32) -> Vec<u8> {
        encode_png(ImageBuffer::from_pixel(width, height, Rgb([250, 250, 250])))
    }

    #[test]
    fn test_garbage_bytes_are_corruption() {
        let signal = ThumbnailInspector::new().inspect(b"not an image at all").unwrap();
        assert_eq!(signal.target, Some(Category::RecoveryJunk));
        assert_eq!(signal.strength, 1.0);
    }

    #[test]
    fn test_solid_color_is_placeholder() {
        let signal = ThumbnailInspector::new().inspect(&solid_png(64, 64)).unwrap();
        assert_eq!(signal.target, Some(Category::WebCache));
        assert_eq!(signal.strength, 0.7);
    }

    #[test]
    fn test_extreme_aspect() {
        let signal = ThumbnailInspector::new().inspect(&gradient_png(600, 40)).unwrap();
        assert_eq!(signal.target, Some(Category::LowQuality));
    }

    #[test]
    fn test_ordinary_thumbnail_yields_nothing() {
        assert!(ThumbnailInspector::new().inspect(&gradient_png(64, 48)).is_none());
    }
}
