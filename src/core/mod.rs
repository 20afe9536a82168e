pub mod asset;
pub mod category;
pub mod classifier;
pub mod exif;
pub mod extract;
pub mod pixel;
pub mod rules;
pub mod signal;

pub use asset::Asset;
pub use category::Category;
pub use classifier::{
    needs_pixel_check, ClassificationRecord, Classifier, PixelCheckOutcome, Recommendation,
    CANDIDATE_THRESHOLD,
};
pub use rules::CategoryScore;
pub use signal::{Signal, SignalKind, SignalSet};
