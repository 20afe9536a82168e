use super::asset::Asset;
use super::category::Category;
use super::extract::eager_signals;
use super::pixel::ThumbnailInspector;
use super::rules::{primary, score_all, CategoryScore};
use super::signal::SignalSet;
use crate::catalog::{Catalog, CatalogError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Provisional scores inside this band (inclusive) are inconclusive.
pub const INCONCLUSIVE_LOW: f64 = 30.0;
pub const INCONCLUSIVE_HIGH: f64 = 70.0;

/// Points taken off every score when an extractor faulted.
pub const FAULT_PENALTY: f64 = 10.0;

/// Records at or above this confidence count as cleanup candidates.
pub const CANDIDATE_THRESHOLD: f64 = 50.0;

pub const HIGH_CONFIDENCE: f64 = 70.0;

pub const DEFAULT_PIXEL_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PixelCheckOutcome {
    Skipped,
    Clean,
    Flagged,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recommendation {
    StronglyDelete,
    ConsiderRemoval,
    ManualReview,
    Keep,
}

impl Recommendation {
    pub fn from_confidence(confidence: f64) -> Self {
        if confidence > 80.0 {
            Recommendation::StronglyDelete
        } else if confidence > 60.0 {
            Recommendation::ConsiderRemoval
        } else if confidence > 40.0 {
            Recommendation::ManualReview
        } else {
            Recommendation::Keep
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Recommendation::StronglyDelete => "strongly_delete",
            Recommendation::ConsiderRemoval => "consider_removal",
            Recommendation::ManualReview => "manual_review",
            Recommendation::Keep => "keep",
        }
    }
}

/// What the record remembers about the asset it was computed from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetSnapshot {
    pub filename: String,
    pub path: String,
    pub file_size: u64,
    pub width: u32,
    pub height: u32,
    pub face_count: u32,
    #[serde(default)]
    pub taken_at: Option<DateTime<Utc>>,
}

impl From<&Asset> for AssetSnapshot {
    fn from(asset: &Asset) -> Self {
        Self {
            filename: asset.filename.clone(),
            path: asset.path.clone(),
            file_size: asset.file_size,
            width: asset.width,
            height: asset.height,
            face_count: asset.face_count,
            taken_at: asset.taken_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationRecord {
    pub asset_id: String,
    pub analyzed_at: DateTime<Utc>,
    /// One score per category, in precedence order.
    pub scores: Vec<CategoryScore>,
    pub primary_category: Category,
    pub confidence: f64,
    /// Set only by the user. Classification never reads or writes it.
    pub marked_for_deletion: bool,
    pub snapshot: AssetSnapshot,
    pub pixel_check: PixelCheckOutcome,
    /// Extractors that failed for this asset.
    pub faults: Vec<String>,
}

impl ClassificationRecord {
    pub fn score_for(&self, category: Category) -> f64 {
        self.scores
            .iter()
            .find(|s| s.category == category)
            .map(|s| s.confidence)
            .unwrap_or(0.0)
    }

    pub fn recommendation(&self) -> Recommendation {
        Recommendation::from_confidence(self.confidence)
    }

    pub fn is_candidate(&self) -> bool {
        self.confidence >= CANDIDATE_THRESHOLD
    }

    /// Justifications behind the primary category, most relevant first.
    pub fn justifications(&self) -> Vec<String> {
        self.scores
            .iter()
            .find(|s| s.category == self.primary_category)
            .map(|s| s.signals.iter().map(|sig| sig.justification.clone()).collect())
            .unwrap_or_default()
    }
}

/// Whether cheap signals left every category undecided.
pub fn needs_pixel_check(scores: &[CategoryScore]) -> bool {
    !scores.is_empty()
        && scores
            .iter()
            .all(|s| (INCONCLUSIVE_LOW..=INCONCLUSIVE_HIGH).contains(&s.confidence))
}

/// Scores a single asset: metadata signals first, then the thumbnail check
/// only when the metadata pass is inconclusive.
pub struct Classifier {
    catalog: Arc<dyn Catalog>,
    inspector: ThumbnailInspector,
    pixel_timeout: Duration,
}

impl Classifier {
    pub fn new(catalog: Arc<dyn Catalog>) -> Self {
        Self {
            catalog,
            inspector: ThumbnailInspector::new(),
            pixel_timeout: DEFAULT_PIXEL_TIMEOUT,
        }
    }

    pub fn with_pixel_timeout(mut self, timeout: Duration) -> Self {
        self.pixel_timeout = timeout;
        self
    }

    /// Never fails: faults are folded into the record.
    pub async fn classify(&self, asset: &Asset) -> ClassificationRecord {
        let mut signals = eager_signals(asset);
        let mut scores = score_all(&signals);
        let mut faults = Vec::new();
        let mut pixel_check = PixelCheckOutcome::Skipped;

        if needs_pixel_check(&scores) {
            log::debug!("Asset {} is inconclusive, checking thumbnail", asset.id);
            match self.fetch_thumbnail(&asset.id).await {
                Ok(bytes) => {
                    let signal = self.inspector.inspect(&bytes);
                    pixel_check = if signal.is_some() {
                        PixelCheckOutcome::Flagged
                    } else {
                        PixelCheckOutcome::Clean
                    };
                    signals.push(signal);
                    scores = score_all(&signals);
                }
                Err(e) => {
                    log::warn!("Pixel check failed for asset {}: {}", asset.id, e);
                    pixel_check = PixelCheckOutcome::Failed;
                    faults.push("pixel_check".to_string());
                }
            }
        }

        if !faults.is_empty() {
            for score in scores.iter_mut() {
                score.penalize(FAULT_PENALTY);
            }
        }

        build_record(asset, scores, &signals, pixel_check, faults)
    }

    async fn fetch_thumbnail(&self, asset_id: &str) -> Result<Vec<u8>, CatalogError> {
        match tokio::time::timeout(self.pixel_timeout, self.catalog.get_thumbnail(asset_id)).await
        {
            Ok(result) => result,
            Err(_) => Err(CatalogError::Connectivity(format!(
                "thumbnail fetch timed out after {:?}",
                self.pixel_timeout
            ))),
        }
    }
}

fn build_record(
    asset: &Asset,
    scores: Vec<CategoryScore>,
    signals: &SignalSet,
    pixel_check: PixelCheckOutcome,
    faults: Vec<String>,
) -> ClassificationRecord {
    let (primary_category, confidence) = primary(&scores)
        .map(|s| (s.category, s.confidence))
        .unwrap_or((Category::Screenshot, 0.0));

    log::debug!(
        "Asset {} -> {} ({:.1}%) from {} signals",
        asset.id,
        primary_category,
        confidence,
        signals.len()
    );

    ClassificationRecord {
        asset_id: asset.id.clone(),
        analyzed_at: Utc::now(),
        scores,
        primary_category,
        confidence,
        marked_for_deletion: false,
        snapshot: AssetSnapshot::from(asset),
        pixel_check,
        faults,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::fake::FakeCatalog;
    use crate::core::pixel::tests::{gradient_png, solid_png};

    /// Metadata that leaves all four categories between 30 and 70.
    fn ambiguous_asset(id: &str) -> Asset {
        Asset::new(id, "myscreenshot.png")
            .with_path("/photos/recup_dir.1/myscreenshot.png")
            .with_resolution(300, 300)
            .with_size(4096)
    }

    fn classifier_for(catalog: Arc<FakeCatalog>) -> Classifier {
        Classifier::new(catalog).with_pixel_timeout(Duration::from_millis(200))
    }

    #[tokio::test]
    async fn test_screenshot_scenario() {
        let catalog = Arc::new(FakeCatalog::new(vec![]));
        let classifier = classifier_for(catalog.clone());
        let asset = Asset::new("s1", "Screenshot_2023-01-01-12-00-00.png")
            .with_resolution(1080, 2400);

        let record = classifier.classify(&asset).await;
        assert_eq!(record.primary_category, Category::Screenshot);
        assert!(record.confidence >= 70.0);
        assert_eq!(record.pixel_check, PixelCheckOutcome::Skipped);
        assert_eq!(catalog.thumbnail_fetches(), 0);
    }

    #[tokio::test]
    async fn test_camera_photo_scenario() {
        let catalog = Arc::new(FakeCatalog::new(vec![]));
        let classifier = classifier_for(catalog);
        let asset = Asset::new("c1", "IMG_4521.JPG")
            .with_path("/photos/2023/IMG_4521.JPG")
            .with_resolution(4032, 3024)
            .with_size(3_400_000)
            .with_camera("Apple iPhone 14 Pro")
            .with_taken_at(Utc::now());

        let record = classifier.classify(&asset).await;
        assert_eq!(record.snapshot.taken_at, asset.taken_at);
        assert!(record.score_for(Category::Screenshot) < 20.0);
        assert!(record.score_for(Category::WebCache) < 20.0);
        assert!(record.score_for(Category::LowQuality) < 5.0);
        assert!(record.score_for(Category::RecoveryJunk) < 5.0);
        assert_eq!(record.recommendation(), Recommendation::Keep);
    }

    #[tokio::test]
    async fn test_web_cache_scenario() {
        let catalog = Arc::new(FakeCatalog::new(vec![]));
        let classifier = classifier_for(catalog);
        let asset = Asset::new("w1", "thumb_cache_9182.jpg")
            .with_path("/var/mobile/Library/Cache/Thumbnails/thumb_cache_9182.jpg")
            .with_resolution(150, 150)
            .with_size(3 * 1024);

        let record = classifier.classify(&asset).await;
        assert_eq!(record.primary_category, Category::WebCache);
        assert!(record.confidence >= 80.0);
        assert!(!record.justifications().is_empty());
    }

    #[tokio::test]
    async fn test_extreme_aspect_scores_low_quality_without_thumbnail() {
        let catalog = Arc::new(FakeCatalog::new(vec![]));
        let classifier = classifier_for(catalog.clone());
        let asset = Asset::new("pano", "IMG_0001.png")
            .with_resolution(3000, 400)
            .with_size(200_000)
            .with_taken_at(Utc::now());

        let record = classifier.classify(&asset).await;
        assert_eq!(record.score_for(Category::LowQuality), 30.0);
        assert_eq!(record.pixel_check, PixelCheckOutcome::Skipped);
        assert_eq!(catalog.thumbnail_fetches(), 0);
    }

    #[tokio::test]
    async fn test_every_category_scored_and_primary_is_max() {
        let catalog = Arc::new(FakeCatalog::new(vec![]));
        let classifier = classifier_for(catalog);
        let assets = [
            Asset::new("a", "vacation.jpg"),
            Asset::new("b", "recovered_0001.jpg").with_resolution(120, 90),
            Asset::new("c", "avatar.png").with_resolution(1080, 1920),
        ];

        for asset in &assets {
            let record = classifier.classify(asset).await;
            let categories: Vec<_> = record.scores.iter().map(|s| s.category).collect();
            assert_eq!(categories, Category::ALL.to_vec());
            let best = record
                .scores
                .iter()
                .map(|s| s.confidence)
                .fold(0.0, f64::max);
            assert_eq!(record.confidence, best);
            let first_at_best = record
                .scores
                .iter()
                .find(|s| s.confidence == best)
                .unwrap()
                .category;
            assert_eq!(record.primary_category, first_at_best);
        }
    }

    #[tokio::test]
    async fn test_pixel_check_only_for_inconclusive_assets() {
        let asset = ambiguous_asset("amb");
        let provisional = score_all(&eager_signals(&asset));
        assert!(needs_pixel_check(&provisional), "{:?}", provisional);

        let catalog = Arc::new(
            FakeCatalog::new(vec![]).with_thumbnail("amb", gradient_png(64, 64)),
        );
        let classifier = classifier_for(catalog.clone());

        let conclusive = [
            Asset::new("s", "Screenshot_2023-01-01.png").with_resolution(1080, 2400),
            Asset::new("p", "IMG_0001.JPG")
                .with_resolution(4032, 3024)
                .with_camera("Canon"),
        ];
        for asset in &conclusive {
            classifier.classify(asset).await;
        }
        assert_eq!(catalog.thumbnail_fetches(), 0);

        let record = classifier.classify(&asset).await;
        assert_eq!(catalog.thumbnail_fetches(), 1);
        assert_eq!(record.pixel_check, PixelCheckOutcome::Clean);
        assert!(record.faults.is_empty());
    }

    #[tokio::test]
    async fn test_pixel_signal_rescoring() {
        let catalog = Arc::new(FakeCatalog::new(vec![]).with_thumbnail("amb", solid_png(64, 64)));
        let classifier = classifier_for(catalog);
        let asset = ambiguous_asset("amb");
        let before = score_all(&eager_signals(&asset));

        let record = classifier.classify(&asset).await;
        assert_eq!(record.pixel_check, PixelCheckOutcome::Flagged);
        let web_before = before
            .iter()
            .find(|s| s.category == Category::WebCache)
            .unwrap()
            .confidence;
        assert!(record.score_for(Category::WebCache) > web_before);
    }

    #[tokio::test]
    async fn test_thumbnail_timeout_lowers_confidence() {
        let catalog = Arc::new(
            FakeCatalog::new(vec![])
                .with_thumbnail("amb", gradient_png(64, 64))
                .with_thumbnail_delay(Duration::from_secs(5)),
        );
        let classifier = classifier_for(catalog.clone());
        let asset = ambiguous_asset("amb");
        let provisional = score_all(&eager_signals(&asset));
        let expected = primary(&provisional).unwrap().confidence - FAULT_PENALTY;

        let record = classifier.classify(&asset).await;
        assert_eq!(record.pixel_check, PixelCheckOutcome::Failed);
        assert_eq!(record.faults, vec!["pixel_check".to_string()]);
        assert!((record.confidence - expected).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_missing_thumbnail_is_a_fault_not_an_error() {
        let catalog = Arc::new(FakeCatalog::new(vec![]));
        let classifier = classifier_for(catalog.clone());

        let record = classifier.classify(&ambiguous_asset("nothumb")).await;
        assert_eq!(catalog.thumbnail_fetches(), 1);
        assert_eq!(record.pixel_check, PixelCheckOutcome::Failed);
    }

    #[tokio::test]
    async fn test_classification_is_deterministic() {
        let catalog = Arc::new(FakeCatalog::new(vec![]).with_thumbnail("amb", solid_png(32, 32)));
        let classifier = classifier_for(catalog);
        let asset = ambiguous_asset("amb");

        let mut first = classifier.classify(&asset).await;
        let second = classifier.classify(&asset).await;
        first.analyzed_at = second.analyzed_at;
        assert_eq!(first, second);
    }

    #[test]
    fn test_recommendation_bands() {
        assert_eq!(Recommendation::from_confidence(95.0), Recommendation::StronglyDelete);
        assert_eq!(Recommendation::from_confidence(61.0), Recommendation::ConsiderRemoval);
        assert_eq!(Recommendation::from_confidence(45.0), Recommendation::ManualReview);
        assert_eq!(Recommendation::from_confidence(40.0), Recommendation::Keep);
    }
}
