//! One weighted rule per category. Each rule folds the full signal set into a
//! single 0-100 confidence.

use super::category::Category;
use super::signal::{Signal, SignalKind, SignalSet};
use serde::{Deserialize, Serialize};

/// Screenshot and web-cache scores are multiplied by this when the asset has
/// camera EXIF.
pub const CAMERA_DAMPING: f64 = 0.2;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryScore {
    pub category: Category,
    pub confidence: f64,
    /// Signals that moved the score, in extraction order.
    pub signals: Vec<Signal>,
}

impl CategoryScore {
    pub fn zero(category: Category) -> Self {
        Self {
            category,
            confidence: 0.0,
            signals: Vec::new(),
        }
    }

    /// Lowers the confidence by `points`, not going below zero.
    pub fn penalize(&mut self, points: f64) {
        self.confidence = round_confidence((self.confidence - points).max(0.0));
    }
}

/// How much one signal counts toward a category.
#[derive(Debug, Clone, Copy)]
struct Weight {
    kind: SignalKind,
    /// `None` accepts the signal whatever it points at.
    target: Option<Category>,
    weight: f64,
}

const fn w(kind: SignalKind, target: Option<Category>, weight: f64) -> Weight {
    Weight {
        kind,
        target,
        weight,
    }
}

const SCREENSHOT_WEIGHTS: &[Weight] = &[
    w(SignalKind::FilenamePattern, Some(Category::Screenshot), 0.55),
    w(SignalKind::ResolutionMatch, Some(Category::Screenshot), 0.30),
    w(SignalKind::MissingExif, None, 0.20),
    w(SignalKind::PathHint, Some(Category::Screenshot), 0.15),
    w(SignalKind::SoftwareHint, Some(Category::Screenshot), 0.30),
];

const WEB_CACHE_WEIGHTS: &[Weight] = &[
    w(SignalKind::FilenamePattern, Some(Category::WebCache), 0.45),
    w(SignalKind::ResolutionMatch, Some(Category::WebCache), 0.25),
    w(SignalKind::SizeAnomaly, Some(Category::WebCache), 0.20),
    w(SignalKind::PathHint, Some(Category::WebCache), 0.25),
    w(SignalKind::MissingExif, None, 0.10),
    w(SignalKind::PixelCheck, Some(Category::WebCache), 0.35),
];

const RECOVERY_JUNK_WEIGHTS: &[Weight] = &[
    w(SignalKind::FilenamePattern, Some(Category::RecoveryJunk), 0.55),
    w(SignalKind::PathHint, Some(Category::RecoveryJunk), 0.35),
    w(SignalKind::SizeAnomaly, Some(Category::RecoveryJunk), 0.35),
    w(SignalKind::MissingCaptureDate, Some(Category::RecoveryJunk), 0.10),
    w(SignalKind::PixelCheck, Some(Category::RecoveryJunk), 0.80),
];

// The thumbnail band of the resolution signal points at web cache, but tiny
// images are low quality whatever their origin.
const LOW_QUALITY_WEIGHTS: &[Weight] = &[
    w(SignalKind::FilenamePattern, Some(Category::LowQuality), 0.40),
    w(SignalKind::ResolutionMatch, Some(Category::WebCache), 0.45),
    w(SignalKind::SizeAnomaly, None, 0.25),
    w(SignalKind::AspectRatio, Some(Category::LowQuality), 0.30),
    w(SignalKind::PixelCheck, Some(Category::LowQuality), 0.35),
];

pub struct CategoryRule {
    category: Category,
    weights: &'static [Weight],
    camera_damped: bool,
}

impl CategoryRule {
    pub fn for_category(category: Category) -> Self {
        match category {
            Category::Screenshot => Self {
                category,
                weights: SCREENSHOT_WEIGHTS,
                camera_damped: true,
            },
            Category::WebCache => Self {
                category,
                weights: WEB_CACHE_WEIGHTS,
                camera_damped: true,
            },
            Category::RecoveryJunk => Self {
                category,
                weights: RECOVERY_JUNK_WEIGHTS,
                camera_damped: false,
            },
            Category::LowQuality => Self {
                category,
                weights: LOW_QUALITY_WEIGHTS,
                camera_damped: false,
            },
        }
    }

    fn weight_of(&self, signal: &Signal) -> f64 {
        self.weights
            .iter()
            .find(|w| w.kind == signal.kind && (w.target.is_none() || w.target == signal.target))
            .map(|w| w.weight)
            .unwrap_or(0.0)
    }

    pub fn score(&self, signals: &SignalSet) -> CategoryScore {
        let mut raw: f64 = 0.0;
        let mut contributing = Vec::new();

        // Sum weighted strengths of the signals this rule reads
        for signal in signals.iter() {
            let weight = self.weight_of(signal);
            if weight > 0.0 && signal.strength > 0.0 {
                raw += weight * signal.strength;
                contributing.push(signal.clone());
            }
        }

        // Saturate before damping
        let mut raw = raw.min(1.0);
        if self.camera_damped && signals.camera_exif_present() {
            raw *= CAMERA_DAMPING;
            if let Some(camera) = signals.iter().find(|s| s.is_camera_evidence()) {
                contributing.push(camera.clone());
            }
        }

        CategoryScore {
            category: self.category,
            confidence: round_confidence((raw * 100.0).clamp(0.0, 100.0)),
            signals: contributing,
        }
    }
}

/// Scores every category, in precedence order.
pub fn score_all(signals: &SignalSet) -> Vec<CategoryScore> {
    Category::ALL
        .iter()
        .map(|category| CategoryRule::for_category(*category).score(signals))
        .collect()
}

/// Highest score wins; equal scores fall back to category precedence.
pub fn primary(scores: &[CategoryScore]) -> Option<&CategoryScore> {
    scores.iter().min_by(|a, b| {
        b.confidence
            .total_cmp(&a.confidence)
            .then(a.category.precedence().cmp(&b.category.precedence()))
    })
}

fn round_confidence(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
