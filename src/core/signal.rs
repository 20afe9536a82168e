use super::category::Category;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    FilenamePattern,
    ResolutionMatch,
    MissingExif,
    SizeAnomaly,
    PathHint,
    SoftwareHint,
    MissingCaptureDate,
    AspectRatio,
    PixelCheck,
}

impl SignalKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SignalKind::FilenamePattern => "filename_pattern",
            SignalKind::ResolutionMatch => "resolution_match",
            SignalKind::MissingExif => "missing_exif",
            SignalKind::SizeAnomaly => "size_anomaly",
            SignalKind::PathHint => "path_hint",
            SignalKind::SoftwareHint => "software_hint",
            SignalKind::MissingCaptureDate => "missing_capture_date",
            SignalKind::AspectRatio => "aspect_ratio",
            SignalKind::PixelCheck => "pixel_check",
        }
    }
}

/// One piece of evidence derived from an asset.
///
/// `target` is the category the evidence points at, when the extractor knows
/// it (a category-tagged filename pattern, a screenshot resolution table hit).
/// Signals with no target are interpreted by each rule on its own terms.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub kind: SignalKind,
    pub target: Option<Category>,
    pub strength: f64,
    pub justification: String,
}

impl Signal {
    pub fn new(kind: SignalKind, strength: f64, justification: impl Into<String>) -> Self {
        Self {
            kind,
            target: None,
            strength: clamp_strength(strength),
            justification: justification.into(),
        }
    }

    pub fn targeting(mut self, category: Category) -> Self {
        self.target = Some(category);
        self
    }

    /// A missing-EXIF signal of zero strength means camera EXIF was found.
    pub fn is_camera_evidence(&self) -> bool {
        self.kind == SignalKind::MissingExif && self.strength == 0.0
    }
}

fn clamp_strength(strength: f64) -> f64 {
    if strength.is_nan() {
        0.0
    } else {
        strength.clamp(0.0, 1.0)
    }
}

/// The signals gathered for one asset in one classification pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SignalSet {
    signals: Vec<Signal>,
}

impl SignalSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, signal: Option<Signal>) {
        if let Some(signal) = signal {
            self.signals.push(signal);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Signal> {
        self.signals.iter()
    }

    pub fn camera_exif_present(&self) -> bool {
        self.signals.iter().any(Signal::is_camera_evidence)
    }

    pub fn len(&self) -> usize {
        self.signals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signals.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strength_is_clamped() {
        assert_eq!(Signal::new(SignalKind::PathHint, 1.7, "x").strength, 1.0);
        assert_eq!(Signal::new(SignalKind::PathHint, -0.2, "x").strength, 0.0);
        assert_eq!(Signal::new(SignalKind::PathHint, f64::NAN, "x").strength, 0.0);
    }

    #[test]
    fn test_camera_evidence() {
        let mut set = SignalSet::new();
        set.push(Some(Signal::new(SignalKind::MissingExif, 0.0, "camera EXIF present")));
        set.push(None);
        assert_eq!(set.len(), 1);
        assert!(set.camera_exif_present());

        let mut other = SignalSet::new();
        other.push(Some(Signal::new(SignalKind::MissingExif, 1.0, "no camera EXIF")));
        assert!(!other.camera_exif_present());
    }
}
