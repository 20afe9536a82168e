use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Cleanup categories. Declaration order is the tie-break precedence: when two
/// categories score the same, the one declared first wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Screenshot,
    WebCache,
    RecoveryJunk,
    LowQuality,
}

impl Category {
    pub const ALL: [Category; 4] = [
        Category::Screenshot,
        Category::WebCache,
        Category::RecoveryJunk,
        Category::LowQuality,
    ];

    /// Lower rank wins ties.
    pub fn precedence(self) -> u8 {
        match self {
            Category::Screenshot => 0,
            Category::WebCache => 1,
            Category::RecoveryJunk => 2,
            Category::LowQuality => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Category::Screenshot => "screenshot",
            Category::WebCache => "web_cache",
            Category::RecoveryJunk => "recovery_junk",
            Category::LowQuality => "low_quality",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown category: {0}")]
pub struct UnknownCategory(pub String);

impl FromStr for Category {
    type Err = UnknownCategory;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "screenshot" | "screenshots" => Ok(Category::Screenshot),
            "web_cache" | "webcache" | "cache" => Ok(Category::WebCache),
            "recovery_junk" | "recovery" => Ok(Category::RecoveryJunk),
            "low_quality" | "lowquality" => Ok(Category::LowQuality),
            other => Err(UnknownCategory(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_precedence_matches_declaration_order() {
        let mut sorted = Category::ALL.to_vec();
        sorted.sort_by_key(|c| c.precedence());
        assert_eq!(sorted, Category::ALL.to_vec());
        assert!(Category::Screenshot < Category::WebCache);
        assert!(Category::RecoveryJunk < Category::LowQuality);
    }

    #[test]
    fn test_parse_category() {
        assert_eq!("web-cache".parse::<Category>(), Ok(Category::WebCache));
        assert_eq!("Screenshot".parse::<Category>(), Ok(Category::Screenshot));
        assert!("selfie".parse::<Category>().is_err());
    }

    #[test]
    fn test_serde_uses_snake_case() {
        let json = serde_json::to_string(&Category::RecoveryJunk).unwrap();
        assert_eq!(json, "\"recovery_junk\"");
    }
}
