//! License plate strings
//!
//! Normalization and format validation for OCR output, plus the per-frame
//! acceptance pipeline that turns detector + OCR output into a plate.

pub mod acceptor;

pub use acceptor::{AcceptedPlate, PlateAcceptor};

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;

/// Detections below this confidence are treated as noise
pub const MIN_DETECTION_CONFIDENCE: f32 = 0.4;

/// OCR candidates must score strictly above this to be considered
pub const MIN_OCR_CONFIDENCE: f32 = 0.7;

/// Shortest normalized plate accepted
pub const MIN_PLATE_LEN: usize = 6;

/// Longest normalized plate accepted
pub const MAX_PLATE_LEN: usize = 12;

/// Two letters, one-or-two digits, one-or-two letters, four digits
pub const PLATE_PATTERN: &str = r"^[A-Z]{2}[0-9]{1,2}[A-Z]{1,2}[0-9]{4}$";

static PLATE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(PLATE_PATTERN).unwrap_or_else(|e| panic!("Failed to compile plate pattern: {e}"))
});

/// Strip all whitespace and uppercase raw OCR text
pub fn normalize(raw: &str) -> String {
    raw.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_uppercase)
        .collect()
}

/// Check a normalized string against the length window and plate format
pub fn is_valid_format(text: &str) -> bool {
    let len = text.chars().count();
    (MIN_PLATE_LEN..=MAX_PLATE_LEN).contains(&len) && PLATE_REGEX.is_match(text)
}

/// A normalized, format-validated plate
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PlateString(String);

impl PlateString {
    /// Normalize raw text and validate it as a plate
    pub fn parse(raw: &str) -> Option<Self> {
        let normalized = normalize(raw);
        is_valid_format(&normalized).then_some(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PlateString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for PlateString {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for PlateString {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value).ok_or_else(|| format!("'{}' is not a valid plate", value))
    }
}

impl From<PlateString> for String {
    fn from(plate: PlateString) -> Self {
        plate.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_formats() {
        let cases = ["DL1AB1234", "UP32GH5678", "MH12XY4321", "KA5A1234", "TN09B0001"];
        for input in cases {
            assert!(is_valid_format(input), "{input}");
        }
    }

    #[test]
    fn test_three_letter_series_rejected() {
        // The series group is one or two letters; "ABC" overflows into the digit block.
        assert!(!is_valid_format("DL1ABC1234"));
        assert!(PlateString::parse("dl 1 abc 1234").is_none());
    }

    #[test]
    fn test_invalid_formats() {
        let cases = [
            "",
            "MH1XY123",     // only three trailing digits
            "dl1ab1234",    // lowercase is not normalized here
            "DL 1AB1234",   // internal space
            "D1AB1234",     // one leading letter
            "DL123AB1234",  // three digits
            "DL1AB12345",   // five trailing digits
            "DL1AB1234X",   // trailing garbage
            "XDL1AB1234",   // leading garbage
            "DL1AB12",
        ];
        for input in cases {
            assert!(!is_valid_format(input), "{input}");
        }
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("dl 1 abc 1234"), "DL1ABC1234");
        assert_eq!(normalize("  up32\tgh 5678 "), "UP32GH5678");
        assert_eq!(normalize(""), "");
    }

    #[test]
    fn test_plate_string_parse() {
        let plate = PlateString::parse("up 32 gh 5678").unwrap();
        assert_eq!(plate.as_str(), "UP32GH5678");
        assert_eq!(plate.to_string(), "UP32GH5678");

        assert!(PlateString::parse("MH1XY123").is_none());
        assert!(PlateString::parse("").is_none());
    }

    #[test]
    fn test_plate_string_serde() {
        let plate: PlateString = serde_json::from_str("\"MH12XY4321\"").unwrap();
        assert_eq!(plate.as_str(), "MH12XY4321");
        assert_eq!(serde_json::to_string(&plate).unwrap(), "\"MH12XY4321\"");

        let bad: Result<PlateString, _> = serde_json::from_str("\"NOTAPLATE\"");
        assert!(bad.is_err());
    }
}
