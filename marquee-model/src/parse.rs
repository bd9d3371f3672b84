use serde::{Deserialize, Serialize};

/// Normalized search query derived from a raw filename.
///
/// Derivation is deterministic; the query carries no persistent identity and
/// is rebuilt from the filename on every pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedQuery {
    /// Cleaned title candidate with separators normalized to spaces.
    pub title: String,
    /// Four-digit year token found in the name, when plausible.
    pub year: Option<u16>,
    /// Multi-part/disc number (e.g. `CD2`, `Part 1`) when present. Kept so
    /// two parts of the same movie resolve to one record but keep distinct
    /// link names.
    pub part: Option<u32>,
}

impl ParsedQuery {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            year: None,
            part: None,
        }
    }

    pub fn with_year(mut self, year: u16) -> Self {
        self.year = Some(year);
        self
    }
}

impl std::fmt::Display for ParsedQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.year {
            Some(year) => write!(f, "{} ({})", self.title, year),
            None => write!(f, "{}", self.title),
        }
    }
}
