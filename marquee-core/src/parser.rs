//! Filename parsing: raw path in, normalized title/year query out.
//!
//! Release names are noisy (`The.Movie.2015.1080p.BluRay.x264-GROUP.mkv`);
//! the parser strips a configurable stoplist of quality/codec/edition tokens,
//! picks the year candidate, and keeps the contiguous token run before it as
//! the title.

use std::collections::HashSet;
use std::path::Path;

use chrono::{Datelike, Utc};
use marquee_model::ParsedQuery;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{EngineError, Result};
use crate::settings::DEFAULT_VIDEO_FILE_EXTENSIONS;

/// Cinema did not exist before this year; anything earlier is a title token.
const FIRST_FILM_YEAR: u16 = 1888;

static BRACKET_GROUP_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[[^\]]*\]").unwrap());

static PART_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(?:part|cd|disc|disk)\s*0*(\d{1,2})$").unwrap());

/// Noise tokens stripped before title extraction. Lowercase.
const DEFAULT_STOP_TOKENS: &[&str] = &[
    // resolutions
    "2160p", "1080p", "720p", "576p", "480p", "360p", "4k", "uhd",
    // sources
    "bluray", "blu-ray", "bdrip", "brrip", "webrip", "web-dl", "webdl",
    "web", "hdtv", "sdtv", "dvdrip", "dvd", "cam", "hdcam", "hdrip", "ts",
    "remux",
    // codecs and audio
    "x264", "x265", "h264", "h265", "hevc", "avc", "xvid", "divx", "10bit",
    "8bit", "hdr", "hdr10", "dv", "aac", "ac3", "dts", "flac", "mp3",
    "atmos", "ddp", "truehd", "5.1", "7.1",
    // editions and release flags
    "extended", "unrated", "theatrical", "remastered", "uncut", "proper",
    "repack", "internal", "limited", "retail", "criterion", "imax",
];

/// Configurable stoplist used by [`NameParser`].
#[derive(Debug, Clone)]
pub struct Stoplist {
    tokens: HashSet<String>,
}

impl Default for Stoplist {
    fn default() -> Self {
        let mut tokens: HashSet<String> =
            DEFAULT_STOP_TOKENS.iter().map(|t| t.to_string()).collect();
        tokens.extend(
            DEFAULT_VIDEO_FILE_EXTENSIONS
                .iter()
                .map(|ext| ext.to_string()),
        );
        Self { tokens }
    }
}

impl Stoplist {
    pub fn with_extra<I, S>(extra: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut list = Self::default();
        list.tokens
            .extend(extra.into_iter().map(|t| t.as_ref().to_lowercase()));
        list
    }

    pub fn contains(&self, token: &str) -> bool {
        self.tokens.contains(&token.to_lowercase())
    }
}

/// Derives a [`ParsedQuery`] from a raw filename or directory name.
#[derive(Debug, Clone, Default)]
pub struct NameParser {
    stoplist: Stoplist,
}

impl NameParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_stoplist(stoplist: Stoplist) -> Self {
        Self { stoplist }
    }

    /// Parse the file stem of `path` into a query.
    ///
    /// Fails with [`EngineError::UnparsableName`] when nothing usable
    /// remains after stripping; callers report those files instead of
    /// skipping them silently.
    pub fn parse<P: AsRef<Path>>(&self, path: P) -> Result<ParsedQuery> {
        let path = path.as_ref();
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| EngineError::UnparsableName(path.to_path_buf()))?;

        self.parse_stem(stem)
            .ok_or_else(|| EngineError::UnparsableName(path.to_path_buf()))
    }

    fn parse_stem(&self, stem: &str) -> Option<ParsedQuery> {
        // Release-group brackets never contain title words.
        let cleaned = BRACKET_GROUP_RE.replace_all(stem, " ");
        // Parentheses only delimit; their content (typically the year) stays.
        let cleaned = cleaned.replace(['(', ')'], " ");

        let tokens: Vec<String> = cleaned
            .split(['.', '_', '-', ' '])
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect();
        if tokens.is_empty() {
            return None;
        }

        let year_idx = self.find_year(&tokens);
        let year = year_idx.map(|i| tokens[i].parse::<u16>().unwrap_or(0));

        // Title is the contiguous run before the year, cut short at the
        // first noise token. Without a year, the first noise token bounds
        // the title instead.
        let bound = year_idx.unwrap_or(tokens.len());
        let mut title_tokens: Vec<&str> = Vec::new();
        for token in &tokens[..bound] {
            if self.stoplist.contains(token) {
                break;
            }
            title_tokens.push(token);
        }
        if title_tokens.is_empty() {
            return None;
        }

        let part = self.find_part(&tokens[bound..]);

        let mut query = ParsedQuery::new(title_tokens.join(" "));
        query.year = year.filter(|y| *y != 0);
        query.part = part;
        Some(query)
    }

    /// Index of the year token: the last in-range 4-digit token that is not
    /// the leading token, so titles like `2001 A Space Odyssey 1968` keep
    /// their numeric first word.
    fn find_year(&self, tokens: &[String]) -> Option<usize> {
        let max_year = (Utc::now().year() as u16).saturating_add(1);
        tokens
            .iter()
            .enumerate()
            .skip(1)
            .rev()
            .find(|(_, token)| {
                token.len() == 4
                    && token
                        .parse::<u16>()
                        .is_ok_and(|y| (FIRST_FILM_YEAR..=max_year).contains(&y))
            })
            .map(|(idx, _)| idx)
    }

    /// Multi-part marker (`Part 2`, `CD1`) in the tail after the title.
    fn find_part(&self, tail: &[String]) -> Option<u32> {
        let mut iter = tail.iter().peekable();
        while let Some(token) = iter.next() {
            if let Some(caps) = PART_RE.captures(token) {
                return caps[1].parse().ok();
            }
            // Two-token form: "part" "2"
            if token.eq_ignore_ascii_case("part")
                || token.eq_ignore_ascii_case("cd")
                || token.eq_ignore_ascii_case("disc")
            {
                if let Some(next) = iter.peek() {
                    if let Ok(n) = next.parse::<u32>() {
                        if n < 100 {
                            return Some(n);
                        }
                    }
                }
            }
        }
        None
    }
}
