//! Library scanning.
//!
//! Walks the configured library roots and produces one [`SourceFile`] per
//! video file found, with provider id hints harvested from companion text
//! files. The walk never follows symlinks, so a link tree placed inside a
//! library root cannot inflate the scan.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use marquee_model::{ExternalId, FileIdentity, SourceFile};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, warn};

/// Companion file extensions inspected for id hints.
const HINT_EXTENSIONS: &[&str] = &["txt", "nfo"];

/// Companion files larger than this are ignored; a hint file is a few lines.
const MAX_HINT_FILE_LEN: u64 = 1024 * 1024;

static ID_HINT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"tt[0-9]{7,10}").unwrap());

/// Discovers video files under the library roots.
#[derive(Debug, Clone)]
pub struct LibraryScanner {
    roots: Vec<PathBuf>,
    video_extensions: HashSet<String>,
}

impl LibraryScanner {
    pub fn new(roots: Vec<PathBuf>, video_extensions: &[String]) -> Self {
        Self {
            roots,
            video_extensions: video_extensions
                .iter()
                .map(|ext| ext.to_ascii_lowercase())
                .collect(),
        }
    }

    /// Walk all roots and return the discovered files, sorted by path.
    ///
    /// Unreadable directories are logged and skipped; the scan is best
    /// effort, matching the synchronizer's degradation rule.
    pub async fn scan(&self) -> Vec<SourceFile> {
        let mut found = Vec::new();
        let mut stack: Vec<PathBuf> = self.roots.clone();
        while let Some(dir) = stack.pop() {
            self.scan_dir(&dir, &mut found, &mut stack).await;
        }
        found.sort_by(|a, b| a.identity.path.cmp(&b.identity.path));
        debug!(files = found.len(), "library scan complete");
        found
    }

    async fn scan_dir(
        &self,
        dir: &Path,
        found: &mut Vec<SourceFile>,
        stack: &mut Vec<PathBuf>,
    ) {
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(err) => {
                warn!("cannot read directory {}: {err}", dir.display());
                return;
            }
        };

        let mut videos: Vec<(PathBuf, DateTime<Utc>, u64)> = Vec::new();
        let mut texts: Vec<PathBuf> = Vec::new();

        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(err) => {
                    warn!("error while reading {}: {err}", dir.display());
                    break;
                }
            };
            let path = entry.path();
            let file_type = match entry.file_type().await {
                Ok(ft) => ft,
                Err(err) => {
                    warn!("cannot stat {}: {err}", path.display());
                    continue;
                }
            };

            // Symlinks are neither followed nor listed.
            if file_type.is_symlink() {
                continue;
            }
            if file_type.is_dir() {
                stack.push(path);
                continue;
            }

            let ext = extension_lowercase(&path);
            if let Some(ext) = ext {
                if self.video_extensions.contains(&ext) {
                    match entry.metadata().await {
                        Ok(meta) => {
                            let modified = meta
                                .modified()
                                .map(DateTime::<Utc>::from)
                                .unwrap_or_else(|_| Utc::now());
                            videos.push((path, modified, meta.len()));
                        }
                        Err(err) => {
                            warn!("cannot stat {}: {err}", path.display());
                        }
                    }
                } else if HINT_EXTENSIONS.contains(&ext.as_str()) {
                    texts.push(path);
                }
            }
        }

        let sole_video = videos.len() == 1;
        for (path, modified, len) in videos {
            let hint = find_hint(&path, &texts, sole_video).await;
            let identity = FileIdentity::new(path, modified, len);
            found.push(match hint {
                Some(id) => SourceFile::with_hint(identity, id),
                None => SourceFile::new(identity),
            });
        }
    }
}

fn extension_lowercase(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

/// Look for a provider id next to a video file.
///
/// A sidecar whose stem matches the video's stem always applies; any other
/// companion text file in the directory applies only when the video is the
/// directory's sole video, so rip folders with one movie and a release
/// `.nfo` still get their hint.
async fn find_hint(
    video: &Path,
    texts: &[PathBuf],
    sole_video: bool,
) -> Option<ExternalId> {
    let stem = video.file_stem()?;
    let mut ordered: Vec<&PathBuf> = texts
        .iter()
        .filter(|t| t.file_stem() == Some(stem))
        .collect();
    if sole_video {
        ordered.extend(texts.iter().filter(|t| t.file_stem() != Some(stem)));
    }

    for text in ordered {
        if let Some(id) = extract_hint(text).await {
            debug!(
                "id hint {} for {} from {}",
                id,
                video.display(),
                text.display()
            );
            return Some(id);
        }
    }
    None
}

async fn extract_hint(text: &Path) -> Option<ExternalId> {
    match tokio::fs::metadata(text).await {
        Ok(meta) if meta.len() <= MAX_HINT_FILE_LEN => {}
        Ok(_) => return None,
        Err(err) => {
            warn!("cannot stat hint file {}: {err}", text.display());
            return None;
        }
    }
    let bytes = match tokio::fs::read(text).await {
        Ok(bytes) => bytes,
        Err(err) => {
            warn!("cannot read hint file {}: {err}", text.display());
            return None;
        }
    };
    let content = String::from_utf8_lossy(&bytes);
    ID_HINT_RE
        .find(&content)
        .map(|m| ExternalId::new(m.as_str()))
}
