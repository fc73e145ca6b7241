//! Source tree change detection.
//!
//! Before a cycle triggers any remote stage, the controller asks
//! [`ChangeDetector::has_new_work`] whether a data file in the source tree
//! was modified after the last scan. The walk is iterative and bounded by a
//! depth and an entry ceiling, so huge or cyclic trees cannot blow the stack
//! or stall a cycle indefinitely.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use cncflow_shared::WatchConfig;
use tracing::{debug, instrument, warn};

// ---------------------------------------------------------------------------
// ScanSummary
// ---------------------------------------------------------------------------

/// What a walk of the source tree found.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanSummary {
    /// Newest modification time among matching files.
    pub latest_modified: Option<DateTime<Utc>>,
    /// Number of matching files seen.
    pub file_count: usize,
    /// A depth or entry ceiling cut the walk short.
    pub truncated: bool,
}

// ---------------------------------------------------------------------------
// ChangeDetector
// ---------------------------------------------------------------------------

/// Walks a source tree looking for recently modified data files.
#[derive(Debug, Clone)]
pub struct ChangeDetector {
    data_extension: String,
    max_depth: usize,
    max_entries: usize,
}

impl ChangeDetector {
    pub fn new(data_extension: impl Into<String>, max_depth: usize, max_entries: usize) -> Self {
        Self {
            data_extension: data_extension.into(),
            max_depth,
            max_entries,
        }
    }

    pub fn from_config(config: &WatchConfig) -> Self {
        Self::new(
            config.data_extension.clone(),
            config.max_depth,
            config.max_entries,
        )
    }

    /// Whether `root` holds a data file modified after `since`.
    ///
    /// A missing root is never new work, not even on the first run. With
    /// `since` unset (first run) any existing root is new work.
    #[instrument(skip_all, fields(root = %root.display()))]
    pub async fn has_new_work(&self, root: &Path, since: Option<DateTime<Utc>>) -> bool {
        match tokio::fs::try_exists(root).await {
            Ok(true) => {}
            Ok(false) => {
                warn!("source path not found");
                return false;
            }
            Err(e) => {
                warn!(error = %e, "cannot check source path");
                return false;
            }
        }

        let summary = self.scan(root).await;
        debug!(
            files = summary.file_count,
            latest = ?summary.latest_modified,
            truncated = summary.truncated,
            "source tree scanned"
        );

        match (since, summary.latest_modified) {
            (None, _) => true,
            (Some(since), Some(latest)) => latest > since,
            (Some(_), None) => false,
        }
    }

    /// Walk `root` and report the newest matching file.
    ///
    /// Unreadable directories and entries are skipped.
    pub async fn scan(&self, root: &Path) -> ScanSummary {
        let mut summary = ScanSummary::default();
        let mut stack: Vec<(PathBuf, usize)> = vec![(root.to_path_buf(), 0)];
        let mut entries_seen: usize = 0;

        'walk: while let Some((dir, depth)) = stack.pop() {
            let mut reader = match tokio::fs::read_dir(&dir).await {
                Ok(reader) => reader,
                Err(e) => {
                    debug!(dir = %dir.display(), error = %e, "skipping unreadable directory");
                    continue;
                }
            };

            loop {
                let entry = match reader.next_entry().await {
                    Ok(Some(entry)) => entry,
                    Ok(None) => break,
                    Err(e) => {
                        debug!(
                            dir = %dir.display(),
                            error = %e,
                            "directory listing interrupted"
                        );
                        break;
                    }
                };

                entries_seen += 1;
                if entries_seen > self.max_entries {
                    warn!(max_entries = self.max_entries, "entry ceiling reached, scan truncated");
                    summary.truncated = true;
                    break 'walk;
                }

                // Symlinks are not followed.
                let Ok(file_type) = entry.file_type().await else {
                    continue;
                };

                if file_type.is_dir() {
                    if depth + 1 > self.max_depth {
                        if !summary.truncated {
                            warn!(
                                max_depth = self.max_depth,
                                "depth ceiling reached, scan truncated"
                            );
                        }
                        summary.truncated = true;
                        continue;
                    }
                    stack.push((entry.path(), depth + 1));
                } else if file_type.is_file() && self.is_data_file(&entry.file_name()) {
                    let modified = match entry.metadata().await.and_then(|m| m.modified()) {
                        Ok(modified) => DateTime::<Utc>::from(modified),
                        Err(e) => {
                            debug!(
                                path = %entry.path().display(),
                                error = %e,
                                "no modification time"
                            );
                            continue;
                        }
                    };
                    summary.file_count += 1;
                    if summary.latest_modified.is_none_or(|latest| modified > latest) {
                        summary.latest_modified = Some(modified);
                    }
                }
            }
        }

        summary
    }

    fn is_data_file(&self, name: &std::ffi::OsStr) -> bool {
        name.to_string_lossy().ends_with(&self.data_extension)
    }
}
