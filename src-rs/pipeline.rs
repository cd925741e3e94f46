use crate::annotations::{AnnotationEntry, AnnotationWalker};
use crate::drive::{direct_image_url, publish_file, DriveApi, FolderResolver};
use crate::error::RecordError;
use crate::overlay::render_bounding_box;
use crate::sheets::{Row, ANNOTATION_COLUMN, REVIEW_COLUMN};
use anyhow::Result;
use chrono::Utc;
use clap::ValueEnum;
use serde::Serialize;
use serde_json::{json, Value};
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

pub const UPLOAD_FAILED: &str = "Failed to upload screenshot";
pub const SCREENSHOT_NOT_FOUND: &str = "Screenshot not found";

/// What to do when one annotation folder cannot be turned into a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RecordErrorPolicy {
    /// Stop the run at the first bad record.
    Abort,
    /// Drop the record, log it, and list it in the run report.
    Skip,
}

#[derive(Debug, Clone, Copy)]
pub struct RunOptions {
    pub on_record_error: RecordErrorPolicy,
    pub remove_overlays: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            on_record_error: RecordErrorPolicy::Abort,
            remove_overlays: false,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SkippedRecord {
    pub path: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub generated_at: String,
    pub root: String,
    pub worksheet: String,
    pub rows_written: usize,
    pub uploads_failed: usize,
    pub screenshots_missing: usize,
    pub skipped: Vec<SkippedRecord>,
}

/// Turns annotation folders into sheet rows, publishing a bounding-box
/// screenshot for each one along the way.
pub struct RowAggregator<'a, D: DriveApi + ?Sized> {
    drive: &'a D,
    resolver: FolderResolver,
    options: RunOptions,
    next_id: u64,
    report: RunReport,
}

impl<'a, D: DriveApi + ?Sized> RowAggregator<'a, D> {
    pub fn new(drive: &'a D, resolver: FolderResolver, options: RunOptions) -> Self {
        Self {
            drive,
            resolver,
            options,
            next_id: 0,
            report: RunReport::default(),
        }
    }

    /// Builds one row per annotation folder under `root`, in traversal order.
    pub fn collect_rows(&mut self, root: &Path) -> Result<Vec<Row>> {
        let mut rows = Vec::new();
        for entry in AnnotationWalker::new(root) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    let path = match err.downcast_ref::<RecordError>() {
                        Some(RecordError::Listing { path, .. }) => path.clone(),
                        _ => root.to_path_buf(),
                    };
                    self.record_failure(&path, err)?;
                    continue;
                }
            };
            match self.build_row(&entry, self.next_id) {
                Ok(row) => {
                    self.next_id += 1;
                    rows.push(row);
                }
                Err(err) => self.record_failure(&entry.annotation_dir, err)?,
            }
        }
        info!(
            rows = rows.len(),
            skipped = self.report.skipped.len(),
            remote_folders = self.resolver.cached_folders(),
            "annotations collected"
        );
        Ok(rows)
    }

    /// Applies the record-error policy: per-record errors are logged and
    /// listed under `Skip`; anything else is returned.
    fn record_failure(&mut self, path: &Path, err: anyhow::Error) -> Result<()> {
        if self.options.on_record_error != RecordErrorPolicy::Skip {
            return Err(err);
        }
        let message = match err.downcast_ref::<RecordError>() {
            Some(record_err) => record_err.to_string(),
            None => return Err(err),
        };
        warn!(path = %path.display(), error = %message, "skipping annotation");
        self.report.skipped.push(SkippedRecord {
            path: path.display().to_string(),
            error: message,
        });
        Ok(())
    }

    fn build_row(&mut self, entry: &AnnotationEntry, action_id: u64) -> Result<Row> {
        let details = entry.details_path();
        debug!(action_id, folder = %entry.folder.display(), path = %details.display(), "loading annotation");
        let record = entry.load()?;

        let (tag_source, tag_head) = record.tag_head().ok_or_else(|| RecordError::MissingData {
            path: details.clone(),
            field: "tagHead",
        })?;
        debug!(action_id, source = tag_source.key(), tag = %tag_head, "tagHead resolved");

        let (screenshot, screenshot_view) = match entry.screenshot_path() {
            Some(path) => {
                let (bbox_source, bbox) = record
                    .bounding_box()
                    .ok_or_else(|| RecordError::MissingBoundingBox { path: details.clone() })?;
                debug!(action_id, source = bbox_source.key(), "boundingBox resolved");

                let overlay = render_bounding_box(&path, &bbox)?;
                let folder_id = self.resolver.resolve(self.drive, &overlay)?;
                match publish_file(self.drive, &folder_id, &overlay) {
                    Some(link) => {
                        let direct = direct_image_url(&link)?;
                        if self.options.remove_overlays {
                            if let Err(err) = fs::remove_file(&overlay) {
                                warn!(path = %overlay.display(), error = %err, "failed to remove overlay");
                            }
                        }
                        (Value::String(format!("=IMAGE(\"{direct}\")")), Value::String(link))
                    }
                    None => {
                        self.report.uploads_failed += 1;
                        (json!(UPLOAD_FAILED), Value::Null)
                    }
                }
            }
            None => {
                self.report.screenshots_missing += 1;
                (json!(SCREENSHOT_NOT_FOUND), Value::Null)
            }
        };

        let severity = record.action_state_change_severity.clone();
        let mut row = Row::new();
        row.insert("action_id".to_string(), json!(action_id));
        row.insert("url".to_string(), json!(record.url));
        row.insert("description".to_string(), json!(record.description));
        row.insert("tagHead".to_string(), json!(tag_head));
        row.insert("Screenshot".to_string(), screenshot);
        row.insert("Screenshot View".to_string(), screenshot_view);
        row.insert(ANNOTATION_COLUMN.to_string(), json!(severity));
        row.insert(REVIEW_COLUMN.to_string(), json!(severity));
        Ok(row)
    }

    pub fn finish(self, root: &str, worksheet: &str, rows_written: usize) -> RunReport {
        RunReport {
            generated_at: Utc::now().to_rfc3339(),
            root: root.to_string(),
            worksheet: worksheet.to_string(),
            rows_written,
            ..self.report
        }
    }
}
