use crate::error::RecordError;
use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

pub const ANNOTATIONS_DIR: &str = "act_annots";
pub const DETAILS_FILE: &str = "annot_dtls.json";
pub const SCREENSHOT_FILE: &str = "context_screen.png";

/// One `annot_dtls.json` record. Unknown keys are ignored.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnnotationRecord {
    pub url: String,
    pub description: String,
    pub action_state_change_severity: String,
    #[serde(default)]
    pub target_element_data: Option<ElementData>,
    #[serde(default)]
    pub mouse_pos_element_data: Option<ElementData>,
    #[serde(default)]
    pub actually_highlighted_element_data: Option<ElementData>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementData {
    #[serde(default)]
    pub tag_head: Option<String>,
    /// Kept raw; only read when the record has a screenshot to draw on.
    #[serde(default)]
    pub bounding_box: Option<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub top_left_x: f64,
    pub top_left_y: f64,
    pub bottom_right_x: f64,
    pub bottom_right_y: f64,
}

impl BoundingBox {
    /// Reads `{tLx, tLy, bRx, bRy}`; each edge may be a number or a numeric
    /// string. Returns `None` when any edge is absent or not a finite number.
    pub fn from_value(value: &Value) -> Option<Self> {
        Some(Self {
            top_left_x: value_to_f64(value.get("tLx"))?,
            top_left_y: value_to_f64(value.get("tLy"))?,
            bottom_right_x: value_to_f64(value.get("bRx"))?,
            bottom_right_y: value_to_f64(value.get("bRy"))?,
        })
    }

    /// Corners truncated toward zero, as `((x0, y0), (x1, y1))`.
    pub fn pixel_corners(&self) -> ((i64, i64), (i64, i64)) {
        (
            (self.top_left_x as i64, self.top_left_y as i64),
            (self.bottom_right_x as i64, self.bottom_right_y as i64),
        )
    }
}

/// The alternative element payloads a record may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementSource {
    MousePosition,
    Target,
    ActuallyHighlighted,
}

impl ElementSource {
    pub fn key(self) -> &'static str {
        match self {
            ElementSource::MousePosition => "mousePosElementData",
            ElementSource::Target => "targetElementData",
            ElementSource::ActuallyHighlighted => "actuallyHighlightedElementData",
        }
    }
}

/// Lookup order for the overlay rectangle.
pub const BOUNDING_BOX_ORDER: [ElementSource; 3] = [
    ElementSource::MousePosition,
    ElementSource::Target,
    ElementSource::ActuallyHighlighted,
];

/// Lookup order for the element tag shown in the sheet.
pub const TAG_HEAD_ORDER: [ElementSource; 2] = [ElementSource::Target, ElementSource::MousePosition];

impl AnnotationRecord {
    pub fn element(&self, source: ElementSource) -> Option<&ElementData> {
        match source {
            ElementSource::MousePosition => self.mouse_pos_element_data.as_ref(),
            ElementSource::Target => self.target_element_data.as_ref(),
            ElementSource::ActuallyHighlighted => self.actually_highlighted_element_data.as_ref(),
        }
    }

    /// The first alternative that carries a `boundingBox`, decoded. A box
    /// that is present but malformed yields `None`; later alternatives are
    /// not consulted.
    pub fn bounding_box(&self) -> Option<(ElementSource, BoundingBox)> {
        let (source, raw) = BOUNDING_BOX_ORDER.iter().find_map(|&source| {
            self.element(source)
                .and_then(|data| data.bounding_box.as_ref())
                .filter(|raw| !raw.is_null())
                .map(|raw| (source, raw))
        })?;
        BoundingBox::from_value(raw).map(|bbox| (source, bbox))
    }

    pub fn tag_head(&self) -> Option<(ElementSource, &str)> {
        TAG_HEAD_ORDER.iter().find_map(|&source| {
            self.element(source)
                .and_then(|data| data.tag_head.as_deref())
                .map(|tag| (source, tag))
        })
    }
}

fn value_to_f64(value: Option<&Value>) -> Option<f64> {
    let number = match value? {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    number.is_finite().then_some(number)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameFilter {
    /// Drop archives and OS metadata entries.
    Default,
    /// Keep only the well-known screenshot file.
    ScreenshotOnly,
}

pub fn name_check(name: &str, filter: NameFilter) -> bool {
    match filter {
        NameFilter::ScreenshotOnly => name == SCREENSHOT_FILE,
        NameFilter::Default => !name.contains(".zip") && !name.contains("DS_Store"),
    }
}

/// A leaf annotation folder: `<root>/<folder>/act_annots/<annotation>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnotationEntry {
    pub folder: PathBuf,
    pub annotation_dir: PathBuf,
}

impl AnnotationEntry {
    pub fn details_path(&self) -> PathBuf {
        self.annotation_dir.join(DETAILS_FILE)
    }

    pub fn load(&self) -> Result<AnnotationRecord, RecordError> {
        let path = self.details_path();
        let raw = fs::read_to_string(&path).map_err(|err| RecordError::Parse {
            path: path.clone(),
            reason: err.to_string(),
        })?;
        serde_json::from_str(&raw).map_err(|err| RecordError::Parse {
            path,
            reason: err.to_string(),
        })
    }

    /// The screenshot next to the details file, if present.
    pub fn screenshot_path(&self) -> Option<PathBuf> {
        sorted_listing(&self.annotation_dir)
            .filter_map(|entry| entry.ok())
            .find(|entry| {
                entry.file_type().is_file()
                    && name_check(&entry.file_name().to_string_lossy(), NameFilter::ScreenshotOnly)
            })
            .map(DirEntry::into_path)
    }
}

fn sorted_listing(dir: &Path) -> walkdir::IntoIter {
    WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
}

/// Lazily walks `<root>/*/act_annots/*` in file-name order.
pub struct AnnotationWalker {
    folders: walkdir::IntoIter,
    annotations: Option<(PathBuf, walkdir::IntoIter)>,
}

impl AnnotationWalker {
    pub fn new(root: &Path) -> Self {
        Self {
            folders: sorted_listing(root),
            annotations: None,
        }
    }

    fn keep(entry: &DirEntry) -> bool {
        let name = entry.file_name().to_string_lossy();
        if !name_check(&name, NameFilter::Default) {
            return false;
        }
        if !entry.file_type().is_dir() {
            tracing::debug!(path = %entry.path().display(), "skipping non-directory entry");
            return false;
        }
        true
    }
}

impl Iterator for AnnotationWalker {
    type Item = Result<AnnotationEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let pending = self.annotations.as_mut().and_then(|(folder, listing)| {
                listing.next().map(|item| (folder.clone(), item))
            });

            match pending {
                Some((folder, Ok(entry))) => {
                    if Self::keep(&entry) {
                        return Some(Ok(AnnotationEntry {
                            folder,
                            annotation_dir: entry.into_path(),
                        }));
                    }
                }
                Some((folder, Err(err))) => {
                    return Some(Err(RecordError::Listing {
                        path: folder.join(ANNOTATIONS_DIR),
                        reason: err.to_string(),
                    }
                    .into()));
                }
                None => {
                    self.annotations = None;
                    let entry = match self.folders.next()? {
                        Ok(entry) => entry,
                        Err(err) => return Some(Err(err).context("failed to list input folders")),
                    };
                    if !Self::keep(&entry) {
                        continue;
                    }
                    let listing = sorted_listing(&entry.path().join(ANNOTATIONS_DIR));
                    tracing::info!(folder = %entry.path().display(), "reading annotation folder");
                    self.annotations = Some((entry.into_path(), listing));
                }
            }
        }
    }
}
