use crate::error::{LinkFormatError, RemoteError};
use crate::google::{endpoint, string_field, GoogleClient};
use anyhow::{bail, Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Method;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::fs;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};

pub const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";
const DRIVE_API: &str = "https://www.googleapis.com/drive/v3/files";
const DRIVE_UPLOAD_API: &str = "https://www.googleapis.com/upload/drive/v3/files";
const UPLOAD_BOUNDARY: &str = "annot_publish_upload_boundary";

static SHARE_LINK_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"/d/([a-zA-Z0-9_-]+)/").expect("share link pattern is valid"));

/// The remote file store operations the pipeline needs.
pub trait DriveApi {
    /// Id of a folder named `name` directly under `parent_id`, if any.
    fn find_folder(&self, name: &str, parent_id: &str) -> Result<Option<String>, RemoteError>;
    fn create_folder(&self, name: &str, parent_id: &str) -> Result<String, RemoteError>;
    fn upload_file(&self, name: &str, parent_id: &str, bytes: Vec<u8>)
        -> Result<String, RemoteError>;
    /// Grants "anyone with the link" read access.
    fn share_publicly(&self, file_id: &str) -> Result<(), RemoteError>;
    fn web_view_link(&self, file_id: &str) -> Result<Option<String>, RemoteError>;
}

/// Mirrors local directories as remote folders, one lookup per
/// `(parent id, folder name)` pair for the lifetime of the resolver.
pub struct FolderResolver {
    root_id: String,
    base_dir: PathBuf,
    cache: HashMap<(String, String), String>,
}

impl FolderResolver {
    pub fn new(root_id: impl Into<String>, base_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_id: root_id.into(),
            base_dir: base_dir.into(),
            cache: HashMap::new(),
        }
    }

    /// Fails unless `root` lies under the base directory, so a misplaced
    /// input is reported before anything is rendered or uploaded.
    pub fn ensure_contains(&self, root: &Path) -> Result<()> {
        relative_to_base(root, &self.base_dir).map(|_| ())
    }

    pub fn cached_folders(&self) -> usize {
        self.cache.len()
    }

    /// Returns the id of the remote folder that should hold `file_path`,
    /// creating any missing folders on the way down.
    pub fn resolve<D: DriveApi + ?Sized>(&mut self, drive: &D, file_path: &Path) -> Result<String> {
        let mut parent_id = self.root_id.clone();
        for name in relative_dirs(file_path, &self.base_dir)? {
            let key = (parent_id, name);
            if let Some(id) = self.cache.get(&key) {
                debug!(folder = %key.1, id = %id, "folder cache hit");
                parent_id = id.clone();
                continue;
            }

            let (parent, name) = &key;
            let id = match drive
                .find_folder(name, parent)
                .with_context(|| format!("failed to look up remote folder {name}"))?
            {
                Some(id) => id,
                None => {
                    debug!(folder = %name, parent = %parent, "creating remote folder");
                    drive
                        .create_folder(name, parent)
                        .with_context(|| format!("failed to create remote folder {name}"))?
                }
            };
            self.cache.insert(key, id.clone());
            parent_id = id;
        }
        Ok(parent_id)
    }
}

/// Directory names of `file_path` below `base_dir`, outermost first.
/// `path` relative to `base_dir`, after resolving both on disk.
fn relative_to_base(path: &Path, base_dir: &Path) -> Result<PathBuf> {
    let path = fs::canonicalize(path).with_context(|| format!("failed to resolve {}", path.display()))?;
    let base_dir = fs::canonicalize(base_dir)
        .with_context(|| format!("failed to resolve base directory {}", base_dir.display()))?;
    match path.strip_prefix(&base_dir) {
        Ok(relative) => Ok(relative.to_path_buf()),
        Err(_) => bail!(
            "{} is outside base directory {}; pass --base-dir",
            path.display(),
            base_dir.display()
        ),
    }
}

fn relative_dirs(file_path: &Path, base_dir: &Path) -> Result<Vec<String>> {
    let relative = relative_to_base(file_path, base_dir)?;
    let parent = relative.parent().unwrap_or_else(|| Path::new(""));
    Ok(parent
        .components()
        .filter_map(|component| match component {
            Component::Normal(name) => Some(name.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect())
}

/// Uploads `path` into `folder_id`, shares it, and returns its web link.
///
/// Failures are logged and come back as `None`.
pub fn publish_file<D: DriveApi + ?Sized>(drive: &D, folder_id: &str, path: &Path) -> Option<String> {
    let name = path
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();

    let uploaded = fs::read(path)
        .map_err(|source| RemoteError::LocalFile {
            path: path.to_path_buf(),
            source,
        })
        .and_then(|bytes| drive.upload_file(&name, folder_id, bytes));
    let file_id = match uploaded {
        Ok(id) => id,
        Err(err) => {
            warn!(path = %path.display(), error = %err, "failed to upload file");
            return None;
        }
    };

    let link = drive
        .share_publicly(&file_id)
        .and_then(|()| drive.web_view_link(&file_id));
    match link {
        Ok(Some(link)) => Some(link),
        Ok(None) => {
            warn!(file_id = %file_id, "file has no webViewLink");
            None
        }
        Err(err) => {
            warn!(file_id = %file_id, error = %err, "failed to set file public");
            None
        }
    }
}

/// `https://drive.google.com/file/d/<id>/view` -> `https://drive.google.com/uc?id=<id>`
pub fn direct_image_url(share_link: &str) -> Result<String, LinkFormatError> {
    SHARE_LINK_ID
        .captures(share_link)
        .and_then(|caps| caps.get(1))
        .map(|id| format!("https://drive.google.com/uc?id={}", id.as_str()))
        .ok_or_else(|| LinkFormatError(share_link.to_string()))
}

/// Drive v3 REST client.
pub struct GoogleDrive {
    client: GoogleClient,
}

impl GoogleDrive {
    pub fn new(client: GoogleClient) -> Self {
        Self { client }
    }
}

impl DriveApi for GoogleDrive {
    fn find_folder(&self, name: &str, parent_id: &str) -> Result<Option<String>, RemoteError> {
        let url = endpoint(DRIVE_API, &[])?;
        let query = format!(
            "name = '{}' and '{}' in parents and mimeType = '{FOLDER_MIME_TYPE}'",
            escape_query_literal(name),
            escape_query_literal(parent_id)
        );
        let request = self.client.request(Method::GET, url).query(&[
            ("q", query.as_str()),
            ("spaces", "drive"),
            ("fields", "files(id, name)"),
            ("pageSize", "1"),
        ]);
        let body = self.client.execute(request)?;
        Ok(body
            .get("files")
            .and_then(Value::as_array)
            .and_then(|files| files.first())
            .and_then(|file| file.get("id"))
            .and_then(Value::as_str)
            .map(ToString::to_string))
    }

    fn create_folder(&self, name: &str, parent_id: &str) -> Result<String, RemoteError> {
        let url = endpoint(DRIVE_API, &[])?;
        let request = self
            .client
            .request(Method::POST, url.clone())
            .query(&[("fields", "id")])
            .json(&json!({
                "name": name,
                "parents": [parent_id],
                "mimeType": FOLDER_MIME_TYPE,
            }));
        let body = self.client.execute(request)?;
        string_field(&body, "id", url.as_str())
    }

    fn upload_file(
        &self,
        name: &str,
        parent_id: &str,
        bytes: Vec<u8>,
    ) -> Result<String, RemoteError> {
        let url = endpoint(DRIVE_UPLOAD_API, &[])?;
        let metadata = json!({"name": name, "parents": [parent_id]});
        let request = self
            .client
            .request(Method::POST, url.clone())
            .query(&[("uploadType", "multipart"), ("fields", "id")])
            .header(
                reqwest::header::CONTENT_TYPE,
                format!("multipart/related; boundary={UPLOAD_BOUNDARY}"),
            )
            .body(multipart_related_body(&metadata, media_type_for(name), &bytes));
        let body = self.client.execute(request)?;
        string_field(&body, "id", url.as_str())
    }

    fn share_publicly(&self, file_id: &str) -> Result<(), RemoteError> {
        let url = endpoint(DRIVE_API, &[file_id, "permissions"])?;
        let request = self
            .client
            .request(Method::POST, url)
            .json(&json!({"type": "anyone", "role": "reader"}));
        self.client.execute(request).map(|_| ())
    }

    fn web_view_link(&self, file_id: &str) -> Result<Option<String>, RemoteError> {
        let url = endpoint(DRIVE_API, &[file_id])?;
        let request = self
            .client
            .request(Method::GET, url)
            .query(&[("fields", "webViewLink")]);
        let body = self.client.execute(request)?;
        Ok(body
            .get("webViewLink")
            .and_then(Value::as_str)
            .filter(|link| !link.is_empty())
            .map(ToString::to_string))
    }
}

fn escape_query_literal(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

fn media_type_for(name: &str) -> &'static str {
    let ext = Path::new(name)
        .extension()
        .and_then(|s| s.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        _ => "application/octet-stream",
    }
}

fn multipart_related_body(metadata: &Value, media_type: &str, bytes: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(bytes.len() + 512);
    body.extend_from_slice(
        format!(
            "--{UPLOAD_BOUNDARY}\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n{metadata}\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(
        format!("--{UPLOAD_BOUNDARY}\r\nContent-Type: {media_type}\r\n\r\n").as_bytes(),
    );
    body.extend_from_slice(bytes);
    body.extend_from_slice(format!("\r\n--{UPLOAD_BOUNDARY}--\r\n").as_bytes());
    body
}
