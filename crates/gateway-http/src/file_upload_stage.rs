//! File-Upload Stager wiring (§4.7): validates each entry of the declared
//! files-data-field array, stages new content into a temp file, and
//! rewrites the array with the output shape the spec names.
//!
//! Decoding/copying a file's bytes differs by source (base64 chunks for a
//! JSON body, a multipart stream for a form body), so the caller in
//! `lib.rs` — which already holds the axum request in whichever shape it
//! arrived — resolves each entry to an [`IncomingFilePayload`] before
//! calling in here; this module owns everything source-agnostic: name
//! validation, extension/size/count policy, the rewritten output record,
//! and temp-file tracker registration.

use std::path::{Path, PathBuf};

use gateway_core::error::Result;
use gateway_core::file_stage::{
    guarded_join, render_relative_path_template, stage_base64_payload, validate_file_constraints,
    validate_file_count, validate_filename, FileValidationPolicy, TempFileRecord, TempFileTracker,
};
use serde::Serialize;
use uuid::Uuid;

/// Where a file entry's bytes come from.
pub enum IncomingFilePayload {
    /// A base64 string, present in a JSON-body files array.
    Base64(String),
    /// A multipart form file already streamed by the caller to a temp path.
    AlreadyStaged { temp_path: PathBuf, size: u64 },
    /// An existing entry carried forward with no new content (partial
    /// update semantics — §4.7, last bullet).
    NoNewContent { relative_path: String, extension: String, mime_type: String, size: u64 },
}

pub struct IncomingFileEntry {
    pub caller_supplied_id: Option<String>,
    pub file_name: String,
    pub mime_type_hint: Option<String>,
    pub payload: IncomingFilePayload,
}

/// Policy inputs resolved route → global.
pub struct FileUploadPolicy {
    pub validation: FileValidationPolicy,
    pub relative_path_template: String,
    pub allow_caller_supplied_id: bool,
    pub enable_query_consumption: bool,
}

/// The rewritten per-item output record (§4.7's output list).
#[derive(Debug, Clone, Serialize)]
pub struct StagedFileOutput {
    pub id: String,
    pub relative_path: String,
    pub extension: String,
    pub mime_type: String,
    pub size: u64,
    pub is_new_upload: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend_temp_file_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base64_content: Option<String>,
}

/// Validate and stage the whole batch, enforcing the aggregate count
/// policy before any individual file is processed.
pub async fn stage_files(
    policy: &FileUploadPolicy,
    temp_dir: &Path,
    store_base_path: &Path,
    tracker: &TempFileTracker,
    entries: Vec<IncomingFileEntry>,
) -> Result<Vec<StagedFileOutput>> {
    validate_file_count(entries.len(), &policy.validation)?;

    let mut outputs = Vec::with_capacity(entries.len());
    for entry in entries {
        outputs.push(stage_one_file(policy, temp_dir, store_base_path, tracker, entry).await?);
    }
    Ok(outputs)
}

async fn stage_one_file(
    policy: &FileUploadPolicy,
    temp_dir: &Path,
    store_base_path: &Path,
    tracker: &TempFileTracker,
    entry: IncomingFileEntry,
) -> Result<StagedFileOutput> {
    let validated_name = validate_filename(&entry.file_name)?;

    let id = match entry.caller_supplied_id {
        Some(supplied) if policy.allow_caller_supplied_id => supplied,
        _ => Uuid::new_v4().to_string(),
    };
    let guid = Uuid::parse_str(&id).unwrap_or_else(|_| Uuid::new_v4());

    match entry.payload {
        IncomingFilePayload::NoNewContent { relative_path, extension, mime_type, size } => {
            Ok(StagedFileOutput {
                id,
                relative_path,
                extension,
                mime_type,
                size,
                is_new_upload: false,
                backend_temp_file_path: None,
                base64_content: None,
            })
        }
        IncomingFilePayload::Base64(base64_content) => {
            let (temp_path, size) = stage_base64_payload(temp_dir, &base64_content).await?;
            let extension = validate_file_constraints(&validated_name, size, &policy.validation)?;
            let relative_path =
                render_relative_path_template(&policy.relative_path_template, &validated_name, &guid);
            guarded_join(store_base_path, &relative_path)?;

            tracker
                .register(TempFileRecord {
                    absolute_temp_path: temp_path.clone(),
                    logical_name: validated_name,
                    relative_destination_path: relative_path.clone(),
                })
                .await;

            let mime_type = entry
                .mime_type_hint
                .unwrap_or_else(|| mime_guess::from_ext(&extension).first_or_octet_stream().to_string());

            Ok(StagedFileOutput {
                id,
                relative_path,
                extension,
                mime_type,
                size,
                is_new_upload: true,
                backend_temp_file_path: (!policy.enable_query_consumption)
                    .then(|| temp_path.display().to_string()),
                base64_content: policy.enable_query_consumption.then_some(base64_content),
            })
        }
        IncomingFilePayload::AlreadyStaged { temp_path, size } => {
            let extension = validate_file_constraints(&validated_name, size, &policy.validation)?;
            let relative_path =
                render_relative_path_template(&policy.relative_path_template, &validated_name, &guid);
            guarded_join(store_base_path, &relative_path)?;

            tracker
                .register(TempFileRecord {
                    absolute_temp_path: temp_path.clone(),
                    logical_name: validated_name,
                    relative_destination_path: relative_path.clone(),
                })
                .await;

            let mime_type = entry
                .mime_type_hint
                .unwrap_or_else(|| mime_guess::from_ext(&extension).first_or_octet_stream().to_string());

            if policy.enable_query_consumption {
                let bytes = tokio::fs::read(&temp_path).await?;
                let base64_content =
                    base64::Engine::encode(&base64::engine::general_purpose::STANDARD, bytes);
                Ok(StagedFileOutput {
                    id,
                    relative_path,
                    extension,
                    mime_type,
                    size,
                    is_new_upload: true,
                    backend_temp_file_path: None,
                    base64_content: Some(base64_content),
                })
            } else {
                Ok(StagedFileOutput {
                    id,
                    relative_path,
                    extension,
                    mime_type,
                    size,
                    is_new_upload: true,
                    backend_temp_file_path: Some(temp_path.display().to_string()),
                    base64_content: None,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn policy() -> FileUploadPolicy {
        let mut extensions = HashSet::new();
        extensions.insert("pdf".to_string());
        FileUploadPolicy {
            validation: FileValidationPolicy {
                permitted_extensions: Some(extensions),
                max_file_size_in_bytes: Some(1_000_000),
                max_number_of_files: Some(5),
            },
            relative_path_template: "uploads/{{guid}}/{file{name}}".to_string(),
            allow_caller_supplied_id: false,
            enable_query_consumption: false,
        }
    }

    #[tokio::test]
    async fn stages_a_base64_entry_and_registers_it_with_the_tracker() {
        let tmp = tempfile::tempdir().unwrap();
        let tracker = TempFileTracker::new();
        let content = base64::Engine::encode(&base64::engine::general_purpose::STANDARD, b"hello world");

        let entries = vec![IncomingFileEntry {
            caller_supplied_id: None,
            file_name: "report.pdf".to_string(),
            mime_type_hint: None,
            payload: IncomingFilePayload::Base64(content),
        }];

        let outputs = stage_files(&policy(), tmp.path(), tmp.path(), &tracker, entries).await.unwrap();
        assert_eq!(outputs.len(), 1);
        assert!(outputs[0].is_new_upload);
        assert_eq!(outputs[0].size, 11);
        assert_eq!(tracker.records().await.len(), 1);
    }

    #[tokio::test]
    async fn rejects_disallowed_extension() {
        let tmp = tempfile::tempdir().unwrap();
        let tracker = TempFileTracker::new();
        let content = base64::Engine::encode(&base64::engine::general_purpose::STANDARD, b"exe bytes");

        let entries = vec![IncomingFileEntry {
            caller_supplied_id: None,
            file_name: "virus.exe".to_string(),
            mime_type_hint: None,
            payload: IncomingFilePayload::Base64(content),
        }];

        assert!(stage_files(&policy(), tmp.path(), tmp.path(), &tracker, entries).await.is_err());
    }

    #[tokio::test]
    async fn preserves_existing_entries_without_new_content() {
        let tmp = tempfile::tempdir().unwrap();
        let tracker = TempFileTracker::new();

        let entries = vec![IncomingFileEntry {
            caller_supplied_id: Some("existing-id".to_string()),
            file_name: "old.pdf".to_string(),
            mime_type_hint: None,
            payload: IncomingFilePayload::NoNewContent {
                relative_path: "uploads/old/old.pdf".to_string(),
                extension: "pdf".to_string(),
                mime_type: "application/pdf".to_string(),
                size: 99,
            },
        }];

        let outputs = stage_files(&policy(), tmp.path(), tmp.path(), &tracker, entries).await.unwrap();
        assert!(!outputs[0].is_new_upload);
        assert_eq!(outputs[0].size, 99);
        assert!(tracker.records().await.is_empty());
    }

    #[tokio::test]
    async fn exceeding_max_file_count_is_rejected_before_staging_any_file() {
        let tmp = tempfile::tempdir().unwrap();
        let tracker = TempFileTracker::new();
        let mut tight_policy = policy();
        tight_policy.validation.max_number_of_files = Some(1);

        let make_entry = |name: &str| IncomingFileEntry {
            caller_supplied_id: None,
            file_name: name.to_string(),
            mime_type_hint: None,
            payload: IncomingFilePayload::Base64(base64::Engine::encode(
                &base64::engine::general_purpose::STANDARD,
                b"x",
            )),
        };

        let entries = vec![make_entry("a.pdf"), make_entry("b.pdf")];
        assert!(stage_files(&tight_policy, tmp.path(), tmp.path(), &tracker, entries).await.is_err());
        assert!(tracker.records().await.is_empty());
    }
}
