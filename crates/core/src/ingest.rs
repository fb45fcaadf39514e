use crate::error::{IngestError, RagError};
use crate::models::{DocumentKind, IngestOutcome};
use crate::orchestrator::RagPipeline;
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use walkdir::WalkDir;

const SUPPORTED_EXTENSIONS: [&str; 4] = ["pdf", "txt", "md", "markdown"];

pub fn detect_document_kind(filename: &str, content_type: Option<&str>) -> Option<DocumentKind> {
    let essence = content_type
        .and_then(|value| value.split(';').next())
        .map(|value| value.trim().to_ascii_lowercase());

    match essence.as_deref() {
        Some("application/pdf") => return Some(DocumentKind::Pdf),
        Some("text/plain" | "text/markdown" | "text/x-markdown") => {
            return Some(DocumentKind::Text)
        }
        _ => {}
    }

    let extension = Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())?
        .to_ascii_lowercase();
    match extension.as_str() {
        "pdf" => Some(DocumentKind::Pdf),
        "txt" | "md" | "markdown" => Some(DocumentKind::Text),
        _ => None,
    }
}

pub fn sniff_document_kind(bytes: &[u8]) -> DocumentKind {
    if bytes.starts_with(b"%PDF") {
        DocumentKind::Pdf
    } else {
        DocumentKind::Text
    }
}

pub fn is_supported_path(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            SUPPORTED_EXTENSIONS
                .iter()
                .any(|supported| ext.eq_ignore_ascii_case(supported))
        })
}

pub fn discover_documents(folder: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for entry in WalkDir::new(folder)
        .into_iter()
        .filter_map(|item| item.ok())
    {
        if entry.file_type().is_file() && is_supported_path(entry.path()) {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_unstable();
    files
}

/// Zero-padded millisecond timestamp plus a random suffix, so ids sort in
/// creation order.
pub fn new_document_id() -> String {
    let millis = Utc::now().timestamp_millis().max(0);
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{millis:013}-{}", &suffix[..8])
}

pub fn digest_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

pub struct SkippedDocument {
    pub path: PathBuf,
    pub reason: String,
}

pub struct IngestionReport {
    pub ingested: Vec<IngestOutcome>,
    pub skipped_files: Vec<SkippedDocument>,
}

pub async fn ingest_folder(
    pipeline: &RagPipeline,
    folder: &Path,
) -> Result<IngestionReport, RagError> {
    let files = discover_documents(folder);

    if files.is_empty() {
        return Err(IngestError::InvalidArgument(format!(
            "no supported documents found in {}",
            folder.display()
        ))
        .into());
    }

    let mut ingested = Vec::new();
    let mut skipped_files = Vec::new();

    for path in files {
        match ingest_path(pipeline, &path).await {
            Ok(outcome) => ingested.push(outcome),
            Err(error) => {
                warn!(path = %path.display(), %error, "skipping document");
                skipped_files.push(SkippedDocument {
                    path,
                    reason: error.to_string(),
                });
            }
        }
    }

    info!(
        ingested = ingested.len(),
        skipped = skipped_files.len(),
        "folder ingestion finished"
    );
    Ok(IngestionReport {
        ingested,
        skipped_files,
    })
}

pub async fn ingest_path(pipeline: &RagPipeline, path: &Path) -> Result<IngestOutcome, RagError> {
    let bytes = tokio::fs::read(path).await.map_err(IngestError::from)?;
    let filename = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| {
            IngestError::InvalidArgument(format!("path missing filename: {}", path.display()))
        })?;
    pipeline.ingest(&bytes, filename, None).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn content_type_wins_over_suffix() {
        assert_eq!(
            detect_document_kind("notes.bin", Some("application/pdf")),
            Some(DocumentKind::Pdf)
        );
        assert_eq!(
            detect_document_kind("report.pdf", Some("text/plain; charset=utf-8")),
            Some(DocumentKind::Text)
        );
    }

    #[test]
    fn suffix_is_used_for_generic_content_types() {
        assert_eq!(
            detect_document_kind("Guide.MD", Some("application/octet-stream")),
            Some(DocumentKind::Text)
        );
        assert_eq!(detect_document_kind("scan.pdf", None), Some(DocumentKind::Pdf));
        assert_eq!(detect_document_kind("image.png", Some("image/png")), None);
        assert_eq!(detect_document_kind("no_extension", None), None);
    }

    #[test]
    fn stored_bytes_are_sniffed() {
        assert_eq!(sniff_document_kind(b"%PDF-1.7 ..."), DocumentKind::Pdf);
        assert_eq!(sniff_document_kind(b"plain words"), DocumentKind::Text);
    }

    #[test]
    fn discover_documents_is_recursive_and_filters_types() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let base = dir.path();
        let nested = base.join("nested");
        fs::create_dir(&nested)?;

        fs::write(base.join("a.pdf"), b"%PDF-1.4\n%fake")?;
        fs::write(nested.join("b.md"), b"# notes")?;
        fs::write(nested.join("c.png"), b"png")?;

        let files = discover_documents(base);
        assert_eq!(files.len(), 2);
        Ok(())
    }

    #[test]
    fn document_ids_sort_by_creation_time() {
        let first = new_document_id();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let second = new_document_id();
        assert!(first < second);
        assert_eq!(first.len(), 13 + 1 + 8);
        assert!(first.chars().all(|c| c.is_ascii_alphanumeric() || c == '-'));
    }

    #[test]
    fn digest_is_reproducible() {
        assert_eq!(digest_bytes(b"abc"), digest_bytes(b"abc"));
        assert_ne!(digest_bytes(b"abc"), digest_bytes(b"abd"));
    }
}
