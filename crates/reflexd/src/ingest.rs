//! Document ingestion into the cache store.
//!
//! Extracts text from local files, chunks it into overlapping
//! word-bounded segments, and stores each chunk as a `document` entry
//! in the project's collection. Chunk ids derive from the chunk's
//! defining fields, so re-ingesting an unchanged file overwrites in
//! place instead of duplicating.

use chrono::Utc;
use reflex_core::events::{EventPayload, FileUploadPayload};
use reflex_core::{EntryKind, Id};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::bus::EventBus;
use crate::storage::{CacheStore, NewEntry, StorageError};

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),
    #[error("path not found: {0}")]
    NotFound(PathBuf),
    #[error("no supported files found in {0}")]
    NoSupportedFiles(PathBuf),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

pub type Result<T> = std::result::Result<T, IngestError>;

/// Chunking and traversal options.
#[derive(Debug, Clone)]
pub struct IngestOptions {
    /// Target words per chunk.
    pub chunk_size_words: usize,
    /// Words carried over between adjacent chunks.
    pub overlap_words: usize,
    /// Recurse into subdirectories.
    pub recursive: bool,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            chunk_size_words: 400,
            overlap_words: 50,
            recursive: false,
        }
    }
}

/// Outcome of ingesting one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestStatus {
    Success,
    Empty,
    Error,
}

/// Per-file ingestion summary.
#[derive(Debug, Clone, serde::Serialize)]
pub struct FileReport {
    pub path: PathBuf,
    pub status: IngestStatus,
    pub chunks: u64,
    pub format: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A chunk of extracted text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub content: String,
    pub word_count: usize,
}

/// Detected file format: a format tag plus an optional language for
/// code files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileFormat {
    pub format: &'static str,
    pub language: Option<&'static str>,
}

/// Map a file extension to its format, if supported.
///
/// Binary formats needing dedicated extractors (pdf, epub, docx) are
/// not supported here; everything listed reads as UTF-8 text.
pub fn detect_format(path: &Path) -> Option<FileFormat> {
    let ext = path.extension()?.to_str()?.to_lowercase();
    let format = |format, language| Some(FileFormat { format, language });
    match ext.as_str() {
        "md" | "markdown" => format("markdown", None),
        "txt" | "rst" => format("text", None),
        "py" => format("code", Some("python")),
        "js" => format("code", Some("javascript")),
        "ts" => format("code", Some("typescript")),
        "go" => format("code", Some("go")),
        "rs" => format("code", Some("rust")),
        "java" => format("code", Some("java")),
        "c" | "h" => format("code", Some("c")),
        "cpp" | "hpp" => format("code", Some("cpp")),
        "rb" => format("code", Some("ruby")),
        "sh" | "bash" => format("code", Some("bash")),
        "sql" => format("code", Some("sql")),
        "yaml" | "yml" => format("code", Some("yaml")),
        "json" => format("code", Some("json")),
        "toml" => format("code", Some("toml")),
        _ => None,
    }
}

/// Whether a file's format is supported.
pub fn is_supported(path: &Path) -> bool {
    detect_format(path).is_some()
}

/// Chunk text into overlapping word-bounded segments.
///
/// Splits on blank-line paragraph boundaries and packs paragraphs up
/// to the word target. When a chunk closes, its last paragraph is
/// carried into the next chunk if it fits the overlap budget.
pub fn chunk_text(text: &str, chunk_size: usize, overlap: usize) -> Vec<Chunk> {
    let paragraphs: Vec<&str> = split_paragraphs(text);

    let mut chunks = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut current_words = 0usize;

    for para in paragraphs {
        let para_words = para.split_whitespace().count();

        // If adding this paragraph exceeds the limit, close the chunk.
        if current_words + para_words > chunk_size && !current.is_empty() {
            chunks.push(Chunk {
                content: current.join("\n\n"),
                word_count: current_words,
            });

            // Keep the last paragraph for overlap when it fits.
            let last = current[current.len() - 1];
            let last_words = last.split_whitespace().count();
            if last_words <= overlap {
                current = vec![last];
                current_words = last_words;
            } else {
                current.clear();
                current_words = 0;
            }
        }

        current.push(para);
        current_words += para_words;
    }

    if !current.is_empty() {
        chunks.push(Chunk {
            content: current.join("\n\n"),
            word_count: current_words,
        });
    }

    chunks
}

/// Split text into non-empty paragraphs on blank lines.
fn split_paragraphs(text: &str) -> Vec<&str> {
    let mut paragraphs = Vec::new();
    let mut start = None;
    let mut last_end = 0;

    for (offset, line) in line_spans(text) {
        if line.trim().is_empty() {
            if let Some(s) = start.take() {
                paragraphs.push(text[s..last_end].trim());
            }
        } else if start.is_none() {
            start = Some(offset);
        }
        last_end = offset + line.len();
    }
    if let Some(s) = start {
        paragraphs.push(text[s..last_end].trim());
    }

    paragraphs.into_iter().filter(|p| !p.is_empty()).collect()
}

/// Iterate lines with their byte offsets.
fn line_spans(text: &str) -> impl Iterator<Item = (usize, &str)> {
    let mut offset = 0;
    text.split_inclusive('\n').map(move |line| {
        let start = offset;
        offset += line.len();
        (start, line)
    })
}

/// Ingest a file or directory into a project's collection.
///
/// Returns a per-file report; individual file failures are recorded
/// rather than aborting the batch. Emits a `file_upload` event per
/// successfully ingested file.
pub async fn ingest_path(
    store: &CacheStore,
    bus: &EventBus,
    project_id: &str,
    session_id: &Id,
    path: &Path,
    opts: &IngestOptions,
) -> Result<Vec<FileReport>> {
    let files = collect_files(path, opts.recursive)?;
    info!(
        project_id,
        files = files.len(),
        path = %path.display(),
        "ingesting files"
    );

    let mut reports = Vec::with_capacity(files.len());
    for file in files {
        let report = match ingest_file(store, bus, project_id, session_id, &file, opts).await {
            Ok(report) => report,
            Err(e) => {
                warn!(path = %file.display(), error = %e, "file ingestion failed");
                FileReport {
                    path: file,
                    status: IngestStatus::Error,
                    chunks: 0,
                    format: None,
                    error: Some(e.to_string()),
                }
            }
        };
        reports.push(report);
    }

    Ok(reports)
}

/// Resolve the set of files to ingest.
fn collect_files(path: &Path, recursive: bool) -> Result<Vec<PathBuf>> {
    if path.is_file() {
        if !is_supported(path) {
            let ext = path
                .extension()
                .and_then(|e| e.to_str())
                .unwrap_or("(none)");
            return Err(IngestError::UnsupportedFormat(ext.to_string()));
        }
        return Ok(vec![path.to_path_buf()]);
    }

    if !path.is_dir() {
        return Err(IngestError::NotFound(path.to_path_buf()));
    }

    let mut files = Vec::new();
    walk_dir(path, recursive, &mut files)?;
    files.sort();
    if files.is_empty() {
        return Err(IngestError::NoSupportedFiles(path.to_path_buf()));
    }
    Ok(files)
}

fn walk_dir(dir: &Path, recursive: bool, files: &mut Vec<PathBuf>) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            if recursive {
                walk_dir(&path, recursive, files)?;
            }
        } else if is_supported(&path) {
            files.push(path);
        }
    }
    Ok(())
}

/// Ingest a single supported file.
async fn ingest_file(
    store: &CacheStore,
    bus: &EventBus,
    project_id: &str,
    session_id: &Id,
    path: &Path,
    opts: &IngestOptions,
) -> Result<FileReport> {
    let format = detect_format(path)
        .ok_or_else(|| IngestError::UnsupportedFormat(path.display().to_string()))?;

    let bytes = std::fs::read(path)?;
    let text = String::from_utf8_lossy(&bytes);

    if text.trim().is_empty() {
        warn!(path = %path.display(), "no text extracted");
        return Ok(FileReport {
            path: path.to_path_buf(),
            status: IngestStatus::Empty,
            chunks: 0,
            format: Some(format.format),
            error: None,
        });
    }

    let chunks = chunk_text(&text, opts.chunk_size_words, opts.overlap_words);
    debug!(
        path = %path.display(),
        words = text.split_whitespace().count(),
        chunks = chunks.len(),
        "chunked file"
    );

    // Short content hash for grouping chunks of the same file version.
    let file_hash = {
        let digest = Sha256::digest(&bytes);
        format!("{digest:x}")[..12].to_string()
    };
    let filename = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("unknown")
        .to_string();
    let source = path.display().to_string();
    let ingested_at = Utc::now().to_rfc3339();
    let total = chunks.len();

    for (index, chunk) in chunks.iter().enumerate() {
        let mut metadata = serde_json::json!({
            "source": "local_file",
            "format": format.format,
            "file_path": source,
            "filename": filename,
            "file_hash": file_hash,
            "chunk_index": index,
            "total_chunks": total,
            "word_count": chunk.word_count,
            "ingested_at": ingested_at,
        });
        if let Some(language) = format.language {
            metadata["language"] = serde_json::Value::from(language);
        }

        store
            .store(
                project_id,
                &NewEntry {
                    text: chunk.content.clone(),
                    kind: EntryKind::Document,
                    source: source.clone(),
                    metadata,
                    ttl_sec: None,
                },
            )
            .await?;
    }

    bus.publish(
        &EventPayload::FileUpload(FileUploadPayload {
            path: source,
            format: format.format.to_string(),
            chunks: total as u64,
        }),
        session_id.clone(),
        project_id,
    )
    .await;

    Ok(FileReport {
        path: path.to_path_buf(),
        status: IngestStatus::Success,
        chunks: total as u64,
        format: Some(format.format),
        error: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::QueryOptions;
    use tempfile::TempDir;

    #[test]
    fn detect_format_maps_extensions() {
        assert_eq!(
            detect_format(Path::new("notes.md")).unwrap().format,
            "markdown"
        );
        assert_eq!(
            detect_format(Path::new("main.rs")).unwrap().language,
            Some("rust")
        );
        assert_eq!(detect_format(Path::new("plain.txt")).unwrap().format, "text");
        assert!(detect_format(Path::new("binary.pdf")).is_none());
        assert!(detect_format(Path::new("no_extension")).is_none());
    }

    #[test]
    fn chunk_text_packs_paragraphs_to_target() {
        let para = "word ".repeat(100);
        let text = format!("{para}\n\n{para}\n\n{para}\n\n{para}");
        let chunks = chunk_text(&text, 250, 50);

        // 100-word paragraphs pack two per 250-word chunk; the third
        // paragraph overflows and starts a new chunk.
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].word_count, 200);
    }

    #[test]
    fn chunk_text_carries_overlap_paragraph() {
        let small = "tiny paragraph of five words";
        let big = "word ".repeat(390);
        let text = format!("{big}\n\n{small}\n\n{big}");
        let chunks = chunk_text(&text, 400, 50);

        assert_eq!(chunks.len(), 2);
        // The small paragraph fits the overlap budget and is repeated
        // at the start of the second chunk.
        assert!(chunks[1].content.starts_with(small));
    }

    #[test]
    fn chunk_text_handles_single_paragraph() {
        let chunks = chunk_text("just one short paragraph", 400, 50);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].word_count, 4);
    }

    #[test]
    fn chunk_text_empty_input_yields_no_chunks() {
        assert!(chunk_text("", 400, 50).is_empty());
        assert!(chunk_text("\n\n\n", 400, 50).is_empty());
    }

    #[test]
    fn oversized_paragraph_is_not_carried_as_overlap() {
        let big = "word ".repeat(300);
        let text = format!("{big}\n\n{big}");
        let chunks = chunk_text(&text, 400, 50);

        assert_eq!(chunks.len(), 2);
        // 300 words exceeds the 50-word overlap budget; no carry.
        assert_eq!(chunks[1].word_count, 300);
    }

    struct TestStore {
        store: CacheStore,
        bus: EventBus,
        _dir: TempDir,
    }

    async fn create_test_store() -> TestStore {
        let dir = TempDir::new().unwrap();
        let store = CacheStore::new(&dir.path().join("test.db")).await.unwrap();
        store.migrate_embedded().await.unwrap();
        TestStore {
            store,
            bus: EventBus::new(),
            _dir: dir,
        }
    }

    #[tokio::test]
    async fn ingest_file_stores_document_chunks() {
        let ts = create_test_store().await;
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("notes.md");
        std::fs::write(&file, "# Heading\n\nA paragraph about routing tasks.\n").unwrap();

        let reports = ingest_path(
            &ts.store,
            &ts.bus,
            "proj",
            &Id::new(),
            &file,
            &IngestOptions::default(),
        )
        .await
        .unwrap();

        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].status, IngestStatus::Success);
        assert_eq!(reports[0].chunks, 1);

        let results = ts
            .store
            .query("proj", "routing tasks", &QueryOptions::default())
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].entry.kind, EntryKind::Document);
        assert_eq!(results[0].entry.metadata["format"], "markdown");
    }

    #[tokio::test]
    async fn reingesting_same_file_does_not_duplicate() {
        let ts = create_test_store().await;
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("notes.md");
        std::fs::write(&file, "Stable content.\n").unwrap();

        for _ in 0..2 {
            ingest_path(
                &ts.store,
                &ts.bus,
                "proj",
                &Id::new(),
                &file,
                &IngestOptions::default(),
            )
            .await
            .unwrap();
        }

        assert_eq!(ts.store.count_entries("proj").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn empty_file_reports_empty() {
        let ts = create_test_store().await;
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("empty.txt");
        std::fs::write(&file, "   \n").unwrap();

        let reports = ingest_path(
            &ts.store,
            &ts.bus,
            "proj",
            &Id::new(),
            &file,
            &IngestOptions::default(),
        )
        .await
        .unwrap();

        assert_eq!(reports[0].status, IngestStatus::Empty);
        assert_eq!(ts.store.count_entries("proj").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn unsupported_single_file_is_rejected() {
        let ts = create_test_store().await;
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("image.png");
        std::fs::write(&file, [0u8, 1, 2]).unwrap();

        let result = ingest_path(
            &ts.store,
            &ts.bus,
            "proj",
            &Id::new(),
            &file,
            &IngestOptions::default(),
        )
        .await;

        assert!(matches!(result, Err(IngestError::UnsupportedFormat(_))));
    }

    #[tokio::test]
    async fn directory_ingest_skips_unsupported_files() {
        let ts = create_test_store().await;
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.md"), "First document.\n").unwrap();
        std::fs::write(dir.path().join("b.rs"), "fn main() {}\n").unwrap();
        std::fs::write(dir.path().join("c.bin"), [0u8; 4]).unwrap();

        let reports = ingest_path(
            &ts.store,
            &ts.bus,
            "proj",
            &Id::new(),
            dir.path(),
            &IngestOptions::default(),
        )
        .await
        .unwrap();

        assert_eq!(reports.len(), 2);
        assert!(reports.iter().all(|r| r.status == IngestStatus::Success));
    }

    #[tokio::test]
    async fn recursive_ingest_descends_into_subdirectories() {
        let ts = create_test_store().await;
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("top.md"), "Top level.\n").unwrap();
        std::fs::write(dir.path().join("sub/nested.md"), "Nested file.\n").unwrap();

        let flat = ingest_path(
            &ts.store,
            &ts.bus,
            "flat",
            &Id::new(),
            dir.path(),
            &IngestOptions::default(),
        )
        .await
        .unwrap();
        assert_eq!(flat.len(), 1);

        let recursive = ingest_path(
            &ts.store,
            &ts.bus,
            "deep",
            &Id::new(),
            dir.path(),
            &IngestOptions {
                recursive: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(recursive.len(), 2);
    }

    #[tokio::test]
    async fn missing_path_is_an_error() {
        let ts = create_test_store().await;
        let result = ingest_path(
            &ts.store,
            &ts.bus,
            "proj",
            &Id::new(),
            Path::new("/no/such/path"),
            &IngestOptions::default(),
        )
        .await;
        assert!(matches!(result, Err(IngestError::NotFound(_))));
    }
}
