//! Document intake.
//!
//! Resolves document references to text. Parsing binary formats is out of
//! scope; only plain-text extensions are accepted and anything else is
//! rejected when the job is submitted.

use crate::config::DocumentsConfig;
use crate::error::{DocumentError, ValidationError};
use crate::models::DocumentRef;
use async_trait::async_trait;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

/// A loaded document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub reference: DocumentRef,
    /// File name without directories.
    pub name: String,
    pub content: String,
}

/// Metadata of a resolved document, used for dry runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentInfo {
    pub reference: DocumentRef,
    pub size: u64,
    pub extension: String,
}

/// Resolves document references to content.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Check that a reference can be served, without reading it.
    fn validate(&self, doc: &DocumentRef) -> Result<DocumentInfo, ValidationError>;

    /// Read a document's text.
    async fn load(&self, doc: &DocumentRef) -> Result<Document, DocumentError>;

    /// Accepted file extensions, without dots.
    fn supported_formats(&self) -> Vec<String>;

    /// Maximum documents per submission.
    fn max_documents(&self) -> usize;
}

/// Document store over the local filesystem.
#[derive(Debug, Clone)]
pub struct FsDocumentStore {
    config: DocumentsConfig,
}

impl FsDocumentStore {
    pub fn new(config: DocumentsConfig) -> Self {
        Self { config }
    }

    /// Expand files and directories into document references.
    ///
    /// Directories are walked recursively; hidden entries and files with an
    /// unsupported extension are skipped. Explicit files are kept as given so
    /// validation can report them.
    pub fn expand(&self, inputs: &[PathBuf]) -> Vec<DocumentRef> {
        let mut refs = Vec::new();

        for input in inputs {
            if !input.is_dir() {
                refs.push(DocumentRef::new(input.display().to_string()));
                continue;
            }

            let mut found: Vec<DocumentRef> = WalkDir::new(input)
                .follow_links(false)
                .into_iter()
                .filter_entry(|entry| entry.depth() == 0 || !is_hidden(entry.file_name()))
                .filter_map(|entry| match entry {
                    Ok(entry) => Some(entry),
                    Err(e) => {
                        debug!("Cannot read directory entry: {}", e);
                        None
                    }
                })
                .filter(|entry| {
                    entry.file_type().is_file() && self.has_supported_extension(entry.path())
                })
                .map(|entry| DocumentRef::new(entry.path().display().to_string()))
                .collect();
            found.sort();
            refs.extend(found);
        }

        refs
    }

    fn has_supported_extension(&self, path: &Path) -> bool {
        extension_of(path)
            .map(|ext| self.config.extensions.iter().any(|e| e.eq_ignore_ascii_case(&ext)))
            .unwrap_or(false)
    }
}

#[async_trait]
impl DocumentStore for FsDocumentStore {
    fn validate(&self, doc: &DocumentRef) -> Result<DocumentInfo, ValidationError> {
        let path = Path::new(doc.as_str());

        let metadata = fs::metadata(path)
            .map_err(|_| ValidationError::DocumentNotFound(doc.to_string()))?;
        if !metadata.is_file() {
            return Err(ValidationError::DocumentNotFound(doc.to_string()));
        }

        if !self.has_supported_extension(path) {
            return Err(ValidationError::UnsupportedFormat(doc.to_string()));
        }

        if metadata.len() > self.config.max_file_size {
            return Err(ValidationError::DocumentTooLarge {
                path: doc.to_string(),
                size: metadata.len(),
                limit: self.config.max_file_size,
            });
        }

        Ok(DocumentInfo {
            reference: doc.clone(),
            size: metadata.len(),
            extension: extension_of(path).unwrap_or_default(),
        })
    }

    async fn load(&self, doc: &DocumentRef) -> Result<Document, DocumentError> {
        let bytes = tokio::fs::read(doc.as_str())
            .await
            .map_err(|source| DocumentError::Read {
                path: doc.to_string(),
                source,
            })?;
        let content =
            String::from_utf8(bytes).map_err(|_| DocumentError::NotText(doc.to_string()))?;

        let name = Path::new(doc.as_str())
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| doc.to_string());

        Ok(Document {
            reference: doc.clone(),
            name,
            content,
        })
    }

    fn supported_formats(&self) -> Vec<String> {
        self.config.extensions.clone()
    }

    fn max_documents(&self) -> usize {
        self.config.max_documents
    }
}

fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

fn is_hidden(name: &std::ffi::OsStr) -> bool {
    name.to_str().is_some_and(|n| n.starts_with('.'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> FsDocumentStore {
        FsDocumentStore::new(DocumentsConfig::default())
    }

    fn write(dir: &TempDir, name: &str, content: &[u8]) -> PathBuf {
        let path = dir.path().join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_expand_walks_directories() {
        let dir = TempDir::new().unwrap();
        write(&dir, "deck.md", b"# Pitch");
        write(&dir, "financials/q1.csv", b"month,revenue");
        write(&dir, "logo.png", b"\x89PNG");
        write(&dir, ".hidden/notes.txt", b"secret");

        let refs = store().expand(&[dir.path().to_path_buf()]);
        let names: Vec<&str> = refs.iter().map(|r| r.as_str()).collect();

        assert_eq!(refs.len(), 2);
        assert!(names.iter().any(|n| n.ends_with("deck.md")));
        assert!(names.iter().any(|n| n.ends_with("q1.csv")));
    }

    #[test]
    fn test_expand_keeps_explicit_files() {
        let refs = store().expand(&[PathBuf::from("missing/deck.pdf")]);
        assert_eq!(refs, vec![DocumentRef::new("missing/deck.pdf")]);
    }

    #[test]
    fn test_validate_rejects_missing_and_unsupported() {
        let dir = TempDir::new().unwrap();
        let pdf = write(&dir, "deck.pdf", b"%PDF");
        let store = store();

        let missing = DocumentRef::new(dir.path().join("nope.md").display().to_string());
        assert!(matches!(
            store.validate(&missing),
            Err(ValidationError::DocumentNotFound(_))
        ));

        let pdf = DocumentRef::new(pdf.display().to_string());
        assert!(matches!(
            store.validate(&pdf),
            Err(ValidationError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_validate_rejects_large_files() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "big.txt", &[b'a'; 64]);
        let store = FsDocumentStore::new(DocumentsConfig {
            max_file_size: 16,
            ..DocumentsConfig::default()
        });

        let result = store.validate(&DocumentRef::new(path.display().to_string()));
        assert!(matches!(
            result,
            Err(ValidationError::DocumentTooLarge { size: 64, limit: 16, .. })
        ));
    }

    #[tokio::test]
    async fn test_load_reads_text() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "Deck.MD", b"TechFlow AI raises Series A");
        let doc = DocumentRef::new(path.display().to_string());
        let store = store();

        let info = store.validate(&doc).unwrap();
        assert_eq!(info.extension, "md");
        assert_eq!(info.size, 27);

        let loaded = store.load(&doc).await.unwrap();
        assert_eq!(loaded.name, "Deck.MD");
        assert!(loaded.content.contains("Series A"));
    }

    #[tokio::test]
    async fn test_load_rejects_binary_content() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "data.txt", &[0xff, 0xfe, 0x00]);
        let result = store()
            .load(&DocumentRef::new(path.display().to_string()))
            .await;
        assert!(matches!(result, Err(DocumentError::NotText(_))));
    }

    #[test]
    fn test_load_missing_file_is_read_error() {
        let doc = DocumentRef::new("/definitely/not/here.md");
        let result = tokio_test::block_on(store().load(&doc));
        assert!(matches!(result, Err(DocumentError::Read { .. })));
    }

    #[tokio::test]
    async fn test_sample_pitch_fixture() {
        let fixtures = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures");
        let store = store();

        let refs = store.expand(&[fixtures]);
        assert_eq!(refs.len(), 1);

        store.validate(&refs[0]).unwrap();
        let doc = store.load(&refs[0]).await.unwrap();
        assert_eq!(doc.name, "techflow_pitch.md");
        assert!(doc.content.contains("TechFlow AI"));
    }

    #[test]
    fn test_supported_formats() {
        let formats = store().supported_formats();
        assert!(formats.contains(&"md".to_string()));
        assert!(!formats.contains(&"pdf".to_string()));
    }
}
