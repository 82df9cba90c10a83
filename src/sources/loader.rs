//! Local file system document loader.

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::LoadError;
use crate::models::{Document, IngestionConfig, META_FILE_TYPE, META_PAGE_NUMBER};
use crate::utils::file::{file_extension, file_name, normalize_extensions, read_file_content};

/// Documents produced by a load, plus the files that did not contribute.
#[derive(Debug, Default)]
pub struct LoadOutcome {
    pub documents: Vec<Document>,
    /// Files whose extension is not in the allowed set
    pub skipped: Vec<PathBuf>,
    /// Files that matched but could not be read, with the reason
    pub failed: Vec<(PathBuf, String)>,
}

impl LoadOutcome {
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

/// Turns a file or a directory of files into documents.
///
/// Every document carries `source` (the path as given, joined with the file
/// name for directory loads) and `filename`. PDFs produce one document per
/// page with a `page_number`.
#[derive(Debug, Clone)]
pub struct DocumentLoader {
    allowed_extensions: Vec<String>,
    max_file_size: u64,
}

impl DocumentLoader {
    pub fn new<S: AsRef<str>>(allowed_extensions: &[S], max_file_size: u64) -> Self {
        Self {
            allowed_extensions: normalize_extensions(allowed_extensions),
            max_file_size,
        }
    }

    pub fn from_config(config: &IngestionConfig) -> Self {
        Self::new(&config.file_types, config.max_file_size)
    }

    pub fn is_allowed(&self, path: &Path) -> bool {
        file_extension(path).is_some_and(|ext| self.allowed_extensions.contains(&ext))
    }

    /// Load a single file or the direct children of a directory.
    ///
    /// A single file must have an allowed extension. In a directory,
    /// disallowed files are skipped and unreadable files are recorded in
    /// [`LoadOutcome::failed`] without aborting the batch.
    pub fn load(&self, path: &Path) -> Result<LoadOutcome, LoadError> {
        if path.is_file() {
            if !self.is_allowed(path) {
                return Err(LoadError::UnsupportedType {
                    path: path.to_path_buf(),
                    extension: file_extension(path).unwrap_or_default(),
                });
            }
            let documents = self.load_file(path)?;
            info!(file = %path.display(), documents = documents.len(), "loaded file");
            return Ok(LoadOutcome {
                documents,
                ..Default::default()
            });
        }

        if path.is_dir() {
            return self.load_directory(path);
        }

        Err(LoadError::PathNotFound(path.to_path_buf()))
    }

    fn load_directory(&self, dir: &Path) -> Result<LoadOutcome, LoadError> {
        let mut outcome = LoadOutcome::default();

        let walker = WalkDir::new(dir)
            .min_depth(1)
            .max_depth(1)
            .follow_links(true)
            .sort_by_file_name();

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| dir.into());
                    warn!(path = %path.display(), error = %e, "failed to read directory entry");
                    outcome.failed.push((path, e.to_string()));
                    continue;
                }
            };

            let path = entry.path();
            if !path.is_file() {
                continue;
            }

            if !self.is_allowed(path) {
                debug!(file = %path.display(), "skipping file with disallowed extension");
                outcome.skipped.push(path.to_path_buf());
                continue;
            }

            match self.load_file(path) {
                Ok(documents) => {
                    info!(file = %file_name(path), documents = documents.len(), "loaded file");
                    outcome.documents.extend(documents);
                }
                Err(e) => {
                    warn!(file = %file_name(path), error = %e, "error loading file");
                    outcome.failed.push((path.to_path_buf(), e.to_string()));
                }
            }
        }

        if outcome.documents.is_empty() && outcome.skipped.is_empty() && outcome.failed.is_empty()
        {
            debug!(dir = %dir.display(), "directory has no files");
        }

        Ok(outcome)
    }

    /// Convert one file. The extension decides the converter; anything that
    /// is not a PDF is read as UTF-8 text.
    pub fn load_file(&self, path: &Path) -> Result<Vec<Document>, LoadError> {
        match file_extension(path).as_deref() {
            Some(".pdf") => self.load_pdf(path),
            ext => self.load_text(path, ext),
        }
    }

    fn load_text(&self, path: &Path, ext: Option<&str>) -> Result<Vec<Document>, LoadError> {
        let content = read_file_content(path, self.max_file_size).map_err(|source| {
            LoadError::Read {
                path: path.to_path_buf(),
                source,
            }
        })?;

        let source = path.to_string_lossy();
        let mut document = Document::from_file(content, &source, &file_name(path));
        if let Some(ext) = ext {
            document = document.with_meta(META_FILE_TYPE, ext.trim_start_matches('.'));
        }
        Ok(vec![document])
    }

    fn load_pdf(&self, path: &Path) -> Result<Vec<Document>, LoadError> {
        let size = std::fs::metadata(path)
            .map_err(|source| LoadError::Read {
                path: path.to_path_buf(),
                source,
            })?
            .len();
        if size > self.max_file_size {
            return Err(LoadError::Read {
                path: path.to_path_buf(),
                source: std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!("file exceeds maximum size: {} > {}", size, self.max_file_size),
                ),
            });
        }

        // pdf-extract panics on some malformed inputs
        let pages = std::panic::catch_unwind(|| pdf_extract::extract_text_by_pages(path))
            .map_err(|_| LoadError::Pdf {
                path: path.to_path_buf(),
                message: "parser panicked on malformed document".to_string(),
            })?
            .map_err(|e| LoadError::Pdf {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;

        let source = path.to_string_lossy();
        let filename = file_name(path);

        let documents = pages
            .into_iter()
            .enumerate()
            .filter(|(_, text)| !text.trim().is_empty())
            .map(|(idx, text)| {
                Document::from_file(text, &source, &filename)
                    .with_meta(META_FILE_TYPE, "pdf")
                    .with_meta(META_PAGE_NUMBER, idx + 1)
            })
            .collect();

        Ok(documents)
    }
}
