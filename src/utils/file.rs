//! File helpers for document loading.

use std::fs;
use std::path::Path;

/// Lowercase, dot-prefixed extension of `path` (`"notes.TXT"` -> `".txt"`).
pub fn file_extension(path: &Path) -> Option<String> {
    path.extension()
        .map(|ext| format!(".{}", ext.to_string_lossy().to_lowercase()))
}

/// Normalize user-supplied extensions: `"PDF"`, `".pdf"` and `" .Pdf "` all become `".pdf"`.
pub fn normalize_extensions<S: AsRef<str>>(extensions: &[S]) -> Vec<String> {
    let mut normalized: Vec<String> = extensions
        .iter()
        .map(|e| e.as_ref().trim().trim_start_matches('.').to_lowercase())
        .filter(|e| !e.is_empty())
        .map(|e| format!(".{}", e))
        .collect();
    normalized.sort();
    normalized.dedup();
    normalized
}

/// Read a UTF-8 text file, refusing files larger than `max_size` bytes.
pub fn read_file_content(path: &Path, max_size: u64) -> std::io::Result<String> {
    let metadata = fs::metadata(path)?;

    if metadata.len() > max_size {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!(
                "file exceeds maximum size: {} > {}",
                metadata.len(),
                max_size
            ),
        ));
    }

    fs::read_to_string(path)
}

/// Base name of `path` as a string.
pub fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string_lossy().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_file_extension() {
        assert_eq!(
            file_extension(&PathBuf::from("a/notes.TXT")),
            Some(".txt".to_string())
        );
        assert_eq!(file_extension(&PathBuf::from("Makefile")), None);
    }

    #[test]
    fn test_normalize_extensions() {
        let normalized = normalize_extensions(&["PDF", ".txt", " .Pdf ", ""]);
        assert_eq!(normalized, vec![".pdf", ".txt"]);
    }

    #[test]
    fn test_read_file_content_size_limit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big.txt");
        fs::write(&path, "0123456789").unwrap();

        assert_eq!(read_file_content(&path, 100).unwrap(), "0123456789");
        let err = read_file_content(&path, 5).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_file_name() {
        assert_eq!(file_name(&PathBuf::from("/data/report.pdf")), "report.pdf");
    }
}
