//! Sentence-window splitting with overlap.

use tracing::debug;

use crate::models::{Document, IngestionConfig};

/// Splits documents into windows of whole sentences.
///
/// Consecutive windows share `split_overlap` sentences, so a document with
/// `S` sentences yields `max(1, ceil((S - overlap) / (length - overlap)))`
/// chunks. Each chunk records its parent id, its position among the
/// parent's chunks and the byte offset it starts at.
#[derive(Debug, Clone)]
pub struct DocumentSplitter {
    split_length: usize,
    split_overlap: usize,
}

impl Default for DocumentSplitter {
    fn default() -> Self {
        Self::from_config(&IngestionConfig::default())
    }
}

impl DocumentSplitter {
    pub fn new(split_length: usize, split_overlap: usize) -> Self {
        let split_length = split_length.max(1);
        Self {
            split_length,
            split_overlap: split_overlap.min(split_length - 1),
        }
    }

    pub fn from_config(config: &IngestionConfig) -> Self {
        Self::new(config.split_length, config.split_overlap)
    }

    pub fn run(&self, documents: Vec<Document>) -> Vec<Document> {
        let mut chunks = Vec::with_capacity(documents.len());
        for document in &documents {
            let split = self.split(document);
            debug!(document = %document.id, chunks = split.len(), "split document");
            chunks.extend(split);
        }
        chunks
    }

    /// Split one document. Blank documents produce no chunks.
    pub fn split(&self, document: &Document) -> Vec<Document> {
        let text = document.content.as_str();
        if text.trim().is_empty() {
            return Vec::new();
        }

        let sentences = sentence_spans(text);
        let step = self.split_length - self.split_overlap;
        let mut chunks = Vec::new();
        let mut start = 0;

        loop {
            let end = (start + self.split_length).min(sentences.len());
            let from = sentences[start].0;
            let to = sentences[end - 1].1;
            let content = &text[from..to];

            if !content.trim().is_empty() {
                chunks.push(document.split(content.to_string(), chunks.len(), from));
            }

            if end >= sentences.len() {
                break;
            }
            start += step;
        }

        chunks
    }
}

/// Byte spans of the sentences in `text`, covering it end to end.
///
/// A sentence ends at `.`, `!` or `?` followed by whitespace or the end of
/// the text; the trailing whitespace stays with the sentence it follows.
fn sentence_spans(text: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();

    while let Some((idx, c)) = chars.next() {
        if !matches!(c, '.' | '!' | '?') {
            continue;
        }
        match chars.peek() {
            Some(&(_, next)) if next.is_whitespace() => {}
            None => {}
            _ => continue,
        }

        let mut end = idx + c.len_utf8();
        while let Some(&(ws_idx, ws)) = chars.peek() {
            if !ws.is_whitespace() {
                break;
            }
            end = ws_idx + ws.len_utf8();
            chars.next();
        }
        spans.push((start, end));
        start = end;
    }

    if start < text.len() {
        spans.push((start, text.len()));
    }
    spans
}
