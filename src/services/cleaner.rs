//! Whitespace normalization ahead of splitting.

use std::sync::LazyLock;

use regex::Regex;

use crate::models::{Document, IngestionConfig};

static EXTRA_WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s\s+").expect("static regex"));

/// Page separator emitted by paged converters.
const PAGE_BREAK: char = '\x0c';

/// Cleans document text without changing what it says.
#[derive(Debug, Clone)]
pub struct DocumentCleaner {
    remove_empty_lines: bool,
    remove_extra_whitespaces: bool,
    remove_repeated_substrings: bool,
}

impl Default for DocumentCleaner {
    fn default() -> Self {
        Self::from_config(&IngestionConfig::default())
    }
}

impl DocumentCleaner {
    pub fn new(
        remove_empty_lines: bool,
        remove_extra_whitespaces: bool,
        remove_repeated_substrings: bool,
    ) -> Self {
        Self {
            remove_empty_lines,
            remove_extra_whitespaces,
            remove_repeated_substrings,
        }
    }

    pub fn from_config(config: &IngestionConfig) -> Self {
        Self::new(
            config.remove_empty_lines,
            config.remove_extra_whitespaces,
            config.remove_repeated_substrings,
        )
    }

    /// Clean every document. Documents whose text is unchanged keep their id.
    pub fn run(&self, documents: Vec<Document>) -> Vec<Document> {
        documents
            .into_iter()
            .map(|doc| {
                let cleaned = self.clean(&doc.content);
                if cleaned == doc.content {
                    doc
                } else {
                    doc.with_content(cleaned)
                }
            })
            .collect()
    }

    pub fn clean(&self, text: &str) -> String {
        let mut pages: Vec<String> = text.split(PAGE_BREAK).map(str::to_string).collect();

        if self.remove_repeated_substrings && pages.len() > 1 {
            strip_repeated_lines(&mut pages);
        }

        pages
            .into_iter()
            .map(|page| {
                let page = if self.remove_empty_lines {
                    remove_empty_lines(&page)
                } else {
                    page
                };
                if self.remove_extra_whitespaces {
                    EXTRA_WHITESPACE.replace_all(&page, " ").trim().to_string()
                } else {
                    page
                }
            })
            .collect::<Vec<_>>()
            .join(&PAGE_BREAK.to_string())
    }
}

fn remove_empty_lines(text: &str) -> String {
    text.lines()
        .filter(|line| !line.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Drop header and footer lines that repeat on every page.
fn strip_repeated_lines(pages: &mut [String]) {
    let header = common(pages.iter().map(|p| first_line(p)));
    let footer = common(pages.iter().map(|p| last_line(p)));

    for page in pages.iter_mut() {
        let mut lines: Vec<&str> = page.lines().collect();
        if let Some(ref header) = header
            && let Some(pos) = lines.iter().position(|l| l.trim() == header)
        {
            lines.remove(pos);
        }
        if let Some(ref footer) = footer
            && let Some(pos) = lines.iter().rposition(|l| l.trim() == footer)
        {
            lines.remove(pos);
        }
        *page = lines.join("\n");
    }
}

fn first_line(page: &str) -> Option<&str> {
    page.lines().find(|l| !l.trim().is_empty()).map(str::trim)
}

fn last_line(page: &str) -> Option<&str> {
    page.lines().rev().find(|l| !l.trim().is_empty()).map(str::trim)
}

fn common<'a>(mut lines: impl Iterator<Item = Option<&'a str>>) -> Option<String> {
    let first = lines.next()??;
    if first.is_empty() {
        return None;
    }
    lines
        .all(|line| line == Some(first))
        .then(|| first.to_string())
}
