use std::fmt::{Result as FmtResult, Write as FmtWrite};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::{IngestReport, IngestStatus, OutputFormat, RetrievalResults};
use crate::qa::SystemStatus;

pub trait Formatter {
    fn format_answer(&self, answer: &AnswerView) -> String;
    fn format_documents(&self, results: &RetrievalResults) -> String;
    fn format_ingest(&self, report: &IngestReport) -> String;
    fn format_status(&self, status: &StatusInfo) -> String;
    fn format_message(&self, message: &str) -> String;
    fn format_error(&self, error: &str) -> String;
}

#[derive(Debug, Clone, Serialize)]
pub struct AnswerView {
    pub question: String,
    pub answer: String,
    pub answered: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct DaemonInfo {
    pub pid: u32,
    pub started_at: DateTime<Utc>,
    pub idle_secs: u64,
    pub requests_served: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusInfo {
    pub daemon: Option<DaemonInfo>,
    pub system: SystemStatus,
}

const PREVIEW_CHARS: usize = 200;

fn preview(content: &str) -> String {
    let mut preview: String = content.chars().take(PREVIEW_CHARS).collect();
    if content.chars().count() > PREVIEW_CHARS {
        preview.push_str("...");
    }
    preview
}

fn set_mark(set: bool) -> &'static str {
    if set { "set" } else { "missing" }
}

fn render(f: impl FnOnce(&mut String) -> FmtResult) -> String {
    let mut output = String::new();
    // writing to a String cannot fail
    let _ = f(&mut output);
    output
}

pub struct TextFormatter;

impl Formatter for TextFormatter {
    fn format_answer(&self, answer: &AnswerView) -> String {
        format!("{}\n", answer.answer)
    }

    fn format_documents(&self, results: &RetrievalResults) -> String {
        if results.is_empty() {
            return format!("No documents found for: {}\n", results.question);
        }

        render(|output| {
            writeln!(output, "Documents for: \"{}\"", results.question)?;
            writeln!(
                output,
                "Found {} documents in {}ms\n",
                results.len(),
                results.duration_ms
            )?;

            for (i, scored) in results.documents.iter().enumerate() {
                writeln!(output, "{}. [Score: {:.3}]", i + 1, scored.score)?;
                if let Some(source) = scored.document.source() {
                    writeln!(output, "   Source: {}", source)?;
                }
                writeln!(output, "   ---")?;
                for line in preview(&scored.document.content).lines() {
                    writeln!(output, "   {}", line)?;
                }
                writeln!(output)?;
            }
            Ok(())
        })
    }

    fn format_ingest(&self, report: &IngestReport) -> String {
        render(|output| {
            match report.status {
                IngestStatus::Success => writeln!(output, "Ingestion Complete")?,
                IngestStatus::Warning => writeln!(output, "Ingestion Warning")?,
            }
            writeln!(output, "------------------")?;
            writeln!(output, "{}", report.message)?;
            writeln!(output, "Documents loaded: {}", report.documents_loaded)?;
            writeln!(output, "Chunks written:   {}", report.count)?;
            writeln!(output, "Files skipped:    {}", report.files_skipped)?;
            writeln!(output, "Files failed:     {}", report.files_failed)?;
            writeln!(output, "Duration:         {}ms", report.duration_ms)
        })
    }

    fn format_status(&self, status: &StatusInfo) -> String {
        let system = &status.system;
        render(|output| {
            writeln!(output, "Status")?;
            writeln!(output, "------")?;
            writeln!(output, "Environment:   {}", system.environment.environment)?;
            writeln!(
                output,
                "  Pinecone key: {}",
                set_mark(system.environment.pinecone_api_key_set)
            )?;
            writeln!(
                output,
                "  OpenAI key:   {}",
                set_mark(system.environment.openai_api_key_set)
            )?;
            writeln!(
                output,
                "  Groq key:     {}",
                set_mark(system.environment.groq_api_key_set)
            )?;
            writeln!(output)?;

            let store_status = match system.store_reachable {
                Some(true) => "[CONNECTED]",
                _ => "[DISCONNECTED]",
            };
            writeln!(
                output,
                "Vector Store:  {} {}",
                system.vector_backend, store_status
            )?;
            writeln!(output, "  Index:       {}", system.index_name)?;
            writeln!(output, "  Namespace:   {}", system.namespace)?;
            writeln!(output, "  Dimension:   {}", system.dimension)?;
            if let Some(count) = system.vector_count {
                writeln!(output, "  Vectors:     {}", count)?;
            }
            if let Some(ref error) = system.store_error {
                writeln!(output, "  Error:       {}", error)?;
            }
            writeln!(output)?;

            writeln!(output, "Models")?;
            writeln!(output, "  Embedding:   {}", system.embedding_model)?;
            writeln!(output, "  Generation:  {}", system.generation_model)?;
            writeln!(output)?;

            match status.daemon {
                Some(ref daemon) => {
                    writeln!(output, "Daemon:        [RUNNING] pid {}", daemon.pid)?;
                    writeln!(
                        output,
                        "  Started:     {}",
                        daemon.started_at.format("%Y-%m-%d %H:%M:%S UTC")
                    )?;
                    writeln!(output, "  Idle:        {}s", daemon.idle_secs)?;
                    writeln!(output, "  Requests:    {}", daemon.requests_served)?;
                    let pipeline = if system.pipeline_ready { "ready" } else { "cold" };
                    writeln!(output, "  Pipeline:    {}", pipeline)?;
                }
                None => writeln!(output, "Daemon:        [STOPPED]")?,
            }
            Ok(())
        })
    }

    fn format_message(&self, message: &str) -> String {
        format!("{}\n", message)
    }

    fn format_error(&self, error: &str) -> String {
        format!("Error: {}\n", error)
    }
}

pub struct JsonFormatter {
    pub pretty: bool,
}

impl JsonFormatter {
    pub fn new(pretty: bool) -> Self {
        Self { pretty }
    }

    fn to_json(&self, value: &impl Serialize) -> String {
        let result = if self.pretty {
            serde_json::to_string_pretty(value)
        } else {
            serde_json::to_string(value)
        };
        let mut json =
            result.unwrap_or_else(|e| serde_json::json!({ "error": e.to_string() }).to_string());
        json.push('\n');
        json
    }
}

impl Formatter for JsonFormatter {
    fn format_answer(&self, answer: &AnswerView) -> String {
        self.to_json(answer)
    }

    fn format_documents(&self, results: &RetrievalResults) -> String {
        self.to_json(results)
    }

    fn format_ingest(&self, report: &IngestReport) -> String {
        self.to_json(report)
    }

    fn format_status(&self, status: &StatusInfo) -> String {
        self.to_json(status)
    }

    fn format_message(&self, message: &str) -> String {
        self.to_json(&serde_json::json!({ "message": message }))
    }

    fn format_error(&self, error: &str) -> String {
        self.to_json(&serde_json::json!({ "error": error }))
    }
}

pub struct MarkdownFormatter;

impl Formatter for MarkdownFormatter {
    fn format_answer(&self, answer: &AnswerView) -> String {
        format!(
            "## Question\n\n{}\n\n## Answer\n\n{}\n",
            answer.question, answer.answer
        )
    }

    fn format_documents(&self, results: &RetrievalResults) -> String {
        if results.is_empty() {
            return format!("## No documents found\n\nQuestion: `{}`\n", results.question);
        }

        render(|output| {
            writeln!(output, "## Retrieved Documents\n")?;
            writeln!(output, "**Question:** `{}`\n", results.question)?;
            writeln!(
                output,
                "Found {} documents in {}ms\n",
                results.len(),
                results.duration_ms
            )?;

            for (i, scored) in results.documents.iter().enumerate() {
                writeln!(output, "### {}. Score: {:.3}\n", i + 1, scored.score)?;
                if let Some(source) = scored.document.source() {
                    writeln!(output, "**Source:** `{}`\n", source)?;
                }
                writeln!(output, "```")?;
                writeln!(output, "{}", scored.document.content)?;
                writeln!(output, "```\n")?;
            }
            Ok(())
        })
    }

    fn format_ingest(&self, report: &IngestReport) -> String {
        render(|output| {
            writeln!(output, "## Ingestion: {}\n", report.status)?;
            writeln!(output, "{}\n", report.message)?;
            writeln!(output, "| Metric | Value |")?;
            writeln!(output, "|--------|-------|")?;
            writeln!(output, "| Documents loaded | {} |", report.documents_loaded)?;
            writeln!(output, "| Chunks written | {} |", report.count)?;
            writeln!(output, "| Files skipped | {} |", report.files_skipped)?;
            writeln!(output, "| Files failed | {} |", report.files_failed)?;
            writeln!(output, "| Duration | {}ms |", report.duration_ms)
        })
    }

    fn format_status(&self, status: &StatusInfo) -> String {
        let system = &status.system;
        let check = |ok: bool| if ok { "✅" } else { "❌" };
        render(|output| {
            writeln!(output, "## Status\n")?;
            writeln!(output, "### Environment: {}\n", system.environment.environment)?;
            writeln!(
                output,
                "- **PINECONE_API_KEY:** {}",
                check(system.environment.pinecone_api_key_set)
            )?;
            writeln!(
                output,
                "- **OPENAI_API_KEY:** {}",
                check(system.environment.openai_api_key_set)
            )?;
            writeln!(
                output,
                "- **GROQ_API_KEY:** {}\n",
                check(system.environment.groq_api_key_set)
            )?;

            writeln!(
                output,
                "### Vector Store ({}) {}\n",
                system.vector_backend,
                check(system.store_reachable == Some(true))
            )?;
            writeln!(output, "- **Index:** {}", system.index_name)?;
            writeln!(output, "- **Namespace:** {}", system.namespace)?;
            if let Some(count) = system.vector_count {
                writeln!(output, "- **Vectors:** {}", count)?;
            }
            if let Some(ref error) = system.store_error {
                writeln!(output, "- **Error:** {}", error)?;
            }
            writeln!(output)?;

            writeln!(output, "### Daemon {}\n", check(status.daemon.is_some()))?;
            if let Some(ref daemon) = status.daemon {
                writeln!(output, "- **PID:** {}", daemon.pid)?;
                writeln!(output, "- **Requests:** {}", daemon.requests_served)?;
                writeln!(output, "- **Pipeline ready:** {}", system.pipeline_ready)?;
            }
            Ok(())
        })
    }

    fn format_message(&self, message: &str) -> String {
        format!("> {}\n", message)
    }

    fn format_error(&self, error: &str) -> String {
        format!("> ⚠️ **Error:** {}\n", error)
    }
}

pub fn get_formatter(format: OutputFormat) -> Box<dyn Formatter> {
    match format {
        OutputFormat::Text => Box::new(TextFormatter),
        OutputFormat::Json => Box::new(JsonFormatter::new(true)),
        OutputFormat::Markdown => Box::new(MarkdownFormatter),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Document, ScoredDocument};

    fn results() -> RetrievalResults {
        let doc = Document::from_file("Paris is the capital of France.", "/data/fr.txt", "fr.txt");
        RetrievalResults::new("capital?", vec![ScoredDocument::new(doc, 0.91)], 12)
    }

    #[test]
    fn test_text_documents_show_score_and_source() {
        let output = TextFormatter.format_documents(&results());
        assert!(output.contains("1. [Score: 0.910]"));
        assert!(output.contains("Source: /data/fr.txt"));
        assert!(output.contains("Paris is the capital of France."));
    }

    #[test]
    fn test_long_content_is_truncated_in_text() {
        let long = "x".repeat(500);
        assert_eq!(preview(&long).chars().count(), PREVIEW_CHARS + 3);
        assert_eq!(preview("short"), "short");
    }

    #[test]
    fn test_json_documents_parse_back() {
        let output = JsonFormatter::new(false).format_documents(&results());
        let value: serde_json::Value = serde_json::from_str(output.trim()).unwrap();
        assert_eq!(value["question"], "capital?");
        assert_eq!(value["documents"][0]["document"]["content"], "Paris is the capital of France.");
    }

    #[test]
    fn test_json_error_is_an_object() {
        let output = get_formatter(OutputFormat::Json).format_error("source path not found: /x");
        let value: serde_json::Value = serde_json::from_str(output.trim()).unwrap();
        assert_eq!(value["error"], "source path not found: /x");
        assert_eq!(TextFormatter.format_error("boom"), "Error: boom\n");
    }

    #[test]
    fn test_ingest_warning_in_markdown() {
        let report = IngestReport::warning("No documents found to ingest.");
        let output = MarkdownFormatter.format_ingest(&report);
        assert!(output.starts_with("## Ingestion: warning"));
        assert!(output.contains("| Chunks written | 0 |"));
    }
}
