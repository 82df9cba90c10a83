//! Prompt assembly from a question and retrieved context.

use crate::error::ConfigError;
use crate::models::Document;

/// Placeholder replaced by the retrieved documents.
pub const CONTEXT_PLACEHOLDER: &str = "{context}";
/// Placeholder replaced by the user's question.
pub const QUESTION_PLACEHOLDER: &str = "{question}";

/// Separator written after each context document.
const DOCUMENT_DELIMITER: &str = "---";

pub const DEFAULT_TEMPLATE: &str = "\
You are a helpful AI assistant. Answer the question based on the provided context.
If the context doesn't contain relevant information to answer the question,
say \"I don't have enough information to answer this question based on the available documents.\"

Context:
{context}
Question: {question}

Answer:";

#[derive(Debug, Clone)]
pub struct PromptBuilder {
    template: String,
}

impl Default for PromptBuilder {
    fn default() -> Self {
        Self {
            template: DEFAULT_TEMPLATE.to_string(),
        }
    }
}

impl PromptBuilder {
    /// Use a custom template; it must contain both placeholders.
    pub fn new(template: impl Into<String>) -> Result<Self, ConfigError> {
        let template = template.into();
        for placeholder in [CONTEXT_PLACEHOLDER, QUESTION_PLACEHOLDER] {
            if !template.contains(placeholder) {
                return Err(ConfigError::ValidationError(format!(
                    "prompt template is missing {}",
                    placeholder
                )));
            }
        }
        Ok(Self { template })
    }

    pub fn from_template(template: Option<&str>) -> Result<Self, ConfigError> {
        match template {
            Some(template) => Self::new(template),
            None => Ok(Self::default()),
        }
    }

    /// Render the prompt. Each document's content is followed by a `---` line.
    pub fn build<'a>(
        &self,
        question: &str,
        documents: impl IntoIterator<Item = &'a Document>,
    ) -> String {
        let context: String = documents
            .into_iter()
            .map(|doc| format!("{}\n{}\n", doc.content, DOCUMENT_DELIMITER))
            .collect();

        render(
            &self.template,
            &[
                (CONTEXT_PLACEHOLDER, context.as_str()),
                (QUESTION_PLACEHOLDER, question),
            ],
        )
    }
}

/// Single left-to-right pass; substituted text is never rescanned.
fn render(template: &str, values: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some((pos, placeholder, value)) = values
        .iter()
        .filter_map(|(p, v)| rest.find(p).map(|pos| (pos, *p, *v)))
        .min_by_key(|(pos, _, _)| *pos)
    {
        out.push_str(&rest[..pos]);
        out.push_str(value);
        rest = &rest[pos + placeholder.len()..];
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(content: &str) -> Document {
        Document::new(content, Default::default())
    }

    #[test]
    fn test_default_prompt_contains_context_and_question() {
        let builder = PromptBuilder::default();
        let docs = [doc("Paris is the capital of France."), doc("Berlin is in Germany.")];
        let prompt = builder.build("What is the capital of France?", &docs);

        assert!(prompt.contains("Paris is the capital of France.\n---\n"));
        assert!(prompt.contains("Berlin is in Germany.\n---\n"));
        assert!(prompt.contains("Question: What is the capital of France?"));
        assert!(prompt.contains("I don't have enough information"));
        assert!(prompt.ends_with("Answer:"));
    }

    #[test]
    fn test_document_order_is_preserved() {
        let builder = PromptBuilder::default();
        let docs = [doc("first"), doc("second")];
        let prompt = builder.build("q", &docs);
        assert!(prompt.find("first").unwrap() < prompt.find("second").unwrap());
    }

    #[test]
    fn test_empty_context_still_renders() {
        let prompt = PromptBuilder::default().build("Anything?", std::iter::empty());
        assert!(prompt.contains("Context:\n\nQuestion: Anything?"));
    }

    #[test]
    fn test_placeholders_inside_documents_stay_literal() {
        let prompt = PromptBuilder::default().build("real question", &[doc("see {question}")]);
        assert!(prompt.contains("see {question}\n---"));
        assert!(prompt.contains("Question: real question"));
    }

    #[test]
    fn test_custom_template_requires_placeholders() {
        assert!(PromptBuilder::new("Only {question}").is_err());
        let builder = PromptBuilder::new("C: {context} Q: {question}").unwrap();
        assert_eq!(builder.build("why?", &[doc("because")]), "C: because\n---\n Q: why?");
    }
}
