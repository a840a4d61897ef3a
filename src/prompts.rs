//! Prompt templates for chunk refinement.
//!
//! The template is a contract on the response shape: a single JSON object
//! with exactly `category`, `title`, `content`, `keywords` and `source`.
//! [`crate::pipeline::decode`] rejects anything else, so changing the field
//! list here means changing [`crate::output::RefinedFields`] too.
//!
//! Callers can override the template via
//! [`crate::config::RefineryConfig::prompt_template`]; the placeholder
//! `{source}` is substituted in both the built-in and custom templates.

/// Placeholder replaced with the configured source label.
pub const SOURCE_PLACEHOLDER: &str = "{source}";

/// Default instruction template for refining one OCR-damaged chunk.
pub const DEFAULT_REFINE_TEMPLATE: &str = r#"You are an expert AI medical data analyst. Your task is to analyze the following medical text chunk, which was extracted from a PDF and may contain OCR errors (like 'r ecommenda tion' or 'pr evention o f').

Your two jobs are:
1.  **Fix the text:** Correct any broken words or spacing errors to produce a clean, readable text block.
2.  **Extract metadata:** Generate a title, category, and keywords based on the *fixed* text.

You MUST return your analysis ONLY in the following JSON format. Do not add any conversational text or markdown.

{
  "category": "The inferred medical category (e.g., 'Malaria Prevention', 'Diagnosis', 'Treatment')",
  "title": "A short, descriptive title for this text chunk (less than 15 words)",
  "content": "The *full text* of the chunk, with all OCR errors and broken words (like 'r ecommenda tion') corrected to be clean, readable text (like 'recommendation').",
  "keywords": [
    "keyword1",
    "keyword2",
    "keyword3"
  ],
  "source": "{source}"
}"#;

/// Separator between the instructions and the literal chunk text.
pub const CHUNK_PREAMBLE: &str = "\n\nHere is the text to analyze:\n\n";

/// Build the full prompt for one chunk.
pub fn build_refine_prompt(template: Option<&str>, source_label: &str, chunk: &str) -> String {
    let template = template.unwrap_or(DEFAULT_REFINE_TEMPLATE);
    let instructions = template.replace(SOURCE_PLACEHOLDER, source_label);
    let mut prompt = String::with_capacity(instructions.len() + CHUNK_PREAMBLE.len() + chunk.len());
    prompt.push_str(&instructions);
    prompt.push_str(CHUNK_PREAMBLE);
    prompt.push_str(chunk);
    prompt
}
