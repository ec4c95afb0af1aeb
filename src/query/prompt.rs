//! Prompt assembly from retrieved passages.

use crate::generation::{ChatMessage, GenerationRequest, Role};
use crate::index::SearchResult;

const USER_PREAMBLE: &str =
    "You are a helpful assistant.\nUse the following retrieved notes to answer the question.";

/// Concatenate passages best match first, each tagged with its source and page.
pub fn build_context(results: &[SearchResult]) -> String {
    results
        .iter()
        .map(|result| format!("[{}, page {}] {}", result.source, result.page, result.text))
        .collect::<Vec<_>>()
        .join("\n")
}

/// System instruction plus a user message carrying the context and the question.
pub fn build_request(system_prompt: &str, context: &str, question: &str) -> GenerationRequest {
    GenerationRequest {
        messages: vec![
            ChatMessage {
                role: Role::System,
                content: system_prompt.to_string(),
            },
            ChatMessage {
                role: Role::User,
                content: format!(
                    "{USER_PREAMBLE}\n\nContext:\n{context}\n\nQuestion: {question}\nAnswer:"
                ),
            },
        ],
    }
}
