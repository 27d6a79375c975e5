//! Prompt assembly
//!
//! Pure rendering of the retrieved context, the prior conversation, and the
//! active question into the single instruction sent to the model. No state,
//! no I/O; malformed inputs are rejected upstream by payload validation.

use crate::chat::ChatMessage;
use crate::retrieval::RetrievedDocument;

/// The fixed answer template
///
/// Each slot is delimited so the model can tell code context, prior turns,
/// and the new question apart even when the context block is long.
const PROMPT_TEMPLATE: &str = "\
You are an expert software engineer answering questions about a code repository.

Answer using only the repository context and the conversation below. If they
do not contain enough information to answer, say so instead of guessing.
Mention which part of the context your answer is based on. Format the answer
as valid markdown and put code in fenced code blocks tagged with their
language.

=== Repository context ===
{context}
=== End repository context ===

=== Conversation so far ===
{chat_history}
=== End conversation ===

Question: {question}";

/// Render the prompt for one request
///
/// Documents are concatenated in retrieval order with no deduplication; an
/// empty retrieval yields an explicitly empty context block so the model
/// cannot assume content exists. History excludes the active question.
pub fn assemble(
    context: &[RetrievedDocument],
    history: &[ChatMessage],
    question: &str,
) -> String {
    let context_block = context
        .iter()
        .map(|doc| doc.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");

    PROMPT_TEMPLATE
        .replace("{context}", &context_block)
        .replace("{chat_history}", &serialize_history(history))
        .replace("{question}", question)
}

/// Serialize prior turns as `<role>: <content>` lines, oldest first
pub fn serialize_history(history: &[ChatMessage]) -> String {
    history
        .iter()
        .map(|m| format!("{}: {}", m.role, m.content))
        .collect::<Vec<_>>()
        .join("\n")
}
