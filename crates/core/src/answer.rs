use crate::error::CapabilityError;
use crate::models::SearchMatch;
use async_trait::async_trait;

pub const SYSTEM_PROMPT: &str = "You are an expert assistant for S1000D documentation. \
Answer using only the provided excerpts. Cite the chapter and page of the excerpts you rely on. \
If the excerpts do not contain the answer, say so.";

/// Text completion capability used to turn retrieved excerpts into an answer.
#[async_trait]
pub trait AnswerGenerator: Send + Sync {
    /// `context_budget` is the largest prompt, in characters, the caller expects
    /// the generator to accept.
    async fn complete(&self, prompt: &str, context_budget: usize) -> Result<String, CapabilityError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnswerOutcome {
    Generated(String),
    NotRequested,
    NoContext,
    Unavailable(String),
    TimedOut,
}

impl AnswerOutcome {
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Generated(text) => Some(text),
            _ => None,
        }
    }
}

/// Builds the user prompt from the best `top_n` matches. Excerpts are added
/// whole, in rank order, while they fit in `budget` characters.
pub fn build_prompt(query: &str, matches: &[SearchMatch], top_n: usize, budget: usize) -> Option<String> {
    let mut context = String::new();
    let mut used = 0usize;

    for found in matches.iter().take(top_n) {
        let header = match found.metadata.page {
            Some(page) => format!("[Chapter {}, page {page}]", found.metadata.chapter),
            None => match &found.metadata.module_code {
                Some(module) => format!("[Chapter {}, {module}]", found.metadata.chapter),
                None => format!("[Chapter {}]", found.metadata.chapter),
            },
        };
        let excerpt = format!("{header}\n{}\n\n", found.text.trim());
        let length = excerpt.chars().count();
        if used + length > budget {
            break;
        }
        used += length;
        context.push_str(&excerpt);
    }

    if context.is_empty() {
        return None;
    }

    Some(format!(
        "Excerpts:\n\n{context}Question: {}\n\nAnswer:",
        query.trim()
    ))
}
