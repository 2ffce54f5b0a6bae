//! # Prompt templates
//!
//! A template is a small YAML document with two fields:
//! - `system_prompt`: steers the chat model,
//! - `user_prompt`: the user turn, with `{context}` and `{question}` placeholders.
//!
//! Templates live under the configuration directory:
//!
//! ```text
//! <config_dir>/templates/<name>.yaml
//! ```
//!
//! ## Minimal YAML example
//!
//! ```yaml
//! system_prompt: "You recommend anime."
//! user_prompt: |
//!   Context:
//!   {context}
//!
//!   Question: {question}
//! ```
//!
//! When no template is configured the built-in [`PromptTemplate::default`] is used.

use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

use crate::error::{Error, Result};

const DEFAULT_SYSTEM_PROMPT: &str = "You are an expert anime recommender. Your job is to help users find the perfect anime based on their preferences.";

const DEFAULT_USER_PROMPT: &str = "Using the following context, provide a detailed and engaging response to the user's question.

For each question, suggest exactly three anime titles. For each recommendation, include:
1. The anime title.
2. A concise plot summary (2-3 sentences).
3. A clear explanation of why this anime matches the user's preferences.

Present your recommendations in a numbered list format for easy reading.

If you don't know the answer, respond honestly by saying you don't know. Do not fabricate any information.

Context:
{context}

User's question:
{question}

Your well-structured response:";

/// A reusable prompt template.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PromptTemplate {
    /// Instruction sent as the system message.
    pub system_prompt: String,

    /// User message body; `{context}` and `{question}` are substituted at send time.
    pub user_prompt: String,
}

impl Default for PromptTemplate {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            user_prompt: DEFAULT_USER_PROMPT.to_string(),
        }
    }
}

impl PromptTemplate {
    /// Fill the placeholders of `user_prompt`.
    ///
    /// Context is substituted first so a question containing `{context}` is left literal.
    pub fn render_user_prompt(&self, context: &str, question: &str) -> String {
        let (head, tail) = match self.user_prompt.split_once("{question}") {
            Some((head, tail)) => (head, Some(tail)),
            None => (self.user_prompt.as_str(), None),
        };
        let mut rendered = head.replace("{context}", context);
        if let Some(tail) = tail {
            rendered.push_str(question);
            rendered.push_str(&tail.replace("{context}", context));
        }
        rendered
    }

    fn validate(&self) -> Result<()> {
        if !self.user_prompt.contains("{question}") {
            return Err(Error::Config("template user_prompt lacks {question}".into()));
        }
        Ok(())
    }
}

/// Load a template from an explicit YAML file.
pub fn load_template_file(path: &Path) -> Result<PromptTemplate> {
    tracing::info!("Loading template: {}", path.display());
    let content = fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
    let template: PromptTemplate = serde_yaml::from_str(&content)
        .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
    template.validate()?;
    Ok(template)
}

/// Load a template by name from `<config_dir>/templates/<name>.yaml`.
pub fn load_template(name: &str) -> Result<PromptTemplate> {
    let dir = crate::config_dir().map_err(|e| Error::Config(e.to_string()))?;
    load_template_file(&dir.join("templates").join(format!("{name}.yaml")))
}
