//! Task processors
//!
//! A processor turns one task input into one output by prompting an inference
//! backend. Every task kind is served by [`TextProcessor`]; long-text kinds go
//! through the chunker and reducer before reaching the model.

pub mod cache;
pub mod prompts;
pub mod registry;

pub use cache::ProcessorCache;
pub use registry::{
    BindingSet, ProcessorDescriptor, ProcessorFactory, ProcessorRegistry, ProviderBinding,
};

use crate::catalog::ModelSpec;
use crate::llm::{CompletionRequest, LlmError, LlmProvider, Message};
use crate::observability::metrics;
use crate::text::{self, chunker, reducer::MIN_CHUNK_CHARS};
use crate::transport::TaskData;
use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Built-in task kinds served for every model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TaskKind {
    Summary,
    Headline,
    Topics,
    Simplification,
    Reformulation,
    ContextWrite,
    FreePrompt,
    Chat,
    Proofread,
    ChangeTone,
}

impl TaskKind {
    pub const ALL: [TaskKind; 10] = [
        TaskKind::Summary,
        TaskKind::Headline,
        TaskKind::Topics,
        TaskKind::Simplification,
        TaskKind::Reformulation,
        TaskKind::ContextWrite,
        TaskKind::FreePrompt,
        TaskKind::Chat,
        TaskKind::Proofread,
        TaskKind::ChangeTone,
    ];

    /// Task-type id used by the task source
    pub fn path(self) -> &'static str {
        match self {
            TaskKind::Summary => "core:text2text:summary",
            TaskKind::Headline => "core:text2text:headline",
            TaskKind::Topics => "core:text2text:topics",
            TaskKind::Simplification => "core:text2text:simplification",
            TaskKind::Reformulation => "core:text2text:reformulation",
            TaskKind::ContextWrite => "core:contextwrite",
            TaskKind::FreePrompt => "core:text2text",
            TaskKind::Chat => "core:text2text:chat",
            TaskKind::Proofread => "core:text2text:proofread",
            TaskKind::ChangeTone => "core:text2text:changetone",
        }
    }

    pub fn from_path(path: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.path() == path)
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path())
    }
}

/// Errors raised while processing a single task
#[derive(Debug, Error)]
pub enum ProcessingError {
    #[error("Missing required input field '{0}'")]
    MissingField(String),
    #[error("Input field '{field}' must be {expected}")]
    InvalidField {
        field: String,
        expected: &'static str,
    },
    #[error("Inference failed: {0}")]
    Llm(#[from] LlmError),
}

/// A constructed processor for one task kind
#[async_trait]
pub trait TaskProcessor: Send + Sync {
    fn kind(&self) -> TaskKind;

    async fn process(&self, input: &TaskData) -> Result<TaskData, ProcessingError>;
}

/// Processor prompting a shared model backend
pub struct TextProcessor {
    kind: TaskKind,
    model: Arc<ModelSpec>,
    backend: Arc<dyn LlmProvider>,
}

impl TextProcessor {
    pub fn new(kind: TaskKind, model: Arc<ModelSpec>, backend: Arc<dyn LlmProvider>) -> Self {
        Self {
            kind,
            model,
            backend,
        }
    }

    fn context_chars(&self) -> usize {
        self.model.config.context_chars()
    }

    fn messages(&self, system: &str, user: &str) -> Vec<Message> {
        match &self.model.config.prompt {
            Some(template) => vec![Message::user(prompts::render_template(
                template, system, user,
            ))],
            None => vec![Message::system(system), Message::user(user)],
        }
    }

    async fn complete(&self, messages: Vec<Message>) -> Result<String, ProcessingError> {
        let request = CompletionRequest::new(self.model.name.clone(), messages);
        let text = self.backend.complete(request).await?.into_text()?;
        Ok(text.trim().to_string())
    }

    async fn ask(&self, system: &str, user: String) -> Result<String, ProcessingError> {
        self.complete(self.messages(system, &user)).await
    }

    async fn summarize(&self, text: &str) -> Result<String, ProcessingError> {
        let summary = text::summarize_with_stats(text, self.context_chars(), |batch| {
            self.ask(prompts::SUMMARY_SYSTEM, prompts::summary(&batch))
        })
        .await?;

        metrics().record_summary_rounds(summary.rounds);
        debug!(
            rounds = summary.rounds,
            calls = summary.calls,
            "Summary complete"
        );
        Ok(summary.text)
    }

    async fn simplify(&self, text: &str) -> Result<String, ProcessingError> {
        let chunk_size = (self.context_chars() / 2).max(MIN_CHUNK_CHARS);
        let mut outputs = Vec::new();
        for chunk in chunker::split(text, chunk_size) {
            outputs.push(
                self.ask(prompts::SIMPLIFY_SYSTEM, prompts::simplify(chunk.as_str()))
                    .await?,
            );
        }
        Ok(outputs.join(chunker::PARAGRAPH_BREAK))
    }

    async fn chat(&self, input: &TaskData) -> Result<String, ProcessingError> {
        let mut messages = chat_history(input)?;
        messages.push(Message::user(required_str(input, "input")?));
        self.complete(messages).await
    }
}

#[async_trait]
impl TaskProcessor for TextProcessor {
    fn kind(&self) -> TaskKind {
        self.kind
    }

    async fn process(&self, input: &TaskData) -> Result<TaskData, ProcessingError> {
        let output = match self.kind {
            TaskKind::Summary => self.summarize(required_str(input, "input")?).await?,
            TaskKind::Simplification => self.simplify(required_str(input, "input")?).await?,
            TaskKind::Chat => self.chat(input).await?,
            TaskKind::Headline => {
                let text = required_str(input, "input")?;
                self.ask(prompts::HEADLINE_SYSTEM, prompts::headline(text))
                    .await?
            }
            TaskKind::Topics => {
                let text = required_str(input, "input")?;
                self.ask(prompts::TOPICS_SYSTEM, prompts::topics(text)).await?
            }
            TaskKind::Reformulation => {
                let text = required_str(input, "input")?;
                self.ask(prompts::REFORMULATE_SYSTEM, prompts::reformulate(text))
                    .await?
            }
            TaskKind::Proofread => {
                let text = required_str(input, "input")?;
                self.ask(prompts::PROOFREAD_SYSTEM, prompts::proofread(text))
                    .await?
            }
            TaskKind::ChangeTone => {
                let text = required_str(input, "input")?;
                let tone = required_str(input, "tone")?;
                self.ask(prompts::CHANGE_TONE_SYSTEM, prompts::change_tone(text, tone))
                    .await?
            }
            TaskKind::ContextWrite => {
                let style = required_str(input, "style_input")?;
                let source = required_str(input, "source_input")?;
                self.ask(
                    prompts::CONTEXT_WRITE_SYSTEM,
                    prompts::context_write(style, source),
                )
                .await?
            }
            TaskKind::FreePrompt => {
                let text = required_str(input, "input")?;
                self.ask(prompts::FREE_PROMPT_SYSTEM, text.to_string())
                    .await?
            }
        };

        let mut result = TaskData::new();
        result.insert("output".to_string(), Value::String(output));
        Ok(result)
    }
}

fn required_str<'a>(input: &'a TaskData, field: &str) -> Result<&'a str, ProcessingError> {
    match input.get(field) {
        None | Some(Value::Null) => Err(ProcessingError::MissingField(field.to_string())),
        Some(Value::String(s)) => Ok(s),
        Some(_) => Err(ProcessingError::InvalidField {
            field: field.to_string(),
            expected: "a string",
        }),
    }
}

/// Prior turns of a chat; even positions are assistant turns, odd positions user turns
fn chat_history(input: &TaskData) -> Result<Vec<Message>, ProcessingError> {
    let entries = match input.get("history") {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::Array(entries)) => entries,
        Some(_) => {
            return Err(ProcessingError::InvalidField {
                field: "history".to_string(),
                expected: "an array of strings",
            })
        }
    };

    entries
        .iter()
        .enumerate()
        .map(|(i, entry)| {
            let content = entry.as_str().ok_or_else(|| ProcessingError::InvalidField {
                field: "history".to_string(),
                expected: "an array of strings",
            })?;
            Ok(if i % 2 == 0 {
                Message::assistant(content)
            } else {
                Message::user(content)
            })
        })
        .collect()
}
