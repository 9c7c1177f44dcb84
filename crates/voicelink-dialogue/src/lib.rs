//! Dialogue graph
//!
//! Per-utterance execution: chat template → streaming LLM → sentence
//! splitter → TTS toward the pacer, with a tool-call loop re-entering the
//! LLM until the model stops calling tools, a terminal tool result ends the
//! run, or the loop cap trips.
//!
//! There is no graph framework underneath: nodes are plain tasks joined by
//! channels, and the loop-back is an explicit re-entry in
//! [`graph::DialogueGraph::run`].

pub mod graph;
pub mod splitter;
pub mod template;

pub use graph::{DialogueGraph, GraphConfig, GraphDeps};
pub use splitter::{SentenceSplitter, SplitterItem};
pub use template::{ChatTemplate, TemplateVars};

use thiserror::Error;

/// Spoken to the device when a provider fails mid-run.
pub const RECOVERABLE_ERROR_SENTENCE: &str = "服务暂不可用, 请稍后再试。";

#[derive(Error, Debug)]
pub enum DialogueError {
    #[error("LLM error: {0}")]
    Llm(voicelink_core::CoreError),

    #[error("TTS error: {0}")]
    Tts(voicelink_core::CoreError),

    #[error(transparent)]
    Tool(#[from] voicelink_tools::ToolError),

    #[error(transparent)]
    Memory(#[from] voicelink_memory::MemoryError),

    #[error(transparent)]
    Audio(#[from] voicelink_audio::AudioError),

    #[error("Tool loop exceeded {0} iterations")]
    ToolLoopLimit(usize),

    #[error("Cancelled")]
    Cancelled,
}

impl DialogueError {
    /// Recoverable errors keep the session open and surface as a spoken
    /// apology; cancellation is not an error at all.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, DialogueError::Cancelled)
    }
}
