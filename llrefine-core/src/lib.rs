//! # llrefine core
//!
//! Building blocks for chained language-model calls.
//!
//! ## Core Concepts
//! - **Stages**: prompt-defined roles (summarize, fact-check, critique, rewrite)
//! - **Pipeline**: an explicit state machine over stages with one refinement gate
//! - **Parsers**: strict extraction of scores, verdicts and marked bodies
//! - **Index**: a persisted embedding index over a CSV corpus, with top-k retrieval
//! - **Provider**: trait-based LLM and embedding backends (Ollama, OpenAI-compatible)

pub mod config;
pub mod corpus;
pub mod error;
pub mod index;
pub mod parse;
pub mod pipeline;
pub mod provider;
pub mod retrieval;
pub mod stage;
pub mod storage;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{Config, PipelineSettings, ProviderSettings, RetrievalSettings};
pub use corpus::CorpusRecord;
pub use error::{Error, ErrorKind, ErrorStatus, Result};
pub use index::{BuildOutcome, CorpusSource, IndexEntry, IndexManifest, ScoredEntry, VectorIndex};
pub use parse::{CritiqueReport, FactCheckVerdict, Priority};
pub use pipeline::{
    GateDecision, PipelineOutput, PipelineRun, PipelineSpec, Refinement, RefinementGate,
    RunState, StageFailure, StageRequest, StageResult, Step, Variant,
};
pub use provider::{
    ChatMessage, CompletionRequest, CompletionResponse, Embedder, FinishReason, LlmProvider,
    OllamaProvider, OpenAIProvider, ProviderConfig, ProviderError, ProviderType, Role, Usage,
    UsageTracker,
};
pub use retrieval::{RetrievedRecord, Retriever};
pub use stage::{Stage, StageId};
pub use storage::{FileStorage, MemoryStorage, StorageBackend, Store};
