//! # llrefine agent
//!
//! Drivers that connect the core state machines to live backends:
//! 1. [`Summarizer`] asks a [`PipelineRun`](llrefine_core::PipelineRun) for the
//!    next stage, calls the model, and feeds the answer back until done
//! 2. Retryable backend failures are retried a bounded number of times
//! 3. [`ChatLoop`] retrieves the nearest corpus records for each question and
//!    forwards the question to the model
//!
//! The state machines decide, the agents do the I/O.

mod chat;
mod summarizer;

#[cfg(test)]
mod testing;

pub use chat::{ChatConfig, ChatLoop, ChatTurn, DEFAULT_TEMPLATE};
pub use summarizer::{Summarizer, SummarizerConfig};
