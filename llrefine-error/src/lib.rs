//! # llrefine-error
//!
//! Error type shared by the pipeline, the index and the CLI, modelled on
//! OpenDAL's error handling.
//!
//! - **ErrorKind**: which failure (`StageParseFailed`, `IndexMissing`, `BackendUnavailable`)
//! - **ErrorStatus**: whether a stage call may be retried, and whether retries ran out
//! - **Context**: stage agent, provider or persist location, pushed as the error bubbles up
//! - **Source**: the wrapped HTTP, IO or CSV error
//!
//! ## Usage
//!
//! ```rust
//! use llrefine_error::{Error, ErrorKind};
//!
//! fn example() -> Result<(), Error> {
//!     Err(Error::new(ErrorKind::StageParseFailed, "missing 'Clarity' score")
//!         .with_operation("pipeline::provide_output")
//!         .with_context("stage", "critic_agent"))
//! }
//! ```
//!
//! ## Conventions
//!
//! - Every crate in the workspace returns `Result<T, llrefine_error::Error>`
//! - Provider errors convert once, at the stage or chat call that saw them
//! - Callers further up only add operation and context
//! - `From` exists for `std::io::Error` alone; other errors go through `set_source`

mod error;
mod kind;
mod status;

pub use error::Error;
pub use kind::ErrorKind;
pub use status::ErrorStatus;

/// Result type alias using llrefine Error
pub type Result<T> = std::result::Result<T, Error>;
