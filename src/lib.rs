// thiserror's #[error("...{field}...")] format strings reference struct fields,
// but the compiler doesn't see through the derive macro and reports false positives.
#![allow(unused_assignments)]

//! # stateful
//!
//! A stateful, multi-scene question engine. A question moves a student through
//! a directed sequence of scenes; each scene has its own inputs and potential
//! response trees (PRTs), and named state variables persist across scenes.
//!
//! ## Architecture
//!
//! - **Scene graph** (`question`): the read-only question definition, authored as TOML
//! - **Session compiler** (`compile`): turns declarations into cached CAS templates
//! - **Input subsystem** (`input`): per-input validation behind capability traits
//! - **State store** (`state`): integer-keyed attempt state and snapshots
//! - **Execution core** (`engine`): the per-submission state machine
//! - **Grading aggregator** (`grade`): multi-visit, multi-attempt score reduction
//! - **CAS gateway** (`cas`): the opaque computer-algebra evaluator, over HTTP
//!
//! ## Library usage
//!
//! ```no_run
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! use stateful::cas::http::{HttpCasEvaluator, DEFAULT_TIMEOUT};
//! use stateful::compile::SessionCompiler;
//! use stateful::config::EngineConfig;
//! use stateful::engine::{Engine, ExecutionMode};
//! use stateful::input::Response;
//! use stateful::question::Question;
//!
//! # fn main() -> miette::Result<()> {
//! let question = Arc::new(Question::load(Path::new("quadratics.toml"))?);
//! let cache = Arc::new(SessionCompiler::compile(&question)?);
//! let cas = Arc::new(HttpCasEvaluator::new("http://localhost:8080/cas", DEFAULT_TIMEOUT));
//!
//! let mut engine = Engine::new(question, cache, cas, EngineConfig::default());
//! engine.start_attempt(None)?;
//! let response = Response::new().with("ans1", "x^2+2*x+1");
//! let result = engine.process_input(&response, true, ExecutionMode::Normal)?;
//! println!("{}: {}", result.status, result.summary);
//! # Ok(())
//! # }
//! ```

pub mod cas;
pub mod compile;
pub mod config;
pub mod engine;
pub mod error;
pub mod grade;
pub mod input;
pub mod question;
pub mod state;
