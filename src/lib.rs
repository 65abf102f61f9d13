//! Guardrail enforcement gateway
//!
//! A Model Context Protocol (MCP) server that sits between autonomous coding agents and
//! the repo/commands they want to mutate. It exposes a fixed catalog of validation and
//! bookkeeping tools over an SSE transport, backed by a regex-based prevention-rule
//! engine and stateful guardrail tracking (three-strikes attempts, halts, uncertainty
//! escalation, production-first ordering, fix verification).
//!
//! # Example
//!
//! ```no_run
//! use guardrail_gateway::config::Config;
//! use guardrail_gateway::storage::Storage;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let storage = std::sync::Arc::new(Storage::in_memory());
//!     let _ = (config, storage);
//!     Ok(())
//! }
//! ```

pub mod analyzers;
pub mod audit;
pub mod config;
pub mod error;
pub mod metrics;
pub mod models;
pub mod protocol;
pub mod resources;
pub mod session;
pub mod storage;
pub mod tools;
pub mod transport;
pub mod validation;

pub use config::Config;
pub use error::{StorageError, ToolError};
