//! Key-value store client with a hooked command pipeline.
//!
//! # Data Flow
//! ```text
//! KvClient::process(ctx, command)
//!     → before(ctx, command)           error: abort, nothing else runs
//!     → transport.execute(command)     outcome stored on the command
//!     → after(ctx, command)            always runs once execution returns
//!     → execution error, else after-hook error
//!
//! KvClient::process_batch(ctx, commands)
//!     → before_batch → execute per BatchPolicy → after_batch (sees every command)
//! ```
//!
//! # Design Decisions
//! - Hooks are synchronous and read-only after construction
//! - Each batched command keeps its own outcome; the batch result is the first failure
//! - A key-absent reply is a result, not a failure, for tracing and metrics

pub mod client;
pub mod command;
pub mod hooks;
pub mod store;
pub mod trace;

pub use client::{Batch, CommandTransport, KvClient};
pub use command::{Command, CommandError, CommandStatus};
pub use hooks::{AfterBatchHook, AfterHook, BeforeBatchHook, BeforeHook, Context, Hooks};
pub use store::{connect, RedisOptions, RedisTransport};
pub use trace::trace_hooks;

pub use crate::config::BatchPolicy;
