//! The compile pipeline: pull combos from a schedule, fan them out to worker
//! threads driving an external compiler, accumulate bytecode per static
//! combo, and flush each finished shader to its archive.
//!
//! Locking model: the result store sits behind one global data lock, the
//! diagnostics aggregator behind its own, and each dispatched command range
//! behind a per-range lock. Workers take one lock at a time and never hold
//! any across an executor call or file I/O.

#![forbid(unsafe_code)]

mod diagnostics;
mod dispatch;
mod executor;
mod output;
mod store;

pub use crate::diagnostics::{Diagnostics, MessageInfo, ShaderMessages};
pub use crate::dispatch::{DispatchOptions, Dispatcher};
pub use crate::executor::{flags, CompileExecutor, CompileResponse};
pub use crate::output::{archive_path, write_shader_archive, OutputError, WriteOutcome};
pub use crate::store::{BytecodeBlock, ResultStore, ShaderInfo};
