//! Combo enumeration for the shader compiler.
//!
//! A shader description declares ordered static and dynamic axes, each an
//! inclusive integer range, plus skip expressions over the axis values. This
//! crate materializes the cartesian product of those axes as a dense
//! command-number space and hands out cheap, cloneable handles that resolve a
//! command number back to its static/dynamic combo ids and per-axis values.

#![forbid(unsafe_code)]

mod desc;
mod error;
mod schedule;

pub use crate::desc::{CmpOp, ComboAxis, ShaderDescription, SkipExpr};
pub use crate::error::ComboError;
pub use crate::schedule::{ComboHandle, ComboSchedule, EntryInfo};

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ComboError>;
