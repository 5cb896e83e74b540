use thiserror::Error;

/// An error produced while validating a shader description.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ComboError {
    #[error("shader `{shader}`: axis `{axis}` has an empty range {min}..={max}")]
    EmptyAxisRange {
        shader: String,
        axis: String,
        min: i32,
        max: i32,
    },

    #[error("shader `{shader}`: axis `{axis}` declared more than once")]
    DuplicateAxis { shader: String, axis: String },

    #[error("shader `{shader}`: skip expression references unknown axis `{axis}`")]
    UnknownSkipAxis { shader: String, axis: String },

    #[error("shader `{shader}`: combo count overflows u64")]
    ComboCountOverflow { shader: String },

    #[error("total command count across shaders overflows u64")]
    CommandSpaceOverflow,
}
