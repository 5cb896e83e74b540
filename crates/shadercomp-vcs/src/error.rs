use thiserror::Error;

#[derive(Debug, Error)]
pub enum VcsError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unsupported archive version {0}")]
    UnsupportedVersion(u32),

    #[error("unsupported block compression kind {0:?}")]
    UnsupportedCompression(crate::BlockKind),

    #[error("corrupt archive: {0}")]
    Corrupt(&'static str),

    #[error("{what} {value} does not fit in {width}")]
    Narrowing {
        what: &'static str,
        value: u64,
        width: &'static str,
    },

    #[error("allocation of {len} bytes failed")]
    OutOfMemory { len: usize },
}

impl VcsError {
    pub(crate) fn narrowing(what: &'static str, value: u64, width: &'static str) -> Self {
        VcsError::Narrowing { what, value, width }
    }
}
