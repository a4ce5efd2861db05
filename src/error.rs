use thiserror::Error;

#[derive(Debug, Error)]
pub enum DistMatError {
    #[error("not implemented: {0}")]
    NotImplemented(&'static str),

    #[error("communication package missing: {0}")]
    MissingCommPkg(&'static str),

    #[error("communication error: {0}")]
    Comm(String),

    #[error("message from rank {rank} has {actual} entries, expected {expected}")]
    MessageSize {
        rank: usize,
        expected: usize,
        actual: usize,
    },

    #[error("dimension mismatch: {0}")]
    DimensionMismatch(String),

    #[error("invalid partition: {0}")]
    InvalidPartition(String),

    #[error("config error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, DistMatError>;
