//! Error types for Grafter

use thiserror::Error;

/// Top-level error type for Grafter operations
#[derive(Debug, Error)]
pub enum GrafterError {
    #[error("Format error: {0}")]
    Format(#[from] FormatError),

    #[error("Edit error: {0}")]
    Edit(#[from] EditError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors while parsing a container
///
/// Any of these means no container is returned at all; the parser never
/// hands back a partially-read model.
#[derive(Debug, Error)]
pub enum FormatError {
    #[error("Invalid magic bytes")]
    InvalidMagic,

    #[error("Unsupported version: {0}")]
    UnsupportedVersion(u32),

    #[error("Unknown metadata value type: {0}")]
    UnknownValueType(u32),

    #[error("Unknown tensor type: {0}")]
    UnknownTensorType(u32),

    #[error("Duplicate tensor name: {0}")]
    DuplicateTensor(String),

    #[error("Truncated stream: {0}")]
    Truncated(String),

    #[error("Malformed data: {0}")]
    Malformed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors while applying a structural edit
#[derive(Debug, Error)]
pub enum EditError {
    #[error("Missing required metadata key: {0}")]
    MissingMetadata(String),

    #[error("Metadata key {key} has unexpected type (expected {expected})")]
    WrongMetadataType { key: String, expected: &'static str },

    #[error("Tensor {name} has unsupported layout for this edit: {dtype}")]
    UnsupportedLayout { name: String, dtype: String },

    #[error("Edit would duplicate tensor name: {0}")]
    DuplicateTensor(String),

    #[error("Fused width {0} cannot be split into equal halves")]
    InvalidFusedWidth(u64),

    #[error("Invalid bias dimension: {0}")]
    InvalidDimension(u64),
}
