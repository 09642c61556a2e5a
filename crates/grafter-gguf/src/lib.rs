//! Grafter GGUF - structural surgery for GGUF model containers
//!
//! This crate parses GGUF files (v2/v3, as used by llama.cpp and compatible
//! tools) into an in-memory container, applies structural edits (inserting a
//! missing zero-filled bias tensor, splitting fused feed-forward tensors),
//! and writes valid new containers back to disk.
//!
//! A container is never edited in place: every edit builds a new
//! [`GGUFContainer`] from the old one, and the writer always targets a new
//! output file.

pub mod edit;
pub mod parser;
pub mod writer;

// Re-export main types
pub use edit::{
    embedding_length, fused_width_from_metadata, insert_bias, split_fused, BiasOutcome, BiasSpec,
    SplitReport, SplitSpec, DEFAULT_BIAS_ANCHOR, DEFAULT_BIAS_NAME, DEFAULT_FUSED_SUFFIX,
    DEFAULT_GATE_SUFFIX,
};
pub use parser::{
    read_container, GGMLType, GGUFContainer, GGUFParser, GGUFTensor, GGUFValue, GGUFValueType,
    GGUF_DEFAULT_ALIGNMENT, GGUF_MAGIC,
};
pub use writer::{serialize_container, write_container};
