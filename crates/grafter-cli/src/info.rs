//! `grafter info` command implementation

use anyhow::{Context, Result};
use grafter_gguf::{GGUFContainer, GGUFParser, GGUFValue};
use serde::Serialize;
use std::fs;
use std::path::Path;

#[derive(Serialize)]
struct TensorSummary {
    name: String,
    shape: Vec<u64>,
    dtype: String,
    bytes: usize,
}

#[derive(Serialize)]
struct ContainerSummary {
    file: String,
    size: usize,
    version: u32,
    alignment: u64,
    tensor_count: usize,
    metadata_count: usize,
    tensors: Vec<TensorSummary>,
}

pub fn run(model: &Path, show_tensors: bool, json: bool) -> Result<()> {
    let data = fs::read(model).context("Failed to read model file")?;
    let container = GGUFParser::new()
        .parse(&data)
        .context("Failed to parse GGUF container")?;

    if json {
        let summary = summarize(model, data.len(), &container);
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!("Model Information");
    println!("=================");
    println!();
    println!("File:       {}", model.display());
    println!("Size:       {} bytes", data.len());
    println!("Version:    GGUF v{}", container.version);
    println!("Alignment:  {}", container.alignment);
    println!("Tensors:    {}", container.tensors.len());
    println!("Metadata:   {} entries", container.metadata.len());

    println!();
    println!("Metadata");
    println!("--------");
    for (key, value) in &container.metadata {
        println!("{}: {}", key, format_value(value));
    }

    // Fused gate/up projections are the usual reason a model refuses to
    // load; surface them without making the caller scan the full listing.
    let fused: Vec<&grafter_gguf::GGUFTensor> = container
        .tensors
        .iter()
        .filter(|t| t.name.ends_with(grafter_gguf::DEFAULT_FUSED_SUFFIX) && t.dimensions.len() == 2)
        .collect();
    if !fused.is_empty() {
        println!();
        println!("Feed-forward up projections");
        println!("---------------------------");
        for tensor in fused {
            println!(
                "{}: {:?} {:?}",
                tensor.name, tensor.dimensions, tensor.ggml_type
            );
        }
    }

    if show_tensors {
        println!();
        println!("Tensors");
        println!("-------");
        for (i, tensor) in container.tensors.iter().enumerate() {
            println!(
                "[{}] {} {:?} {:?} ({} bytes)",
                i,
                tensor.name,
                tensor.dimensions,
                tensor.ggml_type,
                tensor.data.len()
            );
        }
    }

    Ok(())
}

fn summarize(model: &Path, size: usize, container: &GGUFContainer) -> ContainerSummary {
    ContainerSummary {
        file: model.display().to_string(),
        size,
        version: container.version,
        alignment: container.alignment,
        tensor_count: container.tensors.len(),
        metadata_count: container.metadata.len(),
        tensors: container
            .tensors
            .iter()
            .map(|t| TensorSummary {
                name: t.name.clone(),
                shape: t.dimensions.clone(),
                dtype: format!("{:?}", t.ggml_type),
                bytes: t.data.len(),
            })
            .collect(),
    }
}

/// Compact one-line rendering of a metadata value
///
/// Long strings are truncated and arrays are summarized by length; token
/// vocabularies run to tens of thousands of entries.
fn format_value(value: &GGUFValue) -> String {
    match value {
        GGUFValue::UInt8(v) => v.to_string(),
        GGUFValue::Int8(v) => v.to_string(),
        GGUFValue::UInt16(v) => v.to_string(),
        GGUFValue::Int16(v) => v.to_string(),
        GGUFValue::UInt32(v) => v.to_string(),
        GGUFValue::Int32(v) => v.to_string(),
        GGUFValue::Float32(v) => v.to_string(),
        GGUFValue::Bool(v) => v.to_string(),
        GGUFValue::String(s) => {
            if s.len() > 60 {
                let mut end = 57;
                while !s.is_char_boundary(end) {
                    end -= 1;
                }
                format!("\"{}...\"", &s[..end])
            } else {
                format!("\"{}\"", s)
            }
        }
        GGUFValue::Array(element_type, values) => {
            format!("[{} x {:?}]", values.len(), element_type)
        }
        GGUFValue::UInt64(v) => v.to_string(),
        GGUFValue::Int64(v) => v.to_string(),
        GGUFValue::Float64(v) => v.to_string(),
    }
}
