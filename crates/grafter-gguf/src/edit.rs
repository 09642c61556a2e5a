//! Structural edits on GGUF containers
//!
//! Two operations, both pure container-to-container transforms:
//!
//! - [`insert_bias`] adds a zero-filled vector tensor after an anchor
//!   tensor, sized from the model's embedding width.
//! - [`split_fused`] splits fused gate/up feed-forward projections into
//!   two tensors of half the width.
//!
//! Neither mutates its input; untouched tensors and all metadata are
//! carried into the result bit-identical and in original order.

use crate::parser::{GGMLType, GGUFContainer, GGUFTensor};
use grafter_core::{DataType, EditError};
use std::collections::HashSet;

/// Tensor name inserted by default
pub const DEFAULT_BIAS_NAME: &str = "output_norm.bias";

/// Anchor the inserted tensor is placed after by default
pub const DEFAULT_BIAS_ANCHOR: &str = "output_norm.weight";

/// Name suffix identifying fused feed-forward tensors by default
pub const DEFAULT_FUSED_SUFFIX: &str = "ffn_up.weight";

/// Replacement suffix for the first half of a split tensor by default
pub const DEFAULT_GATE_SUFFIX: &str = "ffn_gate.weight";

/// Parameters for the bias-insertion edit
#[derive(Debug, Clone)]
pub struct BiasSpec {
    /// Name of the tensor to insert
    pub name: String,
    /// Tensor after which the new one is placed; appended at the end if
    /// no tensor with this name exists
    pub anchor: String,
    /// Vector length; when `None` it is resolved from
    /// `{architecture}.embedding_length` metadata
    pub dimension: Option<u64>,
}

impl Default for BiasSpec {
    fn default() -> Self {
        Self {
            name: DEFAULT_BIAS_NAME.into(),
            anchor: DEFAULT_BIAS_ANCHOR.into(),
            dimension: None,
        }
    }
}

/// Result of a bias-insertion edit
#[derive(Debug)]
pub enum BiasOutcome {
    /// A new container with exactly one more tensor than the source
    Inserted(GGUFContainer),
    /// The target tensor already exists; the source is unchanged
    AlreadyPresent,
}

/// Parameters for the tensor-split edit
#[derive(Debug, Clone)]
pub struct SplitSpec {
    /// Name suffix identifying candidate fused tensors
    pub suffix: String,
    /// Suffix substituted into the first half's name
    pub replacement: String,
    /// Expected innermost-axis length of fused tensors; when `None` it is
    /// resolved as `2 x {architecture}.feed_forward_length` from metadata
    pub fused_width: Option<u64>,
}

impl Default for SplitSpec {
    fn default() -> Self {
        Self {
            suffix: DEFAULT_FUSED_SUFFIX.into(),
            replacement: DEFAULT_GATE_SUFFIX.into(),
            fused_width: None,
        }
    }
}

/// Summary of a completed split edit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SplitReport {
    /// Number of fused tensors that were split
    pub tensors_split: usize,
    /// Tensor count of the resulting container
    pub total_tensors: usize,
}

/// Insert a zero-filled bias vector into the tensor sequence
///
/// The new tensor is F32 with shape `[dimension]`, placed immediately
/// after the anchor tensor (or at the end of the stream when the anchor
/// is absent). Returns [`BiasOutcome::AlreadyPresent`] without building
/// anything when the target name already exists.
pub fn insert_bias(container: &GGUFContainer, spec: &BiasSpec) -> Result<BiasOutcome, EditError> {
    if container.has_tensor(&spec.name) {
        return Ok(BiasOutcome::AlreadyPresent);
    }

    let dimension = match spec.dimension {
        Some(d) => d,
        None => embedding_length(container)?,
    };

    let byte_len = usize::try_from(dimension)
        .ok()
        .and_then(|d| d.checked_mul(GGMLType::F32.type_size()))
        .filter(|_| dimension > 0)
        .ok_or(EditError::InvalidDimension(dimension))?;

    let data = vec![0u8; byte_len];
    let bias = GGUFTensor {
        name: spec.name.clone(),
        dimensions: vec![dimension],
        ggml_type: GGMLType::F32,
        data,
    };

    let mut tensors = container.tensors.clone();
    let position = tensors
        .iter()
        .position(|t| t.name == spec.anchor)
        .map(|i| i + 1)
        .unwrap_or(tensors.len());
    tensors.insert(position, bias);

    Ok(BiasOutcome::Inserted(container.with_tensors(tensors)))
}

/// Split fused feed-forward tensors into gate and up halves
///
/// A tensor matches when its name ends with the configured suffix, it is
/// rank 2, and its innermost axis equals the fused width. Each match is
/// replaced by two adjacent tensors of half the width: the first half
/// under the transformed name, the second half under the original name.
/// Suffix matches of any other width pass through unchanged, so running
/// the edit on an already-split container splits nothing.
pub fn split_fused(
    container: &GGUFContainer,
    spec: &SplitSpec,
) -> Result<(GGUFContainer, SplitReport), EditError> {
    let fused_width = match spec.fused_width {
        Some(w) => w,
        None => fused_width_from_metadata(container)?,
    };
    if fused_width == 0 || fused_width % 2 != 0 {
        return Err(EditError::InvalidFusedWidth(fused_width));
    }

    let mut names: HashSet<String> = container.tensors.iter().map(|t| t.name.clone()).collect();

    let mut tensors = Vec::with_capacity(container.tensors.len());
    let mut tensors_split = 0;
    for tensor in &container.tensors {
        if !is_fused(tensor, &spec.suffix, fused_width) {
            tensors.push(tensor.clone());
            continue;
        }

        let element_size = DataType::from(tensor.ggml_type)
            .element_size()
            .ok_or_else(|| EditError::UnsupportedLayout {
                name: tensor.name.clone(),
                dtype: format!("{:?}", tensor.ggml_type),
            })?;

        let gate_name = format!(
            "{}{}",
            &tensor.name[..tensor.name.len() - spec.suffix.len()],
            spec.replacement
        );
        if !names.insert(gate_name.clone()) {
            return Err(EditError::DuplicateTensor(gate_name));
        }

        let (gate_data, up_data) = halve_rows(&tensor.data, fused_width as usize * element_size);
        let half_dimensions = vec![fused_width / 2, tensor.dimensions[1]];

        tensors.push(GGUFTensor {
            name: gate_name,
            dimensions: half_dimensions.clone(),
            ggml_type: tensor.ggml_type,
            data: gate_data,
        });
        tensors.push(GGUFTensor {
            name: tensor.name.clone(),
            dimensions: half_dimensions,
            ggml_type: tensor.ggml_type,
            data: up_data,
        });
        tensors_split += 1;
    }

    let report = SplitReport {
        tensors_split,
        total_tensors: tensors.len(),
    };
    Ok((container.with_tensors(tensors), report))
}

/// Resolve the model's embedding width from metadata
///
/// Requires `general.architecture` and `{arch}.embedding_length`; either
/// being absent is an error, never a guessed default.
pub fn embedding_length(container: &GGUFContainer) -> Result<u64, EditError> {
    let arch = required_string(container, "general.architecture")?;
    let key = format!("{}.embedding_length", arch);
    required_u64(container, &key)
}

/// Resolve the expected fused width from metadata
///
/// Fused gate/up projections are two feed-forward matrices side by side,
/// so the width is `2 x {arch}.feed_forward_length`.
pub fn fused_width_from_metadata(container: &GGUFContainer) -> Result<u64, EditError> {
    let arch = required_string(container, "general.architecture")?;
    let key = format!("{}.feed_forward_length", arch);
    Ok(required_u64(container, &key)?.saturating_mul(2))
}

fn is_fused(tensor: &GGUFTensor, suffix: &str, fused_width: u64) -> bool {
    tensor.name.ends_with(suffix)
        && tensor.dimensions.len() == 2
        && tensor.dimensions[0] == fused_width
}

/// Split row-major data into first-half and second-half column copies
fn halve_rows(data: &[u8], row_bytes: usize) -> (Vec<u8>, Vec<u8>) {
    let half = row_bytes / 2;
    let mut first = Vec::with_capacity(data.len() / 2);
    let mut second = Vec::with_capacity(data.len() / 2);
    for row in data.chunks_exact(row_bytes) {
        first.extend_from_slice(&row[..half]);
        second.extend_from_slice(&row[half..]);
    }
    (first, second)
}

fn required_string<'a>(container: &'a GGUFContainer, key: &str) -> Result<&'a str, EditError> {
    let value = container
        .metadata_value(key)
        .ok_or_else(|| EditError::MissingMetadata(key.to_string()))?;
    value.as_string().ok_or_else(|| EditError::WrongMetadataType {
        key: key.to_string(),
        expected: "string",
    })
}

fn required_u64(container: &GGUFContainer, key: &str) -> Result<u64, EditError> {
    let value = container
        .metadata_value(key)
        .ok_or_else(|| EditError::MissingMetadata(key.to_string()))?;
    value.as_u64().ok_or_else(|| EditError::WrongMetadataType {
        key: key.to_string(),
        expected: "unsigned integer",
    })
}
