//! GGUF container parser
//!
//! Parses GGUF model files used by llama.cpp and compatible tools.
//! Supports GGUF v2 and v3 formats.
//!
//! Metadata is kept as an order-preserving key/value list: some readers
//! iterate entries by position, and repeated keys must survive a copy
//! unchanged. Tensor names, by contrast, must be unique.

use byteorder::{LittleEndian, ReadBytesExt};
use grafter_core::{DataType, FormatError, GrafterError};
use std::collections::HashSet;
use std::io::{Cursor, Read};
use std::path::Path;

/// GGUF file magic bytes (little-endian "GGUF")
pub const GGUF_MAGIC: u32 = 0x4655_4747;

/// Data-region alignment when `general.alignment` is absent
pub const GGUF_DEFAULT_ALIGNMENT: u64 = 32;

/// Maximum tensor rank accepted by the parser
const MAX_DIMENSIONS: u32 = 4;

/// Maximum metadata array nesting accepted by the parser
const MAX_ARRAY_DEPTH: u32 = 8;

/// GGUF metadata value type identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum GGUFValueType {
    UInt8 = 0,
    Int8 = 1,
    UInt16 = 2,
    Int16 = 3,
    UInt32 = 4,
    Int32 = 5,
    Float32 = 6,
    Bool = 7,
    String = 8,
    Array = 9,
    UInt64 = 10,
    Int64 = 11,
    Float64 = 12,
}

impl GGUFValueType {
    /// Convert from raw type tag
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(Self::UInt8),
            1 => Some(Self::Int8),
            2 => Some(Self::UInt16),
            3 => Some(Self::Int16),
            4 => Some(Self::UInt32),
            5 => Some(Self::Int32),
            6 => Some(Self::Float32),
            7 => Some(Self::Bool),
            8 => Some(Self::String),
            9 => Some(Self::Array),
            10 => Some(Self::UInt64),
            11 => Some(Self::Int64),
            12 => Some(Self::Float64),
            _ => None,
        }
    }

    /// Raw type tag for serialization
    pub fn as_u32(self) -> u32 {
        self as u32
    }
}

/// GGUF metadata value
///
/// Arrays carry their element type tag explicitly so that empty arrays
/// round-trip byte-exactly.
#[derive(Debug, Clone, PartialEq)]
pub enum GGUFValue {
    UInt8(u8),
    Int8(i8),
    UInt16(u16),
    Int16(i16),
    UInt32(u32),
    Int32(i32),
    Float32(f32),
    Bool(bool),
    String(String),
    Array(GGUFValueType, Vec<GGUFValue>),
    UInt64(u64),
    Int64(i64),
    Float64(f64),
}

impl GGUFValue {
    /// The type tag this value serializes under
    pub fn value_type(&self) -> GGUFValueType {
        match self {
            GGUFValue::UInt8(_) => GGUFValueType::UInt8,
            GGUFValue::Int8(_) => GGUFValueType::Int8,
            GGUFValue::UInt16(_) => GGUFValueType::UInt16,
            GGUFValue::Int16(_) => GGUFValueType::Int16,
            GGUFValue::UInt32(_) => GGUFValueType::UInt32,
            GGUFValue::Int32(_) => GGUFValueType::Int32,
            GGUFValue::Float32(_) => GGUFValueType::Float32,
            GGUFValue::Bool(_) => GGUFValueType::Bool,
            GGUFValue::String(_) => GGUFValueType::String,
            GGUFValue::Array(_, _) => GGUFValueType::Array,
            GGUFValue::UInt64(_) => GGUFValueType::UInt64,
            GGUFValue::Int64(_) => GGUFValueType::Int64,
            GGUFValue::Float64(_) => GGUFValueType::Float64,
        }
    }

    /// Get string value if this is a string
    pub fn as_string(&self) -> Option<&str> {
        if let GGUFValue::String(s) = self {
            Some(s)
        } else {
            None
        }
    }

    /// Get u64 value, widening smaller unsigned integers
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            GGUFValue::UInt64(v) => Some(*v),
            GGUFValue::UInt32(v) => Some(u64::from(*v)),
            GGUFValue::UInt16(v) => Some(u64::from(*v)),
            GGUFValue::UInt8(v) => Some(u64::from(*v)),
            _ => None,
        }
    }
}

/// GGML tensor types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum GGMLType {
    F32 = 0,
    F16 = 1,
    Q4_0 = 2,
    Q4_1 = 3,
    Q5_0 = 6,
    Q5_1 = 7,
    Q8_0 = 8,
    Q8_1 = 9,
    Q2K = 10,
    Q3K = 11,
    Q4K = 12,
    Q5K = 13,
    Q6K = 14,
    Q8K = 15,
    IQ2XXS = 16,
    IQ2XS = 17,
    IQ3XXS = 18,
    IQ1S = 19,
    IQ4NL = 20,
    IQ3S = 21,
    IQ2S = 22,
    IQ4XS = 23,
    I8 = 24,
    I16 = 25,
    I32 = 26,
    I64 = 27,
    F64 = 28,
    IQ1M = 29,
    BF16 = 30,
}

impl GGMLType {
    /// Convert from raw value
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(Self::F32),
            1 => Some(Self::F16),
            2 => Some(Self::Q4_0),
            3 => Some(Self::Q4_1),
            6 => Some(Self::Q5_0),
            7 => Some(Self::Q5_1),
            8 => Some(Self::Q8_0),
            9 => Some(Self::Q8_1),
            10 => Some(Self::Q2K),
            11 => Some(Self::Q3K),
            12 => Some(Self::Q4K),
            13 => Some(Self::Q5K),
            14 => Some(Self::Q6K),
            15 => Some(Self::Q8K),
            16 => Some(Self::IQ2XXS),
            17 => Some(Self::IQ2XS),
            18 => Some(Self::IQ3XXS),
            19 => Some(Self::IQ1S),
            20 => Some(Self::IQ4NL),
            21 => Some(Self::IQ3S),
            22 => Some(Self::IQ2S),
            23 => Some(Self::IQ4XS),
            24 => Some(Self::I8),
            25 => Some(Self::I16),
            26 => Some(Self::I32),
            27 => Some(Self::I64),
            28 => Some(Self::F64),
            29 => Some(Self::IQ1M),
            30 => Some(Self::BF16),
            _ => None,
        }
    }

    /// Raw type tag for serialization
    pub fn as_u32(self) -> u32 {
        self as u32
    }

    /// Get the block size for this type (values per stored block)
    pub fn block_size(&self) -> usize {
        match self {
            GGMLType::F32 | GGMLType::F16 | GGMLType::BF16 | GGMLType::F64 => 1,
            GGMLType::I8 | GGMLType::I16 | GGMLType::I32 | GGMLType::I64 => 1,
            GGMLType::Q4_0 | GGMLType::Q4_1 | GGMLType::Q5_0 | GGMLType::Q5_1 => 32,
            GGMLType::Q8_0 | GGMLType::Q8_1 => 32,
            GGMLType::Q2K | GGMLType::Q3K | GGMLType::Q4K => 256,
            GGMLType::Q5K | GGMLType::Q6K | GGMLType::Q8K => 256,
            GGMLType::IQ4NL => 32,
            GGMLType::IQ2XXS
            | GGMLType::IQ2XS
            | GGMLType::IQ3XXS
            | GGMLType::IQ1S
            | GGMLType::IQ3S
            | GGMLType::IQ2S
            | GGMLType::IQ4XS
            | GGMLType::IQ1M => 256,
        }
    }

    /// Get bytes per block for this type
    pub fn type_size(&self) -> usize {
        match self {
            GGMLType::F32 => 4,
            GGMLType::F16 | GGMLType::BF16 => 2,
            GGMLType::F64 => 8,
            GGMLType::I8 => 1,
            GGMLType::I16 => 2,
            GGMLType::I32 => 4,
            GGMLType::I64 => 8,
            GGMLType::Q4_0 => 18,
            GGMLType::Q4_1 => 20,
            GGMLType::Q5_0 => 22,
            GGMLType::Q5_1 => 24,
            GGMLType::Q8_0 => 34,
            GGMLType::Q8_1 => 36,
            GGMLType::Q2K => 84,
            GGMLType::Q3K => 110,
            GGMLType::Q4K => 144,
            GGMLType::Q5K => 176,
            GGMLType::Q6K => 210,
            GGMLType::Q8K => 292,
            GGMLType::IQ2XXS => 66,
            GGMLType::IQ2XS => 74,
            GGMLType::IQ3XXS => 98,
            GGMLType::IQ1S => 50,
            GGMLType::IQ4NL => 18,
            GGMLType::IQ3S => 110,
            GGMLType::IQ2S => 82,
            GGMLType::IQ4XS => 136,
            GGMLType::IQ1M => 56,
        }
    }

    /// Check if this type stores multiple values per compressed block
    pub fn is_quantized(&self) -> bool {
        self.block_size() > 1
    }
}

impl From<GGMLType> for DataType {
    fn from(t: GGMLType) -> Self {
        match t {
            GGMLType::F32 => DataType::Float32,
            GGMLType::F16 => DataType::Float16,
            GGMLType::BF16 => DataType::BFloat16,
            GGMLType::F64 => DataType::Float64,
            GGMLType::I8 => DataType::Int8,
            GGMLType::I16 => DataType::Int16,
            GGMLType::I32 => DataType::Int32,
            GGMLType::I64 => DataType::Int64,
            GGMLType::Q4_0 => DataType::Q4_0,
            GGMLType::Q4_1 => DataType::Q4_1,
            GGMLType::Q5_0 => DataType::Q5_0,
            GGMLType::Q5_1 => DataType::Q5_1,
            GGMLType::Q8_0 => DataType::Q8_0,
            GGMLType::Q8_1 => DataType::Q8_1,
            GGMLType::Q2K => DataType::Q2K,
            GGMLType::Q3K => DataType::Q3K,
            GGMLType::Q4K => DataType::Q4K,
            GGMLType::Q5K => DataType::Q5K,
            GGMLType::Q6K => DataType::Q6K,
            GGMLType::Q8K => DataType::Q8K,
            // IQ families map onto the nearest block family; what matters
            // downstream is that they stay non-dense.
            GGMLType::IQ1S | GGMLType::IQ1M => DataType::Q2K,
            GGMLType::IQ2XXS | GGMLType::IQ2XS | GGMLType::IQ2S => DataType::Q2K,
            GGMLType::IQ3XXS | GGMLType::IQ3S => DataType::Q3K,
            GGMLType::IQ4NL | GGMLType::IQ4XS => DataType::Q4K,
        }
    }
}

/// A tensor in a GGUF container
#[derive(Debug, Clone, PartialEq)]
pub struct GGUFTensor {
    /// Tensor name (unique within a container)
    pub name: String,
    /// Shape dimensions in GGUF on-disk order (innermost axis first)
    pub dimensions: Vec<u64>,
    /// GGML element encoding
    pub ggml_type: GGMLType,
    /// Raw tensor bytes, sized by shape and encoding
    pub data: Vec<u8>,
}

impl GGUFTensor {
    /// Total number of elements
    pub fn element_count(&self) -> u64 {
        self.dimensions.iter().product()
    }
}

/// Parsed GGUF container
///
/// An immutable snapshot of one file. Edits build a new container rather
/// than mutating this one.
#[derive(Debug, Clone, PartialEq)]
pub struct GGUFContainer {
    /// GGUF format version (2 or 3)
    pub version: u32,
    /// Metadata key-value pairs, in file order
    pub metadata: Vec<(String, GGUFValue)>,
    /// Tensors, in file order
    pub tensors: Vec<GGUFTensor>,
    /// Data-region alignment (from `general.alignment`, default 32)
    pub alignment: u64,
}

impl GGUFContainer {
    /// Look up a metadata value by key (first occurrence wins)
    pub fn metadata_value(&self, key: &str) -> Option<&GGUFValue> {
        self.metadata
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    /// Look up a tensor by name
    pub fn tensor(&self, name: &str) -> Option<&GGUFTensor> {
        self.tensors.iter().find(|t| t.name == name)
    }

    /// Check whether a tensor with this name exists
    pub fn has_tensor(&self, name: &str) -> bool {
        self.tensor(name).is_some()
    }

    /// New container with the same version, metadata, and alignment but a
    /// different tensor sequence
    pub fn with_tensors(&self, tensors: Vec<GGUFTensor>) -> GGUFContainer {
        GGUFContainer {
            version: self.version,
            metadata: self.metadata.clone(),
            tensors,
            alignment: self.alignment,
        }
    }
}

/// GGUF container parser
pub struct GGUFParser;

impl GGUFParser {
    /// Create a new parser
    pub fn new() -> Self {
        Self
    }

    /// Parse a GGUF container from bytes
    pub fn parse(&self, data: &[u8]) -> Result<GGUFContainer, FormatError> {
        if data.len() < 24 {
            return Err(FormatError::Truncated("header".into()));
        }

        let mut cursor = Cursor::new(data);

        let magic = cursor.read_u32::<LittleEndian>()?;
        if magic != GGUF_MAGIC {
            return Err(FormatError::InvalidMagic);
        }

        let version = cursor.read_u32::<LittleEndian>()?;
        if !(2..=3).contains(&version) {
            return Err(FormatError::UnsupportedVersion(version));
        }

        let tensor_count = cursor.read_u64::<LittleEndian>()?;
        let metadata_kv_count = cursor.read_u64::<LittleEndian>()?;

        // Each tensor descriptor and metadata entry occupies at least a
        // handful of bytes; counts beyond the file size are garbage.
        let limit = data.len() as u64;
        if tensor_count > limit || metadata_kv_count > limit {
            return Err(FormatError::Malformed(format!(
                "implausible counts: {} tensors, {} metadata entries in {} bytes",
                tensor_count, metadata_kv_count, limit
            )));
        }

        let mut metadata = Vec::with_capacity(metadata_kv_count as usize);
        for _ in 0..metadata_kv_count {
            let key = read_string(&mut cursor)?;
            let value = read_tagged_value(&mut cursor, 0)?;
            metadata.push((key, value));
        }

        let alignment = metadata
            .iter()
            .find(|(k, _)| k == "general.alignment")
            .and_then(|(_, v)| v.as_u64())
            .unwrap_or(GGUF_DEFAULT_ALIGNMENT);
        if alignment == 0 || !alignment.is_power_of_two() {
            return Err(FormatError::Malformed(format!(
                "invalid alignment: {}",
                alignment
            )));
        }

        // Descriptors are contiguous before the data region; all of them
        // must be read before any tensor bytes can be located.
        let mut infos = Vec::with_capacity(tensor_count as usize);
        let mut seen = HashSet::new();
        for _ in 0..tensor_count {
            let info = read_tensor_info(&mut cursor)?;
            if !seen.insert(info.name.clone()) {
                return Err(FormatError::DuplicateTensor(info.name));
            }
            infos.push(info);
        }

        let data_start = align_offset(cursor.position(), alignment);

        let mut tensors = Vec::with_capacity(infos.len());
        for info in infos {
            let size = tensor_data_size(&info.dimensions, info.ggml_type).ok_or_else(|| {
                FormatError::Malformed(format!("tensor {} overflows size arithmetic", info.name))
            })?;
            let begin = data_start.checked_add(info.offset).ok_or_else(|| {
                FormatError::Malformed(format!("tensor {} offset overflows", info.name))
            })?;
            let end = begin.checked_add(size).ok_or_else(|| {
                FormatError::Malformed(format!("tensor {} extent overflows", info.name))
            })?;
            if end > data.len() as u64 {
                return Err(FormatError::Truncated(format!(
                    "tensor data for {}",
                    info.name
                )));
            }
            tensors.push(GGUFTensor {
                name: info.name,
                dimensions: info.dimensions,
                ggml_type: info.ggml_type,
                data: data[begin as usize..end as usize].to_vec(),
            });
        }

        Ok(GGUFContainer {
            version,
            metadata,
            tensors,
            alignment,
        })
    }
}

impl Default for GGUFParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Read a container from a file path
pub fn read_container(path: &Path) -> Result<GGUFContainer, GrafterError> {
    let data = std::fs::read(path)?;
    Ok(GGUFParser::new().parse(&data)?)
}

/// Temporary struct for tensor info during parsing
struct TensorInfo {
    name: String,
    dimensions: Vec<u64>,
    ggml_type: GGMLType,
    offset: u64,
}

/// Read a tensor descriptor (no data)
fn read_tensor_info(cursor: &mut Cursor<&[u8]>) -> Result<TensorInfo, FormatError> {
    let name = read_string(cursor)?;
    let n_dimensions = cursor.read_u32::<LittleEndian>()?;
    if n_dimensions == 0 || n_dimensions > MAX_DIMENSIONS {
        return Err(FormatError::Malformed(format!(
            "tensor {} has rank {}",
            name, n_dimensions
        )));
    }

    let mut dimensions = Vec::with_capacity(n_dimensions as usize);
    for _ in 0..n_dimensions {
        dimensions.push(cursor.read_u64::<LittleEndian>()?);
    }

    let raw = cursor.read_u32::<LittleEndian>()?;
    let ggml_type = GGMLType::from_u32(raw).ok_or(FormatError::UnknownTensorType(raw))?;

    let offset = cursor.read_u64::<LittleEndian>()?;

    Ok(TensorInfo {
        name,
        dimensions,
        ggml_type,
        offset,
    })
}

/// Read a type tag followed by its value
fn read_tagged_value(cursor: &mut Cursor<&[u8]>, depth: u32) -> Result<GGUFValue, FormatError> {
    let raw = cursor.read_u32::<LittleEndian>()?;
    let value_type = GGUFValueType::from_u32(raw).ok_or(FormatError::UnknownValueType(raw))?;
    read_value(cursor, value_type, depth)
}

/// Read a value of a known type
fn read_value(
    cursor: &mut Cursor<&[u8]>,
    value_type: GGUFValueType,
    depth: u32,
) -> Result<GGUFValue, FormatError> {
    match value_type {
        GGUFValueType::UInt8 => Ok(GGUFValue::UInt8(cursor.read_u8()?)),
        GGUFValueType::Int8 => Ok(GGUFValue::Int8(cursor.read_i8()?)),
        GGUFValueType::UInt16 => Ok(GGUFValue::UInt16(cursor.read_u16::<LittleEndian>()?)),
        GGUFValueType::Int16 => Ok(GGUFValue::Int16(cursor.read_i16::<LittleEndian>()?)),
        GGUFValueType::UInt32 => Ok(GGUFValue::UInt32(cursor.read_u32::<LittleEndian>()?)),
        GGUFValueType::Int32 => Ok(GGUFValue::Int32(cursor.read_i32::<LittleEndian>()?)),
        GGUFValueType::Float32 => Ok(GGUFValue::Float32(cursor.read_f32::<LittleEndian>()?)),
        GGUFValueType::Bool => Ok(GGUFValue::Bool(cursor.read_u8()? != 0)),
        GGUFValueType::String => Ok(GGUFValue::String(read_string(cursor)?)),
        GGUFValueType::Array => {
            if depth >= MAX_ARRAY_DEPTH {
                return Err(FormatError::Malformed("array nesting too deep".into()));
            }
            let raw = cursor.read_u32::<LittleEndian>()?;
            let element_type =
                GGUFValueType::from_u32(raw).ok_or(FormatError::UnknownValueType(raw))?;
            let len = cursor.read_u64::<LittleEndian>()?;
            if len > remaining(cursor) {
                return Err(FormatError::Truncated("metadata array".into()));
            }
            let mut values = Vec::with_capacity(len as usize);
            for _ in 0..len {
                values.push(read_value(cursor, element_type, depth + 1)?);
            }
            Ok(GGUFValue::Array(element_type, values))
        }
        GGUFValueType::UInt64 => Ok(GGUFValue::UInt64(cursor.read_u64::<LittleEndian>()?)),
        GGUFValueType::Int64 => Ok(GGUFValue::Int64(cursor.read_i64::<LittleEndian>()?)),
        GGUFValueType::Float64 => Ok(GGUFValue::Float64(cursor.read_f64::<LittleEndian>()?)),
    }
}

/// Read a length-prefixed string
fn read_string(cursor: &mut Cursor<&[u8]>) -> Result<String, FormatError> {
    let len = cursor.read_u64::<LittleEndian>()?;
    if len > remaining(cursor) {
        return Err(FormatError::Truncated("string".into()));
    }
    let mut buf = vec![0u8; len as usize];
    cursor.read_exact(&mut buf)?;
    String::from_utf8(buf).map_err(|e| FormatError::Malformed(format!("invalid UTF-8: {}", e)))
}

/// Bytes left in the cursor
fn remaining(cursor: &Cursor<&[u8]>) -> u64 {
    (cursor.get_ref().len() as u64).saturating_sub(cursor.position())
}

/// Byte size of a tensor with the given shape and encoding
///
/// Quantized encodings round the element count up to whole blocks.
pub(crate) fn tensor_data_size(dimensions: &[u64], ggml_type: GGMLType) -> Option<u64> {
    let mut n_elements: u64 = 1;
    for &d in dimensions {
        n_elements = n_elements.checked_mul(d)?;
    }
    if n_elements == 0 {
        return Some(0);
    }
    let block_size = ggml_type.block_size() as u64;
    let type_size = ggml_type.type_size() as u64;
    let n_blocks = n_elements.div_ceil(block_size);
    n_blocks.checked_mul(type_size)
}

/// Align offset to boundary
pub(crate) fn align_offset(offset: u64, alignment: u64) -> u64 {
    offset.div_ceil(alignment) * alignment
}
