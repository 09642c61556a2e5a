//! GGUF container writer
//!
//! Serializes a [`GGUFContainer`] back to the on-disk layout: header,
//! metadata in stored order, tensor descriptors with offsets recomputed
//! from the cumulative aligned size of preceding tensors, then the padded
//! data region.
//!
//! Re-parsing a written file yields a container equal to the one that was
//! serialized.

use crate::parser::{align_offset, tensor_data_size, GGUFContainer, GGUFValue};
use byteorder::{LittleEndian, WriteBytesExt};
use grafter_core::GrafterError;
use std::io::{self, Write};
use std::path::Path;
use tempfile::NamedTempFile;

/// Serialize a container to bytes
pub fn serialize_container(container: &GGUFContainer) -> Result<Vec<u8>, io::Error> {
    if container.alignment == 0 || !container.alignment.is_power_of_two() {
        return Err(invalid_data(format!(
            "invalid alignment: {}",
            container.alignment
        )));
    }

    // Tensor buffers must match their declared shape and encoding before
    // anything is written; a half-serialized file helps nobody.
    for tensor in &container.tensors {
        let expected = tensor_data_size(&tensor.dimensions, tensor.ggml_type)
            .ok_or_else(|| invalid_data(format!("tensor {} overflows size arithmetic", tensor.name)))?;
        if tensor.data.len() as u64 != expected {
            return Err(invalid_data(format!(
                "tensor {} has {} data bytes, shape and type require {}",
                tensor.name,
                tensor.data.len(),
                expected
            )));
        }
    }

    let mut buf = Vec::new();

    buf.write_u32::<LittleEndian>(crate::parser::GGUF_MAGIC)?;
    buf.write_u32::<LittleEndian>(container.version)?;
    buf.write_u64::<LittleEndian>(container.tensors.len() as u64)?;
    buf.write_u64::<LittleEndian>(container.metadata.len() as u64)?;

    for (key, value) in &container.metadata {
        write_string(&mut buf, key)?;
        write_tagged_value(&mut buf, value)?;
    }

    // Descriptor offsets are relative to the aligned start of the data
    // region and account for inter-tensor padding.
    let alignment = container.alignment;
    let mut data_offset: u64 = 0;
    for tensor in &container.tensors {
        write_string(&mut buf, &tensor.name)?;
        buf.write_u32::<LittleEndian>(tensor.dimensions.len() as u32)?;
        for &dim in &tensor.dimensions {
            buf.write_u64::<LittleEndian>(dim)?;
        }
        buf.write_u32::<LittleEndian>(tensor.ggml_type.as_u32())?;
        buf.write_u64::<LittleEndian>(data_offset)?;
        data_offset = align_offset(data_offset + tensor.data.len() as u64, alignment);
    }

    pad_to(&mut buf, alignment);

    for (i, tensor) in container.tensors.iter().enumerate() {
        buf.extend_from_slice(&tensor.data);
        if i + 1 < container.tensors.len() {
            pad_to(&mut buf, alignment);
        }
    }

    Ok(buf)
}

/// Write a container to a file path
///
/// Serializes into a temporary file in the destination directory and
/// renames it into place, so the destination never holds a half-written
/// container.
pub fn write_container(path: &Path, container: &GGUFContainer) -> Result<(), GrafterError> {
    let bytes = serialize_container(container)?;

    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(&bytes)?;
    tmp.flush()?;
    tmp.persist(path).map_err(|e| GrafterError::Io(e.error))?;
    Ok(())
}

/// Write a length-prefixed string
fn write_string<W: Write>(writer: &mut W, s: &str) -> Result<(), io::Error> {
    let bytes = s.as_bytes();
    writer.write_u64::<LittleEndian>(bytes.len() as u64)?;
    writer.write_all(bytes)?;
    Ok(())
}

/// Write a type tag followed by the value payload
fn write_tagged_value<W: Write>(writer: &mut W, value: &GGUFValue) -> Result<(), io::Error> {
    writer.write_u32::<LittleEndian>(value.value_type().as_u32())?;
    write_value_payload(writer, value)
}

/// Write a value payload without its own type tag
///
/// Array elements share the array's element tag; only the payload is
/// repeated per element.
fn write_value_payload<W: Write>(writer: &mut W, value: &GGUFValue) -> Result<(), io::Error> {
    match value {
        GGUFValue::UInt8(v) => writer.write_u8(*v),
        GGUFValue::Int8(v) => writer.write_i8(*v),
        GGUFValue::UInt16(v) => writer.write_u16::<LittleEndian>(*v),
        GGUFValue::Int16(v) => writer.write_i16::<LittleEndian>(*v),
        GGUFValue::UInt32(v) => writer.write_u32::<LittleEndian>(*v),
        GGUFValue::Int32(v) => writer.write_i32::<LittleEndian>(*v),
        GGUFValue::Float32(v) => writer.write_f32::<LittleEndian>(*v),
        GGUFValue::Bool(v) => writer.write_u8(u8::from(*v)),
        GGUFValue::String(s) => write_string(writer, s),
        GGUFValue::Array(element_type, values) => {
            writer.write_u32::<LittleEndian>(element_type.as_u32())?;
            writer.write_u64::<LittleEndian>(values.len() as u64)?;
            for v in values {
                if v.value_type() != *element_type {
                    return Err(invalid_data(format!(
                        "array element type {:?} does not match declared {:?}",
                        v.value_type(),
                        element_type
                    )));
                }
                write_value_payload(writer, v)?;
            }
            Ok(())
        }
        GGUFValue::UInt64(v) => writer.write_u64::<LittleEndian>(*v),
        GGUFValue::Int64(v) => writer.write_i64::<LittleEndian>(*v),
        GGUFValue::Float64(v) => writer.write_f64::<LittleEndian>(*v),
    }
}

/// Pad a buffer with zeros up to the alignment boundary
fn pad_to(buf: &mut Vec<u8>, alignment: u64) {
    let aligned = align_offset(buf.len() as u64, alignment);
    buf.resize(aligned as usize, 0);
}

fn invalid_data(msg: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{GGMLType, GGUFParser, GGUFTensor, GGUFValueType};

    fn f32_bytes(values: &[f32]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    fn test_container() -> GGUFContainer {
        GGUFContainer {
            version: 3,
            metadata: vec![
                (
                    "general.architecture".into(),
                    GGUFValue::String("phi2".into()),
                ),
                ("phi2.embedding_length".into(), GGUFValue::UInt32(4)),
                (
                    "tokenizer.ggml.tokens".into(),
                    GGUFValue::Array(
                        GGUFValueType::String,
                        vec![
                            GGUFValue::String("<s>".into()),
                            GGUFValue::String("</s>".into()),
                        ],
                    ),
                ),
            ],
            tensors: vec![
                GGUFTensor {
                    name: "a.weight".into(),
                    dimensions: vec![4],
                    ggml_type: GGMLType::F32,
                    data: f32_bytes(&[1.0, 2.0, 3.0, 4.0]),
                },
                GGUFTensor {
                    name: "b.weight".into(),
                    dimensions: vec![2, 2],
                    ggml_type: GGMLType::F32,
                    data: f32_bytes(&[5.0, 6.0, 7.0, 8.0]),
                },
            ],
            alignment: 32,
        }
    }

    #[test]
    fn test_parse_of_serialized_equals_container() {
        let container = test_container();
        let bytes = serialize_container(&container).unwrap();
        let reparsed = GGUFParser::new().parse(&bytes).unwrap();
        assert_eq!(reparsed, container);
    }

    #[test]
    fn test_serialize_is_deterministic() {
        let container = test_container();
        let a = serialize_container(&container).unwrap();
        let b = serialize_container(&container).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_serialize_parse_serialize_is_identity() {
        let bytes = serialize_container(&test_container()).unwrap();
        let reparsed = GGUFParser::new().parse(&bytes).unwrap();
        let rewritten = serialize_container(&reparsed).unwrap();
        assert_eq!(bytes, rewritten);
    }

    #[test]
    fn test_data_region_is_aligned() {
        let bytes = serialize_container(&test_container()).unwrap();
        // First tensor holds 1.0f32; find it and check its position.
        let needle = 1.0f32.to_le_bytes();
        let pos = bytes
            .windows(4)
            .position(|w| w == needle.as_slice())
            .expect("tensor data not found");
        assert_eq!(pos % 32, 0);
    }

    #[test]
    fn test_second_tensor_offset_aligned() {
        let container = GGUFContainer {
            version: 3,
            metadata: vec![],
            tensors: vec![
                GGUFTensor {
                    name: "t0".into(),
                    dimensions: vec![1],
                    ggml_type: GGMLType::F32,
                    data: vec![0u8; 4],
                },
                GGUFTensor {
                    name: "t1".into(),
                    dimensions: vec![1],
                    ggml_type: GGMLType::F32,
                    data: vec![9u8; 4],
                },
            ],
            alignment: 32,
        };
        let bytes = serialize_container(&container).unwrap();
        let reparsed = GGUFParser::new().parse(&bytes).unwrap();
        assert_eq!(reparsed.tensors[1].data, vec![9u8; 4]);
    }

    #[test]
    fn test_empty_array_round_trips() {
        let container = GGUFContainer {
            version: 3,
            metadata: vec![(
                "empty.list".into(),
                GGUFValue::Array(GGUFValueType::Int32, vec![]),
            )],
            tensors: vec![],
            alignment: 32,
        };
        let bytes = serialize_container(&container).unwrap();
        let reparsed = GGUFParser::new().parse(&bytes).unwrap();
        assert_eq!(reparsed, container);
        assert_eq!(bytes, serialize_container(&reparsed).unwrap());
    }

    #[test]
    fn test_size_mismatch_rejected() {
        let container = GGUFContainer {
            version: 3,
            metadata: vec![],
            tensors: vec![GGUFTensor {
                name: "short.weight".into(),
                dimensions: vec![8],
                ggml_type: GGMLType::F32,
                data: vec![0u8; 4], // needs 32
            }],
            alignment: 32,
        };
        let err = serialize_container(&container).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        assert!(err.to_string().contains("short.weight"));
    }

    #[test]
    fn test_mixed_array_rejected() {
        let container = GGUFContainer {
            version: 3,
            metadata: vec![(
                "mixed".into(),
                GGUFValue::Array(
                    GGUFValueType::UInt32,
                    vec![GGUFValue::UInt32(1), GGUFValue::String("oops".into())],
                ),
            )],
            tensors: vec![],
            alignment: 32,
        };
        assert!(serialize_container(&container).is_err());
    }

    #[test]
    fn test_write_container_to_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.gguf");
        let container = test_container();
        write_container(&path, &container).unwrap();

        let reread = crate::parser::read_container(&path).unwrap();
        assert_eq!(reread, container);
        // No stray temp files left behind
        let entries: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }
}
