//! End-to-end editing tests
//!
//! Exercises the full parse -> edit -> write -> re-parse cycle on real
//! files, checking the structural guarantees each edit makes.

use grafter_gguf::{
    insert_bias, read_container, split_fused, write_container, BiasOutcome, BiasSpec, GGMLType,
    GGUFContainer, GGUFParser, GGUFTensor, GGUFValue, GGUFValueType, SplitSpec,
};

fn f32_bytes(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn f32_tensor(name: &str, dimensions: Vec<u64>, values: &[f32]) -> GGUFTensor {
    GGUFTensor {
        name: name.into(),
        dimensions,
        ggml_type: GGMLType::F32,
        data: f32_bytes(values),
    }
}

/// A small but representative model: string/int/float/array metadata,
/// several tensors, one fused projection.
fn sample_container() -> GGUFContainer {
    let fused: Vec<f32> = (0..640).map(|i| i as f32).collect();
    GGUFContainer {
        version: 3,
        metadata: vec![
            (
                "general.architecture".into(),
                GGUFValue::String("phi2".into()),
            ),
            ("general.name".into(), GGUFValue::String("sample".into())),
            ("phi2.embedding_length".into(), GGUFValue::UInt32(4)),
            ("phi2.feed_forward_length".into(), GGUFValue::UInt32(32)),
            ("general.quantized".into(), GGUFValue::Bool(false)),
            ("training.lr".into(), GGUFValue::Float32(0.001)),
            (
                "tokenizer.ggml.tokens".into(),
                GGUFValue::Array(
                    GGUFValueType::String,
                    vec![
                        GGUFValue::String("<s>".into()),
                        GGUFValue::String("</s>".into()),
                        GGUFValue::String("<unk>".into()),
                    ],
                ),
            ),
        ],
        tensors: vec![
            f32_tensor("token_embd.weight", vec![4, 3], &[0.25; 12]),
            f32_tensor("blk.0.ffn_up.weight", vec![64, 10], &fused),
            f32_tensor("output_norm.weight", vec![4], &[1.0, 2.0, 3.0, 4.0]),
            f32_tensor("lm_head.weight", vec![4, 3], &[0.5; 12]),
        ],
        alignment: 32,
    }
}

#[test]
fn round_trip_through_disk_is_lossless() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("model.gguf");

    let container = sample_container();
    write_container(&path, &container).unwrap();
    let reread = read_container(&path).unwrap();
    assert_eq!(reread, container);

    // Second serialization of the re-parsed container is byte-identical.
    let bytes = std::fs::read(&path).unwrap();
    let rewritten = grafter_gguf::serialize_container(&reread).unwrap();
    assert_eq!(bytes, rewritten);
}

#[test]
fn insert_bias_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in.gguf");
    let output = dir.path().join("out.gguf");

    write_container(&input, &sample_container()).unwrap();
    let container = read_container(&input).unwrap();

    let outcome = insert_bias(&container, &BiasSpec::default()).unwrap();
    let edited = match outcome {
        BiasOutcome::Inserted(c) => c,
        BiasOutcome::AlreadyPresent => panic!("bias unexpectedly present"),
    };
    write_container(&output, &edited).unwrap();

    let result = read_container(&output).unwrap();
    assert_eq!(result.tensors.len(), container.tensors.len() + 1);

    let names: Vec<&str> = result.tensors.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(
        names,
        vec![
            "token_embd.weight",
            "blk.0.ffn_up.weight",
            "output_norm.weight",
            "output_norm.bias",
            "lm_head.weight"
        ]
    );

    let bias = result.tensor("output_norm.bias").unwrap();
    assert_eq!(bias.dimensions, vec![4]);
    assert!(bias.data.iter().all(|&b| b == 0));

    // Metadata and untouched tensors survive bit-identical, in order.
    assert_eq!(result.metadata, container.metadata);
    for tensor in &container.tensors {
        assert_eq!(result.tensor(&tensor.name).unwrap().data, tensor.data);
    }
}

#[test]
fn insert_bias_on_patched_model_is_a_noop() {
    let container = sample_container();
    let edited = match insert_bias(&container, &BiasSpec::default()).unwrap() {
        BiasOutcome::Inserted(c) => c,
        BiasOutcome::AlreadyPresent => panic!(),
    };
    assert!(matches!(
        insert_bias(&edited, &BiasSpec::default()).unwrap(),
        BiasOutcome::AlreadyPresent
    ));
    assert_eq!(edited.tensors.len(), container.tensors.len() + 1);
}

#[test]
fn split_fused_end_to_end_and_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in.gguf");
    let output = dir.path().join("out.gguf");
    let output2 = dir.path().join("out2.gguf");

    write_container(&input, &sample_container()).unwrap();
    let container = read_container(&input).unwrap();

    let (edited, report) = split_fused(&container, &SplitSpec::default()).unwrap();
    assert_eq!(report.tensors_split, 1);
    assert_eq!(report.total_tensors, container.tensors.len() + 1);
    write_container(&output, &edited).unwrap();

    let result = read_container(&output).unwrap();
    let gate = result.tensor("blk.0.ffn_gate.weight").unwrap();
    let up = result.tensor("blk.0.ffn_up.weight").unwrap();
    assert_eq!(gate.dimensions, vec![32, 10]);
    assert_eq!(up.dimensions, vec![32, 10]);

    // First columns into the gate half, last columns into the up half.
    let source = container.tensor("blk.0.ffn_up.weight").unwrap();
    for row in 0..10 {
        let src_row = &source.data[row * 256..(row + 1) * 256];
        assert_eq!(&gate.data[row * 128..(row + 1) * 128], &src_row[..128]);
        assert_eq!(&up.data[row * 128..(row + 1) * 128], &src_row[128..]);
    }

    // Running the split again changes nothing.
    let (again, report2) = split_fused(&result, &SplitSpec::default()).unwrap();
    assert_eq!(report2.tensors_split, 0);
    write_container(&output2, &again).unwrap();
    assert_eq!(
        std::fs::read(&output).unwrap(),
        std::fs::read(&output2).unwrap()
    );
}

#[test]
fn edits_never_default_missing_metadata() {
    let mut container = sample_container();
    container
        .metadata
        .retain(|(k, _)| k != "phi2.embedding_length" && k != "phi2.feed_forward_length");

    assert!(insert_bias(&container, &BiasSpec::default()).is_err());
    assert!(split_fused(&container, &SplitSpec::default()).is_err());
}

#[test]
fn parser_never_returns_partial_containers() {
    let bytes = grafter_gguf::serialize_container(&sample_container()).unwrap();
    let parser = GGUFParser::new();

    // Every strict prefix must fail; the parser has no partial-success mode.
    for cut in [4, 12, 24, 40, bytes.len() / 2, bytes.len() - 1] {
        assert!(
            parser.parse(&bytes[..cut]).is_err(),
            "prefix of {} bytes unexpectedly parsed",
            cut
        );
    }
}

#[test]
fn version_two_files_round_trip() {
    let mut container = sample_container();
    container.version = 2;
    let bytes = grafter_gguf::serialize_container(&container).unwrap();
    let reparsed = GGUFParser::new().parse(&bytes).unwrap();
    assert_eq!(reparsed.version, 2);
    assert_eq!(reparsed, container);
}
