//! Parse/serialize round-trip benchmarks

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use grafter_gguf::{
    serialize_container, GGMLType, GGUFContainer, GGUFParser, GGUFTensor, GGUFValue,
};

/// Build a container with `n` layers of fused F32 projections
fn synthetic_container(n: usize) -> GGUFContainer {
    let mut tensors = Vec::with_capacity(n);
    for i in 0..n {
        tensors.push(GGUFTensor {
            name: format!("blk.{}.ffn_up.weight", i),
            dimensions: vec![256, 16],
            ggml_type: GGMLType::F32,
            data: vec![0x5a; 256 * 16 * 4],
        });
    }
    GGUFContainer {
        version: 3,
        metadata: vec![
            (
                "general.architecture".into(),
                GGUFValue::String("phi2".into()),
            ),
            ("phi2.embedding_length".into(), GGUFValue::UInt32(256)),
            ("phi2.feed_forward_length".into(), GGUFValue::UInt32(128)),
        ],
        tensors,
        alignment: 32,
    }
}

fn bench_serialize(c: &mut Criterion) {
    let container = synthetic_container(32);
    c.bench_function("serialize_32_layers", |b| {
        b.iter(|| serialize_container(black_box(&container)).unwrap())
    });
}

fn bench_parse(c: &mut Criterion) {
    let bytes = serialize_container(&synthetic_container(32)).unwrap();
    let parser = GGUFParser::new();
    c.bench_function("parse_32_layers", |b| {
        b.iter(|| parser.parse(black_box(&bytes)).unwrap())
    });
}

fn bench_split(c: &mut Criterion) {
    let container = synthetic_container(32);
    let spec = grafter_gguf::SplitSpec::default();
    c.bench_function("split_fused_32_layers", |b| {
        b.iter(|| grafter_gguf::split_fused(black_box(&container), &spec).unwrap())
    });
}

criterion_group!(benches, bench_serialize, bench_parse, bench_split);
criterion_main!(benches);
