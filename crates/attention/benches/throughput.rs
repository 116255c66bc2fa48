use attention::masks::build_causal_mask;
use attention::reference::ExactAttention;
use attention::{Attention, Config};
use candle_core::{Device, Tensor};
use criterion::{criterion_group, criterion_main, Criterion, Throughput};

fn bench_exact_attention(c: &mut Criterion) {
    let device = Device::Cpu;
    let (batch, heads, seq_len, head_dim) = (1usize, 8usize, 128usize, 64usize);
    let total = batch * heads * seq_len * head_dim;
    let data: Vec<f32> = (0..total).map(|i| (i as f32 * 0.001).sin()).collect();

    let q = Tensor::from_vec(data.clone(), (batch, heads, seq_len, head_dim), &device).unwrap();
    let k = Tensor::from_vec(data.clone(), (batch, heads, seq_len, head_dim), &device).unwrap();
    let v = Tensor::from_vec(data, (batch, heads, seq_len, head_dim), &device).unwrap();
    let mask = build_causal_mask(&device, batch, 1, seq_len, seq_len).unwrap();

    let kernel = ExactAttention::new();
    let config = Config::default();

    let mut group = c.benchmark_group("exact_attention");
    group.throughput(Throughput::Elements((batch * heads * seq_len) as u64));
    group.bench_function("b1_h8_t128_d64", |b| {
        b.iter(|| {
            kernel
                .attend(&q, &k, &v, Some(&mask), &config)
                .expect("attention should succeed")
        })
    });
    group.finish();
}

criterion_group!(benches, bench_exact_attention);
criterion_main!(benches);
