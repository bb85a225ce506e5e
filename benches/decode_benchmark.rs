#[macro_use]
extern crate criterion;

use criterion::{black_box, Criterion};
use rust_memn2n::cell::CellType;
use rust_memn2n::data::BatchTensors;
use rust_memn2n::memn2n::{MemN2NDialogConfig, MemN2NDialogModel};
use std::time::{Duration, Instant};
use tch::{nn, Device, Kind, Tensor};

const BATCH_SIZE: i64 = 32;
const MEMORY_SIZE: i64 = 20;
const SENTENCE_SIZE: i64 = 20;
const ANSWER_SIZE: i64 = 20;

fn random_batch(config: &MemN2NDialogConfig, device: Device) -> BatchTensors {
    let ids = |high: i64, shape: &[i64]| Tensor::randint_low(4, high, shape, (Kind::Int64, device));
    let full = |value: i64, shape: &[i64]| Tensor::full(shape, value, (Kind::Int64, device));
    BatchTensors {
        stories: ids(config.vocab_size, &[BATCH_SIZE, MEMORY_SIZE, SENTENCE_SIZE]),
        story_sizes: full(SENTENCE_SIZE, &[BATCH_SIZE, MEMORY_SIZE]),
        memory_lengths: full(MEMORY_SIZE, &[BATCH_SIZE]),
        queries: ids(config.vocab_size, &[BATCH_SIZE, SENTENCE_SIZE]),
        query_sizes: full(SENTENCE_SIZE, &[BATCH_SIZE]),
        answers: ids(config.decoder_vocab_size, &[BATCH_SIZE, ANSWER_SIZE]),
        answers_emb_lookup: ids(config.decoder_vocab_size, &[BATCH_SIZE, ANSWER_SIZE]),
        answer_sizes: full(ANSWER_SIZE, &[BATCH_SIZE]),
        oov_ids: ids(config.decoder_vocab_size, &[BATCH_SIZE, MEMORY_SIZE, SENTENCE_SIZE]),
        oov_sizes: full(0, &[BATCH_SIZE]),
    }
}

fn teacher_forced_decoding(iters: u64, model: &MemN2NDialogModel, batch: &BatchTensors) -> Duration {
    let mut duration = Duration::new(0, 0);
    for _i in 0..iters {
        let start = Instant::now();
        let _ = tch::no_grad(|| model.forward(batch));
        duration = duration.saturating_add(start.elapsed());
    }
    duration
}

fn greedy_decoding(iters: u64, model: &MemN2NDialogModel, batch: &BatchTensors) -> Duration {
    let mut duration = Duration::new(0, 0);
    for _i in 0..iters {
        let start = Instant::now();
        let _ = tch::no_grad(|| model.generate(batch));
        duration = duration.saturating_add(start.elapsed());
    }
    duration
}

fn bench_decoding(c: &mut Criterion) {
    //    Set-up model
    let device = Device::cuda_if_available();
    for cell_type in [CellType::lstm, CellType::gru] {
        let config = MemN2NDialogConfig {
            cell_type,
            max_decode_length: ANSWER_SIZE,
            ..Default::default()
        };
        let vs = nn::VarStore::new(device);
        let model = MemN2NDialogModel::new(&vs.root() / "memn2n", &config).unwrap();
        let batch = random_batch(&config, device);

        //    Define input
        let _ = tch::no_grad(|| model.forward(&batch));
        c.bench_function(&format!("Teacher forced decoding ({:?})", cell_type), |b| {
            b.iter_custom(|iters| black_box(teacher_forced_decoding(iters, &model, &batch)))
        });
        c.bench_function(&format!("Greedy decoding ({:?})", cell_type), |b| {
            b.iter_custom(|iters| black_box(greedy_decoding(iters, &model, &batch)))
        });
    }
}

criterion_group! {
name = benches;
config = Criterion::default().sample_size(10);
targets = bench_decoding
}

criterion_main!(benches);
