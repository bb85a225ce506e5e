use rust_memn2n::attention::{
    maybe_mask_score, AttentionWrapper, CellInputMixer, HierarchicalAttention,
    HierarchicalAttentionConfig, Normalizer, WordScoreNormalization,
};
use rust_memn2n::cell::{CellState, GruCell};
use rust_memn2n::Memn2nError;
use tch::{nn, Device, Kind, Tensor};

const DEPTH: i64 = 8;

fn attention(vs: &nn::VarStore, config: HierarchicalAttentionConfig) -> HierarchicalAttention {
    HierarchicalAttention::new(&vs.root() / "attention", &config)
}

fn default_config() -> HierarchicalAttentionConfig {
    HierarchicalAttentionConfig {
        num_units: DEPTH,
        memory_depth: DEPTH,
        ..Default::default()
    }
}

#[test]
fn alignments_are_masked_simplices() -> anyhow::Result<()> {
    tch::manual_seed(0);
    for normalizer in [
        Normalizer::softmax,
        Normalizer::hardmax,
        Normalizer::sparsemax,
    ] {
        let vs = nn::VarStore::new(Device::Cpu);
        let mechanism = attention(
            &vs,
            HierarchicalAttentionConfig {
                normalizer,
                scale: true,
                ..default_config()
            },
        );
        let line_memory = Tensor::randn([3, 4, DEPTH], (Kind::Float, Device::Cpu));
        let word_memory = Tensor::randn([3, 4, 5, DEPTH], (Kind::Float, Device::Cpu));
        let line_lengths = Tensor::from_slice(&[4i64, 1, 2]);
        let word_lengths =
            Tensor::from_slice(&[5i64, 3, 1, 2, 4, 0, 0, 0, 2, 5, 0, 0]).view([3, 4]);
        let memory = mechanism.prepare(
            &line_memory,
            &word_memory,
            Some(&line_lengths),
            Some(&word_lengths),
        )?;
        let query = Tensor::randn([3, DEPTH], (Kind::Float, Device::Cpu));

        let (alignments, word_alignments) =
            mechanism.score(&query, &memory, &memory.initial_alignments(3, Kind::Float))?;

        assert!(bool::try_from(alignments.ge(0.0).all())?);
        let sentence_totals = alignments.sum_dim_intlist([-1].as_slice(), false, Kind::Float);
        let word_totals = word_alignments.sum_dim_intlist([-1].as_slice(), false, Kind::Float);
        for row in 0..3 {
            assert!((sentence_totals.double_value(&[row]) - 1.0).abs() < 1e-5);
            assert!((word_totals.double_value(&[row]) - 1.0).abs() < 1e-5);
        }
        // sentences beyond the valid length
        for (row, length) in [(1i64, 1i64), (2, 2)] {
            for sentence in length..4 {
                assert!(alignments.double_value(&[row, sentence]) < 1e-6);
            }
        }
        // words beyond the sentence length
        let word_alignments = word_alignments.view([3, 4, 5]);
        assert!(word_alignments.double_value(&[0, 2, 1]) < 1e-6);
        assert!(word_alignments.double_value(&[2, 0, 3]) < 1e-6);
    }
    Ok(())
}

#[test]
fn memory_preparation_is_idempotent() -> anyhow::Result<()> {
    let vs = nn::VarStore::new(Device::Cpu);
    let mechanism = attention(&vs, default_config());
    let line_memory = Tensor::randn([2, 3, DEPTH], (Kind::Float, Device::Cpu));
    let word_memory = Tensor::randn([2, 3, 4, DEPTH], (Kind::Float, Device::Cpu));
    let line_lengths = Tensor::from_slice(&[2i64, 3]);

    let first = mechanism.prepare(&line_memory, &word_memory, Some(&line_lengths), None)?;
    let second = mechanism.prepare(&line_memory, &word_memory, Some(&line_lengths), None)?;

    assert!(first.values().equal(second.values()));
    assert!(first.word_values().equal(second.word_values()));
    assert!(first.keys().equal(second.keys()));
    assert_eq!(first.values().get(0).get(2).abs().sum(Kind::Float).double_value(&[]), 0.0);
    Ok(())
}

#[test]
fn single_valid_sentence_gets_all_the_mass() -> anyhow::Result<()> {
    let vs = nn::VarStore::new(Device::Cpu);
    let mechanism = attention(&vs, default_config());
    let line_memory = Tensor::randn([1, 3, DEPTH], (Kind::Float, Device::Cpu));
    let word_memory = Tensor::randn([1, 3, 4, DEPTH], (Kind::Float, Device::Cpu));
    let memory = mechanism.prepare(
        &line_memory,
        &word_memory,
        Some(&Tensor::from_slice(&[1i64])),
        Some(&Tensor::from_slice(&[4i64, 0, 0]).view([1, 3])),
    )?;
    let query = Tensor::randn([1, DEPTH], (Kind::Float, Device::Cpu));

    let (alignments, word_alignments) =
        mechanism.score(&query, &memory, &memory.initial_alignments(1, Kind::Float))?;

    let expected = Tensor::from_slice(&[1.0f32, 0.0, 0.0]).view([1, 3]);
    assert!(alignments.allclose(&expected, 1e-6, 1e-6, false));
    let first_sentence_mass = word_alignments
        .narrow(1, 0, 4)
        .sum(Kind::Float)
        .double_value(&[]);
    assert!((first_sentence_mass - 1.0).abs() < 1e-5);
    assert!(word_alignments.narrow(1, 4, 8).abs().max().double_value(&[]) < 1e-6);
    Ok(())
}

#[test]
fn unnormalized_word_scores_keep_raw_affinities() -> anyhow::Result<()> {
    let vs = nn::VarStore::new(Device::Cpu);
    let mechanism = attention(
        &vs,
        HierarchicalAttentionConfig {
            word_score_normalization: WordScoreNormalization::unnormalized,
            ..default_config()
        },
    );
    let line_memory = Tensor::randn([2, 3, DEPTH], (Kind::Float, Device::Cpu));
    let word_memory = Tensor::randn([2, 3, 4, DEPTH], (Kind::Float, Device::Cpu));
    let memory = mechanism.prepare(&line_memory, &word_memory, None, None)?;
    let query = Tensor::randn([2, DEPTH], (Kind::Float, Device::Cpu));

    let (alignments, word_alignments) =
        mechanism.score(&query, &memory, &memory.initial_alignments(2, Kind::Float))?;

    let raw_scores = word_memory
        .matmul(&query.view([2, 1, DEPTH, 1]))
        .squeeze_dim(-1);
    let expected = (raw_scores * alignments.unsqueeze(-1)).view([2, 12]);
    assert!(word_alignments.allclose(&expected, 1e-5, 1e-5, false));
    Ok(())
}

#[test]
fn non_positive_lengths_are_rejected() {
    let scores = Tensor::zeros([2, 3], (Kind::Float, Device::Cpu));
    let lengths = Tensor::from_slice(&[2i64, 0]);
    assert!(matches!(
        maybe_mask_score(&scores, Some(&lengths), None),
        Err(Memn2nError::ValueError(_))
    ));

    let vs = nn::VarStore::new(Device::Cpu);
    let mechanism = attention(&vs, default_config());
    let line_memory = Tensor::randn([2, 3, DEPTH], (Kind::Float, Device::Cpu));
    let word_memory = Tensor::randn([2, 3, 4, DEPTH], (Kind::Float, Device::Cpu));
    let memory = mechanism
        .prepare(&line_memory, &word_memory, Some(&lengths), None)
        .unwrap();
    let query = Tensor::randn([2, DEPTH], (Kind::Float, Device::Cpu));
    assert!(mechanism
        .score(&query, &memory, &memory.initial_alignments(2, Kind::Float))
        .is_err());
}

#[test]
fn undefined_inner_dimensions_are_rejected() {
    let vs = nn::VarStore::new(Device::Cpu);
    let mechanism = attention(&vs, default_config());
    let line_memory = Tensor::randn([2, 3, DEPTH], (Kind::Float, Device::Cpu));
    let word_memory = Tensor::randn([2, 3, 0, DEPTH], (Kind::Float, Device::Cpu));
    assert!(matches!(
        mechanism.prepare(&line_memory, &word_memory, None, None),
        Err(Memn2nError::ShapeError(_))
    ));
}

#[test]
fn query_batch_must_match_memory_batch() -> anyhow::Result<()> {
    let vs = nn::VarStore::new(Device::Cpu);
    let mechanism = attention(&vs, default_config());
    let memory = mechanism.prepare(
        &Tensor::randn([2, 3, DEPTH], (Kind::Float, Device::Cpu)),
        &Tensor::randn([2, 3, 4, DEPTH], (Kind::Float, Device::Cpu)),
        None,
        None,
    )?;
    let cell = Box::new(GruCell::new(&vs.root() / "cell", 4 + DEPTH, DEPTH));
    let wrapper = AttentionWrapper::new(
        &vs.root() / "wrapper",
        cell,
        vec![mechanism],
        &Default::default(),
        CellInputMixer::Concat,
    )?;
    let attention_cell = wrapper.bind(vec![memory], None)?;

    // state for a batch of 3 (e.g. an untiled beam search)
    let state = attention_cell
        .initial_state(None)
        .with_cell_state(CellState::Gru {
            h: Tensor::zeros([3, DEPTH], (Kind::Float, Device::Cpu)),
        })
        .with_attention(Tensor::zeros([3, DEPTH], (Kind::Float, Device::Cpu)));
    let inputs = Tensor::randn([3, 4], (Kind::Float, Device::Cpu));
    assert!(matches!(
        attention_cell.call(&inputs, state),
        Err(Memn2nError::ShapeError(_))
    ));
    Ok(())
}
