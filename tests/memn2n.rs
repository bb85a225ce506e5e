use rust_memn2n::attention::{HierarchicalAttention, HierarchicalAttentionConfig};
use rust_memn2n::cell::CellType;
use rust_memn2n::data::{Batch, DataConfig, DialogData, DialogExample, EOS_ID};
use rust_memn2n::memn2n::{MemN2NDialogConfig, MemN2NDialogModel};
use rust_memn2n::Config;
use std::collections::HashMap;
use std::io::Write;
use tch::{nn, Device, Kind, Tensor};

const ENCODER_VOCAB_SIZE: i64 = 8;
const DECODER_VOCAB_SIZE: i64 = 8;

fn vocab(words: &[&str], offset: i64) -> HashMap<String, i64> {
    words
        .iter()
        .enumerate()
        .map(|(i, w)| (w.to_string(), i as i64 + offset))
        .collect()
}

fn word_idx() -> HashMap<String, i64> {
    vocab(&["book", "a", "table", "in", "paris", "lyon"], 2)
}

fn decoder_vocab() -> HashMap<String, i64> {
    vocab(
        &["<pad>", "<unk>", "<go>", "<eos>", "book", "a", "in", "paris"],
        0,
    )
}

fn data_config() -> DataConfig {
    DataConfig {
        sentence_size: 4,
        batch_size: 2,
        max_memory_size: 4,
        candidate_sentence_size: 5,
    }
}

fn dialog_data() -> anyhow::Result<DialogData> {
    let examples = vec![
        DialogExample::new(
            vec![vec!["book", "a", "table"], vec!["in", "paris"]],
            vec!["paris"],
            vec!["paris"],
            0,
        ),
        DialogExample::new(
            vec![vec!["book", "a", "table"], vec!["in", "lyon"]],
            vec!["lyon"],
            vec!["lyon", "table"],
            1,
        ),
    ];
    Ok(DialogData::new(examples, &word_idx(), &decoder_vocab(), &data_config())?)
}

/// One-hot word vectors scaled up, padding mapped to the zero vector
fn one_hot_memory(ids: &Tensor) -> Tensor {
    ids.one_hot(ENCODER_VOCAB_SIZE)
        .to_kind(Kind::Float)
        .narrow(-1, 1, ENCODER_VOCAB_SIZE - 1)
        * 3.0
}

#[test]
fn dialogues_are_vectorized_into_batch_tensors() -> anyhow::Result<()> {
    let data = dialog_data()?;
    let batch = Batch::new(&data, 0, 2, 0, false)?;
    let tensors = batch.to_tensors(Device::Cpu);

    assert_eq!(tensors.stories.size(), vec![2, 2, 4]);
    assert_eq!(Vec::<i64>::try_from(&tensors.memory_lengths)?, vec![2, 2]);
    assert_eq!(Vec::<i64>::try_from(&tensors.answer_sizes)?, vec![2, 3]);
    // "table" and "lyon" are out of the decoder vocabulary in the second dialogue
    assert_eq!(
        Vec::<i64>::try_from(&tensors.answers.get(1))?,
        vec![9, 8, EOS_ID, 0, 0]
    );
    assert_eq!(
        Vec::<i64>::try_from(&tensors.answers_emb_lookup.get(1))?,
        vec![1, 1, EOS_ID, 0, 0]
    );
    assert_eq!(Vec::<i64>::try_from(&tensors.oov_sizes)?, vec![1, 2]);
    assert_eq!(batch.decoder_word(1, 9), Some("lyon".to_string()));
    Ok(())
}

#[test]
fn word_alignments_point_to_the_copied_word() -> anyhow::Result<()> {
    let data = dialog_data()?;
    let batch = Batch::new(&data, 0, 2, 0, false)?;
    let tensors = batch.to_tensors(Device::Cpu);

    let depth = ENCODER_VOCAB_SIZE - 1;
    let vs = nn::VarStore::new(Device::Cpu);
    let config = HierarchicalAttentionConfig {
        num_units: depth,
        memory_depth: depth,
        ..Default::default()
    };
    let mechanism = HierarchicalAttention::new(&vs.root() / "attention", &config);
    tch::no_grad(|| {
        for (name, mut variable) in vs.variables() {
            if name.contains("memory_layer") {
                variable.copy_(&Tensor::eye(depth, (Kind::Float, Device::Cpu)));
            }
        }
    });

    let word_memory = one_hot_memory(&tensors.stories);
    let line_memory = word_memory.sum_dim_intlist([2].as_slice(), false, Kind::Float);
    let memory = mechanism.prepare(
        &line_memory,
        &word_memory,
        Some(&tensors.memory_lengths),
        Some(&tensors.story_sizes),
    )?;
    // decoder queries matching "paris" and "lyon"
    let query = one_hot_memory(&Tensor::from_slice(&[6i64, 7]));

    let (alignments, word_alignments) =
        mechanism.score(&query, &memory, &memory.initial_alignments(2, Kind::Float))?;

    assert_eq!(alignments.argmax(-1, false).int64_value(&[0]), 1);
    let positions = Vec::<i64>::try_from(&word_alignments.argmax(-1, false))?;
    assert_eq!(positions, vec![5, 5]);

    // in-vocabulary word: copied id is its decoder id
    assert_eq!(batch.source_word(0, 5), Some("paris".to_string()));
    assert_eq!(batch.oov_id(0, 5), Some(7));
    // out-of-vocabulary word: copied id lies beyond the decoder vocabulary
    assert_eq!(batch.source_word(1, 5), Some("lyon".to_string()));
    let copied_id = batch.oov_id(1, 5).unwrap();
    assert!(copied_id >= DECODER_VOCAB_SIZE);
    assert_eq!(batch.decoder_word(1, copied_id), Some("lyon".to_string()));
    // padding positions do not map to a source word
    assert_eq!(batch.source_word(1, 3), None);
    Ok(())
}

fn model_config(cell_type: CellType) -> MemN2NDialogConfig {
    MemN2NDialogConfig {
        vocab_size: ENCODER_VOCAB_SIZE,
        decoder_vocab_size: DECODER_VOCAB_SIZE,
        embedding_size: 16,
        hops: 2,
        alignment_history: true,
        cell_type,
        max_decode_length: 6,
        ..Default::default()
    }
}

#[test]
fn model_forward_and_generate() -> anyhow::Result<()> {
    let data = dialog_data()?;
    let batch = Batch::new(&data, 0, 2, 0, false)?;
    let tensors = batch.to_tensors(Device::Cpu);

    for cell_type in [CellType::lstm, CellType::gru] {
        tch::manual_seed(0);
        let vs = nn::VarStore::new(Device::Cpu);
        let model = MemN2NDialogModel::new(&vs.root() / "memn2n", &model_config(cell_type))?;

        let output = model.forward(&tensors)?;
        assert_eq!(Vec::<i64>::try_from(&output.sequence_lengths)?, vec![2, 3]);
        assert_eq!(
            output.outputs.rnn_output.size(),
            vec![2, 3, DECODER_VOCAB_SIZE]
        );
        assert_eq!(output.word_alignments[0].size(), vec![2, 3, 8]);
        assert_eq!(output.line_alignments[0].size(), vec![2, 3, 2]);
        assert_eq!(output.p_gens.size(), vec![2, 3, 1]);
        assert!(bool::try_from(output.p_gens.ge(0.0).all())?);
        assert!(bool::try_from(output.p_gens.le(1.0).all())?);
        let history = output.final_state.alignment_history.as_ref().unwrap();
        assert_eq!(history[0].word.len(), 3);

        let generated = tch::no_grad(|| model.generate(&tensors))?;
        let steps = generated.outputs.sample_id.size()[1];
        assert!(steps >= 1 && steps <= 6);
        assert!(bool::try_from(
            generated.outputs.sample_id.lt(DECODER_VOCAB_SIZE).all()
        )?);
        assert!(bool::try_from(generated.sequence_lengths.le(steps).all())?);
    }
    Ok(())
}

#[test]
fn model_config_from_file() -> anyhow::Result<()> {
    let mut config_file = tempfile::NamedTempFile::new()?;
    write!(
        config_file,
        r#"{{
            "vocab_size": 8,
            "decoder_vocab_size": 8,
            "embedding_size": 16,
            "hops": 1,
            "cell_type": "gru",
            "max_decode_length": 4,
            "normalizer": "sparsemax",
            "alignment_history": true
        }}"#
    )?;
    let config = MemN2NDialogConfig::from_file(config_file.path())?;

    assert_eq!(config.cell_type, CellType::gru);
    assert_eq!(config.hops, 1);
    assert!(config.alignment_history);
    assert!(!config.impute_finished);
    assert_eq!(config.attention_layer_size, None);

    let vs = nn::VarStore::new(Device::Cpu);
    let model = MemN2NDialogModel::new(&vs.root() / "memn2n", &config)?;
    assert_eq!(model.config().max_decode_length, 4);
    Ok(())
}

#[test]
fn encoder_builds_memory_and_initial_state() -> anyhow::Result<()> {
    let data = dialog_data()?;
    let batch = Batch::new(&data, 0, 1, 0, false)?;
    let tensors = batch.to_tensors(Device::Cpu);
    let vs = nn::VarStore::new(Device::Cpu);
    let model = MemN2NDialogModel::new(&vs.root() / "memn2n", &model_config(CellType::lstm))?;

    let (memory, cell_state) = model.encode(&tensors)?;

    assert_eq!(memory.batch_size(), 1);
    assert_eq!(memory.values().size(), vec![1, 2, 16]);
    assert_eq!(memory.word_values().size(), vec![1, 2, 4, 16]);
    assert_eq!(cell_state.hidden().size(), vec![1, 16]);
    assert_eq!(cell_state.tensors().len(), 2);
    Ok(())
}
