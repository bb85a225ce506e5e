// Copyright 2020 Guillaume Becquin
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//     http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

extern crate anyhow;

use rust_memn2n::data::{Batch, DataConfig, DialogData, DialogExample};
use rust_memn2n::memn2n::{MemN2NDialogConfig, MemN2NDialogModel};
use std::collections::HashMap;
use tch::{nn, Device};

fn vocabulary(words: &[&str]) -> HashMap<String, i64> {
    words
        .iter()
        .enumerate()
        .map(|(id, word)| (word.to_string(), id as i64))
        .collect()
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    //    Set-up data
    let word_idx = vocabulary(&[
        "<pad>", "<unk>", "hello", "what", "can", "i", "help", "you", "with", "today", "book",
        "a", "table", "in", "rome", "paris", "for", "two", "people",
    ]);
    let decoder_vocab = vocabulary(&[
        "<pad>", "<unk>", "<go>", "<eos>", "i", "am", "on", "it", "how", "many", "people",
    ]);
    let examples = vec![
        DialogExample::new(
            vec![
                vec!["hello"],
                vec!["hello", "what", "can", "i", "help", "you", "with", "today"],
            ],
            vec!["book", "a", "table", "in", "rome"],
            vec!["how", "many", "people", "in", "rome"],
            0,
        ),
        DialogExample::new(
            vec![vec!["book", "a", "table", "in", "paris"]],
            vec!["for", "two", "people"],
            vec!["i", "am", "on", "it"],
            1,
        ),
    ];
    let data_config = DataConfig {
        sentence_size: 8,
        batch_size: 2,
        max_memory_size: 10,
        candidate_sentence_size: 8,
    };
    let data = DialogData::new(examples, &word_idx, &decoder_vocab, &data_config)?;
    let batch = Batch::new(&data, 0, data.len(), 0, false)?;

    //    Set-up model
    let device = Device::cuda_if_available();
    let vs = nn::VarStore::new(device);
    let config = MemN2NDialogConfig {
        vocab_size: word_idx.len() as i64,
        decoder_vocab_size: data.decoder_vocab_size(),
        embedding_size: 32,
        max_decode_length: data_config.candidate_sentence_size as i64,
        ..Default::default()
    };
    let model = MemN2NDialogModel::new(&vs.root() / "memn2n", &config)?;

    //    Generate answers
    let output = tch::no_grad(|| model.generate(&batch.to_tensors(device)))?;
    let sample_ids = output.outputs.sample_id.to(Device::Cpu);
    let copy_positions = output.word_alignments[0].argmax(-1, false).to(Device::Cpu);
    let p_gens = output.p_gens.squeeze_dim(-1).to(Device::Cpu);
    let lengths = Vec::<i64>::try_from(&output.sequence_lengths.to(Device::Cpu))?;

    for (row, dialog) in batch.dialogs().iter().enumerate() {
        println!("History: {:?}", dialog.readable_story);
        println!("Query: {}", dialog.readable_query);
        let mut answer = Vec::new();
        for step in 0..lengths[row] {
            let generated = batch
                .decoder_word(row, sample_ids.int64_value(&[row as i64, step]))
                .unwrap_or_default();
            let copied = batch
                .source_word(row, copy_positions.int64_value(&[row as i64, step]) as usize)
                .unwrap_or_default();
            answer.push(format!(
                "{} (copy: {}, p_gen {:.2})",
                generated,
                copied,
                p_gens.double_value(&[row as i64, step])
            ));
        }
        println!("Answer: {:?}", answer);
    }
    Ok(())
}
