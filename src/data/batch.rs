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

use crate::data::vectorize::{DialogData, VectorizedDialog};
use crate::data::{PAD_ID, UNK_ID};
use crate::Memn2nError;
use std::collections::BTreeSet;
use tch::{Device, Kind, Tensor};

/// # Model inputs for a batch of dialogues
#[derive(Debug)]
pub struct BatchTensors {
    /// History word ids `[batch_size, memory_size, sentence_size]`
    pub stories: Tensor,
    /// Number of words per history sentence `[batch_size, memory_size]`
    pub story_sizes: Tensor,
    /// Number of valid history sentences `[batch_size]`
    pub memory_lengths: Tensor,
    /// Query word ids `[batch_size, sentence_size]`
    pub queries: Tensor,
    /// `[batch_size]`
    pub query_sizes: Tensor,
    /// Target decoder ids (with out-of-vocabulary ids) `[batch_size, candidate_sentence_size]`
    pub answers: Tensor,
    /// Target ids for embedding lookups `[batch_size, candidate_sentence_size]`
    pub answers_emb_lookup: Tensor,
    /// Number of target steps including EOS `[batch_size]`
    pub answer_sizes: Tensor,
    /// History decoder ids `[batch_size, memory_size, sentence_size]`
    pub oov_ids: Tensor,
    /// Number of out-of-vocabulary words per dialogue `[batch_size]`
    pub oov_sizes: Tensor,
}

/// # Slice of a `DialogData` dataset
/// Optionally replaces a few randomly chosen history and query words by UNK (word drop).
#[derive(Debug)]
pub struct Batch<'a> {
    data: &'a DialogData,
    dialogs: Vec<VectorizedDialog>,
}

impl<'a> Batch<'a> {
    /// Build a new `Batch` for the dialogues `[start, end)`.
    ///
    /// # Arguments
    ///
    /// * `data` - vectorized dataset
    /// * `start` - index of the first dialogue
    /// * `end` - index after the last dialogue
    /// * `unk_size` - number of word draws replaced by UNK in every dialogue when `word_drop` is set
    /// * `word_drop` - enables word drop
    pub fn new(
        data: &'a DialogData,
        start: usize,
        end: usize,
        unk_size: usize,
        word_drop: bool,
    ) -> Result<Batch<'a>, Memn2nError> {
        if start >= end || end > data.len() {
            return Err(Memn2nError::ValueError(format!(
                "Invalid batch range [{}, {}) for a dataset of {} dialogues",
                start,
                end,
                data.len()
            )));
        }
        let mut dialogs = data.dialogs()[start..end].to_vec();
        if word_drop && unk_size > 0 {
            for dialog in dialogs.iter_mut() {
                random_unk(dialog, unk_size);
            }
        }
        Ok(Batch { data, dialogs })
    }

    pub fn dialogs(&self) -> &[VectorizedDialog] {
        &self.dialogs
    }

    pub fn batch_size(&self) -> i64 {
        self.dialogs.len() as i64
    }

    /// Largest memory size of the batch
    pub fn memory_size(&self) -> usize {
        self.dialogs
            .iter()
            .map(|dialog| dialog.memory_size())
            .max()
            .unwrap_or(1)
    }

    pub fn to_tensors(&self, device: Device) -> BatchTensors {
        let sentence_size = self.data.config().sentence_size;
        let memory_size = self.memory_size();
        let batch_size = self.batch_size();
        let memory_shape = [batch_size, memory_size as i64, sentence_size as i64];

        let padded_memory = |memory: &Vec<Vec<i64>>| -> Vec<i64> {
            let mut flat = memory.concat();
            flat.resize(memory_size * sentence_size, PAD_ID);
            flat
        };
        let stories = self
            .dialogs
            .iter()
            .flat_map(|dialog| padded_memory(&dialog.story))
            .collect::<Vec<i64>>();
        let oov_ids = self
            .dialogs
            .iter()
            .flat_map(|dialog| padded_memory(&dialog.oov_ids))
            .collect::<Vec<i64>>();
        let story_sizes = self
            .dialogs
            .iter()
            .flat_map(|dialog| {
                let mut sizes = dialog.story_sizes.clone();
                sizes.resize(memory_size, 0);
                sizes
            })
            .collect::<Vec<i64>>();

        let flat = |values: Vec<i64>| Tensor::from_slice(&values).to(device);
        let field = |get: fn(&VectorizedDialog) -> i64| {
            flat(self.dialogs.iter().map(get).collect::<Vec<i64>>())
        };
        let matrix = |get: fn(&VectorizedDialog) -> &Vec<i64>| {
            let values = self.dialogs.iter().flat_map(get).copied().collect();
            flat(values).view([batch_size, -1])
        };

        BatchTensors {
            stories: flat(stories).view(memory_shape),
            story_sizes: flat(story_sizes).view([batch_size, memory_size as i64]),
            memory_lengths: field(|dialog| dialog.memory_length),
            queries: matrix(|dialog| &dialog.query),
            query_sizes: field(|dialog| dialog.query_size),
            answers: matrix(|dialog| &dialog.answer),
            answers_emb_lookup: matrix(|dialog| &dialog.answer_emb_lookup),
            answer_sizes: field(|dialog| dialog.answer_size),
            oov_ids: flat(oov_ids).view(memory_shape),
            oov_sizes: field(|dialog| dialog.oov_size()),
        }
    }

    /// Decoder id stored at a flattened `(sentence, word)` position of the history of dialogue `row`.
    pub fn oov_id(&self, row: usize, flat_word_position: usize) -> Option<i64> {
        let sentence_size = self.data.config().sentence_size;
        let dialog = self.dialogs.get(row)?;
        dialog
            .oov_ids
            .get(flat_word_position / sentence_size)?
            .get(flat_word_position % sentence_size)
            .copied()
    }

    /// Maps a flattened word alignment position back to the history word it points to.
    pub fn source_word(&self, row: usize, flat_word_position: usize) -> Option<String> {
        let dialog = self.dialogs.get(row)?;
        let id = self.oov_id(row, flat_word_position)?;
        let sentence = flat_word_position / self.data.config().sentence_size;
        let word = flat_word_position % self.data.config().sentence_size;
        if word as i64 >= *dialog.story_sizes.get(sentence)? {
            return None;
        }
        self.data.decoder_word(dialog, id)
    }

    /// Surface form of a generated decoder id for dialogue `row`.
    pub fn decoder_word(&self, row: usize, id: i64) -> Option<String> {
        self.data.decoder_word(self.dialogs.get(row)?, id)
    }
}

fn random_unk(dialog: &mut VectorizedDialog, unk_size: usize) {
    let vocab = dialog
        .story
        .iter()
        .flatten()
        .chain(dialog.query.iter())
        .copied()
        .filter(|id| *id != PAD_ID)
        .collect::<BTreeSet<i64>>()
        .into_iter()
        .collect::<Vec<i64>>();
    if vocab.is_empty() {
        return;
    }
    let draws = Tensor::randint(vocab.len() as i64, [unk_size as i64], (Kind::Int64, Device::Cpu));
    let dropped = Vec::<i64>::try_from(&draws)
        .unwrap_or_default()
        .into_iter()
        .map(|index| vocab[index as usize])
        .collect::<BTreeSet<i64>>();

    for id in dialog.story.iter_mut().flatten().chain(dialog.query.iter_mut()) {
        if dropped.contains(id) {
            *id = UNK_ID;
        }
    }
}
