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

use crate::data::{DataConfig, DialogExample, EOS_ID, PAD_ID, UNK_ID};
use crate::Memn2nError;
use std::collections::HashMap;

#[derive(Debug, Clone)]
/// # Integer-indexed dialogue turn
pub struct VectorizedDialog {
    /// History word ids `[memory_size][sentence_size]`, most recent sentences last
    pub story: Vec<Vec<i64>>,
    /// Number of words of every history sentence (0 for padding sentences)
    pub story_sizes: Vec<i64>,
    /// Number of valid history sentences (at least 1)
    pub memory_length: i64,
    /// Query word ids `[sentence_size]`
    pub query: Vec<i64>,
    pub query_size: i64,
    /// Answer decoder ids followed by EOS and padding, copied words use their out-of-vocabulary id
    pub answer: Vec<i64>,
    /// Answer ids used for embedding lookups, out-of-vocabulary ids replaced by UNK
    pub answer_emb_lookup: Vec<i64>,
    /// Number of answer words including EOS
    pub answer_size: i64,
    /// History decoder ids with the same layout as `story`
    pub oov_ids: Vec<Vec<i64>>,
    /// Out-of-vocabulary words, in order of first appearance
    pub oov_words: Vec<String>,
    pub readable_story: Vec<String>,
    pub readable_query: String,
    pub readable_answer: String,
    pub dialog_id: i64,
}

impl VectorizedDialog {
    pub fn memory_size(&self) -> usize {
        self.story.len()
    }

    pub fn oov_size(&self) -> i64 {
        self.oov_words.len() as i64
    }
}

/// # Vectorized dialogue dataset
/// Examples are sorted by decreasing history length. The memory size of every batch is the
/// history length of its first (longest) example, clamped to `[1, max_memory_size]`.
#[derive(Debug)]
pub struct DialogData {
    dialogs: Vec<VectorizedDialog>,
    decoder_words: HashMap<i64, String>,
    decoder_vocab_size: i64,
    config: DataConfig,
}

impl DialogData {
    /// Vectorizes tokenized dialogue turns.
    ///
    /// # Arguments
    ///
    /// * `examples` - tokenized dialogue turns
    /// * `word_idx` - encoder vocabulary. Unknown words are mapped to `UNK_ID`.
    /// * `decoder_vocab` - closed decoder vocabulary
    /// * `config` - `DataConfig`
    pub fn new(
        mut examples: Vec<DialogExample>,
        word_idx: &HashMap<String, i64>,
        decoder_vocab: &HashMap<String, i64>,
        config: &DataConfig,
    ) -> Result<DialogData, Memn2nError> {
        if config.sentence_size == 0
            || config.batch_size == 0
            || config.max_memory_size == 0
            || config.candidate_sentence_size == 0
        {
            return Err(Memn2nError::InvalidConfigurationError(format!(
                "Data configuration sizes must be strictly positive, got {:?}",
                config
            )));
        }
        let decoder_vocab_size = decoder_vocab.len() as i64;
        if let Some((word, id)) = decoder_vocab
            .iter()
            .find(|(_, id)| **id < 0 || **id >= decoder_vocab_size)
        {
            return Err(Memn2nError::ValueError(format!(
                "Decoder vocabulary ids must lie in [0, {}), got {} for {}",
                decoder_vocab_size, id, word
            )));
        }

        examples.sort_by(|a, b| b.story.len().cmp(&a.story.len()));

        let mut memory_size = 1;
        let dialogs = examples
            .iter()
            .enumerate()
            .map(|(index, example)| {
                if index % config.batch_size == 0 {
                    memory_size = example.story.len().clamp(1, config.max_memory_size);
                }
                vectorize_dialog(
                    example,
                    word_idx,
                    decoder_vocab,
                    decoder_vocab_size,
                    memory_size,
                    config,
                )
            })
            .collect::<Vec<VectorizedDialog>>();

        let decoder_words = decoder_vocab
            .iter()
            .map(|(word, id)| (*id, word.clone()))
            .collect();

        tracing::debug!(
            dialogs = dialogs.len(),
            decoder_vocab_size,
            "vectorized dialogue data"
        );

        Ok(DialogData {
            dialogs,
            decoder_words,
            decoder_vocab_size,
            config: config.clone(),
        })
    }

    pub fn dialogs(&self) -> &[VectorizedDialog] {
        &self.dialogs
    }

    pub fn len(&self) -> usize {
        self.dialogs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dialogs.is_empty()
    }

    pub fn decoder_vocab_size(&self) -> i64 {
        self.decoder_vocab_size
    }

    pub fn config(&self) -> &DataConfig {
        &self.config
    }

    /// Surface form of a decoder id, looking up the out-of-vocabulary words of `dialog` for ids
    /// beyond the decoder vocabulary.
    pub fn decoder_word(&self, dialog: &VectorizedDialog, id: i64) -> Option<String> {
        if id >= self.decoder_vocab_size {
            dialog
                .oov_words
                .get((id - self.decoder_vocab_size) as usize)
                .cloned()
        } else {
            self.decoder_words.get(&id).cloned()
        }
    }
}

fn pad(mut ids: Vec<i64>, size: usize) -> Vec<i64> {
    ids.resize(size, PAD_ID);
    ids
}

fn vectorize_dialog(
    example: &DialogExample,
    word_idx: &HashMap<String, i64>,
    decoder_vocab: &HashMap<String, i64>,
    decoder_vocab_size: i64,
    memory_size: usize,
    config: &DataConfig,
) -> VectorizedDialog {
    let sentence_size = config.sentence_size;
    let encode = |word: &String| *word_idx.get(word).unwrap_or(&UNK_ID);

    let mut oov_words: Vec<String> = Vec::new();
    let mut story = Vec::with_capacity(example.story.len());
    let mut story_sizes = Vec::with_capacity(example.story.len());
    let mut oov_ids = Vec::with_capacity(example.story.len());
    for sentence in example.story.iter() {
        let sentence = &sentence[..sentence.len().min(sentence_size)];
        story.push(pad(sentence.iter().map(encode).collect(), sentence_size));
        story_sizes.push(sentence.len() as i64);

        let sentence_oov_ids = sentence
            .iter()
            .map(|word| match decoder_vocab.get(word) {
                Some(id) => *id,
                None => {
                    let position = match oov_words.iter().position(|oov| oov == word) {
                        Some(position) => position,
                        None => {
                            oov_words.push(word.clone());
                            oov_words.len() - 1
                        }
                    };
                    decoder_vocab_size + position as i64
                }
            })
            .collect();
        oov_ids.push(pad(sentence_oov_ids, sentence_size));
    }
    let readable_story = example.story.iter().map(|s| s.join(" ")).collect();

    // most recent sentences that fit in memory, then padding sentences
    let kept_from = story.len().saturating_sub(memory_size);
    let mut story = story.split_off(kept_from);
    let mut story_sizes = story_sizes.split_off(kept_from);
    let mut oov_ids = oov_ids.split_off(kept_from);
    let memory_length = story.len().max(1) as i64;
    story.resize(memory_size, vec![PAD_ID; sentence_size]);
    story_sizes.resize(memory_size, 0);
    oov_ids.resize(memory_size, vec![PAD_ID; sentence_size]);

    let query = &example.query[..example.query.len().min(sentence_size)];
    let answer = &example.answer[..example
        .answer
        .len()
        .min(config.candidate_sentence_size - 1)];
    let mut answer_ids = Vec::with_capacity(config.candidate_sentence_size);
    let mut answer_emb_lookup = Vec::with_capacity(config.candidate_sentence_size);
    for word in answer {
        match decoder_vocab.get(word) {
            Some(id) => {
                answer_ids.push(*id);
                answer_emb_lookup.push(*id);
            }
            None => {
                match oov_words.iter().position(|oov| oov == word) {
                    Some(position) => answer_ids.push(decoder_vocab_size + position as i64),
                    None => answer_ids.push(UNK_ID),
                }
                answer_emb_lookup.push(UNK_ID);
            }
        }
    }
    answer_ids.push(EOS_ID);
    answer_emb_lookup.push(EOS_ID);

    VectorizedDialog {
        story,
        story_sizes,
        memory_length,
        query: pad(query.iter().map(encode).collect(), sentence_size),
        query_size: query.len() as i64,
        answer: pad(answer_ids, config.candidate_sentence_size),
        answer_emb_lookup: pad(answer_emb_lookup, config.candidate_sentence_size),
        answer_size: answer.len() as i64 + 1,
        oov_ids,
        oov_words,
        readable_story,
        readable_query: example.query.join(" "),
        readable_answer: example.answer.join(" "),
        dialog_id: example.dialog_id,
    }
}
