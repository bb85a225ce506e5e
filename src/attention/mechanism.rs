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

use crate::attention::memory::{maybe_mask_score, prepare_memory, sequence_mask};
use crate::attention::normalizer::{Normalizer, WordScoreNormalization};
use crate::common::kind::get_negative_infinity;
use crate::common::linear::{linear_no_bias, LinearNoBias};
use crate::Memn2nError;
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use tch::{nn, Kind, Tensor};

#[derive(Debug, Clone, Serialize, Deserialize)]
/// # Hierarchical attention configuration
pub struct HierarchicalAttentionConfig {
    /// Depth of the sentence keys. Must match the depth of the decoder query.
    pub num_units: i64,
    /// Depth of the line and word memory vectors
    pub memory_depth: i64,
    /// Learn a scalar multiplier applied to sentence and word scores
    pub scale: bool,
    pub normalizer: Normalizer,
    pub word_score_normalization: WordScoreNormalization,
    /// Value assigned to masked scores before normalization. Defaults to the most negative finite
    /// value of the score dtype.
    pub score_mask_value: Option<f64>,
    pub check_inner_dims_defined: bool,
}

impl Default for HierarchicalAttentionConfig {
    fn default() -> Self {
        HierarchicalAttentionConfig {
            num_units: 128,
            memory_depth: 128,
            scale: false,
            normalizer: Normalizer::softmax,
            word_score_normalization: WordScoreNormalization::softmax,
            score_mask_value: None,
            check_inner_dims_defined: true,
        }
    }
}

/// # Dialogue history prepared for attention
/// Masked line and word memories with the projected sentence keys. Built once per decoding
/// episode and left untouched by the decoding steps.
#[derive(Debug)]
pub struct PreparedMemory {
    values: Tensor,
    keys: Tensor,
    word_values: Tensor,
    line_lengths: Option<Tensor>,
    word_mask: Option<Tensor>,
    batch_size: i64,
    alignments_size: i64,
    word_alignments_size: i64,
}

impl PreparedMemory {
    /// Masked line memory `[batch_size, sentences, memory_depth]` used to build the context.
    pub fn values(&self) -> &Tensor {
        &self.values
    }

    /// Projected line memory `[batch_size, sentences, num_units]` used for scoring.
    pub fn keys(&self) -> &Tensor {
        &self.keys
    }

    /// Masked word memory `[batch_size, sentences, words, memory_depth]`.
    pub fn word_values(&self) -> &Tensor {
        &self.word_values
    }

    pub fn line_lengths(&self) -> Option<&Tensor> {
        self.line_lengths.as_ref()
    }

    pub fn batch_size(&self) -> i64 {
        self.batch_size
    }

    /// Number of sentences
    pub fn alignments_size(&self) -> i64 {
        self.alignments_size
    }

    /// Number of words per sentence
    pub fn word_alignments_size(&self) -> i64 {
        self.word_alignments_size
    }

    pub fn memory_depth(&self) -> i64 {
        self.values.size()[2]
    }

    /// Zero word alignments `[batch_size, sentences * words]` used before the first step.
    pub fn initial_alignments(&self, batch_size: i64, kind: Kind) -> Tensor {
        Tensor::zeros(
            [batch_size, self.alignments_size * self.word_alignments_size],
            (kind, self.values.device()),
        )
    }
}

/// # Hierarchical (sentence then word) Luong attention
/// Scores a decoder query against the sentence keys with a (optionally scaled) dot product and
/// against every word of every sentence. The sentence alignment weights the word scores, giving a
/// single distribution over all `(sentence, word)` pairs used for copying source words.
#[derive(Debug)]
pub struct HierarchicalAttention {
    memory_layer: LinearNoBias,
    attention_g: Option<Tensor>,
    num_units: i64,
    memory_depth: i64,
    normalizer: Normalizer,
    word_score_normalization: WordScoreNormalization,
    score_mask_value: Option<f64>,
    check_inner_dims_defined: bool,
}

impl HierarchicalAttention {
    pub fn new<'p, P>(p: P, config: &HierarchicalAttentionConfig) -> HierarchicalAttention
    where
        P: Borrow<nn::Path<'p>>,
    {
        let p = p.borrow();
        let memory_layer = linear_no_bias(
            p / "memory_layer",
            config.memory_depth,
            config.num_units,
            Default::default(),
        );
        let attention_g = if config.scale {
            Some(p.var("attention_g", &[], nn::Init::Const(1.0)))
        } else {
            None
        };

        HierarchicalAttention {
            memory_layer,
            attention_g,
            num_units: config.num_units,
            memory_depth: config.memory_depth,
            normalizer: config.normalizer,
            word_score_normalization: config.word_score_normalization,
            score_mask_value: config.score_mask_value,
            check_inner_dims_defined: config.check_inner_dims_defined,
        }
    }

    pub fn num_units(&self) -> i64 {
        self.num_units
    }

    pub fn memory_depth(&self) -> i64 {
        self.memory_depth
    }

    /// Masks the memories and projects the sentence keys.
    ///
    /// # Arguments
    ///
    /// * `line_memory` - `[batch_size, sentences, memory_depth]`, one vector per sentence
    /// * `word_memory` - `[batch_size, sentences, words, memory_depth]`, one vector per word
    /// * `line_lengths` - optional `[batch_size]` number of valid sentences per row. Masks both memories.
    /// * `word_lengths` - optional `[batch_size, sentences]` number of valid words per sentence.
    pub fn prepare(
        &self,
        line_memory: &Tensor,
        word_memory: &Tensor,
        line_lengths: Option<&Tensor>,
        word_lengths: Option<&Tensor>,
    ) -> Result<PreparedMemory, Memn2nError> {
        let line_shape = line_memory.size();
        let word_shape = word_memory.size();
        if line_shape.len() != 3 || word_shape.len() != 4 {
            return Err(Memn2nError::ShapeError(format!(
                "Expected line memory [batch, sentences, depth] and word memory [batch, sentences, words, depth], got {:?} and {:?}",
                line_shape, word_shape
            )));
        }
        if line_shape[..2] != word_shape[..2] {
            return Err(Memn2nError::ShapeError(format!(
                "Line memory and word memory must share batch and sentence dimensions, got {:?} and {:?}",
                line_shape, word_shape
            )));
        }
        if line_shape[2] != self.memory_depth || word_shape[3] != self.memory_depth {
            return Err(Memn2nError::ShapeError(format!(
                "Memory depth must be {}, got {:?} and {:?}",
                self.memory_depth, line_shape, word_shape
            )));
        }

        let values = prepare_memory(line_memory, line_lengths, self.check_inner_dims_defined)?;
        let mut word_values =
            prepare_memory(word_memory, line_lengths, self.check_inner_dims_defined)?;

        let word_mask = match word_lengths {
            Some(word_lengths) => {
                if word_lengths.size() != line_shape[..2] {
                    return Err(Memn2nError::ShapeError(format!(
                        "Word lengths must be shaped {:?}, got {:?}",
                        &line_shape[..2],
                        word_lengths.size()
                    )));
                }
                let word_mask = sequence_mask(&word_lengths.flatten(0, 1), word_shape[2])
                    .view([word_shape[0], word_shape[1], word_shape[2]]);
                word_values = word_values * word_mask.unsqueeze(-1).to_kind(word_memory.kind());
                Some(word_mask)
            }
            None => None,
        };
        let keys = values.apply(&self.memory_layer);

        tracing::debug!(
            batch_size = line_shape[0],
            sentences = line_shape[1],
            words = word_shape[2],
            masked = line_lengths.is_some(),
            "prepared hierarchical attention memory"
        );

        Ok(PreparedMemory {
            values,
            keys,
            word_values,
            line_lengths: line_lengths.map(|lengths| lengths.to_kind(Kind::Int64)),
            word_mask,
            batch_size: line_shape[0],
            alignments_size: line_shape[1],
            word_alignments_size: word_shape[2],
        })
    }

    fn sentence_score(&self, query: &Tensor, keys: &Tensor) -> Result<Tensor, Memn2nError> {
        let depth = query.size()[1];
        let key_units = keys.size()[2];
        if depth != key_units {
            return Err(Memn2nError::ShapeError(format!(
                "Incompatible inner dimensions between query and keys. Query has units: {}. Keys have units: {}. \
                Perhaps you need to set num_units to the keys' dimension ({})?",
                depth, key_units, key_units
            )));
        }
        // [batch_size, 1, depth] x [batch_size, depth, sentences] -> [batch_size, sentences]
        let score = query
            .unsqueeze(1)
            .matmul(&keys.transpose(1, 2))
            .squeeze_dim(1);
        Ok(match &self.attention_g {
            Some(g) => score * g,
            None => score,
        })
    }

    fn word_score(&self, query: &Tensor, word_values: &Tensor) -> Result<Tensor, Memn2nError> {
        let (batch_size, depth) = (query.size()[0], query.size()[1]);
        let word_units = word_values.size()[3];
        if depth != word_units {
            return Err(Memn2nError::ShapeError(format!(
                "Incompatible inner dimensions between query and word memory. Query has units: {}. Words have units: {}.",
                depth, word_units
            )));
        }
        // [batch_size, sentences, words, depth] x [batch_size, 1, depth, 1] -> [batch_size, sentences, words]
        let scores = word_values
            .matmul(&query.view([batch_size, 1, depth, 1]))
            .squeeze_dim(-1);
        Ok(match &self.attention_g {
            Some(g) => scores * g,
            None => scores,
        })
    }

    /// Scores a query against the prepared memory.
    ///
    /// # Arguments
    ///
    /// * `query` - `[batch_size, num_units]` decoder output for the current step
    /// * `memory` - memory returned by `prepare`
    /// * `_previous_alignments` - alignments of the previous step (unused by multiplicative scoring)
    ///
    /// # Returns
    ///
    /// * `alignments` - `[batch_size, sentences]` sentence alignment
    /// * `word_alignments` - `[batch_size, sentences * words]` sentence-weighted word alignment
    pub fn score(
        &self,
        query: &Tensor,
        memory: &PreparedMemory,
        _previous_alignments: &Tensor,
    ) -> Result<(Tensor, Tensor), Memn2nError> {
        let score = self.sentence_score(query, memory.keys())?;
        let word_scores = self.word_score(query, memory.word_values())?;

        let masked_score = maybe_mask_score(&score, memory.line_lengths(), self.score_mask_value)?;
        let alignments = self.normalizer.normalize(&masked_score);

        let word_weights = match self.word_score_normalization {
            WordScoreNormalization::unnormalized => word_scores,
            WordScoreNormalization::softmax => match &memory.word_mask {
                Some(word_mask) => word_scores
                    .masked_fill(
                        &word_mask.logical_not(),
                        get_negative_infinity(word_scores.kind())?,
                    )
                    .softmax(-1, word_scores.kind()),
                None => word_scores.softmax(-1, word_scores.kind()),
            },
        };
        let word_alignments = word_weights * alignments.unsqueeze(-1);
        let word_alignments = match &memory.word_mask {
            Some(word_mask) => word_alignments * word_mask.to_kind(alignments.kind()),
            None => word_alignments,
        };

        Ok((alignments, word_alignments.view([memory.batch_size, -1])))
    }
}
