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

use crate::attention::{
    maybe_mask_score, AttentionState, AttentionWrapper, AttentionWrapperConfig, CellInputMixer,
    HierarchicalAttention, HierarchicalAttentionConfig, Normalizer, PreparedMemory,
    WordScoreNormalization,
};
use crate::cell::{CellState, CellType};
use crate::data::{BatchTensors, EOS_ID, GO_ID, PAD_ID, UNK_ID};
use crate::decoder::{
    dynamic_decode, BasicDecoder, DecodeConfig, DynamicDecodeOutput, GreedyHelper, Helper,
    TeacherForcingHelper,
};
use crate::{Config, Memn2nError};
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use tch::nn::{embedding, EmbeddingConfig, Module};
use tch::{nn, Kind, Tensor};

#[derive(Debug, Serialize, Deserialize, Clone)]
/// # MemN2N dialogue model configuration
/// Defines the encoder and decoder sizes and the decoding behaviour.
pub struct MemN2NDialogConfig {
    /// Encoder vocabulary size
    pub vocab_size: i64,
    /// Closed decoder vocabulary size. Copied words get ids at or above this value.
    pub decoder_vocab_size: i64,
    /// Embedding size, also used as the hidden size of the encoder and decoder
    pub embedding_size: i64,
    /// Number of memory hops of the encoder
    pub hops: i64,
    #[serde(default)]
    pub attention_layer_size: Option<i64>,
    #[serde(default)]
    pub alignment_history: bool,
    #[serde(default)]
    pub output_attention: bool,
    #[serde(default)]
    pub scale_attention: bool,
    #[serde(default)]
    pub normalizer: Normalizer,
    #[serde(default)]
    pub word_score_normalization: WordScoreNormalization,
    pub cell_type: CellType,
    pub max_decode_length: i64,
    #[serde(default)]
    pub impute_finished: bool,
    #[serde(default)]
    pub output_time_major: bool,
}

impl Config for MemN2NDialogConfig {}

impl Default for MemN2NDialogConfig {
    fn default() -> Self {
        MemN2NDialogConfig {
            vocab_size: 5000,
            decoder_vocab_size: 1000,
            embedding_size: 128,
            hops: 3,
            attention_layer_size: None,
            alignment_history: false,
            output_attention: false,
            scale_attention: false,
            normalizer: Normalizer::softmax,
            word_score_normalization: WordScoreNormalization::softmax,
            cell_type: CellType::lstm,
            max_decode_length: 20,
            impute_finished: true,
            output_time_major: false,
        }
    }
}

/// # End-to-end memory network dialogue model
/// Encodes the dialogue history with MemN2N hops and decodes the answer with a recurrent decoder
/// attending over the history at the sentence and word level:
/// - `story_embeddings`: word embeddings of the history. The line memory is the bag-of-words sum
/// of every sentence, the word memory keeps the individual word embeddings.
/// - `query_embeddings`: bag-of-words embedding of the user query, refined over `hops` memory
/// reads into the initial state of the decoder cell.
/// - `decoder_embeddings`: embeddings of the decoder vocabulary
/// - `wrapper`: `AttentionWrapper` around the decoder cell, computing the copy gate
/// - `output_layer`: projection to the decoder vocabulary
pub struct MemN2NDialogModel {
    story_embeddings: nn::Embedding,
    query_embeddings: nn::Embedding,
    hop_layer: nn::Linear,
    decoder_embeddings: nn::Embedding,
    wrapper: AttentionWrapper,
    output_layer: nn::Linear,
    config: MemN2NDialogConfig,
}

impl MemN2NDialogModel {
    /// Build a new `MemN2NDialogModel`
    ///
    /// # Arguments
    ///
    /// * `p` - Variable store path for the root of the model
    /// * `config` - `MemN2NDialogConfig` object defining the model architecture
    ///
    /// # Example
    ///
    /// ```no_run
    /// use rust_memn2n::memn2n::{MemN2NDialogConfig, MemN2NDialogModel};
    /// use rust_memn2n::Config;
    /// use std::path::Path;
    /// use tch::{nn, Device};
    ///
    /// # fn main() -> anyhow::Result<()> {
    /// let config_path = Path::new("path/to/config.json");
    /// let vs = nn::VarStore::new(Device::Cpu);
    /// let config = MemN2NDialogConfig::from_file(config_path)?;
    /// let model = MemN2NDialogModel::new(&vs.root() / "memn2n", &config)?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn new<'p, P>(p: P, config: &MemN2NDialogConfig) -> Result<MemN2NDialogModel, Memn2nError>
    where
        P: Borrow<nn::Path<'p>>,
    {
        let p = p.borrow();
        if config.embedding_size <= 0 || config.hops < 0 || config.decoder_vocab_size <= EOS_ID {
            return Err(Memn2nError::InvalidConfigurationError(format!(
                "Invalid model sizes: embedding_size {}, hops {}, decoder_vocab_size {}",
                config.embedding_size, config.hops, config.decoder_vocab_size
            )));
        }
        let embedding_config = EmbeddingConfig {
            padding_idx: PAD_ID,
            ..Default::default()
        };
        let hidden_size = config.embedding_size;

        let story_embeddings = embedding(
            p / "story_embeddings",
            config.vocab_size,
            hidden_size,
            embedding_config,
        );
        let query_embeddings = embedding(
            p / "query_embeddings",
            config.vocab_size,
            hidden_size,
            embedding_config,
        );
        let hop_layer = nn::linear(p / "hop", hidden_size, hidden_size, Default::default());
        let decoder_embeddings = embedding(
            p / "decoder_embeddings",
            config.decoder_vocab_size,
            hidden_size,
            embedding_config,
        );

        let attention_config = HierarchicalAttentionConfig {
            num_units: hidden_size,
            memory_depth: hidden_size,
            scale: config.scale_attention,
            normalizer: config.normalizer,
            word_score_normalization: config.word_score_normalization,
            score_mask_value: None,
            check_inner_dims_defined: true,
        };
        let mechanism = HierarchicalAttention::new(p / "attention", &attention_config);
        let attention_size = config.attention_layer_size.unwrap_or(hidden_size);
        let cell = config
            .cell_type
            .build(p / "cell", hidden_size + attention_size, hidden_size);
        let wrapper_config = AttentionWrapperConfig {
            attention_layer_sizes: config.attention_layer_size.map(|size| vec![size]),
            alignment_history: config.alignment_history,
            output_attention: config.output_attention,
        };
        let wrapper = AttentionWrapper::new(
            p / "wrapper",
            cell,
            vec![mechanism],
            &wrapper_config,
            CellInputMixer::Concat,
        )?;
        let output_layer = nn::linear(
            p / "output_layer",
            wrapper.output_size(),
            config.decoder_vocab_size,
            Default::default(),
        );

        Ok(MemN2NDialogModel {
            story_embeddings,
            query_embeddings,
            hop_layer,
            decoder_embeddings,
            wrapper,
            output_layer,
            config: config.clone(),
        })
    }

    pub fn config(&self) -> &MemN2NDialogConfig {
        &self.config
    }

    /// Encodes the dialogue history and the query.
    ///
    /// # Returns
    ///
    /// * `PreparedMemory` with the line memory `[batch_size, memory_size, hidden_size]` and word memory `[batch_size, memory_size, sentence_size, hidden_size]`
    /// * `CellState` initial decoder state built from the query after the memory hops
    pub fn encode(&self, batch: &BatchTensors) -> Result<(PreparedMemory, CellState), Memn2nError> {
        let word_memory = batch.stories.apply(&self.story_embeddings);
        let line_memory = word_memory.sum_dim_intlist([2].as_slice(), false, word_memory.kind());
        let mut query_state = batch.queries.apply(&self.query_embeddings).sum_dim_intlist(
            [1].as_slice(),
            false,
            word_memory.kind(),
        );

        for _ in 0..self.config.hops {
            // [batch_size, memory_size, hidden] x [batch_size, hidden, 1] -> [batch_size, memory_size]
            let scores = line_memory
                .matmul(&query_state.unsqueeze(-1))
                .squeeze_dim(-1);
            let probabilities = maybe_mask_score(&scores, Some(&batch.memory_lengths), None)?
                .softmax(-1, scores.kind());
            let output = probabilities
                .unsqueeze(1)
                .matmul(&line_memory)
                .squeeze_dim(1);
            query_state = query_state.apply(&self.hop_layer) + output;
        }

        let memory = self.wrapper.mechanisms()[0].prepare(
            &line_memory,
            &word_memory,
            Some(&batch.memory_lengths),
            Some(&batch.story_sizes),
        )?;
        let cell_state = match self.config.cell_type {
            CellType::lstm => CellState::Lstm {
                c: query_state.shallow_clone(),
                h: query_state,
            },
            CellType::gru => CellState::Gru { h: query_state },
        };
        Ok((memory, cell_state))
    }

    fn decode(
        &self,
        memory: PreparedMemory,
        cell_state: CellState,
        helper: Box<dyn Helper + '_>,
        maximum_iterations: i64,
    ) -> Result<DynamicDecodeOutput<AttentionState>, Memn2nError> {
        let attention_cell = self.wrapper.bind(vec![memory], Some(cell_state))?;
        let initial_state = attention_cell.initial_state(Some(maximum_iterations));
        let decoder = BasicDecoder::new(
            attention_cell,
            helper,
            initial_state,
            Some(&self.output_layer),
        )?;
        let decode_config = DecodeConfig {
            output_time_major: self.config.output_time_major,
            impute_finished: self.config.impute_finished,
            maximum_iterations: Some(maximum_iterations),
        };
        dynamic_decode(&decoder, &decode_config)
    }

    /// Teacher-forced decoding of the batch answers. The decoder reads `GO` followed by the
    /// embedding lookup ids of the answer, shifted by one step.
    ///
    /// # Returns
    ///
    /// * `DynamicDecodeOutput` with `rnn_output` logits `[batch_size, candidate_sentence_size, decoder_vocab_size]`, word alignments and copy gates
    pub fn forward(
        &self,
        batch: &BatchTensors,
    ) -> Result<DynamicDecodeOutput<AttentionState>, Memn2nError> {
        let (memory, cell_state) = self.encode(batch)?;
        let answer_shape = batch.answers_emb_lookup.size();
        let go_ids = Tensor::full(
            [answer_shape[0], 1],
            GO_ID,
            (Kind::Int64, batch.answers_emb_lookup.device()),
        );
        let decoder_input_ids = Tensor::cat(
            &[
                &go_ids,
                &batch.answers_emb_lookup.slice(1, 0, answer_shape[1] - 1, 1),
            ],
            1,
        );
        let decoder_inputs = decoder_input_ids.apply(&self.decoder_embeddings);
        let helper = TeacherForcingHelper::new(&decoder_inputs, &batch.answer_sizes)?;

        self.decode(memory, cell_state, Box::new(helper), answer_shape[1])
    }

    /// Greedy decoding for up to `max_decode_length` steps. Copied out-of-vocabulary ids are fed
    /// back to the decoder as UNK.
    pub fn generate(
        &self,
        batch: &BatchTensors,
    ) -> Result<DynamicDecodeOutput<AttentionState>, Memn2nError> {
        let (memory, cell_state) = self.encode(batch)?;
        let start_tokens = Tensor::full(
            [memory.batch_size()],
            GO_ID,
            (Kind::Int64, batch.stories.device()),
        );
        let embeddings: &dyn Module = &self.decoder_embeddings;
        let helper = GreedyHelper::new(embeddings, &start_tokens, EOS_ID)?
            .with_oov_mapping(self.config.decoder_vocab_size, UNK_ID);

        self.decode(
            memory,
            cell_state,
            Box::new(helper),
            self.config.max_decode_length,
        )
    }
}
