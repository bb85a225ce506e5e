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

use crate::attention::mechanism::{HierarchicalAttention, PreparedMemory};
use crate::attention::state::{AlignmentHistory, AttentionState};
use crate::cell::{CellState, RecurrentCell};
use crate::common::linear::{linear_no_bias, multi_linear, LinearNoBias, MultiLinear};
use crate::common::TimeBuffer;
use crate::Memn2nError;
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;
use tch::nn::Module;
use tch::{nn, Tensor};

/// # Builds the effective cell input from the step input and the previous attention vector
pub enum CellInputMixer {
    /// Concatenation `[inputs, attention]` along the last dimension
    Concat,
    /// User-provided mixing function `(inputs, attention) -> cell_inputs`. The output width must
    /// match the input size of the wrapped cell.
    Custom(Box<dyn Fn(&Tensor, &Tensor) -> Tensor + Send + Sync>),
}

impl CellInputMixer {
    pub fn mix(&self, inputs: &Tensor, attention: &Tensor) -> Tensor {
        match self {
            CellInputMixer::Concat => Tensor::cat(&[inputs, attention], -1),
            CellInputMixer::Custom(mixer) => mixer(inputs, attention),
        }
    }
}

impl Default for CellInputMixer {
    fn default() -> Self {
        CellInputMixer::Concat
    }
}

impl fmt::Debug for CellInputMixer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellInputMixer::Concat => write!(f, "Concat"),
            CellInputMixer::Custom(_) => write!(f, "Custom"),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
/// # Attention wrapper configuration
pub struct AttentionWrapperConfig {
    /// Output size of the attention layer of every mechanism. If `None`, the context vectors are
    /// used as attention directly.
    pub attention_layer_sizes: Option<Vec<i64>>,
    /// Record the sentence and word alignments of every step
    pub alignment_history: bool,
    /// Emit the attention vector (`true`) or the cell output with alignments and copy gate (`false`)
    pub output_attention: bool,
}

/// # Output of a single attention wrapper step
#[derive(Debug)]
pub struct WrapperOutput {
    /// Attention vector in attention-output mode, cell output otherwise
    pub output: Tensor,
    /// Sentence alignments `[batch_size, sentences]`, one per mechanism
    pub line_alignments: Vec<Tensor>,
    /// Word alignments `[batch_size, sentences * words]`, one per mechanism
    pub word_alignments: Vec<Tensor>,
    /// Copy gate `[batch_size, 1]`
    pub p_gens: Tensor,
}

/// # Recurrent cell wrapped with hierarchical attention and a copy gate
/// Holds the learned parameters only. Bind it to the prepared memories of a decoding episode with
/// `bind` to obtain a steppable `AttentionCell`.
#[derive(Debug)]
pub struct AttentionWrapper {
    cell: Box<dyn RecurrentCell + Send>,
    mechanisms: Vec<HierarchicalAttention>,
    attention_layers: Option<Vec<LinearNoBias>>,
    p_gen_layer: MultiLinear,
    cell_input_mixer: CellInputMixer,
    attention_size: i64,
    alignment_history: bool,
    output_attention: bool,
}

impl AttentionWrapper {
    /// Build a new `AttentionWrapper`
    ///
    /// # Arguments
    ///
    /// * `p` - Variable store path for the root of the wrapper
    /// * `cell` - base recurrent cell. With the default mixer its input size is the step input size plus the attention size.
    /// * `mechanisms` - one or more hierarchical attention mechanisms
    /// * `config` - `AttentionWrapperConfig`
    /// * `cell_input_mixer` - `CellInputMixer` building the cell input
    pub fn new<'p, P>(
        p: P,
        cell: Box<dyn RecurrentCell + Send>,
        mechanisms: Vec<HierarchicalAttention>,
        config: &AttentionWrapperConfig,
        cell_input_mixer: CellInputMixer,
    ) -> Result<AttentionWrapper, Memn2nError>
    where
        P: Borrow<nn::Path<'p>>,
    {
        let p = p.borrow();
        if mechanisms.is_empty() {
            return Err(Memn2nError::InvalidConfigurationError(
                "At least one attention mechanism is required".to_string(),
            ));
        }

        let (attention_layers, attention_size) = match &config.attention_layer_sizes {
            Some(layer_sizes) => {
                if layer_sizes.len() != mechanisms.len() {
                    return Err(Memn2nError::InvalidConfigurationError(format!(
                        "If provided, attention_layer_sizes must contain exactly one integer per attention_mechanism, saw: {}",
                        layer_sizes.len()
                    )));
                }
                let p_layers = p / "attention_layers";
                let layers = layer_sizes
                    .iter()
                    .zip(mechanisms.iter())
                    .enumerate()
                    .map(|(i, (layer_size, mechanism))| {
                        linear_no_bias(
                            &p_layers / i,
                            cell.output_size() + mechanism.memory_depth(),
                            *layer_size,
                            Default::default(),
                        )
                    })
                    .collect::<Vec<LinearNoBias>>();
                (Some(layers), layer_sizes.iter().sum())
            }
            None => (
                None,
                mechanisms.iter().map(|m| m.memory_depth()).sum::<i64>(),
            ),
        };

        let p_gen_layer = multi_linear(
            p / "p_gen",
            attention_size + cell.state_size() + cell.input_size(),
            1,
            Default::default(),
        );

        Ok(AttentionWrapper {
            cell,
            mechanisms,
            attention_layers,
            p_gen_layer,
            cell_input_mixer,
            attention_size,
            alignment_history: config.alignment_history,
            output_attention: config.output_attention,
        })
    }

    pub fn cell(&self) -> &dyn RecurrentCell {
        self.cell.as_ref()
    }

    pub fn mechanisms(&self) -> &[HierarchicalAttention] {
        &self.mechanisms
    }

    pub fn attention_size(&self) -> i64 {
        self.attention_size
    }

    /// Width of the step output: attention size in attention-output mode, cell output size otherwise
    pub fn output_size(&self) -> i64 {
        if self.output_attention {
            self.attention_size
        } else {
            self.cell.output_size()
        }
    }

    pub fn output_attention(&self) -> bool {
        self.output_attention
    }

    /// Attaches the memories of a decoding episode, one per attention mechanism.
    ///
    /// # Arguments
    ///
    /// * `memories` - prepared memories, in the order of the attention mechanisms
    /// * `initial_cell_state` - optional initial state of the base cell (e.g. the final state of an encoder). Zero state if `None`.
    pub fn bind(
        &self,
        memories: Vec<PreparedMemory>,
        initial_cell_state: Option<CellState>,
    ) -> Result<AttentionCell<'_>, Memn2nError> {
        if memories.len() != self.mechanisms.len() {
            return Err(Memn2nError::InvalidConfigurationError(format!(
                "Expected {} prepared memories (one per attention mechanism), got {}",
                self.mechanisms.len(),
                memories.len()
            )));
        }
        let batch_size = memories[0].batch_size();
        if let Some(memory) = memories.iter().find(|m| m.batch_size() != batch_size) {
            return Err(Memn2nError::ShapeError(format!(
                "All memories must share the same batch size, got {} and {}",
                batch_size,
                memory.batch_size()
            )));
        }
        for (mechanism, memory) in self.mechanisms.iter().zip(memories.iter()) {
            if mechanism.memory_depth() != memory.memory_depth() {
                return Err(Memn2nError::ShapeError(format!(
                    "Memory depth {} does not match attention mechanism depth {}",
                    memory.memory_depth(),
                    mechanism.memory_depth()
                )));
            }
        }
        if let Some(cell_state) = &initial_cell_state {
            if cell_state.batch_size() != batch_size {
                return Err(Memn2nError::ShapeError(format!(
                    "When constructing the initial state of the attention cell, non-matching batch sizes between the initial cell state ({}) \
                    and the memory ({}). Are you using a beam search? You may need to tile the memory and initial state.",
                    cell_state.batch_size(),
                    batch_size
                )));
            }
        }

        Ok(AttentionCell {
            wrapper: self,
            memories,
            initial_cell_state,
            batch_size,
        })
    }
}

/// # Attention wrapper bound to the memories of one decoding episode
#[derive(Debug)]
pub struct AttentionCell<'a> {
    wrapper: &'a AttentionWrapper,
    memories: Vec<PreparedMemory>,
    initial_cell_state: Option<CellState>,
    batch_size: i64,
}

impl<'a> AttentionCell<'a> {
    pub fn wrapper(&self) -> &AttentionWrapper {
        self.wrapper
    }

    pub fn memories(&self) -> &[PreparedMemory] {
        &self.memories
    }

    pub fn batch_size(&self) -> i64 {
        self.batch_size
    }

    pub fn output_size(&self) -> i64 {
        self.wrapper.output_size()
    }

    /// Initial state: provided (or zero) cell state, zero attention, zero alignments and empty
    /// history buffers pre-sized to `history_capacity` steps.
    pub fn initial_state(&self, history_capacity: Option<i64>) -> AttentionState {
        let cell = &self.wrapper.cell;
        let zero_cell_state = cell.zero_state(self.batch_size);
        let kind = zero_cell_state.hidden().kind();
        let device = zero_cell_state.hidden().device();

        let alignment_history = if self.wrapper.alignment_history {
            Some(
                self.memories
                    .iter()
                    .map(|memory| AlignmentHistory {
                        line: TimeBuffer::new(
                            &[self.batch_size, memory.alignments_size()],
                            (kind, device),
                            history_capacity,
                        ),
                        word: TimeBuffer::new(
                            &[
                                self.batch_size,
                                memory.alignments_size() * memory.word_alignments_size(),
                            ],
                            (kind, device),
                            history_capacity,
                        ),
                    })
                    .collect(),
            )
        } else {
            None
        };

        let zero_state = AttentionState {
            cell_state: zero_cell_state,
            attention: Tensor::zeros(
                [self.batch_size, self.wrapper.attention_size],
                (kind, device),
            ),
            time: 0,
            alignments: self
                .memories
                .iter()
                .map(|memory| memory.initial_alignments(self.batch_size, kind))
                .collect(),
            alignment_history,
        };
        match &self.initial_cell_state {
            Some(cell_state) => zero_state.with_cell_state(cell_state.shallow_clone()),
            None => zero_state,
        }
    }

    /// Performs a step of attention-wrapped recurrent decoding.
    ///
    /// # Arguments
    ///
    /// * `inputs` - step input `[batch_size, input_size]`
    /// * `state` - `AttentionState` of the previous step
    ///
    /// # Returns
    ///
    /// * `WrapperOutput` for the step
    /// * next `AttentionState`, with the time incremented by one
    pub fn call(
        &self,
        inputs: &Tensor,
        state: AttentionState,
    ) -> Result<(WrapperOutput, AttentionState), Memn2nError> {
        let wrapper = self.wrapper;
        let cell_inputs = wrapper.cell_input_mixer.mix(inputs, &state.attention);
        let (cell_output, next_cell_state) = wrapper.cell.step(&cell_inputs, &state.cell_state)?;

        let cell_batch_size = cell_output.size()[0];
        for memory in self.memories.iter() {
            if memory.batch_size() != cell_batch_size {
                return Err(Memn2nError::ShapeError(format!(
                    "Non-matching batch sizes between the memory ({}) and the query ({}). \
                    Are you using a beam search? You may need to tile the memory input for every beam.",
                    memory.batch_size(),
                    cell_batch_size
                )));
            }
        }

        let AttentionState {
            cell_state: previous_cell_state,
            time,
            alignments: previous_alignments,
            mut alignment_history,
            ..
        } = state;

        let mut attentions = Vec::with_capacity(wrapper.mechanisms.len());
        let mut line_alignments = Vec::with_capacity(wrapper.mechanisms.len());
        let mut word_alignments = Vec::with_capacity(wrapper.mechanisms.len());
        for (i, (mechanism, memory)) in wrapper
            .mechanisms
            .iter()
            .zip(self.memories.iter())
            .enumerate()
        {
            let (alignments, mechanism_word_alignments) =
                mechanism.score(&cell_output, memory, &previous_alignments[i])?;
            // [batch_size, 1, sentences] x [batch_size, sentences, depth] -> [batch_size, depth]
            let context = alignments
                .unsqueeze(1)
                .matmul(memory.values())
                .squeeze_dim(1);
            let attention = match &wrapper.attention_layers {
                Some(layers) => layers[i].forward(&Tensor::cat(&[&cell_output, &context], 1)),
                None => context,
            };
            if let Some(history) = alignment_history.as_mut() {
                history[i].line.write(time, &alignments)?;
                history[i].word.write(time, &mechanism_word_alignments)?;
            }
            attentions.push(attention);
            line_alignments.push(alignments);
            word_alignments.push(mechanism_word_alignments);
        }
        let attention = Tensor::cat(&attentions, 1);

        let mut p_gen_args = vec![&attention];
        p_gen_args.extend(previous_cell_state.tensors());
        p_gen_args.push(&cell_inputs);
        let p_gens = wrapper.p_gen_layer.forward(&p_gen_args)?.sigmoid();

        let output = if wrapper.output_attention {
            attention.shallow_clone()
        } else {
            cell_output
        };
        let next_state = AttentionState {
            cell_state: next_cell_state,
            attention,
            time: time + 1,
            alignments: word_alignments.iter().map(|a| a.shallow_clone()).collect(),
            alignment_history,
        };

        Ok((
            WrapperOutput {
                output,
                line_alignments,
                word_alignments,
                p_gens,
            },
            next_state,
        ))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::attention::HierarchicalAttentionConfig;
    use crate::cell::{GruCell, LstmCell};
    use tch::{Device, Kind};

    const DEPTH: i64 = 8;
    const INPUT: i64 = 5;

    fn mechanism(vs: &nn::VarStore, name: &str) -> HierarchicalAttention {
        let config = HierarchicalAttentionConfig {
            num_units: DEPTH,
            memory_depth: DEPTH,
            ..Default::default()
        };
        HierarchicalAttention::new(&vs.root() / name, &config)
    }

    fn memory(mechanism: &HierarchicalAttention, batch_size: i64) -> PreparedMemory {
        let line_memory = Tensor::rand([batch_size, 3, DEPTH], (Kind::Float, Device::Cpu));
        let word_memory = Tensor::rand([batch_size, 3, 4, DEPTH], (Kind::Float, Device::Cpu));
        mechanism
            .prepare(&line_memory, &word_memory, None, None)
            .unwrap()
    }

    #[test]
    fn attention_layer_sizes_must_match_mechanisms() {
        let vs = nn::VarStore::new(Device::Cpu);
        let cell = Box::new(LstmCell::new(&vs.root() / "cell", INPUT + 16, DEPTH));
        let config = AttentionWrapperConfig {
            attention_layer_sizes: Some(vec![16, 16]),
            ..Default::default()
        };
        let wrapper = AttentionWrapper::new(
            &vs.root() / "wrapper",
            cell,
            vec![mechanism(&vs, "attention")],
            &config,
            CellInputMixer::Concat,
        );
        assert!(matches!(
            wrapper,
            Err(Memn2nError::InvalidConfigurationError(_))
        ));
    }

    #[test]
    fn step_produces_gate_and_history() -> anyhow::Result<()> {
        let vs = nn::VarStore::new(Device::Cpu);
        let mechanisms = vec![mechanism(&vs, "first"), mechanism(&vs, "second")];
        let memories = vec![memory(&mechanisms[0], 2), memory(&mechanisms[1], 2)];
        let config = AttentionWrapperConfig {
            attention_layer_sizes: Some(vec![6, 4]),
            alignment_history: true,
            output_attention: true,
        };
        let cell = Box::new(GruCell::new(&vs.root() / "cell", INPUT + 10, DEPTH));
        let wrapper = AttentionWrapper::new(
            &vs.root() / "wrapper",
            cell,
            mechanisms,
            &config,
            CellInputMixer::Concat,
        )?;
        let attention_cell = wrapper.bind(memories, None)?;

        let mut state = attention_cell.initial_state(Some(2));
        for _ in 0..2 {
            let inputs = Tensor::rand([2, INPUT], (Kind::Float, Device::Cpu));
            let (output, next_state) = attention_cell.call(&inputs, state)?;
            assert_eq!(output.output.size(), vec![2, 10]);
            assert_eq!(output.p_gens.size(), vec![2, 1]);
            assert!(bool::try_from(output.p_gens.gt(0.0).all())?);
            assert!(bool::try_from(output.p_gens.lt(1.0).all())?);
            assert_eq!(output.word_alignments[1].size(), vec![2, 12]);
            state = next_state;
        }
        assert_eq!(state.time, 2);
        let history = state.alignment_history.as_ref().unwrap();
        assert_eq!(history[0].line.stack().size(), vec![2, 2, 3]);
        assert_eq!(history[1].word.stack().size(), vec![2, 2, 12]);
        Ok(())
    }

    #[test]
    fn initial_cell_state_batch_is_checked() {
        let vs = nn::VarStore::new(Device::Cpu);
        let mechanism = mechanism(&vs, "attention");
        let memories = vec![memory(&mechanism, 2)];
        let cell = Box::new(GruCell::new(&vs.root() / "cell", INPUT + DEPTH, DEPTH));
        let wrapper = AttentionWrapper::new(
            &vs.root() / "wrapper",
            cell,
            vec![mechanism],
            &Default::default(),
            CellInputMixer::Concat,
        )
        .unwrap();
        let initial_cell_state = CellState::Gru {
            h: Tensor::zeros([3, DEPTH], (Kind::Float, Device::Cpu)),
        };
        assert!(matches!(
            wrapper.bind(memories, Some(initial_cell_state)),
            Err(Memn2nError::ShapeError(_))
        ));
    }

    #[test]
    fn custom_mixer_feeds_the_cell() -> anyhow::Result<()> {
        let vs = nn::VarStore::new(Device::Cpu);
        let mechanism = mechanism(&vs, "attention");
        let memories = vec![memory(&mechanism, 2)];
        // Input and attention have the same width and are summed
        let cell = Box::new(LstmCell::new(&vs.root() / "cell", DEPTH, DEPTH));
        let wrapper = AttentionWrapper::new(
            &vs.root() / "wrapper",
            cell,
            vec![mechanism],
            &Default::default(),
            CellInputMixer::Custom(Box::new(|inputs, attention| inputs + attention)),
        )?;
        let attention_cell = wrapper.bind(memories, None)?;

        let state = attention_cell.initial_state(None);
        let inputs = Tensor::rand([2, DEPTH], (Kind::Float, Device::Cpu));
        let (output, next_state) = attention_cell.call(&inputs, state)?;
        assert_eq!(output.output.size(), vec![2, DEPTH]);
        assert!(output.output.equal(next_state.cell_state.hidden()));
        assert!(next_state.alignment_history.is_none());
        Ok(())
    }
}
