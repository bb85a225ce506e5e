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

use crate::attention::{AttentionCell, AttentionState};
use crate::decoder::helper::Helper;
use crate::decoder::{DecodeState, Decoder, DecoderStep};
use crate::Memn2nError;
use tch::nn::Module;
use tch::{nn, Tensor};

/// # Output of a decoding step
#[derive(Debug)]
pub struct BasicDecoderOutput {
    /// Step output after the optional output projection, `[batch_size, output_size]`
    pub rnn_output: Tensor,
    /// Sample ids drawn by the helper, `[batch_size]`
    pub sample_id: Tensor,
}

impl DecodeState for AttentionState {
    fn snapshot(&self) -> Self {
        AttentionState::snapshot(self)
    }

    fn check_same_structure(&self, other: &Self) -> Result<(), Memn2nError> {
        AttentionState::check_same_structure(self, other)
    }

    fn hold_finished(self, previous: &Self, finished: &Tensor) -> Result<Self, Memn2nError> {
        AttentionState::hold_finished(self, previous, finished)
    }
}

/// # Basic step decoder
/// Runs the attention cell, projects its output to the vocabulary and lets a `Helper` pick the
/// sample ids and the next inputs.
pub struct BasicDecoder<'a> {
    cell: AttentionCell<'a>,
    helper: Box<dyn Helper + 'a>,
    initial_state: AttentionState,
    output_layer: Option<&'a nn::Linear>,
}

impl<'a> BasicDecoder<'a> {
    /// Build a new `BasicDecoder`
    ///
    /// # Arguments
    ///
    /// * `cell` - attention cell bound to the memories of the episode
    /// * `helper` - `Helper` policy (teacher forcing, greedy or sampling)
    /// * `initial_state` - initial `AttentionState`, usually `cell.initial_state(..)`
    /// * `output_layer` - optional projection applied to the step output before sampling
    pub fn new(
        cell: AttentionCell<'a>,
        helper: Box<dyn Helper + 'a>,
        initial_state: AttentionState,
        output_layer: Option<&'a nn::Linear>,
    ) -> Result<BasicDecoder<'a>, Memn2nError> {
        if helper.batch_size() != cell.batch_size() {
            return Err(Memn2nError::ShapeError(format!(
                "Helper batch size ({}) does not match the memory batch size ({})",
                helper.batch_size(),
                cell.batch_size()
            )));
        }
        if initial_state.batch_size() != cell.batch_size() {
            return Err(Memn2nError::ShapeError(format!(
                "Initial state batch size ({}) does not match the memory batch size ({})",
                initial_state.batch_size(),
                cell.batch_size()
            )));
        }
        if let Some(output_layer) = output_layer {
            let layer_input_size = output_layer.ws.size()[1];
            if layer_input_size != cell.output_size() {
                return Err(Memn2nError::InvalidConfigurationError(format!(
                    "Output layer expects inputs of size {}, the attention cell emits {}",
                    layer_input_size,
                    cell.output_size()
                )));
            }
        }
        Ok(BasicDecoder {
            cell,
            helper,
            initial_state,
            output_layer,
        })
    }

    pub fn cell(&self) -> &AttentionCell<'a> {
        &self.cell
    }
}

impl<'a> Decoder for BasicDecoder<'a> {
    type State = AttentionState;

    fn batch_size(&self) -> i64 {
        self.cell.batch_size()
    }

    fn output_size(&self) -> i64 {
        match self.output_layer {
            Some(output_layer) => output_layer.ws.size()[0],
            None => self.cell.output_size(),
        }
    }

    fn alignment_sizes(&self) -> Vec<(i64, i64)> {
        self.cell
            .memories()
            .iter()
            .map(|memory| {
                (
                    memory.alignments_size(),
                    memory.alignments_size() * memory.word_alignments_size(),
                )
            })
            .collect()
    }

    fn initialize(&self) -> Result<(Tensor, Tensor, AttentionState), Memn2nError> {
        let (finished, inputs) = self.helper.initialize()?;
        Ok((finished, inputs, self.initial_state.shallow_clone()))
    }

    fn step(
        &self,
        time: i64,
        inputs: &Tensor,
        state: AttentionState,
    ) -> Result<DecoderStep<AttentionState>, Memn2nError> {
        let (cell_output, next_state) = self.cell.call(inputs, state)?;
        let rnn_output = match self.output_layer {
            Some(output_layer) => output_layer.forward(&cell_output.output),
            None => cell_output.output,
        };
        let sample_id = self.helper.sample(time, &rnn_output)?;
        let (finished, next_inputs) = self.helper.next_inputs(time, &rnn_output, &sample_id)?;

        Ok(DecoderStep {
            outputs: BasicDecoderOutput {
                rnn_output,
                sample_id,
            },
            line_alignments: cell_output.line_alignments,
            word_alignments: cell_output.word_alignments,
            p_gens: cell_output.p_gens,
            state: next_state,
            next_inputs,
            finished,
        })
    }
}
