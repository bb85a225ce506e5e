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

use crate::common::TimeBuffer;
use crate::decoder::basic_decoder::BasicDecoderOutput;
use crate::decoder::{DecodeState, Decoder};
use crate::Memn2nError;
use serde::{Deserialize, Serialize};
use tch::{Kind, Tensor};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
/// # Dynamic decoding configuration
pub struct DecodeConfig {
    /// Return `[time, batch_size, ...]` outputs instead of `[batch_size, time, ...]`
    pub output_time_major: bool,
    /// Zero the outputs and hold the state of batch elements that are already finished
    pub impute_finished: bool,
    /// Maximum number of decoding steps. Decodes until every element is finished if `None`.
    pub maximum_iterations: Option<i64>,
}

impl DecodeConfig {
    /// Sets the maximum number of iterations from a tensor, which must be a 0-d scalar.
    pub fn maximum_iterations_from_tensor(
        self,
        maximum_iterations: &Tensor,
    ) -> Result<DecodeConfig, Memn2nError> {
        if maximum_iterations.dim() != 0 {
            return Err(Memn2nError::InvalidConfigurationError(format!(
                "maximum_iterations must be a scalar, got shape {:?}",
                maximum_iterations.size()
            )));
        }
        Ok(DecodeConfig {
            maximum_iterations: Some(maximum_iterations.int64_value(&[])),
            ..self
        })
    }
}

/// # Output of `dynamic_decode`
#[derive(Debug)]
pub struct DynamicDecodeOutput<S> {
    /// Stacked step outputs, `[batch_size, time, output_size]` and `[batch_size, time]` sample ids
    /// (time first if `output_time_major`)
    pub outputs: BasicDecoderOutput,
    /// Decoder state after the last step
    pub final_state: S,
    /// `[batch_size]` number of steps taken by every element before finishing
    pub sequence_lengths: Tensor,
    /// Stacked sentence alignments `[batch_size, time, sentences]`, one per attention mechanism
    pub line_alignments: Vec<Tensor>,
    /// Stacked word alignments `[batch_size, time, sentences * words]`, one per attention mechanism
    pub word_alignments: Vec<Tensor>,
    /// Stacked copy gates `[batch_size, time, 1]`
    pub p_gens: Tensor,
}

/// Runs `decoder` one step at a time until every batch element is finished or the maximum number
/// of iterations is reached.
///
/// # Arguments
///
/// * `decoder` - `Decoder` to run
/// * `config` - `DecodeConfig`
///
/// # Returns
///
/// * `DynamicDecodeOutput` with stacked outputs, alignments and copy gates
///
/// # Example
///
/// ```no_run
/// # use rust_memn2n::decoder::{dynamic_decode, BasicDecoder, DecodeConfig};
/// # fn run(decoder: &BasicDecoder) -> anyhow::Result<()> {
/// let config = DecodeConfig {
///     maximum_iterations: Some(20),
///     impute_finished: true,
///     ..Default::default()
/// };
/// let output = dynamic_decode(decoder, &config)?;
/// let generated_ids = output.outputs.sample_id;
/// # Ok(())
/// # }
/// ```
pub fn dynamic_decode<D>(
    decoder: &D,
    config: &DecodeConfig,
) -> Result<DynamicDecodeOutput<D::State>, Memn2nError>
where
    D: Decoder,
{
    let (mut finished, mut inputs, mut state) = decoder.initialize()?;
    let batch_size = decoder.batch_size();
    if finished.size() != [batch_size] {
        return Err(Memn2nError::ShapeError(format!(
            "Initial finished flags must be shaped [{}], got {:?}",
            batch_size,
            finished.size()
        )));
    }
    if let Some(maximum_iterations) = config.maximum_iterations {
        if maximum_iterations <= 0 {
            finished = finished.ones_like();
        }
    }

    let device = inputs.device();
    let float_options = (inputs.kind(), device);
    let capacity = config.maximum_iterations;
    let mut rnn_outputs = TimeBuffer::new(
        &[batch_size, decoder.output_size()],
        float_options,
        capacity,
    );
    let mut sample_ids = TimeBuffer::new(&[batch_size], (Kind::Int64, device), capacity);
    let mut p_gens = TimeBuffer::new(&[batch_size, 1], float_options, capacity);
    let (mut line_alignments, mut word_alignments): (Vec<TimeBuffer>, Vec<TimeBuffer>) = decoder
        .alignment_sizes()
        .into_iter()
        .map(|(line_size, word_size)| {
            (
                TimeBuffer::new(&[batch_size, line_size], float_options, capacity),
                TimeBuffer::new(&[batch_size, word_size], float_options, capacity),
            )
        })
        .unzip();

    let mut sequence_lengths = Tensor::zeros([batch_size], (Kind::Int64, device));
    let mut time = 0i64;

    tracing::debug!(
        batch_size,
        maximum_iterations = ?config.maximum_iterations,
        impute_finished = config.impute_finished,
        "starting dynamic decoding"
    );

    while !bool::try_from(finished.all())? {
        let previous_state = state.snapshot();
        let step = decoder.step(time, &inputs, state)?;

        step.state.check_same_structure(&previous_state)?;
        if step.next_inputs.size() != inputs.size() {
            return Err(Memn2nError::ShapeError(format!(
                "Decoder inputs changed shape between steps: {:?} vs {:?}",
                inputs.size(),
                step.next_inputs.size()
            )));
        }
        if step.line_alignments.len() != line_alignments.len()
            || step.word_alignments.len() != word_alignments.len()
        {
            return Err(Memn2nError::ShapeError(
                "Number of alignments changed between steps".to_string(),
            ));
        }

        let mut next_finished = step.finished.logical_or(&finished);
        if let Some(maximum_iterations) = config.maximum_iterations {
            if time + 1 >= maximum_iterations {
                next_finished = next_finished.ones_like();
            }
        }
        let newly_finished = next_finished.logical_and(&finished.logical_not());
        sequence_lengths = sequence_lengths.masked_fill(&newly_finished, time + 1);

        let (rnn_output, sample_id, next_state) = if config.impute_finished {
            (
                step.outputs
                    .rnn_output
                    .masked_fill(&finished.unsqueeze(-1), 0.0),
                step.outputs.sample_id.masked_fill(&finished, 0),
                step.state.hold_finished(&previous_state, &finished)?,
            )
        } else {
            (step.outputs.rnn_output, step.outputs.sample_id, step.state)
        };

        rnn_outputs.write(time, &rnn_output)?;
        sample_ids.write(time, &sample_id)?;
        p_gens.write(time, &step.p_gens)?;
        for (buffer, alignment) in line_alignments.iter_mut().zip(step.line_alignments.iter()) {
            buffer.write(time, alignment)?;
        }
        for (buffer, alignment) in word_alignments.iter_mut().zip(step.word_alignments.iter()) {
            buffer.write(time, alignment)?;
        }

        tracing::trace!(
            time,
            running = next_finished.logical_not().sum(Kind::Int64).int64_value(&[]),
            "decoding step"
        );

        finished = next_finished;
        inputs = step.next_inputs;
        state = next_state;
        time += 1;
    }

    let outputs = BasicDecoderOutput {
        rnn_output: rnn_outputs.stack(),
        sample_id: sample_ids.stack(),
    };
    let (outputs, final_state) = decoder.finalize(outputs, state, &sequence_lengths)?;
    let mut line_alignments: Vec<Tensor> = line_alignments.iter().map(|b| b.stack()).collect();
    let mut word_alignments: Vec<Tensor> = word_alignments.iter().map(|b| b.stack()).collect();
    let mut p_gens = p_gens.stack();

    let outputs = if config.output_time_major {
        outputs
    } else {
        line_alignments = line_alignments.iter().map(transpose_batch_time).collect();
        word_alignments = word_alignments.iter().map(transpose_batch_time).collect();
        p_gens = transpose_batch_time(&p_gens);
        BasicDecoderOutput {
            rnn_output: transpose_batch_time(&outputs.rnn_output),
            sample_id: transpose_batch_time(&outputs.sample_id),
        }
    };

    tracing::debug!(steps = time, "dynamic decoding done");

    Ok(DynamicDecodeOutput {
        outputs,
        final_state,
        sequence_lengths,
        line_alignments,
        word_alignments,
        p_gens,
    })
}

fn transpose_batch_time(tensor: &Tensor) -> Tensor {
    tensor.transpose(0, 1)
}
