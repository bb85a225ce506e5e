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

use crate::Memn2nError;
use tch::nn::Module;
use tch::{Kind, Tensor};

/// # Decoding helper
/// Policy deciding how sample ids are drawn from the step outputs, which input is fed at the next
/// step and when a batch element is finished.
pub trait Helper {
    fn batch_size(&self) -> i64;

    /// Returns the initial `(finished, inputs)`, `finished` being a `[batch_size]` boolean tensor.
    fn initialize(&self) -> Result<(Tensor, Tensor), Memn2nError>;

    /// Returns `[batch_size]` sample ids for the vocabulary logits `outputs`.
    fn sample(&self, time: i64, outputs: &Tensor) -> Result<Tensor, Memn2nError>;

    /// Returns `(finished, next_inputs)` after the step `time`.
    fn next_inputs(
        &self,
        time: i64,
        outputs: &Tensor,
        sample_ids: &Tensor,
    ) -> Result<(Tensor, Tensor), Memn2nError>;
}

/// # Teacher forcing helper
/// Reads the ground-truth (embedded) inputs one step at a time. A batch element is finished once
/// its input sequence is exhausted. Sample ids are the argmax of the outputs.
pub struct TeacherForcingHelper {
    inputs: Tensor,
    sequence_length: Tensor,
    batch_size: i64,
    max_time: i64,
}

impl TeacherForcingHelper {
    /// Build a new `TeacherForcingHelper`
    ///
    /// # Arguments
    ///
    /// * `inputs` - batch-major embedded inputs `[batch_size, max_time, input_size]`
    /// * `sequence_length` - `[batch_size]` number of valid inputs per row
    pub fn new(
        inputs: &Tensor,
        sequence_length: &Tensor,
    ) -> Result<TeacherForcingHelper, Memn2nError> {
        let input_shape = inputs.size();
        if input_shape.len() != 3 {
            return Err(Memn2nError::ShapeError(format!(
                "Teacher forcing inputs must be shaped [batch_size, max_time, input_size], got {:?}",
                input_shape
            )));
        }
        if sequence_length.size() != [input_shape[0]] {
            return Err(Memn2nError::ShapeError(format!(
                "Expected sequence_length to be shaped [{}], got {:?}",
                input_shape[0],
                sequence_length.size()
            )));
        }
        Ok(TeacherForcingHelper {
            inputs: inputs.shallow_clone(),
            sequence_length: sequence_length.to_kind(Kind::Int64),
            batch_size: input_shape[0],
            max_time: input_shape[1],
        })
    }

    fn read_inputs(&self, time: i64, all_finished: bool) -> Tensor {
        if all_finished || time >= self.max_time {
            Tensor::zeros(
                [self.batch_size, self.inputs.size()[2]],
                (self.inputs.kind(), self.inputs.device()),
            )
        } else {
            self.inputs.select(1, time)
        }
    }
}

impl Helper for TeacherForcingHelper {
    fn batch_size(&self) -> i64 {
        self.batch_size
    }

    fn initialize(&self) -> Result<(Tensor, Tensor), Memn2nError> {
        let finished = self.sequence_length.le(0);
        let all_finished = bool::try_from(finished.all())?;
        Ok((finished, self.read_inputs(0, all_finished)))
    }

    fn sample(&self, _time: i64, outputs: &Tensor) -> Result<Tensor, Memn2nError> {
        Ok(outputs.argmax(-1, false))
    }

    fn next_inputs(
        &self,
        time: i64,
        _outputs: &Tensor,
        _sample_ids: &Tensor,
    ) -> Result<(Tensor, Tensor), Memn2nError> {
        let next_time = time + 1;
        let finished = self.sequence_length.le(next_time);
        let all_finished = bool::try_from(finished.all())?;
        Ok((finished, self.read_inputs(next_time, all_finished)))
    }
}

/// # Greedy self-feeding helper
/// Feeds back the embedding of the argmax of the previous outputs. A batch element is finished
/// when it emits `end_token`.
pub struct GreedyHelper<'a> {
    embedding: &'a dyn Module,
    start_tokens: Tensor,
    end_token: i64,
    oov_mapping: Option<(i64, i64)>,
    batch_size: i64,
}

impl<'a> GreedyHelper<'a> {
    /// Build a new `GreedyHelper`
    ///
    /// # Arguments
    ///
    /// * `embedding` - embedding layer applied to sample ids
    /// * `start_tokens` - `[batch_size]` first input ids
    /// * `end_token` - id marking the end of a sequence
    pub fn new(
        embedding: &'a dyn Module,
        start_tokens: &Tensor,
        end_token: i64,
    ) -> Result<GreedyHelper<'a>, Memn2nError> {
        if start_tokens.dim() != 1 {
            return Err(Memn2nError::ShapeError(format!(
                "start_tokens must be a vector, got shape {:?}",
                start_tokens.size()
            )));
        }
        Ok(GreedyHelper {
            embedding,
            start_tokens: start_tokens.to_kind(Kind::Int64),
            end_token,
            oov_mapping: None,
            batch_size: start_tokens.size()[0],
        })
    }

    /// Sample ids at or above `vocab_size` (copied out-of-vocabulary words) are fed back as `unk_id`.
    pub fn with_oov_mapping(self, vocab_size: i64, unk_id: i64) -> GreedyHelper<'a> {
        GreedyHelper {
            oov_mapping: Some((vocab_size, unk_id)),
            ..self
        }
    }

    fn embed(&self, ids: &Tensor) -> Tensor {
        let ids = match self.oov_mapping {
            Some((vocab_size, unk_id)) => ids.masked_fill(&ids.ge(vocab_size), unk_id),
            None => ids.shallow_clone(),
        };
        self.embedding.forward(&ids)
    }
}

impl<'a> Helper for GreedyHelper<'a> {
    fn batch_size(&self) -> i64 {
        self.batch_size
    }

    fn initialize(&self) -> Result<(Tensor, Tensor), Memn2nError> {
        let finished = Tensor::zeros([self.batch_size], (Kind::Bool, self.start_tokens.device()));
        Ok((finished, self.embed(&self.start_tokens)))
    }

    fn sample(&self, _time: i64, outputs: &Tensor) -> Result<Tensor, Memn2nError> {
        if outputs.dim() != 2 {
            return Err(Memn2nError::ShapeError(format!(
                "Expected outputs to be a matrix of logits, got shape {:?}",
                outputs.size()
            )));
        }
        Ok(outputs.argmax(-1, false))
    }

    fn next_inputs(
        &self,
        _time: i64,
        _outputs: &Tensor,
        sample_ids: &Tensor,
    ) -> Result<(Tensor, Tensor), Memn2nError> {
        let finished = sample_ids.eq(self.end_token);
        let next_inputs = if bool::try_from(finished.all())? {
            self.embed(&self.start_tokens)
        } else {
            self.embed(sample_ids)
        };
        Ok((finished, next_inputs))
    }
}

/// # Sampling self-feeding helper
/// Same as `GreedyHelper` but draws the sample ids from the softmax of the temperature-scaled
/// logits.
pub struct SamplingHelper<'a> {
    greedy: GreedyHelper<'a>,
    temperature: f64,
}

impl<'a> SamplingHelper<'a> {
    /// Build a new `SamplingHelper`. `seed` resets the global random number generator.
    pub fn new(
        greedy: GreedyHelper<'a>,
        temperature: f64,
        seed: Option<i64>,
    ) -> Result<SamplingHelper<'a>, Memn2nError> {
        if temperature <= 0.0 {
            return Err(Memn2nError::ValueError(format!(
                "Sampling temperature must be strictly positive, got {}",
                temperature
            )));
        }
        if let Some(seed) = seed {
            tch::manual_seed(seed);
        }
        Ok(SamplingHelper {
            greedy,
            temperature,
        })
    }
}

impl<'a> Helper for SamplingHelper<'a> {
    fn batch_size(&self) -> i64 {
        self.greedy.batch_size()
    }

    fn initialize(&self) -> Result<(Tensor, Tensor), Memn2nError> {
        self.greedy.initialize()
    }

    fn sample(&self, _time: i64, outputs: &Tensor) -> Result<Tensor, Memn2nError> {
        let probabilities = (outputs / self.temperature).softmax(-1, Kind::Float);
        Ok(probabilities.multinomial(1, false).squeeze_dim(-1))
    }

    fn next_inputs(
        &self,
        time: i64,
        outputs: &Tensor,
        sample_ids: &Tensor,
    ) -> Result<(Tensor, Tensor), Memn2nError> {
        self.greedy.next_inputs(time, outputs, sample_ids)
    }
}
