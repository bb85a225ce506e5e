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

use crate::cell::{hold_finished, CellState};
use crate::common::TimeBuffer;
use crate::Memn2nError;
use tch::Tensor;

/// # State threaded through the attention wrapper
/// Holds the base cell state, the previous attention vector, the step counter, the latest word
/// alignments of every attention mechanism and the optional alignment history. Every update
/// returns a new value; the `with_*` builders override a single field.
#[derive(Debug)]
pub struct AttentionState {
    /// State of the wrapped recurrent cell
    pub cell_state: CellState,
    /// Attention vector emitted at the previous step `[batch_size, attention_size]`
    pub attention: Tensor,
    /// Number of steps taken
    pub time: i64,
    /// Word alignments of the previous step, one `[batch_size, sentences * words]` per mechanism
    pub alignments: Vec<Tensor>,
    /// Sentence and word alignment history, one pair of buffers per mechanism
    pub alignment_history: Option<Vec<AlignmentHistory>>,
}

/// Sentence (`line`) and `word` alignments recorded at every step
#[derive(Debug)]
pub struct AlignmentHistory {
    pub line: TimeBuffer,
    pub word: TimeBuffer,
}

impl AlignmentHistory {
    pub fn shallow_clone(&self) -> AlignmentHistory {
        AlignmentHistory {
            line: self.line.shallow_clone(),
            word: self.word.shallow_clone(),
        }
    }
}

impl AttentionState {
    pub fn with_cell_state(self, cell_state: CellState) -> AttentionState {
        AttentionState { cell_state, ..self }
    }

    pub fn with_attention(self, attention: Tensor) -> AttentionState {
        AttentionState { attention, ..self }
    }

    pub fn with_time(self, time: i64) -> AttentionState {
        AttentionState { time, ..self }
    }

    pub fn with_alignments(self, alignments: Vec<Tensor>) -> AttentionState {
        AttentionState { alignments, ..self }
    }

    pub fn batch_size(&self) -> i64 {
        self.cell_state.batch_size()
    }

    pub fn shallow_clone(&self) -> AttentionState {
        AttentionState {
            alignment_history: self
                .alignment_history
                .as_ref()
                .map(|history| history.iter().map(|h| h.shallow_clone()).collect()),
            ..self.snapshot()
        }
    }

    /// Shallow copy without the alignment history.
    pub fn snapshot(&self) -> AttentionState {
        AttentionState {
            cell_state: self.cell_state.shallow_clone(),
            attention: self.attention.shallow_clone(),
            time: self.time,
            alignments: self.alignments.iter().map(|a| a.shallow_clone()).collect(),
            alignment_history: None,
        }
    }

    /// Fails if any tensor of the state changed shape compared to `other`. History buffers grow
    /// at every step and are not compared.
    pub fn check_same_structure(&self, other: &AttentionState) -> Result<(), Memn2nError> {
        self.cell_state.check_same_structure(&other.cell_state)?;
        if self.attention.size() != other.attention.size() {
            return Err(Memn2nError::ShapeError(format!(
                "Attention shape changed between steps: {:?} vs {:?}",
                self.attention.size(),
                other.attention.size()
            )));
        }
        if self.alignments.len() != other.alignments.len()
            || self
                .alignments
                .iter()
                .zip(other.alignments.iter())
                .any(|(left, right)| left.size() != right.size())
        {
            return Err(Memn2nError::ShapeError(
                "Alignment structure changed between steps".to_string(),
            ));
        }
        Ok(())
    }

    /// Keeps the `previous` cell state, attention and alignments for rows flagged in `finished`.
    /// The step counter and the alignment history are not held.
    pub fn hold_finished(
        self,
        previous: &AttentionState,
        finished: &Tensor,
    ) -> Result<AttentionState, Memn2nError> {
        self.check_same_structure(previous)?;
        let cell_state = self
            .cell_state
            .hold_finished(&previous.cell_state, finished)?;
        let attention = hold_finished(&self.attention, &previous.attention, finished);
        let alignments = self
            .alignments
            .iter()
            .zip(previous.alignments.iter())
            .map(|(new, old)| hold_finished(new, old, finished))
            .collect();
        Ok(AttentionState {
            cell_state,
            attention,
            alignments,
            ..self
        })
    }
}
