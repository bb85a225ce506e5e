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

use crate::common::kind::get_negative_infinity;
use crate::Memn2nError;
use tch::{Kind, Tensor};

/// Boolean mask of shape `[lengths.size(), max_length]` set to true for positions below the row length.
pub fn sequence_mask(lengths: &Tensor, max_length: i64) -> Tensor {
    let positions = Tensor::arange(max_length, (Kind::Int64, lengths.device()));
    let lengths = lengths.to_kind(Kind::Int64).unsqueeze(-1);
    positions.lt_tensor(&lengths)
}

/// Checks and masks a memory tensor shaped `[batch_size, max_time, ...]`.
///
/// Rows are zeroed beyond their valid length along the `max_time` axis. When
/// `check_inner_dims_defined` is set, the memory must have at least one inner dimension and all
/// inner dimensions must be non-empty.
pub fn prepare_memory(
    memory: &Tensor,
    memory_sequence_length: Option<&Tensor>,
    check_inner_dims_defined: bool,
) -> Result<Tensor, Memn2nError> {
    let memory_shape = memory.size();
    if check_inner_dims_defined
        && (memory_shape.len() < 3 || memory_shape[2..].iter().any(|dim| *dim <= 0))
    {
        return Err(Memn2nError::ShapeError(format!(
            "Expected memory to have fully defined inner dims, but saw shape: {:?}",
            memory_shape
        )));
    }
    if memory_shape.len() < 2 {
        return Err(Memn2nError::ShapeError(format!(
            "Memory must be shaped [batch_size, max_time, ...], got {:?}",
            memory_shape
        )));
    }

    match memory_sequence_length {
        Some(lengths) => {
            if lengths.size() != [memory_shape[0]] {
                return Err(Memn2nError::ShapeError(format!(
                    "memory_sequence_length and memory tensor batch sizes do not match: {:?} vs {}",
                    lengths.size(),
                    memory_shape[0]
                )));
            }
            let mut mask_shape = vec![memory_shape[0], memory_shape[1]];
            mask_shape.extend(vec![1; memory_shape.len() - 2]);
            let mask = sequence_mask(lengths, memory_shape[1])
                .to_kind(memory.kind())
                .view(mask_shape.as_slice());
            Ok(memory * mask)
        }
        None => Ok(memory.shallow_clone()),
    }
}

/// Replaces scores beyond the valid memory length by `score_mask_value` (the most negative finite
/// value of the score dtype by default).
pub fn maybe_mask_score(
    score: &Tensor,
    memory_sequence_length: Option<&Tensor>,
    score_mask_value: Option<f64>,
) -> Result<Tensor, Memn2nError> {
    let lengths = match memory_sequence_length {
        Some(lengths) => lengths,
        None => return Ok(score.shallow_clone()),
    };
    if lengths.numel() > 0 && !bool::try_from(lengths.gt(0).all())? {
        return Err(Memn2nError::ValueError(
            "All values in memory_sequence_length must greater than zero.".to_string(),
        ));
    }
    let score_mask = sequence_mask(lengths, score.size()[1]);
    Ok(match score_mask_value {
        Some(value) => score.masked_fill(&score_mask.logical_not(), value),
        None => score.masked_fill(
            &score_mask.logical_not(),
            get_negative_infinity(score.kind())?,
        ),
    })
}
