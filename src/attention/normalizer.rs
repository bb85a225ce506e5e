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

use serde::{Deserialize, Serialize};
use tch::Tensor;

#[allow(non_camel_case_types)]
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
/// # Normalizer converting masked sentence scores into an alignment distribution
pub enum Normalizer {
    /// Softmax over the last dimension
    softmax,
    /// One-hot vector of the maximum score
    hardmax,
    /// Euclidean projection onto the probability simplex (Martins & Astudillo, 2016)
    sparsemax,
}

impl Default for Normalizer {
    fn default() -> Self {
        Normalizer::softmax
    }
}

impl Normalizer {
    pub fn normalize(&self, scores: &Tensor) -> Tensor {
        match self {
            Normalizer::softmax => scores.softmax(-1, scores.kind()),
            Normalizer::hardmax => hardmax(scores),
            Normalizer::sparsemax => sparsemax(scores),
        }
    }
}

#[allow(non_camel_case_types)]
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
/// # Treatment of the raw word scores before weighting by the sentence alignment
pub enum WordScoreNormalization {
    /// Raw word scores are multiplied by the sentence alignment as-is. The flattened word
    /// alignment does not sum to one in general.
    unnormalized,
    /// Word scores are normalized within each sentence first, so that every sentence's alignment
    /// mass is split among its words and the flattened word alignment sums to one.
    softmax,
}

impl Default for WordScoreNormalization {
    fn default() -> Self {
        WordScoreNormalization::softmax
    }
}

/// Returns batched one-hot vectors, the `1` being placed at the maximum logit.
pub fn hardmax(logits: &Tensor) -> Tensor {
    let depth = logits.size().last().copied().unwrap_or(0);
    logits
        .argmax(-1, false)
        .one_hot(depth)
        .to_kind(logits.kind())
}

/// Sparsemax over the last dimension.
pub fn sparsemax(logits: &Tensor) -> Tensor {
    let kind = logits.kind();
    let depth = logits.size().last().copied().unwrap_or(0);
    let (max_values, _) = logits.max_dim(-1, true);
    let z = logits - max_values;

    let (z_sorted, _) = z.sort(-1, true);
    let range = Tensor::arange_start(1, depth + 1, (kind, logits.device()));
    let z_cumsum = z_sorted.cumsum(-1, kind);
    let support = (&z_sorted * &range + 1).gt_tensor(&z_cumsum);
    let support_size = support.sum_dim_intlist([-1].as_slice(), true, tch::Kind::Int64);

    let tau_sum = z_cumsum.gather(-1, &(&support_size - 1), false);
    let tau = (tau_sum - 1) / support_size.to_kind(kind);
    (z - tau).clamp_min(0.0)
}

#[cfg(test)]
mod test {
    use super::*;
    use tch::Kind;

    #[test]
    fn hardmax_selects_maximum() {
        let logits = Tensor::from_slice(&[0.1f32, 2.0, -1.0, 3.0, 0.0, 1.0]).view([2, 3]);
        let output = hardmax(&logits);
        let expected = Tensor::from_slice(&[0f32, 1.0, 0.0, 1.0, 0.0, 0.0]).view([2, 3]);
        assert!(output.equal(&expected));
    }

    #[test]
    fn sparsemax_projects_onto_simplex() {
        let logits = Tensor::from_slice(&[1.0f32, 0.8, -1.0, 0.0, 0.0, 0.0]).view([2, 3]);
        let output = sparsemax(&logits);

        // First row: two-element support
        assert!((output.double_value(&[0, 0]) - 0.6).abs() < 1e-5);
        assert!((output.double_value(&[0, 1]) - 0.4).abs() < 1e-5);
        assert_eq!(output.double_value(&[0, 2]), 0.0);
        // Ties are spread uniformly
        for position in 0..3 {
            assert!((output.double_value(&[1, position]) - 1.0 / 3.0).abs() < 1e-5);
        }
    }

    #[test]
    fn normalizers_ignore_masked_positions() {
        let masked_value = f32::MIN as f64;
        let scores = Tensor::from_slice(&[0.5f32, 0.2, 0.0]).view([1, 3]);
        let scores = scores.index_fill(1, &Tensor::from_slice(&[2i64]), masked_value);

        for normalizer in [
            Normalizer::softmax,
            Normalizer::hardmax,
            Normalizer::sparsemax,
        ] {
            let alignments = normalizer.normalize(&scores);
            assert!(alignments.double_value(&[0, 2]) < 1e-6);
            let total = alignments.sum(Kind::Float).double_value(&[]);
            assert!((total - 1.0).abs() < 1e-5);
            assert!(bool::try_from(alignments.ge(0.0).all()).unwrap());
        }
    }
}
