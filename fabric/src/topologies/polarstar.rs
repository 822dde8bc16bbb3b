// Copyright 2023 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use super::polar::{PolarAlgorithm, PolarTopology, PolarVariant};

/// Diameter 3 star product graph, loaded from an adjacency list.
#[derive(Debug)]
pub struct Star;

impl PolarVariant for Star {
    const NAME: &'static str = "polarstar";
    const DIAMETER: usize = 3;
    const DEFAULT_BIAS: usize = 33;
    const FROM_Q: bool = false;
    const DISTINCT_CANDIDATE_PORT: bool = true;

    fn vcs_per_vn(algorithm: PolarAlgorithm) -> Option<usize> {
        match algorithm {
            PolarAlgorithm::Minimal => Some(3),
            PolarAlgorithm::Valiant | PolarAlgorithm::Ugal => Some(6),
            PolarAlgorithm::UgalPf => None,
        }
    }
}

pub type PolarStar = PolarTopology<Star>;
