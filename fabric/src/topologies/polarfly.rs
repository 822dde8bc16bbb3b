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

/// Diameter 2 graph, usually the polarity graph ER_q.
#[derive(Debug)]
pub struct Fly;

impl PolarVariant for Fly {
    const NAME: &'static str = "polarfly";
    const DIAMETER: usize = 2;
    const DEFAULT_BIAS: usize = 50;
    const FROM_Q: bool = true;
    const DISTINCT_CANDIDATE_PORT: bool = false;

    fn vcs_per_vn(algorithm: PolarAlgorithm) -> Option<usize> {
        match algorithm {
            PolarAlgorithm::Minimal => Some(2),
            PolarAlgorithm::Valiant | PolarAlgorithm::Ugal | PolarAlgorithm::UgalPf => Some(4),
        }
    }
}

pub type PolarFly = PolarTopology<Fly>;
