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

use fabric::Packet;
use rand::Rng;
use rand_core::SeedableRng;
use rand_xoshiro::Xoshiro256StarStar;
use std::str::FromStr;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TrafficPattern {
    /// any other endpoint, uniformly.
    Uniform,
    /// the next endpoint id.
    Neighbor,
    /// row and column swapped when the endpoints form a square, mirrored
    /// ids otherwise.
    Transpose,
}

impl FromStr for TrafficPattern {
    type Err = std::io::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "uniform" => Ok(TrafficPattern::Uniform),
            "neighbor" => Ok(TrafficPattern::Neighbor),
            "transpose" => Ok(TrafficPattern::Transpose),
            _ => Err(Self::Err::new(
                std::io::ErrorKind::Other,
                format!("Invalid traffic pattern: {}", s),
            )),
        }
    }
}

/// Bernoulli injection: every endpoint sends with probability `rate` each
/// cycle.
pub struct Traffic {
    pattern: TrafficPattern,
    rate: f64,
    size: usize,
    num_endpoints: usize,
    next_id: u64,
    rng: Xoshiro256StarStar,
}

impl Traffic {
    pub fn new(
        pattern: TrafficPattern,
        rate: f64,
        size: usize,
        num_endpoints: usize,
        seed: u64,
    ) -> anyhow::Result<Self> {
        anyhow::ensure!(size > 0, "packets need at least one flit");
        Ok(Self {
            pattern,
            rate: rate.clamp(0.0, 1.0),
            size,
            num_endpoints,
            next_id: 0,
            rng: Xoshiro256StarStar::seed_from_u64(seed),
        })
    }

    pub fn destination(&mut self, src: usize) -> usize {
        let n = self.num_endpoints;
        match self.pattern {
            TrafficPattern::Uniform => {
                if n < 2 {
                    return src;
                }
                let dest = self.rng.gen_range(0..n - 1);
                if dest >= src {
                    dest + 1
                } else {
                    dest
                }
            }
            TrafficPattern::Neighbor => (src + 1) % n,
            TrafficPattern::Transpose => {
                let side = (1..=n).take_while(|k| k * k <= n).last().unwrap_or(1);
                if side * side == n {
                    (src % side) * side + src / side
                } else {
                    n - 1 - src
                }
            }
        }
    }

    /// Packets created this cycle.
    pub fn generate(&mut self) -> Vec<Packet> {
        let mut packets = Vec::new();
        for src in 0..self.num_endpoints {
            if !self.rng.gen_bool(self.rate) {
                continue;
            }
            let dest = self.destination(src);
            if dest == src {
                continue;
            }
            packets.push(Packet::new(self.next_id, src, dest, 0, self.size));
            self.next_id += 1;
        }
        packets
    }
}
