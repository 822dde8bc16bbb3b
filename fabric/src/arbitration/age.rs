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

use super::{offer, reserve, Offer, Progress, XbarArbitration};
use crate::event::RouterEvent;
use crate::ports::PortControl;
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256StarStar;
use std::cmp::Reverse;
use std::collections::BinaryHeap;

// (priority key, port, vc); the smallest key pops first, ties by port then vc.
type Candidates = BinaryHeap<Reverse<(u64, usize, usize)>>;

/// Grant candidates in increasing `key` order.
///
/// Only inputs that are free when the round starts take part. A candidate
/// whose input was granted earlier in the round is skipped.
fn arbitrate_by_key<F>(
    candidates: &mut Candidates,
    ports: &[PortControl],
    in_port_busy: &mut [usize],
    out_port_busy: &mut [usize],
    progress: &mut [Progress],
    mut key: F,
) where
    F: FnMut(&RouterEvent) -> u64,
{
    progress.fill(Progress::Idle);
    candidates.clear();
    for (port, p) in ports.iter().enumerate() {
        if in_port_busy[port] > 0 {
            continue;
        }
        for (vc, head) in p.vc_heads().into_iter().enumerate() {
            if let Some(ev) = head {
                candidates.push(Reverse((key(ev), port, vc)));
            }
        }
    }
    while let Some(Reverse((_, port, vc))) = candidates.pop() {
        if in_port_busy[port] > 0 {
            continue;
        }
        match offer(ports, port, vc, out_port_busy) {
            Offer::Empty => {}
            Offer::Blocked => progress[port] = Progress::Blocked,
            Offer::Ready { output, flits } => {
                reserve(port, vc, output, flits, in_port_busy, out_port_busy, progress)
            }
        }
    }
}

/// Oldest packet first, by injection time.
#[derive(Debug, Default)]
pub struct AgeArbitration {
    candidates: Candidates,
}

impl AgeArbitration {
    pub fn new() -> Self {
        Self::default()
    }
}

impl XbarArbitration for AgeArbitration {
    fn set_ports(&mut self, num_ports: usize, num_vcs: usize) {
        self.candidates = BinaryHeap::with_capacity(num_ports * num_vcs);
    }

    fn arbitrate(
        &mut self,
        ports: &mut [PortControl],
        in_port_busy: &mut [usize],
        out_port_busy: &mut [usize],
        progress: &mut [Progress],
    ) {
        arbitrate_by_key(
            &mut self.candidates,
            ports,
            in_port_busy,
            out_port_busy,
            progress,
            |ev| ev.inject_time() as u64,
        );
    }

    fn name(&self) -> &'static str {
        "age"
    }
}

/// Random priorities, drawn fresh for every candidate every round.
#[derive(Debug)]
pub struct RandomArbitration {
    candidates: Candidates,
    rng: Xoshiro256StarStar,
}

impl RandomArbitration {
    pub fn new(seed: u64) -> Self {
        Self {
            candidates: BinaryHeap::new(),
            rng: Xoshiro256StarStar::seed_from_u64(seed),
        }
    }
}

impl XbarArbitration for RandomArbitration {
    fn set_ports(&mut self, num_ports: usize, num_vcs: usize) {
        self.candidates = BinaryHeap::with_capacity(num_ports * num_vcs);
    }

    fn arbitrate(
        &mut self,
        ports: &mut [PortControl],
        in_port_busy: &mut [usize],
        out_port_busy: &mut [usize],
        progress: &mut [Progress],
    ) {
        let rng = &mut self.rng;
        arbitrate_by_key(
            &mut self.candidates,
            ports,
            in_port_busy,
            out_port_busy,
            progress,
            |_| rng.gen(),
        );
    }

    fn name(&self) -> &'static str {
        "random"
    }
}
