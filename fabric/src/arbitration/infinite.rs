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

use super::{offer, Offer, Progress, XbarArbitration};
use crate::ports::PortControl;

/// An idealised crossbar: inputs have unlimited read ports.
///
/// Candidates are visited in LRU order. Input busy state is ignored and a
/// granted event is moved to its output right away, so `progress` never
/// reports a grant; it only tells blocked inputs apart from idle ones.
#[derive(Debug, Default)]
pub struct InfiniteCrossbarArbitration {
    order: Vec<(usize, usize)>,
    granted: Vec<(usize, usize)>,
    moved: Vec<bool>,
    moves: u64,
}

impl InfiniteCrossbarArbitration {
    pub fn new() -> Self {
        Self::default()
    }

    /// events moved since construction.
    pub fn moves(&self) -> u64 {
        self.moves
    }
}

impl XbarArbitration for InfiniteCrossbarArbitration {
    fn set_ports(&mut self, num_ports: usize, num_vcs: usize) {
        self.order = (0..num_ports)
            .flat_map(|port| (0..num_vcs).map(move |vc| (port, vc)))
            .collect();
        self.granted = Vec::with_capacity(num_ports * num_vcs);
        self.moved = vec![false; num_ports];
    }

    fn arbitrate(
        &mut self,
        ports: &mut [PortControl],
        _in_port_busy: &mut [usize],
        out_port_busy: &mut [usize],
        progress: &mut [Progress],
    ) {
        progress.fill(Progress::Idle);
        self.moved.fill(false);
        self.granted.clear();
        for &(port, vc) in self.order.iter() {
            match offer(ports, port, vc, out_port_busy) {
                Offer::Empty => {}
                Offer::Blocked => {
                    if !self.moved[port] {
                        progress[port] = Progress::Blocked;
                    }
                }
                Offer::Ready { output, flits } => {
                    if let Some(ev) = ports[port].recv(vc) {
                        let out_vc = ev.vc();
                        ports[output].send(ev, out_vc);
                        out_port_busy[output] = flits;
                        progress[port] = Progress::Idle;
                        self.moved[port] = true;
                        self.moves += 1;
                        self.granted.push((port, vc));
                    }
                }
            }
        }
        if !self.granted.is_empty() {
            let granted = &self.granted;
            self.order.retain(|pair| !granted.contains(pair));
            self.order.extend_from_slice(granted);
        }
    }

    fn name(&self) -> &'static str {
        "lru_infx"
    }
}
