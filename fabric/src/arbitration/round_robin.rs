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
use crate::ports::PortControl;

/// Rotating priority over input ports, and over the VCs of every port.
///
/// Both pointers advance by one after every round whether or not anything
/// was granted.
#[derive(Debug, Default)]
pub struct RoundRobinArbitration {
    num_ports: usize,
    num_vcs: usize,
    rr_port: usize,
    rr_vcs: Vec<usize>,
}

impl RoundRobinArbitration {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn port_pointer(&self) -> usize {
        self.rr_port
    }

    pub fn vc_pointer(&self, port: usize) -> usize {
        self.rr_vcs[port]
    }

    fn advance(&mut self, steps: usize) {
        self.rr_port = (self.rr_port + steps) % self.num_ports;
        let num_vcs = self.num_vcs;
        self.rr_vcs
            .iter_mut()
            .for_each(|vc| *vc = (*vc + steps) % num_vcs);
    }
}

impl XbarArbitration for RoundRobinArbitration {
    fn set_ports(&mut self, num_ports: usize, num_vcs: usize) {
        self.num_ports = num_ports;
        self.num_vcs = num_vcs;
        self.rr_port = 0;
        self.rr_vcs = vec![0; num_ports];
    }

    fn arbitrate(
        &mut self,
        ports: &mut [PortControl],
        in_port_busy: &mut [usize],
        out_port_busy: &mut [usize],
        progress: &mut [Progress],
    ) {
        progress.fill(Progress::Idle);
        for i in 0..self.num_ports {
            let port = (self.rr_port + i) % self.num_ports;
            if in_port_busy[port] > 0 {
                continue;
            }
            for j in 0..self.num_vcs {
                let vc = (self.rr_vcs[port] + j) % self.num_vcs;
                match offer(ports, port, vc, out_port_busy) {
                    Offer::Empty => {}
                    Offer::Blocked => progress[port] = Progress::Blocked,
                    Offer::Ready { output, flits } => {
                        reserve(port, vc, output, flits, in_port_busy, out_port_busy, progress);
                        break;
                    }
                }
            }
        }
        self.advance(1);
    }

    fn report_skipped_cycles(&mut self, cycles: usize) {
        if self.num_ports > 0 {
            self.advance(cycles);
        }
    }

    fn name(&self) -> &'static str {
        "rr"
    }
}
