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

/// Least recently granted (port, vc) pairs are considered first.
#[derive(Debug, Default)]
pub struct LruArbitration {
    order: Vec<(usize, usize)>,
    // scratch space reused across rounds
    granted: Vec<(usize, usize)>,
}

impl LruArbitration {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn order(&self) -> &[(usize, usize)] {
        &self.order
    }
}

impl XbarArbitration for LruArbitration {
    fn set_ports(&mut self, num_ports: usize, num_vcs: usize) {
        self.order = (0..num_ports)
            .flat_map(|port| (0..num_vcs).map(move |vc| (port, vc)))
            .collect();
        self.granted = Vec::with_capacity(num_ports);
    }

    fn arbitrate(
        &mut self,
        ports: &mut [PortControl],
        in_port_busy: &mut [usize],
        out_port_busy: &mut [usize],
        progress: &mut [Progress],
    ) {
        progress.fill(Progress::Idle);
        self.granted.clear();
        for &(port, vc) in self.order.iter() {
            if in_port_busy[port] > 0 {
                continue;
            }
            match offer(ports, port, vc, out_port_busy) {
                Offer::Empty => {}
                Offer::Blocked => progress[port] = Progress::Blocked,
                Offer::Ready { output, flits } => {
                    reserve(port, vc, output, flits, in_port_busy, out_port_busy, progress);
                    self.granted.push((port, vc));
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
        "lru"
    }
}

#[cfg(test)]
mod lru_tests {
    use super::super::arbitration_tests::*;
    use super::*;

    #[test]
    fn test_grants_move_to_tail_in_scan_order() {
        let mut arb = LruArbitration::new();
        arb.set_ports(3, 2);
        let mut ports = ports(3, 2, 8);
        offer_packet(&mut ports, 0, 1, 2, 1, 0);
        offer_packet(&mut ports, 2, 0, 0, 1, 0);
        let progress = checked_round(&mut arb, &mut ports);
        assert_eq!(
            progress,
            vec![Progress::Granted(1), Progress::Idle, Progress::Granted(0)]
        );
        assert_eq!(
            arb.order(),
            &[(0, 0), (1, 0), (1, 1), (2, 1), (0, 1), (2, 0)]
        );
    }

    #[test]
    fn test_recency_under_load() {
        // three VCs of one port compete for one output
        let mut arb = LruArbitration::new();
        arb.set_ports(2, 3);
        let mut ports = ports(2, 3, 8);
        let mut order = Vec::new();
        for _ in 0..6 {
            for vc in 0..3 {
                if ports[0].vc_head(vc).is_none() {
                    offer_packet(&mut ports, 0, vc, 1, 1, 0);
                }
            }
            let progress = checked_round(&mut arb, &mut ports);
            match progress[0] {
                Progress::Granted(vc) => order.push(vc),
                p => panic!("expected a grant, got {:?}", p),
            }
            commit(&mut ports, &progress);
        }
        assert_eq!(order, vec![0, 1, 2, 0, 1, 2]);
    }

    #[test]
    fn test_blocked_is_reported() {
        let mut arb = LruArbitration::new();
        arb.set_ports(2, 1);
        let mut ports = ports(2, 1, 8);
        offer_packet(&mut ports, 0, 0, 1, 1, 0);
        let mut in_busy = vec![0, 0];
        let mut out_busy = vec![0, 3];
        let mut progress = vec![Progress::Idle; 2];
        arb.arbitrate(&mut ports, &mut in_busy, &mut out_busy, &mut progress);
        assert_eq!(progress, vec![Progress::Blocked, Progress::Idle]);
        assert_eq!(arb.order(), &[(0, 0), (1, 0)]);
    }
}
