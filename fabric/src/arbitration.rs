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

//! Crossbar arbitration.
//!
//! Every cycle the router hands the arbiter its ports and busy counters, and
//! gets back, per input port, which VC may move through the crossbar. The
//! arbiter reserves what it grants: `in_port_busy[input]` and
//! `out_port_busy[output]` are set to the flit count of the granted event
//! before `arbitrate` returns.

mod age;
mod infinite;
mod lru;
mod round_robin;
mod single;

pub use age::{AgeArbitration, RandomArbitration};
pub use infinite::InfiniteCrossbarArbitration;
pub use lru::LruArbitration;
pub use round_robin::RoundRobinArbitration;
pub use single::{SingleArbitration, SingleLru, SingleRoundRobin};

use crate::ports::PortControl;
use crate::Error;
use std::str::FromStr;

/// Per input port outcome of one arbitration round.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Progress {
    /// no event waiting, or the input is busy.
    Idle,
    /// events were waiting but their outputs were busy or out of credit.
    Blocked,
    /// the head of this VC moves through the crossbar.
    Granted(usize),
}

impl Default for Progress {
    fn default() -> Self {
        Progress::Idle
    }
}

pub trait XbarArbitration {
    /// One-time sizing.
    fn set_ports(&mut self, num_ports: usize, num_vcs: usize);

    /// Compute a conflict free set of moves for this cycle.
    ///
    /// `progress` is overwritten entirely.
    fn arbitrate(
        &mut self,
        ports: &mut [PortControl],
        in_port_busy: &mut [usize],
        out_port_busy: &mut [usize],
        progress: &mut [Progress],
    );

    /// `cycles` elapsed without a call to `arbitrate`.
    fn report_skipped_cycles(&mut self, _cycles: usize) {}

    fn is_okay_to_pause_clock(&self) -> bool {
        true
    }

    fn name(&self) -> &'static str;
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum XbarArbitrationKind {
    RoundRobin,
    Lru,
    Age,
    Random,
    InfiniteCrossbar,
}

impl FromStr for XbarArbitrationKind {
    type Err = Error;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input {
            "rr" | "round_robin" => Ok(Self::RoundRobin),
            "lru" => Ok(Self::Lru),
            "age" => Ok(Self::Age),
            "random" => Ok(Self::Random),
            "lru_infx" => Ok(Self::InfiniteCrossbar),
            _ => Err(Error::UnknownArbitration(input.to_string())),
        }
    }
}

/// Build and size a crossbar arbiter.
pub fn xbar_arbitration(
    kind: XbarArbitrationKind,
    num_ports: usize,
    num_vcs: usize,
    seed: u64,
) -> Box<dyn XbarArbitration> {
    let mut arb: Box<dyn XbarArbitration> = match kind {
        XbarArbitrationKind::RoundRobin => Box::new(RoundRobinArbitration::new()),
        XbarArbitrationKind::Lru => Box::new(LruArbitration::new()),
        XbarArbitrationKind::Age => Box::new(AgeArbitration::new()),
        XbarArbitrationKind::Random => Box::new(RandomArbitration::new(seed)),
        XbarArbitrationKind::InfiniteCrossbar => Box::new(InfiniteCrossbarArbitration::new()),
    };
    arb.set_ports(num_ports, num_vcs);
    arb
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SingleArbitrationKind {
    RoundRobin,
    Lru,
}

impl FromStr for SingleArbitrationKind {
    type Err = Error;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input {
            "rr" | "round_robin" => Ok(Self::RoundRobin),
            "lru" => Ok(Self::Lru),
            _ => Err(Error::UnknownArbitration(input.to_string())),
        }
    }
}

pub fn single_arbitration(kind: SingleArbitrationKind, size: usize) -> Box<dyn SingleArbitration> {
    match kind {
        SingleArbitrationKind::RoundRobin => Box::new(SingleRoundRobin::new(size)),
        SingleArbitrationKind::Lru => Box::new(SingleLru::new(size)),
    }
}

/// What the head of one (port, vc) asks of the crossbar.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Offer {
    Empty,
    Blocked,
    Ready { output: usize, flits: usize },
}

/// Check the head of `vc` on `port` against output busy state and credits.
fn offer(ports: &[PortControl], port: usize, vc: usize, out_port_busy: &[usize]) -> Offer {
    match ports[port].vc_head(vc) {
        None => Offer::Empty,
        Some(ev) => {
            let output = ev.next_port();
            let flits = ev.flit_count();
            if out_port_busy[output] == 0 && ports[output].space_to_send(ev.vc(), flits) {
                Offer::Ready { output, flits }
            } else {
                Offer::Blocked
            }
        }
    }
}

// Reserve input and output for a granted move.
fn reserve(
    port: usize,
    vc: usize,
    output: usize,
    flits: usize,
    in_port_busy: &mut [usize],
    out_port_busy: &mut [usize],
    progress: &mut [Progress],
) {
    in_port_busy[port] = flits;
    out_port_busy[output] = flits;
    progress[port] = Progress::Granted(vc);
}

#[cfg(test)]
pub(crate) mod arbitration_tests {
    use super::*;
    use crate::event::{Packet, RouteInfo, RouterEvent};
    use std::collections::HashSet;

    /// Ports with one input buffer large enough for any test.
    pub fn ports(num_ports: usize, num_vcs: usize, output_buf_size: usize) -> Vec<PortControl> {
        (0..num_ports)
            .map(|p| {
                PortControl::new(
                    p,
                    64,
                    output_buf_size,
                    64,
                    Box::new(SingleRoundRobin::new(num_vcs)),
                )
            })
            .collect()
    }

    /// Queue a packet on (`port`, `vc`) headed to `output` on the same VC.
    pub fn offer_packet(
        ports: &mut [PortControl],
        port: usize,
        vc: usize,
        output: usize,
        flits: usize,
        inject_time: usize,
    ) {
        let id = (port * 1000 + vc * 100 + ports[port].input_occupancy(vc)) as u64;
        let packet = Packet::new(id, port, output, 0, flits).with_inject_time(inject_time);
        let mut ev = RouterEvent::new(packet, vc, RouteInfo::Plain);
        ev.set_next_port(output);
        ports[port].push_input(vc, ev);
    }

    /// Check one round against the matching rules and return the grants.
    pub fn checked_round(
        arb: &mut dyn XbarArbitration,
        ports: &mut [PortControl],
    ) -> Vec<Progress> {
        let n = ports.len();
        let mut in_busy = vec![0; n];
        let mut out_busy = vec![0; n];
        let mut progress = vec![Progress::Blocked; n];
        arb.arbitrate(ports, &mut in_busy, &mut out_busy, &mut progress);
        let mut outputs = HashSet::new();
        for (port, p) in progress.iter().enumerate() {
            if let Progress::Granted(vc) = p {
                let ev = ports[port].vc_head(*vc).expect("granted an empty vc");
                assert!(outputs.insert(ev.next_port()), "output granted twice");
                assert!(ports[ev.next_port()].space_to_send(ev.vc(), ev.flit_count()));
                assert_eq!(in_busy[port], ev.flit_count());
                assert_eq!(out_busy[ev.next_port()], ev.flit_count());
            }
        }
        progress
    }

    /// Perform granted moves, then drain every output buffer.
    pub fn commit(ports: &mut [PortControl], progress: &[Progress]) {
        for (port, p) in progress.iter().enumerate() {
            if let Progress::Granted(vc) = p {
                let ev = ports[port].recv(*vc).unwrap();
                let output = ev.next_port();
                let out_vc = ev.vc();
                ports[output].send(ev, out_vc);
            }
        }
        for p in ports.iter_mut() {
            while p.transmit().is_some() {}
            p.take_credit_returns();
        }
    }

    #[test]
    fn test_kind_from_str() {
        assert_eq!("rr".parse::<XbarArbitrationKind>(), Ok(XbarArbitrationKind::RoundRobin));
        assert_eq!(
            "lru_infx".parse::<XbarArbitrationKind>(),
            Ok(XbarArbitrationKind::InfiniteCrossbar)
        );
        assert_eq!(
            "islip".parse::<XbarArbitrationKind>(),
            Err(Error::UnknownArbitration("islip".to_string()))
        );
        assert_eq!("lru".parse::<SingleArbitrationKind>(), Ok(SingleArbitrationKind::Lru));
    }

    #[test]
    fn test_offer() {
        let mut ports = ports(2, 1, 2);
        assert_eq!(offer(&ports, 0, 0, &[0, 0]), Offer::Empty);
        offer_packet(&mut ports, 0, 0, 1, 2, 0);
        assert_eq!(offer(&ports, 0, 0, &[0, 0]), Offer::Ready { output: 1, flits: 2 });
        assert_eq!(offer(&ports, 0, 0, &[0, 1]), Offer::Blocked);
        offer_packet(&mut ports, 1, 0, 1, 3, 0);
        // three flits never fit a two flit output buffer
        assert_eq!(offer(&ports, 1, 0, &[0, 0]), Offer::Blocked);
    }

    #[test]
    fn test_every_variant_matches_validly() {
        for kind in [
            XbarArbitrationKind::RoundRobin,
            XbarArbitrationKind::Lru,
            XbarArbitrationKind::Age,
            XbarArbitrationKind::Random,
        ] {
            let mut arb = xbar_arbitration(kind, 4, 2, 11);
            let mut ports = ports(4, 2, 8);
            for round in 0..6 {
                for port in 0..4 {
                    for vc in 0..2 {
                        offer_packet(&mut ports, port, vc, (port + vc + round) % 4, 1, round);
                    }
                }
                let progress = checked_round(arb.as_mut(), &mut ports);
                assert!(progress.iter().any(|p| matches!(p, Progress::Granted(_))));
                commit(&mut ports, &progress);
            }
        }
    }
}
