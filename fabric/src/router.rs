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

//! The crossbar router.
//!
//! A router owns its ports, one topology instance and one crossbar arbiter.
//! Events are routed when they land in an input buffer and rerouted every
//! cycle while they wait at the head of their VC. Each clocked cycle then
//! runs one arbitration round and moves the granted heads into the output
//! buffers. The link side (`transmit`, credits) is driven by the owner of
//! the router, every cycle, clocked or not.

use crate::arbitration::{
    single_arbitration, xbar_arbitration, Progress, SingleArbitrationKind, XbarArbitration,
    XbarArbitrationKind,
};
use crate::config::RouterConfiguration;
use crate::event::{Packet, RouterEvent, TraceType};
use crate::ports::{CreditReturn, PortControl};
use crate::topologies::{self, Congestion, PortState, Topology};
use crate::{Cycle, Error};
use std::fmt;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ClockStatus {
    Clocked,
    /// nothing left to arbitrate; call `notify_event` before the next
    /// `clock_handler`.
    Declocked,
}

/// Init-time traffic, exchanged outside of the clocked datapath.
#[derive(Clone, Debug, PartialEq)]
pub enum InitData {
    /// to or from an endpoint.
    Packet(Packet),
    /// to or from a neighboring router.
    Routed(RouterEvent),
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RouterStatistics {
    pub clocked_cycles: u64,
    /// cycles spent declocked.
    pub idle_cycles: u64,
    /// per input port, rounds where the port had a head but got no grant.
    pub xbar_stalls: Vec<u64>,
    pub packets_moved: u64,
    pub flits_moved: u64,
    pub packets_sent: u64,
    pub flits_sent: u64,
    /// delivered packets by router hops, when the topology keeps track.
    pub hop_counts: Vec<u64>,
}

pub struct Router {
    id: usize,
    num_vcs: usize,
    topology: Box<dyn Topology>,
    arbiter: Box<dyn XbarArbitration>,
    ports: Vec<PortControl>,
    in_port_busy: Vec<usize>,
    out_port_busy: Vec<usize>,
    progress: Vec<Progress>,
    // congestion snapshot, [port * num_vcs + vc]
    xbar_in_credits: Vec<usize>,
    output_queue_lengths: Vec<usize>,
    clocked: bool,
    declocked_at: Cycle,
    clocked_cycles: u64,
    idle_cycles: u64,
    xbar_stalls: Vec<u64>,
}

impl Router {
    pub fn new(config: &RouterConfiguration) -> Result<Router, Error> {
        if config.num_ports == 0 {
            return Err(Error::InvalidParameter("num_ports must be positive".to_string()));
        }
        if config.num_vns == 0 {
            return Err(Error::InvalidParameter("num_vns must be positive".to_string()));
        }
        if config.input_buf_size == 0 || config.output_buf_size == 0 {
            return Err(Error::InvalidParameter(format!(
                "buffer sizes must be positive, got input {} output {}",
                config.input_buf_size, config.output_buf_size
            )));
        }
        let xbar_kind: XbarArbitrationKind = config.xbar_arb.parse()?;
        let output_kind: SingleArbitrationKind = config.output_arb.parse()?;

        let mut topology = topologies::build(config)?;
        let num_ports = config.num_ports;
        let num_vcs = topology.compute_num_vcs(config.num_vns);
        let ports: Vec<PortControl> = (0..num_ports)
            .map(|port| {
                PortControl::new(
                    port,
                    config.input_buf_size,
                    config.output_buf_size,
                    config.input_buf_size,
                    single_arbitration(output_kind, num_vcs),
                )
            })
            .collect();
        let initial_credits = vec![config.output_buf_size; num_ports * num_vcs];
        topology.set_output_buffer_credit_array(num_vcs, &initial_credits);
        topology.set_output_queue_lengths_array(num_vcs);
        let seed = config.seed.wrapping_add(config.id as u64);
        let arbiter = xbar_arbitration(xbar_kind, num_ports, num_vcs, seed);

        log::debug!(
            "router {}: {} ports, {} VCs, {} crossbar, {} output arbitration",
            config.id,
            num_ports,
            num_vcs,
            arbiter.name(),
            config.output_arb
        );
        Ok(Router {
            id: config.id,
            num_vcs,
            topology,
            arbiter,
            ports,
            in_port_busy: vec![0; num_ports],
            out_port_busy: vec![0; num_ports],
            progress: vec![Progress::Idle; num_ports],
            xbar_in_credits: initial_credits,
            output_queue_lengths: vec![0; num_ports * num_vcs],
            clocked: true,
            declocked_at: 0,
            clocked_cycles: 0,
            idle_cycles: 0,
            xbar_stalls: vec![0; num_ports],
        })
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn num_ports(&self) -> usize {
        self.ports.len()
    }

    pub fn num_vcs(&self) -> usize {
        self.num_vcs
    }

    pub fn topology(&self) -> &dyn Topology {
        self.topology.as_ref()
    }

    pub fn port(&self, port: usize) -> &PortControl {
        &self.ports[port]
    }

    pub fn is_clocked(&self) -> bool {
        self.clocked
    }

    /// whether any input VC holds an event.
    pub fn has_data(&self) -> bool {
        self.ports.iter().any(|p| p.has_data())
    }

    /// whether any output buffer still has to go on a link.
    pub fn has_output(&self) -> bool {
        self.ports.iter().any(|p| p.has_output())
    }

    /// Take a packet from the endpoint on `port`.
    ///
    /// Hands the packet back when the input buffer of its VC is full.
    pub fn inject(&mut self, port: usize, packet: Packet) -> Result<(), Packet> {
        debug_assert_eq!(self.topology.port_state(port), PortState::RouterToNode);
        let mut ev = self.topology.process_input(packet);
        let vc = ev.vc();
        if !self.ports[port].input_space(vc, ev.flit_count()) {
            return Err(ev.into_packet());
        }
        self.accept(port, vc, ev);
        Ok(())
    }

    /// Take an event off the link of `port`; the sender held credits for it.
    pub fn receive(&mut self, port: usize, ev: RouterEvent) {
        let vc = ev.vc();
        self.accept(port, vc, ev);
    }

    fn accept(&mut self, port: usize, vc: usize, mut ev: RouterEvent) {
        self.refresh_congestion();
        let congestion = Congestion::new(
            self.num_vcs,
            &self.xbar_in_credits,
            &self.output_queue_lengths,
        );
        self.topology.route(port, vc, &mut ev, &congestion);
        if ev.trace() != TraceType::None {
            log::info!(
                "router {}: packet {} arrived on port {} vc {}, routed to port {} vc {}",
                self.id,
                ev.packet().id,
                port,
                vc,
                ev.next_port(),
                ev.vc()
            );
        }
        self.ports[port].push_input(vc, ev);
    }

    fn refresh_congestion(&mut self) {
        for (port, p) in self.ports.iter().enumerate() {
            for vc in 0..self.num_vcs {
                self.xbar_in_credits[port * self.num_vcs + vc] = p.xbar_credits(vc);
                self.output_queue_lengths[port * self.num_vcs + vc] = p.queue_length(vc);
            }
        }
    }

    /// Resume after declocking. The busy counters lose the cycles that went
    /// by, once.
    pub fn notify_event(&mut self, cycle: Cycle) {
        if self.clocked {
            return;
        }
        let elapsed = cycle.saturating_sub(self.declocked_at);
        for busy in self.in_port_busy.iter_mut().chain(self.out_port_busy.iter_mut()) {
            *busy = busy.saturating_sub(elapsed);
        }
        self.arbiter.report_skipped_cycles(elapsed);
        self.idle_cycles += elapsed as u64;
        self.clocked = true;
        log::trace!("router {}: reclocked at {} after {} cycles", self.id, cycle, elapsed);
    }

    /// One crossbar cycle.
    pub fn clock_handler(&mut self, cycle: Cycle) -> ClockStatus {
        assert!(
            self.clocked,
            "router {}: clocked at {} without notify_event",
            self.id, cycle
        );
        if !self.has_data() && self.arbiter.is_okay_to_pause_clock() {
            self.clocked = false;
            self.declocked_at = cycle;
            log::trace!("router {}: declocked at {}", self.id, cycle);
            return ClockStatus::Declocked;
        }
        self.clocked_cycles += 1;

        self.refresh_congestion();
        let congestion = Congestion::new(
            self.num_vcs,
            &self.xbar_in_credits,
            &self.output_queue_lengths,
        );
        for (port, p) in self.ports.iter_mut().enumerate() {
            for vc in 0..self.num_vcs {
                if let Some(ev) = p.vc_head_mut(vc) {
                    self.topology.reroute(port, vc, ev, &congestion);
                }
            }
        }

        self.arbiter.arbitrate(
            &mut self.ports,
            &mut self.in_port_busy,
            &mut self.out_port_busy,
            &mut self.progress,
        );

        for port in 0..self.ports.len() {
            match self.progress[port] {
                Progress::Idle => {}
                Progress::Blocked => self.xbar_stalls[port] += 1,
                Progress::Granted(vc) => {
                    let ev = match self.ports[port].recv(vc) {
                        Some(ev) => ev,
                        None => panic!(
                            "router {}: port {} vc {} granted without a head",
                            self.id, port, vc
                        ),
                    };
                    let output = ev.next_port();
                    let out_vc = ev.vc();
                    #[cfg(feature = "trace-xbar-grants")]
                    log::trace!(
                        "router {} cycle {}: grant {}:{} -> {}:{} ({} flits)",
                        self.id,
                        cycle,
                        port,
                        vc,
                        output,
                        out_vc,
                        ev.flit_count()
                    );
                    if ev.trace() == TraceType::Full {
                        log::info!(
                            "router {} cycle {}: packet {} crossed {}:{} -> {}:{}",
                            self.id,
                            cycle,
                            ev.packet().id,
                            port,
                            vc,
                            output,
                            out_vc
                        );
                    }
                    self.ports[output].send(ev, out_vc);
                }
            }
        }

        for busy in self.in_port_busy.iter_mut().chain(self.out_port_busy.iter_mut()) {
            *busy = busy.saturating_sub(1);
        }
        ClockStatus::Clocked
    }

    /// Advance every link by one cycle; returns what went on the wires.
    pub fn transmit(&mut self) -> Vec<(usize, RouterEvent)> {
        let mut sent = Vec::new();
        for port in 0..self.ports.len() {
            if let Some(ev) = self.ports[port].transmit() {
                if ev.trace() == TraceType::Full {
                    log::info!(
                        "router {}: packet {} left on port {} vc {}",
                        self.id,
                        ev.packet().id,
                        port,
                        ev.vc()
                    );
                }
                sent.push((port, ev));
            }
        }
        sent
    }

    /// credits from the downstream side of `port`.
    pub fn return_credits(&mut self, port: usize, vc: usize, flits: usize) {
        self.ports[port].return_credits(vc, flits);
    }

    pub fn take_credit_returns(&mut self) -> Vec<CreditReturn> {
        self.ports
            .iter_mut()
            .flat_map(|p| p.take_credit_returns())
            .collect()
    }

    /// Route init-time data that arrived on `port`.
    ///
    /// Returns one copy per output port. Copies for endpoints are unwrapped
    /// packets.
    pub fn init_data(&mut self, port: usize, data: InitData) -> Vec<(usize, InitData)> {
        let mut ev = match data {
            InitData::Packet(packet) => self.topology.process_init_data_input(packet),
            InitData::Routed(ev) => ev,
        };
        let outputs = self.topology.route_init_data(port, &mut ev);
        log::trace!(
            "router {}: init packet {} from port {} to ports {:?}",
            self.id,
            ev.packet().id,
            port,
            outputs
        );
        let copies = ev.duplicate(outputs.len());
        outputs
            .into_iter()
            .zip(copies)
            .map(|(out, copy)| match self.topology.port_state(out) {
                PortState::RouterToNode => (out, InitData::Packet(copy.into_packet())),
                _ => (out, InitData::Routed(copy)),
            })
            .collect()
    }

    pub fn statistics(&self) -> RouterStatistics {
        let mut stats = RouterStatistics {
            clocked_cycles: self.clocked_cycles,
            idle_cycles: self.idle_cycles,
            xbar_stalls: self.xbar_stalls.clone(),
            hop_counts: self.topology.hop_counts().to_vec(),
            ..Default::default()
        };
        for p in self.ports.iter() {
            let s = p.statistics();
            stats.packets_moved += s.packets_received;
            stats.flits_moved += s.flits_received;
            stats.packets_sent += s.packets_sent;
            stats.flits_sent += s.flits_sent;
        }
        stats
    }

    pub fn dump_state(&self, out: &mut dyn fmt::Write) -> fmt::Result {
        writeln!(
            out,
            "router {} ({}, {} crossbar): {}",
            self.id,
            self.topology.name(),
            self.arbiter.name(),
            if self.clocked { "clocked" } else { "declocked" }
        )?;
        writeln!(out, "  in_port_busy {:?}", self.in_port_busy)?;
        writeln!(out, "  out_port_busy {:?}", self.out_port_busy)?;
        writeln!(out, "  progress {:?}", self.progress)?;
        for p in self.ports.iter() {
            p.dump_state(out)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Router")
            .field("id", &self.id)
            .field("topology", &self.topology.name())
            .field("arbiter", &self.arbiter.name())
            .field("clocked", &self.clocked)
            .finish()
    }
}
