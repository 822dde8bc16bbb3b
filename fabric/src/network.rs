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

//! A network of routers stepped cycle by cycle.
//!
//! Wiring comes from the topology of each router: `endpoint_id` places the
//! endpoints, `neighbor` the router to router links. Links deliver events
//! and credits after `link_latency` cycles. Endpoints inject from an
//! unbounded queue and always sink what reaches them.

use crate::config::NetworkConfiguration;
use crate::event::{Packet, RouterEvent};
use crate::router::{ClockStatus, InitData, Router};
use crate::topologies::PortState;
use crate::{Cycle, Error};
use anyhow::Context;
use std::collections::VecDeque;
use std::fmt;

/// A packet that reached its endpoint.
#[derive(Clone, Debug, PartialEq)]
pub struct Delivery {
    pub endpoint: usize,
    pub cycle: Cycle,
    pub packet: Packet,
}

impl Delivery {
    pub fn latency(&self) -> Cycle {
        self.cycle - self.packet.inject_time
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct NetworkStatistics {
    pub cycles: Cycle,
    pub injected: u64,
    pub delivered: u64,
    pub total_latency: u64,
    pub max_latency: Cycle,
    pub xbar_stalls: u64,
    /// cycles routers spent declocked, summed.
    pub idle_router_cycles: u64,
    pub hop_counts: Vec<u64>,
}

impl NetworkStatistics {
    pub fn mean_latency(&self) -> f64 {
        if self.delivered == 0 {
            0.0
        } else {
            self.total_latency as f64 / self.delivered as f64
        }
    }
}

struct InFlight {
    arrival: Cycle,
    router: usize,
    port: usize,
    ev: RouterEvent,
}

struct CreditInFlight {
    arrival: Cycle,
    router: usize,
    port: usize,
    vc: usize,
    flits: usize,
}

pub struct Network {
    routers: Vec<Router>,
    // (router, port) of every endpoint
    endpoints: Vec<(usize, usize)>,
    // far end of every router facing port, [router][port]
    links: Vec<Vec<Option<(usize, usize)>>>,
    link_latency: Cycle,
    max_packet_flits: usize,
    num_vns: usize,
    cycle: Cycle,
    pending: Vec<VecDeque<Packet>>,
    in_flight: VecDeque<InFlight>,
    credits_in_flight: VecDeque<CreditInFlight>,
    delivered: Vec<Delivery>,
    injected: u64,
    delivered_count: u64,
    total_latency: u64,
    max_latency: Cycle,
}

impl Network {
    pub fn new(config: &NetworkConfiguration) -> Result<Network, Error> {
        if config.link_latency == 0 {
            return Err(Error::InvalidParameter(
                "link_latency must be at least 1".to_string(),
            ));
        }
        let first = Router::new(&config.router)?;
        let num_routers = first.topology().num_routers();
        let num_endpoints = first.topology().num_endpoints();
        let mut routers = Vec::with_capacity(num_routers);
        for id in 0..num_routers {
            let mut router_config = config.router.clone();
            router_config.id = id;
            routers.push(Router::new(&router_config)?);
        }

        let mut endpoints = vec![None; num_endpoints];
        let mut links = Vec::with_capacity(num_routers);
        for (r, router) in routers.iter().enumerate() {
            let topo = router.topology();
            let mut far_ends = vec![None; router.num_ports()];
            for (port, far_end) in far_ends.iter_mut().enumerate() {
                match topo.port_state(port) {
                    PortState::RouterToNode => {
                        let endpoint = topo.endpoint_id(port).filter(|&e| e < num_endpoints);
                        match endpoint.map(|e| endpoints[e].replace((r, port))) {
                            Some(None) => {}
                            _ => {
                                return Err(Error::InvalidParameter(format!(
                                    "router {} port {}: endpoint {:?} missing or attached twice",
                                    r, port, endpoint
                                )))
                            }
                        }
                    }
                    PortState::RouterToRouter => *far_end = topo.neighbor(port),
                    PortState::Unconnected => {}
                }
            }
            links.push(far_ends);
        }
        for (r, far_ends) in links.iter().enumerate() {
            for (port, far_end) in far_ends.iter().enumerate() {
                if let Some((r2, p2)) = *far_end {
                    if links.get(r2).and_then(|l| l.get(p2)) != Some(&Some((r, port))) {
                        return Err(Error::InvalidParameter(format!(
                            "link {}:{} -> {}:{} has no way back",
                            r, port, r2, p2
                        )));
                    }
                }
            }
        }
        let endpoints = endpoints
            .into_iter()
            .enumerate()
            .map(|(e, at)| {
                at.ok_or_else(|| Error::InvalidParameter(format!("endpoint {} is not attached", e)))
            })
            .collect::<Result<Vec<_>, Error>>()?;

        log::debug!(
            "network: {} {} routers, {} endpoints, link latency {}",
            num_routers,
            first.topology().name(),
            num_endpoints,
            config.link_latency
        );
        Ok(Network {
            routers,
            endpoints,
            links,
            link_latency: config.link_latency,
            // a packet must fit both ends of a crossbar hop
            max_packet_flits: config
                .router
                .input_buf_size
                .min(config.router.output_buf_size),
            num_vns: config.router.num_vns,
            cycle: 0,
            pending: vec![VecDeque::new(); num_endpoints],
            in_flight: VecDeque::new(),
            credits_in_flight: VecDeque::new(),
            delivered: Vec::new(),
            injected: 0,
            delivered_count: 0,
            total_latency: 0,
            max_latency: 0,
        })
    }

    pub fn num_routers(&self) -> usize {
        self.routers.len()
    }

    pub fn num_endpoints(&self) -> usize {
        self.endpoints.len()
    }

    pub fn router(&self, id: usize) -> &Router {
        &self.routers[id]
    }

    /// (router, port) where `endpoint` is attached.
    pub fn endpoint(&self, endpoint: usize) -> (usize, usize) {
        self.endpoints[endpoint]
    }

    /// far end of a router to router link.
    pub fn link(&self, router: usize, port: usize) -> Option<(usize, usize)> {
        self.links[router][port]
    }

    pub fn cycle(&self) -> Cycle {
        self.cycle
    }

    /// Queue `packet` at its source endpoint, stamped with the current
    /// cycle.
    pub fn send(&mut self, packet: Packet) -> Result<(), Error> {
        if packet.src >= self.endpoints.len() || packet.dest >= self.endpoints.len() {
            return Err(Error::InvalidParameter(format!(
                "packet {}: endpoints {} -> {} outside of 0..{}",
                packet.id,
                packet.src,
                packet.dest,
                self.endpoints.len()
            )));
        }
        if packet.size_in_flits() > self.max_packet_flits {
            return Err(Error::InvalidParameter(format!(
                "packet {}: {} flits do not fit a {} flit buffer",
                packet.id,
                packet.size_in_flits(),
                self.max_packet_flits
            )));
        }
        if packet.vn >= self.num_vns {
            return Err(Error::InvalidParameter(format!(
                "packet {}: vn {} outside of 0..{}",
                packet.id, packet.vn, self.num_vns
            )));
        }
        let src = packet.src;
        let packet = packet.with_inject_time(self.cycle);
        self.pending[src].push_back(packet);
        Ok(())
    }

    /// Simulate one cycle.
    pub fn step(&mut self) {
        let cycle = self.cycle;
        log::trace!("network cycle {}", cycle);

        while self.in_flight.front().map_or(false, |f| f.arrival <= cycle) {
            if let Some(f) = self.in_flight.pop_front() {
                let router = &mut self.routers[f.router];
                router.notify_event(cycle);
                router.receive(f.port, f.ev);
            }
        }
        while self
            .credits_in_flight
            .front()
            .map_or(false, |c| c.arrival <= cycle)
        {
            if let Some(c) = self.credits_in_flight.pop_front() {
                self.routers[c.router].return_credits(c.port, c.vc, c.flits);
            }
        }

        for (endpoint, queue) in self.pending.iter_mut().enumerate() {
            if let Some(packet) = queue.pop_front() {
                let (r, port) = self.endpoints[endpoint];
                let router = &mut self.routers[r];
                router.notify_event(cycle);
                match router.inject(port, packet) {
                    Ok(()) => self.injected += 1,
                    Err(packet) => queue.push_front(packet),
                }
            }
        }

        for router in self.routers.iter_mut() {
            if router.is_clocked() && router.clock_handler(cycle) == ClockStatus::Declocked {
                log::trace!("router {} declocked at {}", router.id(), cycle);
            }
        }

        for r in 0..self.routers.len() {
            for (port, ev) in self.routers[r].transmit() {
                match self.links[r][port] {
                    Some((r2, p2)) => self.in_flight.push_back(InFlight {
                        arrival: cycle + self.link_latency,
                        router: r2,
                        port: p2,
                        ev,
                    }),
                    None => {
                        // endpoints sink everything, credits come back at once
                        self.routers[r].return_credits(port, ev.vc(), ev.flit_count());
                        self.deliver(r, port, ev.into_packet());
                    }
                }
            }
            for credit in self.routers[r].take_credit_returns() {
                if let Some((r2, p2)) = self.links[r][credit.port] {
                    self.credits_in_flight.push_back(CreditInFlight {
                        arrival: cycle + self.link_latency,
                        router: r2,
                        port: p2,
                        vc: credit.vc,
                        flits: credit.flits,
                    });
                }
            }
        }
        self.cycle += 1;
    }

    fn deliver(&mut self, router: usize, port: usize, packet: Packet) {
        let endpoint = self.routers[router]
            .topology()
            .endpoint_id(port)
            .unwrap_or(usize::MAX);
        assert_eq!(
            endpoint, packet.dest,
            "router {} port {}: packet {} for endpoint {} delivered to {}",
            router, port, packet.id, packet.dest, endpoint
        );
        let delivery = Delivery {
            endpoint,
            cycle: self.cycle,
            packet,
        };
        let latency = delivery.latency();
        self.delivered_count += 1;
        self.total_latency += latency as u64;
        self.max_latency = self.max_latency.max(latency);
        log::trace!(
            "cycle {}: packet {} delivered to endpoint {} after {} cycles",
            self.cycle,
            delivery.packet.id,
            endpoint,
            latency
        );
        self.delivered.push(delivery);
    }

    pub fn run(&mut self, cycles: Cycle) {
        for _ in 0..cycles {
            self.step();
        }
    }

    /// Nothing queued, on a link or inside a router.
    pub fn is_idle(&self) -> bool {
        self.pending.iter().all(|q| q.is_empty())
            && self.in_flight.is_empty()
            && self.credits_in_flight.is_empty()
            && self.routers.iter().all(|r| !r.has_data() && !r.has_output())
    }

    /// Step until idle; returns the cycle reached.
    pub fn run_until_drained(&mut self, max_cycles: Cycle) -> anyhow::Result<Cycle> {
        let limit = self.cycle + max_cycles;
        while !self.is_idle() {
            if self.cycle >= limit {
                let mut state = String::new();
                self.dump_state(&mut state)
                    .context("failed to dump network state")?;
                log::debug!("network state:\n{}", state);
                return Err(anyhow::anyhow!(
                    "network did not drain after {} cycles, {} packets delivered of {} injected",
                    max_cycles,
                    self.delivered_count,
                    self.injected
                ));
            }
            self.step();
        }
        Ok(self.cycle)
    }

    pub fn take_delivered(&mut self) -> Vec<Delivery> {
        std::mem::take(&mut self.delivered)
    }

    /// Init-time transfer of `packet` from its source endpoint, outside of
    /// the clocked datapath. Returns what each endpoint received.
    pub fn init_transfer(&mut self, packet: Packet) -> Vec<(usize, Packet)> {
        let mut received = Vec::new();
        let (r, port) = self.endpoints[packet.src];
        let mut work = VecDeque::from([(r, port, InitData::Packet(packet))]);
        while let Some((r, port, data)) = work.pop_front() {
            for (out, data) in self.routers[r].init_data(port, data) {
                match data {
                    InitData::Packet(p) => {
                        if let Some(endpoint) = self.routers[r].topology().endpoint_id(out) {
                            received.push((endpoint, p));
                        }
                    }
                    InitData::Routed(ev) => {
                        if let Some((r2, p2)) = self.links[r][out] {
                            work.push_back((r2, p2, InitData::Routed(ev)));
                        }
                    }
                }
            }
        }
        received
    }

    pub fn statistics(&self) -> NetworkStatistics {
        let mut stats = NetworkStatistics {
            cycles: self.cycle,
            injected: self.injected,
            delivered: self.delivered_count,
            total_latency: self.total_latency,
            max_latency: self.max_latency,
            ..Default::default()
        };
        for router in self.routers.iter() {
            let r = router.statistics();
            stats.xbar_stalls += r.xbar_stalls.iter().sum::<u64>();
            stats.idle_router_cycles += r.idle_cycles;
            if stats.hop_counts.len() < r.hop_counts.len() {
                stats.hop_counts.resize(r.hop_counts.len(), 0);
            }
            for (total, n) in stats.hop_counts.iter_mut().zip(r.hop_counts.iter()) {
                *total += n;
            }
        }
        stats
    }

    pub fn dump_state(&self, out: &mut dyn fmt::Write) -> fmt::Result {
        writeln!(
            out,
            "cycle {}: {} events and {} credits on links",
            self.cycle,
            self.in_flight.len(),
            self.credits_in_flight.len()
        )?;
        for router in self.routers.iter() {
            router.dump_state(out)?;
        }
        Ok(())
    }
}
