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

use super::{check_ports, delinearize_index, linearize_index, parse_dims, parse_widths};
use super::{route_init_unicast, topology_rng, Congestion, PortState, Topology};
use crate::config::HyperXConfiguration;
use crate::event::{DimensionalRoute, Packet, RouteInfo, RouterEvent};
use crate::Error;
use rand::Rng;
use rand_xoshiro::Xoshiro256StarStar;
use std::str::FromStr;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum HyperXAlgorithm {
    /// dimension order, first parallel link.
    Dor,
    /// dimension order, parallel link picked at random per packet.
    DorNd,
    /// minimal, any unaligned dimension, least loaded link.
    MinA,
    /// dimension order through a random intermediate router.
    Valiant,
    /// dimension order, adaptive inside each dimension.
    Doal,
    /// dimension agnostic, adaptive, one deroute per dimension.
    Vdal,
}

impl FromStr for HyperXAlgorithm {
    type Err = Error;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.to_ascii_uppercase().as_str() {
            "DOR" | "MINIMAL" => Ok(Self::Dor),
            "DOR-ND" => Ok(Self::DorNd),
            "MIN-A" => Ok(Self::MinA),
            "VALIANT" => Ok(Self::Valiant),
            "DOAL" => Ok(Self::Doal),
            "VDAL" => Ok(Self::Vdal),
            _ => Err(Error::UnknownAlgorithm(input.to_string())),
        }
    }
}

/// A HyperX: routers are fully connected along every dimension.
///
/// In dimension `d` a router has `width[d]` links to each of the other
/// `shape[d] - 1` routers of its row, starting at `port_start[d]`. The link
/// to coordinate `c` is at `port_start[d] + (c - (c > mine)) * width[d]`.
/// Local ports follow the last dimension.
#[derive(Debug)]
pub struct HyperX {
    id: usize,
    algorithm: HyperXAlgorithm,
    dims: Vec<usize>,
    widths: Vec<usize>,
    port_start: Vec<usize>,
    local_port_start: usize,
    local_ports: usize,
    my_loc: Vec<usize>,
    rng: Xoshiro256StarStar,
}

impl HyperX {
    pub fn new(
        id: usize,
        num_ports: usize,
        config: &HyperXConfiguration,
        seed: u64,
    ) -> Result<Self, Error> {
        let algorithm = config.algorithm.parse::<HyperXAlgorithm>()?;
        let dims = parse_dims(&config.shape)?;
        let widths = parse_widths(config.width.as_deref(), dims.len())?;
        if config.local_ports == 0 {
            return Err(Error::InvalidParameter("local_ports must be positive".to_string()));
        }
        let mut port_start = Vec::with_capacity(dims.len());
        let mut next = 0;
        for (size, width) in dims.iter().zip(widths.iter()) {
            port_start.push(next);
            next += width * (size - 1);
        }
        check_ports(next + config.local_ports, num_ports)?;
        let num_routers: usize = dims.iter().product();
        if id >= num_routers {
            return Err(Error::InvalidRouterId(id));
        }
        Ok(Self {
            id,
            algorithm,
            my_loc: delinearize_index(id, &dims),
            dims,
            widths,
            port_start,
            local_port_start: next,
            local_ports: config.local_ports,
            rng: topology_rng(seed, id),
        })
    }

    fn vcs_per_vn(&self) -> usize {
        match self.algorithm {
            HyperXAlgorithm::Dor | HyperXAlgorithm::DorNd => 1,
            HyperXAlgorithm::MinA => self.dims.len(),
            HyperXAlgorithm::Valiant | HyperXAlgorithm::Doal => 2,
            HyperXAlgorithm::Vdal => 2 * self.dims.len(),
        }
    }

    fn is_adaptive(&self) -> bool {
        matches!(
            self.algorithm,
            HyperXAlgorithm::MinA | HyperXAlgorithm::Doal | HyperXAlgorithm::Vdal
        )
    }

    /// port of parallel link `link` toward coordinate `coord` in `dim`.
    fn port_to(&self, dim: usize, coord: usize, link: usize) -> usize {
        let mine = self.my_loc[dim];
        debug_assert_ne!(coord, mine);
        let index = if coord > mine { coord - 1 } else { coord };
        self.port_start[dim] + index * self.widths[dim] + link
    }

    /// (dimension, far coordinate, parallel link) of a router facing port.
    fn dim_of_port(&self, port: usize) -> Option<(usize, usize, usize)> {
        if port >= self.local_port_start {
            return None;
        }
        let dim = self.port_start.iter().rposition(|&start| start <= port)?;
        let offset = port - self.port_start[dim];
        let index = offset / self.widths[dim];
        let coord = if index < self.my_loc[dim] {
            index
        } else {
            index + 1
        };
        Some((dim, coord, offset % self.widths[dim]))
    }

    fn local_port(&self, dest: usize) -> usize {
        self.local_port_start + dest % self.local_ports
    }

    /// first dimension where `target` differs from this router.
    fn first_unaligned(&self, target: &[usize]) -> Option<usize> {
        (0..self.dims.len()).find(|&d| target[d] != self.my_loc[d])
    }

    /// Pick next port and VC. Adaptive algorithms read `congestion`.
    fn decide(&self, port: usize, vc: usize, ev: &RouterEvent, congestion: &Congestion) -> (usize, usize) {
        let per_vn = self.vcs_per_vn();
        let base = vc - vc % per_vn;
        let from_host = port >= self.local_port_start;
        let info = match ev.route_info() {
            RouteInfo::Dimensional(info) => info,
            other => panic!("hyperx got foreign route info {:?}", other),
        };
        let dest_loc = &info.dest_loc;
        match self.algorithm {
            HyperXAlgorithm::Dor | HyperXAlgorithm::DorNd => match self.first_unaligned(dest_loc) {
                None => (self.local_port(ev.dest()), base),
                Some(d) => {
                    let link = if self.algorithm == HyperXAlgorithm::DorNd {
                        info.link
                    } else {
                        0
                    };
                    (self.port_to(d, dest_loc[d], link), vc)
                }
            },
            HyperXAlgorithm::Valiant => {
                // the even VC leads to the intermediate, the odd one to the
                // destination
                let mut next_vc = vc;
                let target = match &info.intermediate {
                    Some(mid) if vc == base => {
                        if *mid == self.my_loc {
                            next_vc = base + 1;
                            dest_loc
                        } else {
                            mid
                        }
                    }
                    _ => dest_loc,
                };
                match self.first_unaligned(target) {
                    None => (self.local_port(ev.dest()), base),
                    Some(d) => (self.port_to(d, target[d], 0), next_vc),
                }
            }
            HyperXAlgorithm::MinA => {
                if self.first_unaligned(dest_loc).is_none() {
                    return (self.local_port(ev.dest()), base);
                }
                let next_vc = if from_host { base } else { vc + 1 };
                assert!(
                    next_vc < base + per_vn,
                    "router {}: MIN-A packet {} out of VCs",
                    self.id,
                    ev.packet().id
                );
                let mut best: Option<(usize, usize)> = None;
                for d in 0..self.dims.len() {
                    if dest_loc[d] == self.my_loc[d] {
                        continue;
                    }
                    for link in 0..self.widths[d] {
                        let p = self.port_to(d, dest_loc[d], link);
                        let weight = congestion.queue_length(p, next_vc);
                        if best.map_or(true, |(_, w)| weight < w) {
                            best = Some((p, weight));
                        }
                    }
                }
                match best {
                    Some((p, _)) => (p, next_vc),
                    None => panic!("router {}: no minimal candidate", self.id),
                }
            }
            HyperXAlgorithm::Doal => {
                let d = match self.first_unaligned(dest_loc) {
                    None => return (self.local_port(ev.dest()), base),
                    Some(d) => d,
                };
                let minimal = self.port_to(d, dest_loc[d], 0);
                if vc != base {
                    // the last hop was a deroute in this dimension
                    return (minimal, base);
                }
                // queue length is the output buffer size less its credits,
                // so the lightest port is the one with the most credits
                let mut best = (minimal, base, congestion.queue_length(minimal, base));
                for coord in 0..self.dims[d] {
                    if coord == self.my_loc[d] {
                        continue;
                    }
                    for link in 0..self.widths[d] {
                        let p = self.port_to(d, coord, link);
                        let (out_vc, weight) = if coord == dest_loc[d] {
                            (base, congestion.queue_length(p, base))
                        } else {
                            (base + 1, 2 * congestion.queue_length(p, base + 1))
                        };
                        if weight < best.2 {
                            best = (p, out_vc, weight);
                        }
                    }
                }
                (best.0, best.1)
            }
            HyperXAlgorithm::Vdal => {
                let unaligned = (0..self.dims.len())
                    .filter(|&d| dest_loc[d] != self.my_loc[d])
                    .count();
                if unaligned == 0 {
                    return (self.local_port(ev.dest()), base);
                }
                let next_vc = if from_host { base } else { vc + 1 };
                let hops_left = base + per_vn - next_vc;
                assert!(
                    hops_left >= unaligned,
                    "router {}: VDAL packet {} ran out of hops",
                    self.id,
                    ev.packet().id
                );
                let may_deroute = hops_left > unaligned;
                let mut best: Option<(usize, usize)> = None;
                // minimal links first so that ties keep the minimal path
                for d in 0..self.dims.len() {
                    if dest_loc[d] == self.my_loc[d] {
                        continue;
                    }
                    for link in 0..self.widths[d] {
                        let p = self.port_to(d, dest_loc[d], link);
                        let weight = congestion.queue_length(p, next_vc);
                        if best.map_or(true, |(_, w)| weight < w) {
                            best = Some((p, weight));
                        }
                    }
                }
                if may_deroute {
                    for d in 0..self.dims.len() {
                        if dest_loc[d] == self.my_loc[d] || info.derouted[d] {
                            continue;
                        }
                        for coord in 0..self.dims[d] {
                            if coord == self.my_loc[d] || coord == dest_loc[d] {
                                continue;
                            }
                            for link in 0..self.widths[d] {
                                let p = self.port_to(d, coord, link);
                                let weight = 2 * congestion.queue_length(p, next_vc) + 1;
                                if best.map_or(true, |(_, w)| weight < w) {
                                    best = Some((p, weight));
                                }
                            }
                        }
                    }
                }
                match best {
                    Some((p, _)) => (p, next_vc),
                    None => panic!("router {}: no VDAL candidate", self.id),
                }
            }
        }
    }
}

impl Topology for HyperX {
    fn name(&self) -> &'static str {
        "hyperx"
    }

    fn route(&mut self, port: usize, vc: usize, ev: &mut RouterEvent, congestion: &Congestion) {
        if let Some((d, _, _)) = self.dim_of_port(port) {
            let here = self.my_loc[d];
            if let RouteInfo::Dimensional(info) = ev.route_info_mut() {
                // still unaligned after a hop in `d`: that hop was a deroute
                if info.dest_loc[d] != here {
                    info.derouted[d] = true;
                }
            }
        }
        if self.algorithm == HyperXAlgorithm::DorNd {
            if let RouteInfo::Dimensional(info) = ev.route_info_mut() {
                // any of the parallel links of the dimension routed next
                if let Some(d) = self.first_unaligned(&info.dest_loc) {
                    info.link = self.rng.gen_range(0..self.widths[d]);
                }
            }
        }
        let (next_port, next_vc) = self.decide(port, vc, ev, congestion);
        ev.set_next_port(next_port);
        ev.set_vc(next_vc);
    }

    fn reroute(&mut self, port: usize, vc: usize, ev: &mut RouterEvent, congestion: &Congestion) {
        if !self.is_adaptive() {
            return;
        }
        let (next_port, next_vc) = self.decide(port, vc, ev, congestion);
        ev.set_next_port(next_port);
        ev.set_vc(next_vc);
    }

    fn process_input(&mut self, packet: Packet) -> RouterEvent {
        let dest_loc = delinearize_index(packet.dest / self.local_ports, &self.dims);
        let num_routers = self.num_routers();
        let intermediate = if self.algorithm == HyperXAlgorithm::Valiant && num_routers > 2 {
            let dest_router = linearize_index(&dest_loc, &self.dims);
            let mut mid = self.id;
            while mid == self.id || mid == dest_router {
                mid = self.rng.gen_range(0..num_routers);
            }
            Some(delinearize_index(mid, &self.dims))
        } else {
            None
        };
        let vc = packet.vn * self.vcs_per_vn();
        let num_dims = self.dims.len();
        RouterEvent::new(
            packet,
            vc,
            RouteInfo::Dimensional(DimensionalRoute {
                dest_loc,
                intermediate,
                derouted: vec![false; num_dims],
                link: 0,
            }),
        )
    }

    /// Broadcasts fan out over the dimensions after the one they came in
    /// through, every dimension when injected locally.
    fn route_init_data(&mut self, port: usize, ev: &mut RouterEvent) -> Vec<usize> {
        if !ev.is_broadcast() {
            return route_init_unicast(self, port, ev);
        }
        let start_dim = match self.dim_of_port(port) {
            None => 0,
            Some((d, _, _)) => d + 1,
        };
        let mut ports = Vec::new();
        for d in start_dim..self.dims.len() {
            for coord in 0..self.dims[d] {
                if coord != self.my_loc[d] {
                    ports.push(self.port_to(d, coord, 0));
                }
            }
        }
        ports.extend(
            (self.local_port_start..self.local_port_start + self.local_ports).filter(|&p| p != port),
        );
        ports
    }

    fn port_state(&self, port: usize) -> PortState {
        if port < self.local_port_start {
            PortState::RouterToRouter
        } else if port < self.local_port_start + self.local_ports {
            PortState::RouterToNode
        } else {
            PortState::Unconnected
        }
    }

    fn endpoint_id(&self, port: usize) -> Option<usize> {
        match self.port_state(port) {
            PortState::RouterToNode => {
                Some(self.id * self.local_ports + port - self.local_port_start)
            }
            _ => None,
        }
    }

    fn compute_num_vcs(&self, num_vns: usize) -> usize {
        num_vns * self.vcs_per_vn()
    }

    fn num_routers(&self) -> usize {
        self.dims.iter().product()
    }

    fn num_endpoints(&self) -> usize {
        self.num_routers() * self.local_ports
    }

    fn neighbor(&self, port: usize) -> Option<(usize, usize)> {
        let (d, coord, link) = self.dim_of_port(port)?;
        let mine = self.my_loc[d];
        let mut loc = self.my_loc.clone();
        loc[d] = coord;
        let index = if mine > coord { mine - 1 } else { mine };
        let far_port = self.port_start[d] + index * self.widths[d] + link;
        Some((linearize_index(&loc, &self.dims), far_port))
    }
}

#[cfg(test)]
mod hyperx_tests {
    use super::super::topology_tests::*;
    use super::*;
    use crate::config::{RouterConfiguration, TopologyConfiguration};

    fn hyperx(id: usize, shape: &str, width: Option<&str>, algorithm: &str) -> HyperX {
        let config = HyperXConfiguration {
            shape: shape.to_string(),
            width: width.map(|w| w.to_string()),
            local_ports: 2,
            algorithm: algorithm.to_string(),
        };
        HyperX::new(id, 16, &config, 1).unwrap()
    }

    fn route(topo: &mut HyperX, port: usize, vc: usize, dest: usize, congestion: &Congestion) -> (usize, usize) {
        let mut ev = topo.process_input(Packet::new(0, 0, dest, 0, 1));
        topo.route(port, vc, &mut ev, congestion);
        topo.reroute(port, vc, &mut ev, congestion);
        (ev.next_port(), ev.vc())
    }

    #[test]
    fn test_port_layout() {
        // router 4 at (1, 1) of 3x3: 0 -> x=0, 1 -> x=2, 2 -> y=0, 3 -> y=2
        let topo = hyperx(4, "3x3", None, "DOR");
        assert_eq!(topo.port_to(0, 0, 0), 0);
        assert_eq!(topo.port_to(0, 2, 0), 1);
        assert_eq!(topo.port_to(1, 0, 0), 2);
        assert_eq!(topo.port_to(1, 2, 0), 3);
        assert_eq!(topo.port_state(3), PortState::RouterToRouter);
        assert_eq!(topo.port_state(5), PortState::RouterToNode);
        assert_eq!(topo.port_state(6), PortState::Unconnected);
        assert_eq!(topo.endpoint_id(5), Some(9));
        assert_eq!(topo.neighbor(1), Some((5, 1)));
        assert_eq!(topo.neighbor(2), Some((1, 2)));
    }

    #[test]
    fn test_dor() {
        let mut topo = hyperx(4, "3x3", None, "DOR");
        let idle = Congestion::idle();
        // endpoint 10 sits on router 5 at (2, 1)
        assert_eq!(route(&mut topo, 4, 0, 10, &idle), (1, 0));
        // endpoint 17 sits on router 8 at (2, 2): x first
        assert_eq!(route(&mut topo, 4, 0, 17, &idle), (1, 0));
        // endpoint 15 sits on router 7 at (1, 2)
        assert_eq!(route(&mut topo, 4, 0, 15, &idle), (3, 0));
        assert_eq!(route(&mut topo, 4, 0, 9, &idle), (5, 0));
        assert_eq!(topo.compute_num_vcs(2), 2);
    }

    #[test]
    fn test_dor_nd_spreads_over_parallel_links() {
        // two links in x, three in y
        let mut topo = hyperx(0, "3x3", Some("2x3"), "DOR-ND");
        let idle = Congestion::idle();
        let mut x_links = [0; 2];
        let mut y_links = [0; 3];
        for _ in 0..3000 {
            // endpoint 2 sits on router 1 at (1, 0)
            let (port, vc) = route(&mut topo, 10, 0, 2, &idle);
            assert_eq!(vc, 0);
            x_links[port] += 1;
            // endpoint 6 sits on router 3 at (0, 1)
            let (port, _) = route(&mut topo, 10, 0, 6, &idle);
            y_links[port - 4] += 1;
        }
        assert!(x_links.iter().all(|&n| (1300..1700).contains(&n)), "{:?}", x_links);
        assert!(y_links.iter().all(|&n| (850..1150).contains(&n)), "{:?}", y_links);
    }

    #[test]
    fn test_doal_deroutes_around_congestion() {
        let mut topo = hyperx(4, "3x3", None, "DOAL");
        assert_eq!(topo.compute_num_vcs(1), 2);
        let credits = vec![0; 8 * 2];
        let mut queues = vec![0; 8 * 2];
        let idle = Congestion::new(2, &credits, &queues);
        assert_eq!(route(&mut topo, 4, 0, 10, &idle), (1, 0));
        // minimal port 1 is loaded, port 0 (x=0) is free on vc 1
        queues[2] = 10;
        let loaded = Congestion::new(2, &credits, &queues);
        assert_eq!(route(&mut topo, 4, 0, 10, &loaded), (0, 1));
        // after a deroute the packet goes minimal on the even VC
        assert_eq!(route(&mut topo, 0, 1, 10, &loaded), (1, 0));
        // 2 * 5 == 10 ties, the minimal path wins
        queues[1] = 5;
        let tied = Congestion::new(2, &credits, &queues);
        assert_eq!(route(&mut topo, 4, 0, 10, &tied), (1, 0));
    }

    #[test]
    fn test_min_a_picks_least_loaded_dimension() {
        let mut topo = hyperx(4, "3x3", None, "MIN-A");
        assert_eq!(topo.compute_num_vcs(1), 2);
        let credits = vec![0; 8 * 2];
        let mut queues = vec![0; 8 * 2];
        // router 8 at (2, 2): x via port 1, y via port 3
        queues[2] = 3;
        let congestion = Congestion::new(2, &credits, &queues);
        assert_eq!(route(&mut topo, 4, 0, 17, &congestion), (3, 0));
        // arriving from another router uses the next VC
        assert_eq!(route(&mut topo, 0, 0, 17, &Congestion::idle()), (1, 1));
    }

    #[test]
    fn test_vdal_deroute_budget() {
        let mut topo = hyperx(4, "3x3", None, "VDAL");
        assert_eq!(topo.compute_num_vcs(1), 4);
        let credits = vec![0; 8 * 4];
        let mut queues = vec![0; 8 * 4];
        // router 5 at (2, 1): minimal is port 1; load it on vc 0
        queues[4] = 4;
        let congestion = Congestion::new(4, &credits, &queues);
        // non-minimal weight 2 * 0 + 1 beats 4
        assert_eq!(route(&mut topo, 4, 0, 10, &congestion), (0, 0));
        // with the last VC left, only minimal hops remain
        let (port, vc) = route(&mut topo, 0, 2, 10, &congestion);
        assert_eq!((port, vc), (1, 3));
    }

    #[test]
    fn test_valiant_vc_bump_at_intermediate() {
        let mut topos = build_all(&config("3x3", None, "VALIANT"));
        for src in 0..18 {
            for dest in 0..18 {
                let hops = walk(&mut topos, src, dest, 5);
                let vcs: Vec<usize> = hops[..hops.len() - 1].iter().map(|h| h.1).collect();
                assert!(vcs.windows(2).all(|w| w[0] <= w[1]), "{:?}", hops);
            }
        }
    }

    #[test]
    fn test_unknown_algorithm() {
        let config = HyperXConfiguration {
            algorithm: "UGAL".to_string(),
            ..Default::default()
        };
        assert_eq!(
            HyperX::new(0, 8, &config, 0).err(),
            Some(Error::UnknownAlgorithm("UGAL".to_string()))
        );
    }

    #[test]
    fn test_insufficient_ports() {
        let config = HyperXConfiguration {
            shape: "4x4".to_string(),
            width: Some("2x1".to_string()),
            local_ports: 2,
            algorithm: "DOR".to_string(),
        };
        assert_eq!(
            HyperX::new(0, 10, &config, 0).err(),
            Some(Error::InsufficientPorts {
                needed: 11,
                available: 10
            })
        );
    }

    fn config(shape: &str, width: Option<&str>, algorithm: &str) -> RouterConfiguration {
        RouterConfiguration {
            num_ports: 16,
            topology: TopologyConfiguration::HyperX(HyperXConfiguration {
                shape: shape.to_string(),
                width: width.map(|w| w.to_string()),
                local_ports: 2,
                algorithm: algorithm.to_string(),
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_every_algorithm_delivers() {
        for algorithm in ["DOR", "DOR-ND", "MIN-A", "VALIANT", "DOAL", "VDAL"] {
            let mut topos = build_all(&config("3x2x2", Some("2x1x1"), algorithm));
            assert_symmetric_wiring(&topos, 16);
            let endpoints = topos[0].num_endpoints();
            for src in 0..endpoints {
                for dest in 0..endpoints {
                    let hops = walk(&mut topos, src, dest, 8);
                    if matches!(algorithm, "MIN-A" | "VDAL") {
                        let vcs: Vec<usize> = hops[..hops.len() - 1].iter().map(|h| h.1).collect();
                        assert!(vcs.windows(2).all(|w| w[0] < w[1]), "{:?}", hops);
                    }
                }
            }
        }
    }

    #[test]
    fn test_broadcast_once() {
        let mut topos = build_all(&config("3x2x2", Some("2x1x1"), "DOR"));
        assert_flood_once(&mut topos);
    }
}
