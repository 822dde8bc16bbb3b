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

use super::{check_ports, route_init_unicast, topology_rng, Congestion, PortState, Topology};
use crate::config::DragonflyConfiguration;
use crate::event::{DragonflyAddress, DragonflyRoute, Packet, RouteInfo, RouterEvent};
use crate::Error;
use rand::Rng;
use rand_xoshiro::Xoshiro256StarStar;
use std::str::FromStr;

/// VCs per VN: one per global hop a valiant route may take, plus one.
const VCS_PER_VN: usize = 3;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DragonflyAlgorithm {
    Minimal,
    Valiant,
    Ugal,
}

impl FromStr for DragonflyAlgorithm {
    type Err = Error;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.to_ascii_lowercase().as_str() {
            "minimal" => Ok(Self::Minimal),
            "valiant" => Ok(Self::Valiant),
            "ugal" => Ok(Self::Ugal),
            _ => Err(Error::UnknownAlgorithm(input.to_string())),
        }
    }
}

/// Groups of fully connected routers, one global link between any two
/// groups.
///
/// Ports are laid out as `p` hosts, `a - 1` intra-group links, then `h`
/// global links. Global slot `s = router * h + i` of a group leads to group
/// `s`, skipping the group itself; slots past `g - 1` are unconnected.
#[derive(Debug)]
pub struct Dragonfly {
    id: usize,
    group: usize,
    router: usize,
    hosts_per_router: usize,
    routers_per_group: usize,
    intergroup_per_router: usize,
    num_groups: usize,
    algorithm: DragonflyAlgorithm,
    adaptive_bias: usize,
    rng: Xoshiro256StarStar,
}

impl Dragonfly {
    pub fn new(
        id: usize,
        num_ports: usize,
        config: &DragonflyConfiguration,
        seed: u64,
    ) -> Result<Self, Error> {
        let algorithm = config.algorithm.parse::<DragonflyAlgorithm>()?;
        let p = config.hosts_per_router;
        let a = config.routers_per_group;
        let h = config.intergroup_per_router;
        let g = config.num_groups;
        if p == 0 || a == 0 || g == 0 {
            return Err(Error::InvalidParameter(format!(
                "dragonfly needs hosts, routers and groups, got p={} a={} g={}",
                p, a, g
            )));
        }
        if g - 1 > a * h {
            return Err(Error::InvalidParameter(format!(
                "{} groups need {} global links per group, only {} available",
                g,
                g - 1,
                a * h
            )));
        }
        check_ports(p + a - 1 + h, num_ports)?;
        if id >= a * g {
            return Err(Error::InvalidRouterId(id));
        }
        Ok(Self {
            id,
            group: id / a,
            router: id % a,
            hosts_per_router: p,
            routers_per_group: a,
            intergroup_per_router: h,
            num_groups: g,
            algorithm,
            adaptive_bias: config.adaptive_bias,
            rng: topology_rng(seed, id),
        })
    }

    fn address(&self, endpoint: usize) -> DragonflyAddress {
        let per_group = self.hosts_per_router * self.routers_per_group;
        let group = endpoint / per_group;
        DragonflyAddress {
            group,
            mid_group: group,
            router: (endpoint % per_group) / self.hosts_per_router,
            host: endpoint % self.hosts_per_router,
        }
    }

    fn intra_start(&self) -> usize {
        self.hosts_per_router
    }

    fn global_start(&self) -> usize {
        self.hosts_per_router + self.routers_per_group - 1
    }

    fn is_global_port(&self, port: usize) -> bool {
        port >= self.global_start() && port < self.global_start() + self.intergroup_per_router
    }

    fn is_intra_port(&self, port: usize) -> bool {
        port >= self.intra_start() && port < self.global_start()
    }

    /// intra-group port toward router `router` of this group.
    pub fn port_for_router(&self, router: usize) -> usize {
        debug_assert_ne!(router, self.router);
        self.intra_start() + router - (router > self.router) as usize
    }

    /// (router of this group, global port on it) linked to `group`.
    pub fn router_to_group(&self, group: usize) -> (usize, usize) {
        debug_assert_ne!(group, self.group);
        let slot = group - (group > self.group) as usize;
        let h = self.intergroup_per_router;
        (slot / h, self.global_start() + slot % h)
    }

    /// port of this router leading toward `group`.
    pub fn port_for_group(&self, group: usize) -> usize {
        let (router, port) = self.router_to_group(group);
        if router == self.router {
            port
        } else {
            self.port_for_router(router)
        }
    }

    fn global_connected(&self, index: usize) -> bool {
        self.router * self.intergroup_per_router + index < self.num_groups - 1
    }

    fn connected_globals(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.intergroup_per_router)
            .filter(move |&i| self.global_connected(i))
            .map(move |i| self.global_start() + i)
    }

    fn next_hop(&self, dest: &DragonflyAddress) -> usize {
        if dest.mid_group != self.group {
            self.port_for_group(dest.mid_group)
        } else if dest.router != self.router {
            self.port_for_router(dest.router)
        } else {
            dest.host
        }
    }

    /// UGAL at the source router: go through the sampled group when its
    /// queue is clearly shorter than the minimal one.
    fn choose_path(&self, vc: usize, info: &mut DragonflyRoute, congestion: &Congestion) {
        let candidate = match info.mid_candidate {
            Some(candidate) if info.dest.group != self.group => candidate,
            _ => return,
        };
        let q_min = congestion.queue_length(self.port_for_group(info.dest.group), vc);
        let q_val = congestion.queue_length(self.port_for_group(candidate), vc);
        info.dest.mid_group = if 2 * q_val + self.adaptive_bias < q_min {
            candidate
        } else {
            info.dest.group
        };
    }

    fn random_mid_group(&mut self, dest_group: usize) -> Option<usize> {
        if self.num_groups <= 2 || dest_group == self.group {
            return None;
        }
        let mut mid = self.group;
        while mid == self.group || mid == dest_group {
            mid = self.rng.gen_range(0..self.num_groups);
        }
        Some(mid)
    }

    fn route_info<'a>(&self, ev: &'a mut RouterEvent) -> &'a mut DragonflyRoute {
        match ev.route_info_mut() {
            RouteInfo::Dragonfly(info) => info,
            other => panic!("router {}: dragonfly got {:?}", self.id, other),
        }
    }
}

impl Topology for Dragonfly {
    fn name(&self) -> &'static str {
        "dragonfly"
    }

    fn route(&mut self, port: usize, vc: usize, ev: &mut RouterEvent, congestion: &Congestion) {
        let base = vc - vc % VCS_PER_VN;
        let next_vc = if self.is_global_port(port) { vc + 1 } else { vc };
        assert!(
            next_vc < base + VCS_PER_VN,
            "router {}: packet {} took too many global hops",
            self.id,
            ev.packet().id
        );
        let from_host = port < self.hosts_per_router;
        let ugal = self.algorithm == DragonflyAlgorithm::Ugal;
        let info = self.route_info(ev);
        if ugal && from_host {
            self.choose_path(vc, info, congestion);
        }
        if info.dest.mid_group == self.group {
            info.dest.mid_group = info.dest.group;
        }
        let next_port = self.next_hop(&info.dest);
        ev.set_next_port(next_port);
        ev.set_vc(next_vc);
    }

    fn reroute(&mut self, port: usize, vc: usize, ev: &mut RouterEvent, congestion: &Congestion) {
        if self.algorithm != DragonflyAlgorithm::Ugal || port >= self.hosts_per_router {
            return;
        }
        let info = self.route_info(ev);
        self.choose_path(vc, info, congestion);
        let next_port = self.next_hop(&info.dest);
        ev.set_next_port(next_port);
    }

    fn process_input(&mut self, packet: Packet) -> RouterEvent {
        let mut dest = self.address(packet.dest);
        let mut mid_candidate = None;
        match self.algorithm {
            DragonflyAlgorithm::Minimal => {}
            DragonflyAlgorithm::Valiant => {
                if let Some(mid) = self.random_mid_group(dest.group) {
                    dest.mid_group = mid;
                }
            }
            DragonflyAlgorithm::Ugal => mid_candidate = self.random_mid_group(dest.group),
        }
        let vc = packet.vn * VCS_PER_VN;
        RouterEvent::new(
            packet,
            vc,
            RouteInfo::Dragonfly(DragonflyRoute {
                dest,
                src_group: self.group,
                mid_candidate,
            }),
        )
    }

    fn process_init_data_input(&mut self, packet: Packet) -> RouterEvent {
        if !packet.is_broadcast() {
            return self.process_input(packet);
        }
        let dest = self.address(packet.src);
        RouterEvent::new(
            packet,
            0,
            RouteInfo::Dragonfly(DragonflyRoute {
                dest,
                src_group: self.group,
                mid_candidate: None,
            }),
        )
    }

    fn route_init_data(&mut self, port: usize, ev: &mut RouterEvent) -> Vec<usize> {
        if !ev.is_broadcast() {
            return route_init_unicast(self, port, ev);
        }
        let src_group = self.route_info(ev).src_group;
        let mut ports: Vec<usize> = (0..self.hosts_per_router).filter(|&p| p != port).collect();
        let intra = self.intra_start()..self.global_start();
        if port < self.hosts_per_router {
            ports.extend(intra);
            ports.extend(self.connected_globals());
        } else if self.is_intra_port(port) {
            if src_group == self.group {
                ports.extend(self.connected_globals());
            }
        } else {
            ports.extend(intra);
        }
        ports
    }

    fn port_state(&self, port: usize) -> PortState {
        if port < self.hosts_per_router {
            PortState::RouterToNode
        } else if self.is_intra_port(port) {
            PortState::RouterToRouter
        } else if self.is_global_port(port) && self.global_connected(port - self.global_start()) {
            PortState::RouterToRouter
        } else {
            PortState::Unconnected
        }
    }

    fn endpoint_id(&self, port: usize) -> Option<usize> {
        (port < self.hosts_per_router).then(|| self.id * self.hosts_per_router + port)
    }

    fn compute_num_vcs(&self, num_vns: usize) -> usize {
        num_vns * VCS_PER_VN
    }

    fn num_routers(&self) -> usize {
        self.routers_per_group * self.num_groups
    }

    fn num_endpoints(&self) -> usize {
        self.num_routers() * self.hosts_per_router
    }

    fn neighbor(&self, port: usize) -> Option<(usize, usize)> {
        let a = self.routers_per_group;
        if self.is_intra_port(port) {
            let index = port - self.intra_start();
            let router = if index < self.router { index } else { index + 1 };
            let far_port = self.intra_start() + self.router - (self.router > router) as usize;
            return Some((self.group * a + router, far_port));
        }
        if self.port_state(port) != PortState::RouterToRouter {
            return None;
        }
        let h = self.intergroup_per_router;
        let slot = self.router * h + port - self.global_start();
        let target = slot + (slot >= self.group) as usize;
        let far_slot = self.group - (self.group > target) as usize;
        Some((target * a + far_slot / h, self.global_start() + far_slot % h))
    }
}

#[cfg(test)]
mod dragonfly_tests {
    use super::super::topology_tests::*;
    use super::*;
    use crate::config::{RouterConfiguration, TopologyConfiguration};

    fn df_config(algorithm: &str) -> DragonflyConfiguration {
        DragonflyConfiguration {
            hosts_per_router: 4,
            routers_per_group: 4,
            intergroup_per_router: 1,
            num_groups: 4,
            algorithm: algorithm.to_string(),
            adaptive_bias: 0,
        }
    }

    fn route(topo: &mut Dragonfly, port: usize, vc: usize, dest: usize, congestion: &Congestion) -> (usize, usize) {
        let mut ev = topo.process_input(Packet::new(0, 0, dest, 0, 1));
        topo.route(port, vc, &mut ev, congestion);
        topo.reroute(port, vc, &mut ev, congestion);
        (ev.next_port(), ev.vc())
    }

    #[test]
    fn test_intra_group_minimal() {
        // router 1 of group 0, destination host 2 of router 3 in group 0
        let mut topo = Dragonfly::new(1, 8, &df_config("minimal"), 0).unwrap();
        assert_eq!(topo.port_for_router(3), 6);
        assert_eq!(route(&mut topo, 0, 0, 14, &Congestion::idle()), (6, 0));
        assert_eq!(route(&mut topo, 0, 0, 6, &Congestion::idle()), (2, 0));
    }

    #[test]
    fn test_inter_group_minimal() {
        // group 0 reaches group 2 through router 1's global port
        let mut topo = Dragonfly::new(0, 8, &df_config("minimal"), 0).unwrap();
        assert_eq!(topo.router_to_group(2), (1, 7));
        assert_eq!(route(&mut topo, 0, 0, 32, &Congestion::idle()), (4, 0));
        let mut topo = Dragonfly::new(1, 8, &df_config("minimal"), 0).unwrap();
        assert_eq!(route(&mut topo, 4, 0, 32, &Congestion::idle()), (7, 0));
        // first router of group 2 receives on its global port, VC goes up
        let mut topo = Dragonfly::new(8, 8, &df_config("minimal"), 0).unwrap();
        assert_eq!(topo.neighbor(7), Some((1, 7)));
        assert_eq!(route(&mut topo, 7, 0, 32, &Congestion::idle()), (0, 1));
    }

    #[test]
    fn test_port_states() {
        let topo = Dragonfly::new(3, 8, &df_config("minimal"), 0).unwrap();
        assert_eq!(topo.port_state(0), PortState::RouterToNode);
        assert_eq!(topo.port_state(4), PortState::RouterToRouter);
        // slot 3 would be a fourth global link of a four group network
        assert_eq!(topo.port_state(7), PortState::Unconnected);
        assert_eq!(topo.neighbor(7), None);
        assert_eq!(topo.endpoint_id(1), Some(13));
        assert_eq!(topo.endpoint_id(4), None);
        assert_eq!(topo.compute_num_vcs(2), 6);
    }

    #[test]
    fn test_ugal_takes_valiant_when_minimal_is_loaded() {
        // router 0 owns the global link to group 1
        let credits = vec![0; 8 * 3];
        let mut queues = vec![0; 8 * 3];
        queues[7 * 3] = 10;
        let congestion = Congestion::new(3, &credits, &queues);
        let mut topo = Dragonfly::new(0, 8, &df_config("ugal"), 5).unwrap();
        let (port, vc) = route(&mut topo, 0, 0, 16, &congestion);
        // groups 2 and 3 hang off routers 1 and 2
        assert!(port == 4 || port == 5, "port {}", port);
        assert_eq!(vc, 0);
        assert_eq!(route(&mut topo, 0, 0, 16, &Congestion::idle()), (7, 0));
        let mut biased = df_config("ugal");
        biased.adaptive_bias = 20;
        let mut topo = Dragonfly::new(0, 8, &biased, 5).unwrap();
        assert_eq!(route(&mut topo, 0, 0, 16, &congestion), (7, 0));
    }

    #[test]
    fn test_invalid_configs() {
        let mut config = df_config("minimal");
        config.num_groups = 6;
        assert!(matches!(
            Dragonfly::new(0, 8, &config, 0),
            Err(Error::InvalidParameter(_))
        ));
        assert_eq!(
            Dragonfly::new(0, 7, &df_config("minimal"), 0).err(),
            Some(Error::InsufficientPorts {
                needed: 8,
                available: 7
            })
        );
        assert_eq!(
            Dragonfly::new(0, 8, &df_config("par"), 0).err(),
            Some(Error::UnknownAlgorithm("par".to_string()))
        );
    }

    fn config(algorithm: &str) -> RouterConfiguration {
        RouterConfiguration {
            num_ports: 8,
            topology: TopologyConfiguration::Dragonfly(DragonflyConfiguration {
                hosts_per_router: 2,
                routers_per_group: 3,
                intergroup_per_router: 2,
                num_groups: 5,
                algorithm: algorithm.to_string(),
                adaptive_bias: 0,
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_every_algorithm_delivers() {
        for algorithm in ["minimal", "valiant", "ugal"] {
            let mut topos = build_all(&config(algorithm));
            assert_symmetric_wiring(&topos, 8);
            for src in 0..30 {
                for dest in 0..30 {
                    let hops = walk(&mut topos, src, dest, 6);
                    let vcs: Vec<usize> = hops.iter().map(|h| h.1).collect();
                    assert!(vcs.windows(2).all(|w| w[0] <= w[1]), "{:?}", hops);
                }
            }
        }
    }

    #[test]
    fn test_broadcast_once() {
        let mut topos = build_all(&config("minimal"));
        assert_flood_once(&mut topos);
    }
}
