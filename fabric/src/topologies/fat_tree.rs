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

use super::{check_ports, route_init_unicast, Congestion, PortState, Topology};
use crate::config::FatTreeConfiguration;
use crate::event::{Packet, RouteInfo, RouterEvent};
use crate::Error;

/// A folded Clos built from a shape such as `"4,4:4,4:8"`: per level, from
/// the leaves, the number of down and up ports; the top level has no up
/// ports.
///
/// The network serves the product of the down counts as hosts. Routers are
/// numbered level by level. Within a level they form subtrees of
/// `prod(ups[..level])` routers that all reach the same contiguous range of
/// hosts.
#[derive(Debug)]
pub struct FatTree {
    id: usize,
    level: usize,
    downs: Vec<usize>,
    ups: Vec<usize>,
    routers_per_level: Vec<usize>,
    /// first host below this router.
    low: usize,
    /// hosts below this router.
    reach: usize,
    adaptive: bool,
    adaptive_threshold: f64,
    num_vcs: usize,
    initial_credits: Vec<usize>,
}

fn parse_shape(shape: &str) -> Result<(Vec<usize>, Vec<usize>), Error> {
    let invalid = || Error::InvalidShape(shape.to_string());
    let levels: Vec<&str> = shape.split(':').collect();
    let mut downs = Vec::with_capacity(levels.len());
    let mut ups = Vec::with_capacity(levels.len());
    for (i, level) in levels.iter().enumerate() {
        let counts = level
            .split(',')
            .map(|c| c.trim().parse::<usize>())
            .collect::<Result<Vec<usize>, _>>()
            .map_err(|_| invalid())?;
        let top = i + 1 == levels.len();
        match (counts.as_slice(), top) {
            ([down, up], false) if *down > 0 && *up > 0 => {
                downs.push(*down);
                ups.push(*up);
            }
            ([down], true) if *down > 0 => {
                downs.push(*down);
                ups.push(0);
            }
            _ => return Err(invalid()),
        }
    }
    Ok((downs, ups))
}

impl FatTree {
    pub fn new(id: usize, num_ports: usize, config: &FatTreeConfiguration) -> Result<Self, Error> {
        let adaptive = match config.routing_alg.as_str() {
            "deterministic" => false,
            "adaptive" => true,
            other => return Err(Error::UnknownAlgorithm(other.to_string())),
        };
        if !(0.0..=1.0).contains(&config.adaptive_threshold) {
            return Err(Error::InvalidParameter(format!(
                "adaptive_threshold {} not in [0, 1]",
                config.adaptive_threshold
            )));
        }
        let (downs, ups) = parse_shape(&config.shape)?;
        let num_hosts: usize = downs.iter().product();
        let routers_per_level: Vec<usize> = (0..downs.len())
            .map(|l| {
                let group: usize = ups[..l].iter().product();
                let reach: usize = downs[..=l].iter().product();
                group * num_hosts / reach
            })
            .collect();

        let mut level = 0;
        let mut level_id = id;
        while level < downs.len() && level_id >= routers_per_level[level] {
            level_id -= routers_per_level[level];
            level += 1;
        }
        if level == downs.len() {
            return Err(Error::InvalidRouterId(id));
        }
        check_ports(downs[level] + ups[level], num_ports)?;
        let group: usize = ups[..level].iter().product();
        let reach: usize = downs[..=level].iter().product();
        Ok(Self {
            id,
            level,
            low: (level_id / group) * reach,
            reach,
            downs,
            ups,
            routers_per_level,
            adaptive,
            adaptive_threshold: config.adaptive_threshold,
            num_vcs: 0,
            initial_credits: Vec::new(),
        })
    }

    fn down(&self) -> usize {
        self.downs[self.level]
    }

    fn up(&self) -> usize {
        self.ups[self.level]
    }

    fn level_offset(&self, level: usize) -> usize {
        self.routers_per_level[..level].iter().sum()
    }

    fn subtree_size(&self, level: usize) -> usize {
        self.ups[..level].iter().product()
    }

    fn is_below(&self, dest: usize) -> bool {
        dest >= self.low && dest < self.low + self.reach
    }

    fn deterministic_port(&self, dest: usize) -> usize {
        if self.is_below(dest) {
            (dest - self.low) / (self.reach / self.down())
        } else {
            self.down() + dest % self.up()
        }
    }

    /// Up port with the most credits when the chosen one runs low.
    fn adapt(&self, port: usize, vc: usize, congestion: &Congestion) -> usize {
        let initial = match self.initial_credits.get(port * self.num_vcs + vc) {
            Some(&initial) => initial,
            None => return port,
        };
        let credits = congestion.credits(port, vc);
        if (credits as f64) >= self.adaptive_threshold * initial as f64 {
            return port;
        }
        let mut best = (port, credits);
        for p in self.down()..self.down() + self.up() {
            let c = congestion.credits(p, vc);
            if c > best.1 {
                best = (p, c);
            }
        }
        best.0
    }
}

impl Topology for FatTree {
    fn name(&self) -> &'static str {
        "fat_tree"
    }

    fn route(&mut self, _port: usize, vc: usize, ev: &mut RouterEvent, congestion: &Congestion) {
        let mut next_port = self.deterministic_port(ev.dest());
        if self.adaptive && next_port >= self.down() {
            next_port = self.adapt(next_port, vc, congestion);
        }
        ev.set_next_port(next_port);
    }

    fn reroute(&mut self, port: usize, vc: usize, ev: &mut RouterEvent, congestion: &Congestion) {
        if self.adaptive {
            self.route(port, vc, ev, congestion);
        }
    }

    fn process_input(&mut self, packet: Packet) -> RouterEvent {
        let vn = packet.vn;
        RouterEvent::new(packet, vn, RouteInfo::Plain)
    }

    /// Down everywhere but back, and one step up while climbing.
    fn route_init_data(&mut self, port: usize, ev: &mut RouterEvent) -> Vec<usize> {
        if !ev.is_broadcast() {
            return route_init_unicast(self, port, ev);
        }
        let mut ports: Vec<usize> = (0..self.down()).filter(|&p| p != port).collect();
        if port < self.down() && self.up() > 0 {
            ports.push(self.down());
        }
        ports
    }

    fn port_state(&self, port: usize) -> PortState {
        if port < self.down() {
            if self.level == 0 {
                PortState::RouterToNode
            } else {
                PortState::RouterToRouter
            }
        } else if port < self.down() + self.up() {
            PortState::RouterToRouter
        } else {
            PortState::Unconnected
        }
    }

    fn endpoint_id(&self, port: usize) -> Option<usize> {
        (self.level == 0 && port < self.down()).then(|| self.low + port)
    }

    fn compute_num_vcs(&self, num_vns: usize) -> usize {
        num_vns
    }

    fn set_output_buffer_credit_array(&mut self, num_vcs: usize, initial_credits: &[usize]) {
        self.num_vcs = num_vcs;
        self.initial_credits = initial_credits.to_vec();
    }

    fn num_routers(&self) -> usize {
        self.routers_per_level.iter().sum()
    }

    fn num_endpoints(&self) -> usize {
        self.downs.iter().product()
    }

    fn neighbor(&self, port: usize) -> Option<(usize, usize)> {
        if self.port_state(port) != PortState::RouterToRouter {
            return None;
        }
        let level_id = self.id - self.level_offset(self.level);
        let group = self.subtree_size(self.level);
        let (subtree, local) = (level_id / group, level_id % group);
        if port >= self.down() {
            // up to the subtree one level higher
            let up = self.up();
            let parent_down = self.downs[self.level + 1];
            let parent_group = self.subtree_size(self.level + 1);
            let parent = (subtree / parent_down) * parent_group + local * up + (port - self.down());
            Some((
                self.level_offset(self.level + 1) + parent,
                subtree % parent_down,
            ))
        } else {
            let child_up = self.ups[self.level - 1];
            let child_group = self.subtree_size(self.level - 1);
            let child_subtree = subtree * self.down() + port;
            let child = child_subtree * child_group + local / child_up;
            Some((
                self.level_offset(self.level - 1) + child,
                self.downs[self.level - 1] + local % child_up,
            ))
        }
    }
}

#[cfg(test)]
mod fat_tree_tests {
    use super::super::topology_tests::*;
    use super::*;
    use crate::config::{RouterConfiguration, TopologyConfiguration};

    fn fat_tree(id: usize, shape: &str, routing_alg: &str) -> FatTree {
        let config = FatTreeConfiguration {
            shape: shape.to_string(),
            routing_alg: routing_alg.to_string(),
            adaptive_threshold: 0.5,
        };
        FatTree::new(id, 8, &config).unwrap()
    }

    fn route(topo: &mut FatTree, dest: usize, congestion: &Congestion) -> usize {
        let mut ev = topo.process_input(Packet::new(0, 0, dest, 0, 1));
        topo.route(0, 0, &mut ev, congestion);
        topo.reroute(0, 0, &mut ev, congestion);
        ev.next_port()
    }

    #[test]
    fn test_sizes() {
        let topo = fat_tree(0, "4,4:4,4:8", "deterministic");
        assert_eq!(topo.routers_per_level, vec![32, 32, 16]);
        assert_eq!(topo.num_routers(), 80);
        assert_eq!(topo.num_endpoints(), 128);
        let top = fat_tree(79, "4,4:4,4:8", "deterministic");
        assert_eq!((top.level, top.low, top.reach), (2, 0, 128));
        assert_eq!(top.port_state(7), PortState::RouterToRouter);
        assert_eq!(top.neighbor(7).map(|(r, _)| r >= 32 && r < 64), Some(true));
    }

    #[test]
    fn test_up_down() {
        let mut topo = fat_tree(1, "4,4:4,4:8", "deterministic");
        assert_eq!(topo.endpoint_id(3), Some(7));
        assert_eq!(route(&mut topo, 6, &Congestion::idle()), 2);
        assert_eq!(route(&mut topo, 21, &Congestion::idle()), 5);
        // level 1 router of the first pod, down toward leaf 1
        let mut topo = fat_tree(33, "4,4:4,4:8", "deterministic");
        assert_eq!(route(&mut topo, 6, &Congestion::idle()), 1);
        assert_eq!(route(&mut topo, 21, &Congestion::idle()), 4 + 1);
    }

    #[test]
    fn test_wiring() {
        let topo = fat_tree(1, "4,4:4,4:8", "deterministic");
        assert_eq!(topo.neighbor(5), Some((33, 1)));
        assert_eq!(topo.neighbor(0), None);
        let topo = fat_tree(33, "4,4:4,4:8", "deterministic");
        assert_eq!(topo.neighbor(1), Some((1, 5)));
    }

    #[test]
    fn test_adaptive_up_port() {
        let mut topo = fat_tree(0, "4,4:4,4:8", "adaptive");
        topo.set_output_buffer_credit_array(1, &[16; 8]);
        let credits = [16, 16, 16, 16, 2, 9, 12, 3];
        let congestion = Congestion::new(1, &credits, &[0; 8]);
        // deterministic choice is port 4, below half of its credits
        assert_eq!(route(&mut topo, 20, &congestion), 6);
        let credits = [16, 16, 16, 16, 8, 9, 12, 3];
        let congestion = Congestion::new(1, &credits, &[0; 8]);
        assert_eq!(route(&mut topo, 20, &congestion), 4);
        // down routes never move
        assert_eq!(route(&mut topo, 2, &congestion), 2);
    }

    #[test]
    fn test_invalid() {
        let bad = |shape: &str| FatTreeConfiguration {
            shape: shape.to_string(),
            ..Default::default()
        };
        for shape in ["4,4:x", "4:4", "4,4:4,4", "0,2:2"] {
            assert_eq!(
                FatTree::new(0, 8, &bad(shape)).err(),
                Some(Error::InvalidShape(shape.to_string()))
            );
        }
        assert_eq!(
            FatTree::new(0, 7, &bad("4,4:8")).err(),
            Some(Error::InsufficientPorts {
                needed: 8,
                available: 7
            })
        );
        assert_eq!(
            FatTree::new(100, 8, &bad("4,4:8")).err(),
            Some(Error::InvalidRouterId(100))
        );
    }

    fn config() -> RouterConfiguration {
        RouterConfiguration {
            num_ports: 4,
            topology: TopologyConfiguration::FatTree(FatTreeConfiguration {
                shape: "2,2:2,2:4".to_string(),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_every_pair_delivered() {
        let mut topos = build_all(&config());
        assert_eq!(topos.len(), 8 + 8 + 4);
        assert_symmetric_wiring(&topos, 4);
        for src in 0..16 {
            for dest in 0..16 {
                walk(&mut topos, src, dest, 5);
            }
        }
    }

    #[test]
    fn test_broadcast_once() {
        let mut topos = build_all(&config());
        assert_flood_once(&mut topos);
    }
}
