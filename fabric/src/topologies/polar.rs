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

//! Diameter-bounded direct networks (polarfly, polarstar) routed from a
//! per-router shortest path table.

use super::{check_ports, route_init_unicast, topology_rng, Congestion, PortState, Topology};
use crate::config::PolarConfiguration;
use crate::event::{Packet, PolarInit, PolarRoute, RouteInfo, RouterEvent};
use crate::Error;
use petgraph::algo::dijkstra;
use petgraph::graph::{node_index, UnGraph};
use rand::Rng;
use rand_xoshiro::Xoshiro256StarStar;
use std::collections::VecDeque;
use std::fmt;
use std::marker::PhantomData;
use std::path::Path;
use std::str::FromStr;

/// intermediate routers sampled per packet by UGAL.
const UGAL_SAMPLES: usize = 4;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PolarAlgorithm {
    Minimal,
    Valiant,
    Ugal,
    /// UGAL with candidates taken among the direct neighbors.
    UgalPf,
}

impl FromStr for PolarAlgorithm {
    type Err = Error;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.to_ascii_uppercase().as_str() {
            "MINIMAL" => Ok(Self::Minimal),
            "VALIANT" => Ok(Self::Valiant),
            "UGAL" => Ok(Self::Ugal),
            "UGAL_PF" => Ok(Self::UgalPf),
            _ => Err(Error::UnknownAlgorithm(input.to_string())),
        }
    }
}

/// Constants telling the polar topologies apart.
pub trait PolarVariant: fmt::Debug {
    const NAME: &'static str;
    /// longest shortest path the graph may have.
    const DIAMETER: usize;
    const DEFAULT_BIAS: usize;
    /// graph may be generated from a prime `q`.
    const FROM_Q: bool;
    /// UGAL candidates must leave through another port than the minimal
    /// route.
    const DISTINCT_CANDIDATE_PORT: bool;

    /// VCs per VN, None when the algorithm is not supported.
    fn vcs_per_vn(algorithm: PolarAlgorithm) -> Option<usize>;
}

fn invalid_graph(msg: String) -> Error {
    Error::InvalidGraph(msg)
}

/// Check an undirected adjacency list: indices in range, no self loops,
/// no duplicates, every edge listed from both ends.
pub fn validate_adjacency(adjacency: &[Vec<usize>]) -> Result<(), Error> {
    let n = adjacency.len();
    if n == 0 {
        return Err(invalid_graph("empty graph".to_string()));
    }
    for (u, neighbors) in adjacency.iter().enumerate() {
        for (i, &v) in neighbors.iter().enumerate() {
            if v >= n {
                return Err(invalid_graph(format!("router {} lists {} of {}", u, v, n)));
            }
            if v == u {
                return Err(invalid_graph(format!("router {} links to itself", u)));
            }
            if neighbors[..i].contains(&v) {
                return Err(invalid_graph(format!("router {} lists {} twice", u, v)));
            }
            if !adjacency[v].contains(&u) {
                return Err(invalid_graph(format!("link {} -> {} has no way back", u, v)));
            }
        }
    }
    Ok(())
}

/// Parse an adjacency list: a `"V E"` header, then one line per router
/// with the ids of its neighbors.
pub fn parse_adjacency(text: &str) -> Result<Vec<Vec<usize>>, Error> {
    let mut lines = text.lines().map(str::trim).filter(|l| !l.is_empty());
    let header = lines
        .next()
        .ok_or_else(|| invalid_graph("missing header".to_string()))?;
    let counts = header
        .split_whitespace()
        .map(str::parse::<usize>)
        .collect::<Result<Vec<usize>, _>>()
        .map_err(|e| invalid_graph(format!("header {:?}: {}", header, e)))?;
    let (num_vertices, num_edges) = match counts.as_slice() {
        [v, e] => (*v, *e),
        _ => return Err(invalid_graph(format!("header {:?} is not \"V E\"", header))),
    };
    let adjacency = lines
        .map(|line| {
            line.split_whitespace()
                .map(str::parse::<usize>)
                .collect::<Result<Vec<usize>, _>>()
                .map_err(|e| invalid_graph(format!("line {:?}: {}", line, e)))
        })
        .collect::<Result<Vec<Vec<usize>>, Error>>()?;
    if adjacency.len() != num_vertices {
        return Err(invalid_graph(format!(
            "{} neighbor lines for {} routers",
            adjacency.len(),
            num_vertices
        )));
    }
    validate_adjacency(&adjacency)?;
    let edges = adjacency.iter().map(Vec::len).sum::<usize>() / 2;
    if edges != num_edges {
        return Err(invalid_graph(format!("{} links, header says {}", edges, num_edges)));
    }
    Ok(adjacency)
}

pub fn load_adjacency(path: &Path) -> Result<Vec<Vec<usize>>, Error> {
    parse_adjacency(&std::fs::read_to_string(path)?)
}

fn is_prime(q: usize) -> bool {
    q >= 2 && (2..).take_while(|d| d * d <= q).all(|d| q % d != 0)
}

/// The Erdős–Rényi polarity graph ER_q of a prime `q`.
///
/// Routers are the points of the projective plane over GF(q), normalized
/// so that the first non-zero coordinate is one; two points are linked when
/// they are orthogonal. The graph has `q^2 + q + 1` routers of degree `q`
/// or `q + 1` and diameter 2.
pub fn polarity_graph(q: usize) -> Result<Vec<Vec<usize>>, Error> {
    if !is_prime(q) {
        return Err(Error::InvalidParameter(format!("q = {} is not prime", q)));
    }
    let mut points = Vec::with_capacity(q * q + q + 1);
    for a in 0..q {
        for b in 0..q {
            points.push([1, a, b]);
        }
    }
    for a in 0..q {
        points.push([0, 1, a]);
    }
    points.push([0, 0, 1]);
    let orthogonal = |u: &[usize; 3], v: &[usize; 3]| {
        (u[0] * v[0] + u[1] * v[1] + u[2] * v[2]) % q == 0
    };
    Ok(points
        .iter()
        .enumerate()
        .map(|(i, u)| {
            points
                .iter()
                .enumerate()
                .filter(|&(j, v)| j != i && orthogonal(u, v))
                .map(|(j, _)| j)
                .collect()
        })
        .collect())
}

fn graph_from_config(config: &PolarConfiguration, from_q: bool) -> Result<Vec<Vec<usize>>, Error> {
    match (config.q, &config.graph_file, &config.adjacency) {
        (Some(q), None, None) if from_q => polarity_graph(q),
        (None, Some(file), None) => load_adjacency(Path::new(file)),
        (None, None, Some(adjacency)) => {
            validate_adjacency(adjacency)?;
            Ok(adjacency.clone())
        }
        _ if from_q => Err(Error::InvalidParameter(
            "give exactly one of q, graph_file or adjacency".to_string(),
        )),
        _ => Err(Error::InvalidParameter(
            "give exactly one of graph_file or adjacency".to_string(),
        )),
    }
}

/// Every router reachable from `root` within `diameter` hops.
fn check_reach(adjacency: &[Vec<usize>], root: usize, diameter: usize) -> Result<(), Error> {
    let mut graph = UnGraph::<(), ()>::with_capacity(adjacency.len(), 0);
    for _ in adjacency {
        graph.add_node(());
    }
    for (u, neighbors) in adjacency.iter().enumerate() {
        for &v in neighbors.iter().filter(|&&v| v > u) {
            graph.add_edge(node_index(u), node_index(v), ());
        }
    }
    let distances = dijkstra(&graph, node_index(root), None, |_| 1usize);
    if distances.len() != adjacency.len() {
        return Err(invalid_graph(format!(
            "router {} reaches {} of {} routers",
            root,
            distances.len(),
            adjacency.len()
        )));
    }
    match distances.values().max() {
        Some(&far) if far > diameter => Err(invalid_graph(format!(
            "router {} is {} hops from its farthest peer, more than {}",
            root, far, diameter
        ))),
        _ => Ok(()),
    }
}

/// Neighbor index leading to every router on a shortest path.
///
/// Direct neighbors get their own index; farther routers inherit the index
/// of the router that first reached them, breadth first.
pub fn build_route_table(adjacency: &[Vec<usize>], me: usize) -> Vec<Option<usize>> {
    let mut table = vec![None; adjacency.len()];
    let mut frontier = VecDeque::new();
    for (i, &n) in adjacency[me].iter().enumerate() {
        table[n] = Some(i);
        frontier.push_back(n);
    }
    while let Some(u) = frontier.pop_front() {
        for &v in &adjacency[u] {
            if v != me && table[v].is_none() {
                table[v] = table[u];
                frontier.push_back(v);
            }
        }
    }
    table
}

/// Every other router has a neighbor index in `[0, links)`, `me` has none.
pub fn verify_route_table(me: usize, table: &[Option<usize>], links: usize) -> Result<(), Error> {
    for (dest, entry) in table.iter().enumerate() {
        let ok = match entry {
            None => dest == me,
            Some(index) => dest != me && *index < links,
        };
        if !ok {
            return Err(Error::InvalidRouteTable { router: me, dest });
        }
    }
    Ok(())
}

/// BFS parents from `root`, neighbors visited in list order.
fn broadcast_tree(adjacency: &[Vec<usize>], root: usize) -> Vec<Option<usize>> {
    let mut parent = vec![None; adjacency.len()];
    let mut seen = vec![false; adjacency.len()];
    seen[root] = true;
    let mut frontier = VecDeque::from(vec![root]);
    while let Some(u) = frontier.pop_front() {
        for &v in &adjacency[u] {
            if !seen[v] {
                seen[v] = true;
                parent[v] = Some(u);
                frontier.push_back(v);
            }
        }
    }
    parent
}

/// Router of a polarfly or polarstar network.
///
/// Ports are the hosts first, then one port per neighbor in adjacency list
/// order; spare ports stay unconnected.
#[derive(Debug)]
pub struct PolarTopology<V: PolarVariant> {
    id: usize,
    hosts_per_router: usize,
    adjacency: Vec<Vec<usize>>,
    route_table: Vec<Option<usize>>,
    /// port on the neighbor's side of each of our links.
    far_ports: Vec<usize>,
    /// per broadcast root, the links leading to our children in its BFS
    /// tree.
    broadcast_links: Vec<Vec<usize>>,
    algorithm: PolarAlgorithm,
    vcs_per_vn: usize,
    adaptive_bias: usize,
    rng: Xoshiro256StarStar,
    hop_counts: Vec<u64>,
    variant: PhantomData<V>,
}

impl<V: PolarVariant> PolarTopology<V> {
    pub fn new(
        id: usize,
        num_ports: usize,
        config: &PolarConfiguration,
        seed: u64,
    ) -> Result<Self, Error> {
        let algorithm = config.algorithm.parse::<PolarAlgorithm>()?;
        let vcs_per_vn = V::vcs_per_vn(algorithm)
            .ok_or_else(|| Error::UnknownAlgorithm(config.algorithm.clone()))?;
        if config.hosts_per_router == 0 {
            return Err(Error::InvalidParameter(
                "hosts_per_router must be positive".to_string(),
            ));
        }
        let adjacency = graph_from_config(config, V::FROM_Q)?;
        if id >= adjacency.len() {
            return Err(Error::InvalidRouterId(id));
        }
        let radix = adjacency.iter().map(Vec::len).max().unwrap_or(0);
        check_ports(config.hosts_per_router + radix, num_ports)?;
        check_reach(&adjacency, id, V::DIAMETER)?;
        let route_table = build_route_table(&adjacency, id);
        verify_route_table(id, &route_table, adjacency[id].len())?;
        let far_ports = adjacency[id]
            .iter()
            .map(|&n| {
                let back = adjacency[n].iter().position(|&m| m == id).unwrap_or(0);
                config.hosts_per_router + back
            })
            .collect();
        let broadcast_links = (0..adjacency.len())
            .map(|root| {
                let parent = broadcast_tree(&adjacency, root);
                (0..adjacency[id].len())
                    .filter(|&i| parent[adjacency[id][i]] == Some(id))
                    .collect()
            })
            .collect();
        log::trace!("{} router {}: route table {:?}", V::NAME, id, route_table);
        Ok(Self {
            id,
            hosts_per_router: config.hosts_per_router,
            adjacency,
            route_table,
            far_ports,
            broadcast_links,
            algorithm,
            vcs_per_vn,
            adaptive_bias: config.adaptive_bias.unwrap_or(V::DEFAULT_BIAS),
            rng: topology_rng(seed, id),
            hop_counts: Vec::new(),
            variant: PhantomData,
        })
    }

    /// output port on the shortest path to router `dest`.
    pub fn port_to(&self, dest: usize) -> Option<usize> {
        self.route_table[dest].map(|i| self.hosts_per_router + i)
    }

    /// link index toward router `router` when directly connected.
    pub fn link_to(&self, router: usize) -> Option<usize> {
        self.links().iter().position(|&n| n == router)
    }

    fn links(&self) -> &[usize] {
        &self.adjacency[self.id]
    }

    fn is_adaptive(&self) -> bool {
        matches!(self.algorithm, PolarAlgorithm::Ugal | PolarAlgorithm::UgalPf)
    }

    fn random_router_except(&mut self, dest: usize) -> Option<usize> {
        let n = self.adjacency.len();
        if dest == self.id || n <= 2 {
            return None;
        }
        let mut pick = self.id;
        while pick == self.id || pick == dest {
            pick = self.rng.gen_range(0..n);
        }
        Some(pick)
    }

    fn sample_candidates(&mut self, dest: usize) -> Vec<usize> {
        if dest == self.id {
            return Vec::new();
        }
        let mut candidates = Vec::with_capacity(UGAL_SAMPLES);
        if self.algorithm == PolarAlgorithm::UgalPf {
            // next to the destination any other router will do, otherwise
            // stay within one hop
            let adjacent = self.link_to(dest).is_some();
            let n = self.adjacency.len();
            let degree = self.links().len();
            for _ in 0..UGAL_SAMPLES {
                let mut pick = self.id;
                while pick == self.id {
                    pick = if adjacent {
                        self.rng.gen_range(0..n)
                    } else {
                        let i = self.rng.gen_range(0..degree);
                        self.links()[i]
                    };
                }
                candidates.push(pick);
            }
        } else {
            for _ in 0..UGAL_SAMPLES {
                if let Some(c) = self.random_router_except(dest) {
                    candidates.push(c);
                }
            }
        }
        if V::DISTINCT_CANDIDATE_PORT {
            let minimal = self.route_table[dest];
            candidates.retain(|&c| self.route_table[c] != minimal);
        }
        candidates
    }

    /// UGAL at the source: pick the least loaded candidate and leave the
    /// minimal path when it is loaded enough to pay for the detour.
    fn choose_path(&self, vc: usize, info: &mut PolarRoute, congestion: &Congestion) {
        let q_min = self
            .port_to(info.dest_router)
            .map_or(0, |p| congestion.queue_length(p, vc));
        let best = info
            .candidates
            .iter()
            .filter_map(|&c| self.port_to(c).map(|p| (c, congestion.queue_length(p, vc))))
            .min_by_key(|&(_, q)| q);
        let detour = match best {
            Some((c, q_val)) => {
                let cost = if self.algorithm == PolarAlgorithm::UgalPf {
                    (3 * q_val) / 2
                } else {
                    2 * q_val
                };
                (q_min >= cost + self.adaptive_bias).then(|| c)
            }
            None => None,
        };
        info.non_minimal = detour.is_some();
        info.valiant = detour;
    }

    fn polar_route<'a>(&self, ev: &'a mut RouterEvent) -> &'a mut PolarRoute {
        match ev.route_info_mut() {
            RouteInfo::Polar(info) => info,
            other => panic!("{} router {}: got {:?}", V::NAME, self.id, other),
        }
    }

    fn record_hops(&mut self, hops: usize) {
        if self.hop_counts.len() <= hops {
            self.hop_counts.resize(hops + 1, 0);
        }
        self.hop_counts[hops] += 1;
    }
}

impl<V: PolarVariant> Topology for PolarTopology<V> {
    fn name(&self) -> &'static str {
        V::NAME
    }

    fn route(&mut self, port: usize, vc: usize, ev: &mut RouterEvent, congestion: &Congestion) {
        let base = vc - vc % self.vcs_per_vn;
        let from_host = port < self.hosts_per_router;
        let packet_id = ev.packet().id;
        let dest_host = ev.dest() % self.hosts_per_router;
        let info = self.polar_route(ev);
        if info.dest_router == self.id {
            let hops = if from_host { 0 } else { vc - base + 1 };
            ev.set_next_port(dest_host);
            ev.set_vc(base);
            self.record_hops(hops);
            return;
        }
        if from_host && self.is_adaptive() {
            self.choose_path(base, info, congestion);
        }
        if info.valiant == Some(self.id) {
            info.valiant = None;
        }
        let target = info.valiant.unwrap_or(info.dest_router);
        let next_vc = if from_host { base } else { vc + 1 };
        assert!(
            next_vc < base + self.vcs_per_vn,
            "{} router {}: packet {} out of VCs",
            V::NAME,
            self.id,
            packet_id
        );
        let next_port = match self.port_to(target) {
            Some(p) => p,
            None => panic!("{} router {}: no route to {}", V::NAME, self.id, target),
        };
        ev.set_next_port(next_port);
        ev.set_vc(next_vc);
    }

    fn reroute(&mut self, port: usize, vc: usize, ev: &mut RouterEvent, congestion: &Congestion) {
        if !self.is_adaptive() || port >= self.hosts_per_router {
            return;
        }
        let info = self.polar_route(ev);
        if info.dest_router == self.id {
            return;
        }
        self.choose_path(vc, info, congestion);
        let target = info.valiant.unwrap_or(info.dest_router);
        if let Some(p) = self.port_to(target) {
            ev.set_next_port(p);
        }
    }

    fn process_input(&mut self, packet: Packet) -> RouterEvent {
        let dest_router = packet.dest / self.hosts_per_router;
        let valiant = match self.algorithm {
            PolarAlgorithm::Valiant => self.random_router_except(dest_router),
            _ => None,
        };
        let candidates = if self.is_adaptive() {
            self.sample_candidates(dest_router)
        } else {
            Vec::new()
        };
        let vc = packet.vn * self.vcs_per_vn;
        RouterEvent::new(
            packet,
            vc,
            RouteInfo::Polar(PolarRoute {
                dest_router,
                non_minimal: valiant.is_some(),
                valiant,
                candidates,
            }),
        )
    }

    fn process_init_data_input(&mut self, packet: Packet) -> RouterEvent {
        if !packet.is_broadcast() {
            return self.process_input(packet);
        }
        RouterEvent::new(
            packet,
            0,
            RouteInfo::PolarInit(PolarInit {
                root: self.id,
                phase: 0,
            }),
        )
    }

    /// Broadcasts follow the BFS tree of the router they started from.
    fn route_init_data(&mut self, port: usize, ev: &mut RouterEvent) -> Vec<usize> {
        if !ev.is_broadcast() {
            return route_init_unicast(self, port, ev);
        }
        let root = match ev.route_info_mut() {
            RouteInfo::PolarInit(init) => {
                assert!(
                    init.phase <= V::DIAMETER,
                    "{} broadcast went {} hops",
                    V::NAME,
                    init.phase
                );
                init.phase += 1;
                init.root
            }
            other => panic!("{} router {}: broadcast with {:?}", V::NAME, self.id, other),
        };
        let mut ports: Vec<usize> = (0..self.hosts_per_router).filter(|&p| p != port).collect();
        ports.extend(
            self.broadcast_links[root]
                .iter()
                .map(|&i| self.hosts_per_router + i),
        );
        ports
    }

    fn port_state(&self, port: usize) -> PortState {
        if port < self.hosts_per_router {
            PortState::RouterToNode
        } else if port < self.hosts_per_router + self.links().len() {
            PortState::RouterToRouter
        } else {
            PortState::Unconnected
        }
    }

    fn endpoint_id(&self, port: usize) -> Option<usize> {
        (port < self.hosts_per_router).then(|| self.id * self.hosts_per_router + port)
    }

    fn compute_num_vcs(&self, num_vns: usize) -> usize {
        num_vns * self.vcs_per_vn
    }

    fn num_routers(&self) -> usize {
        self.adjacency.len()
    }

    fn num_endpoints(&self) -> usize {
        self.adjacency.len() * self.hosts_per_router
    }

    fn neighbor(&self, port: usize) -> Option<(usize, usize)> {
        if self.port_state(port) != PortState::RouterToRouter {
            return None;
        }
        let i = port - self.hosts_per_router;
        Some((self.links()[i], self.far_ports[i]))
    }

    fn hop_counts(&self) -> &[u64] {
        &self.hop_counts
    }
}
