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

use crate::config::{RouterConfiguration, TopologyConfiguration};
use crate::event::{Packet, RouteInfo, RouterEvent};
use crate::Error;
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256StarStar;

mod dragonfly;
mod fat_tree;
mod hyperx;
mod mesh;
mod polar;
mod polarfly;
mod polarstar;
mod single;

pub use dragonfly::{Dragonfly, DragonflyAlgorithm};
pub use fat_tree::FatTree;
pub use hyperx::{HyperX, HyperXAlgorithm};
pub use mesh::Mesh;
pub use polar::{load_adjacency, parse_adjacency, polarity_graph, PolarAlgorithm};
pub use polarfly::PolarFly;
pub use polarstar::PolarStar;
pub use single::SingleRouter;

/// What sits at the other end of a router port.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PortState {
    RouterToNode,
    RouterToRouter,
    Unconnected,
}

/// Congestion seen by adaptive routing.
///
/// A read-only snapshot of the router's output buffers, indexed by
/// `port * num_vcs + vc`, lent for the duration of one call. Reads outside
/// the snapshot (for instance before the VCs are sized) return 0.
#[derive(Clone, Copy, Debug)]
pub struct Congestion<'a> {
    num_vcs: usize,
    credits: &'a [usize],
    queue_lengths: &'a [usize],
}

impl<'a> Congestion<'a> {
    pub fn new(num_vcs: usize, credits: &'a [usize], queue_lengths: &'a [usize]) -> Self {
        Self {
            num_vcs,
            credits,
            queue_lengths,
        }
    }

    /// No congestion information.
    pub fn idle() -> Congestion<'static> {
        Congestion {
            num_vcs: 0,
            credits: &[],
            queue_lengths: &[],
        }
    }

    /// free flits in the output buffer of (`port`, `vc`).
    pub fn credits(&self, port: usize, vc: usize) -> usize {
        self.credits
            .get(port * self.num_vcs + vc)
            .copied()
            .unwrap_or(0)
    }

    /// occupied flits in the output buffer of (`port`, `vc`).
    pub fn queue_length(&self, port: usize, vc: usize) -> usize {
        self.queue_lengths
            .get(port * self.num_vcs + vc)
            .copied()
            .unwrap_or(0)
    }
}

/// Routing and port classification for one router.
///
/// Every router owns its own instance. Routing calls get the congestion
/// snapshot as an argument and never keep it.
pub trait Topology {
    fn name(&self) -> &'static str;

    /// Set next port and VC of an event that just landed on `port`, `vc`.
    ///
    /// Only depends on the location, the event and `congestion`; calling
    /// it twice gives the same answer.
    fn route(&mut self, port: usize, vc: usize, ev: &mut RouterEvent, congestion: &Congestion);

    /// Called every cycle for every head of line event before arbitration.
    /// Adaptive algorithms re-decide here; the others keep their route.
    fn reroute(
        &mut self,
        _port: usize,
        _vc: usize,
        _ev: &mut RouterEvent,
        _congestion: &Congestion,
    ) {
    }

    /// Wrap a packet injected by a local endpoint.
    fn process_input(&mut self, packet: Packet) -> RouterEvent;

    /// Wrap a packet injected during init.
    fn process_init_data_input(&mut self, packet: Packet) -> RouterEvent {
        if packet.is_broadcast() {
            RouterEvent::new(packet, 0, RouteInfo::Plain)
        } else {
            self.process_input(packet)
        }
    }

    /// Output ports an init-time event leaves through.
    ///
    /// Broadcasts follow a flooding tree where every endpoint gets exactly
    /// one copy; unicasts follow `route`.
    fn route_init_data(&mut self, port: usize, ev: &mut RouterEvent) -> Vec<usize>;

    fn port_state(&self, port: usize) -> PortState;

    /// endpoint attached to `port`, if it faces a node.
    fn endpoint_id(&self, port: usize) -> Option<usize>;

    fn compute_num_vcs(&self, num_vns: usize) -> usize;

    /// Output buffer capacities, once the VCs are known.
    fn set_output_buffer_credit_array(&mut self, _num_vcs: usize, _initial_credits: &[usize]) {}

    fn set_output_queue_lengths_array(&mut self, _num_vcs: usize) {}

    fn num_routers(&self) -> usize;

    fn num_endpoints(&self) -> usize;

    /// (router, port) at the far end of a router facing `port`.
    fn neighbor(&self, port: usize) -> Option<(usize, usize)>;

    /// packets delivered here, indexed by router hops taken. Empty unless
    /// the topology keeps track.
    fn hop_counts(&self) -> &[u64] {
        &[]
    }
}

/// Init-time unicast: route as usual, without congestion information.
fn route_init_unicast<T: Topology + ?Sized>(
    topo: &mut T,
    port: usize,
    ev: &mut RouterEvent,
) -> Vec<usize> {
    let vc = ev.vc();
    topo.route(port, vc, ev, &Congestion::idle());
    vec![ev.next_port()]
}

/// Random generator of the topology instance of router `id`.
fn topology_rng(seed: u64, id: usize) -> Xoshiro256StarStar {
    Xoshiro256StarStar::seed_from_u64(seed.wrapping_add(id as u64 + 1))
}

/// return the linear index of the element in a multi-dimensional grid
/// The element is represented as a vector of coordinates in `dims`.
fn linearize_index(elem: &[usize], dims: &[usize]) -> usize {
    let mut index: usize = 0;
    for (d, c) in elem.iter().enumerate() {
        index += c * dims[0..d].iter().product::<usize>();
    }
    index
}

/// given a linear index of the element, return the vector of coordinates in a
/// multi-dimensional grid of `dims` dimensions. Dimension 0 varies fastest.
fn delinearize_index(index: usize, dims: &[usize]) -> Vec<usize> {
    let mut idx = index;
    dims.iter()
        .map(|&m| {
            let c = idx % m;
            idx /= m;
            c
        })
        .collect()
}

/// parse "4x4x2" into `[4, 4, 2]`.
fn parse_dims(shape: &str) -> Result<Vec<usize>, Error> {
    let dims = shape
        .split('x')
        .map(|d| d.trim().parse::<usize>())
        .collect::<Result<Vec<usize>, _>>()
        .map_err(|_| Error::InvalidShape(shape.to_string()))?;
    if dims.is_empty() || dims.iter().any(|&d| d == 0) {
        return Err(Error::InvalidShape(shape.to_string()));
    }
    Ok(dims)
}

/// parallel links per dimension; one everywhere when absent.
fn parse_widths(width: Option<&str>, num_dims: usize) -> Result<Vec<usize>, Error> {
    match width {
        None => Ok(vec![1; num_dims]),
        Some(width) => {
            let widths = parse_dims(width)?;
            if widths.len() != num_dims {
                return Err(Error::InvalidShape(width.to_string()));
            }
            Ok(widths)
        }
    }
}

fn check_ports(needed: usize, available: usize) -> Result<(), Error> {
    if needed > available {
        return Err(Error::InsufficientPorts { needed, available });
    }
    Ok(())
}

/// Build the topology of one router.
pub fn build(config: &RouterConfiguration) -> Result<Box<dyn Topology>, Error> {
    let id = config.id;
    let num_ports = config.num_ports;
    let topo: Box<dyn Topology> = match &config.topology {
        TopologyConfiguration::SingleRouter => Box::new(SingleRouter::new(num_ports)),
        TopologyConfiguration::Mesh(grid) => Box::new(Mesh::new(id, num_ports, grid, false)?),
        TopologyConfiguration::Torus(grid) => Box::new(Mesh::new(id, num_ports, grid, true)?),
        TopologyConfiguration::HyperX(hx) => {
            Box::new(HyperX::new(id, num_ports, hx, config.seed)?)
        }
        TopologyConfiguration::FatTree(ft) => Box::new(FatTree::new(id, num_ports, ft)?),
        TopologyConfiguration::Dragonfly(df) => {
            Box::new(Dragonfly::new(id, num_ports, df, config.seed)?)
        }
        TopologyConfiguration::PolarFly(pf) => {
            Box::new(PolarFly::new(id, num_ports, pf, config.seed)?)
        }
        TopologyConfiguration::PolarStar(ps) => {
            Box::new(PolarStar::new(id, num_ports, ps, config.seed)?)
        }
    };
    log::debug!(
        "router {}: {} topology, {} ports",
        id,
        topo.name(),
        num_ports
    );
    Ok(topo)
}
