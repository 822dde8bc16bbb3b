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
use super::{route_init_unicast, Congestion, PortState, Topology};
use crate::config::GridConfiguration;
use crate::event::{DimensionalRoute, Packet, RouteInfo, RouterEvent};
use crate::Error;

/// A <dim>-D mesh, or torus when `wrap` is set.
///
/// Every dimension owns `2 * width` ports: `width` links toward the
/// positive neighbor, then `width` links toward the negative one. Local
/// ports follow the last dimension.
///
/// For example a 2D mesh looks like this:
/// <pre>
/// x --- x --- x --- x   ^
/// |     |     |     |   |
/// x --- x --- x --- x   y-dim
/// |     |     |     |   |
/// x --- x --- x --- x   v
/// < ----- x-dim ---->
/// </pre>
///
/// Routing is dimension ordered. The torus takes the shorter way around
/// each ring and uses two VCs per VN: packets move to the odd VC when they
/// cross the wrap-around link of a dimension and back to the even VC when
/// they start a new dimension.
#[derive(Debug)]
pub struct Mesh {
    id: usize,
    wrap: bool,
    dims: Vec<usize>,
    widths: Vec<usize>,
    port_start: Vec<usize>,
    local_port_start: usize,
    local_ports: usize,
    my_loc: Vec<usize>,
}

/// `start + dist % width`: spread flows over the parallel links.
fn choose_multipath(start: usize, width: usize, dist: usize) -> usize {
    start + dist % width
}

impl Mesh {
    pub fn new(
        id: usize,
        num_ports: usize,
        config: &GridConfiguration,
        wrap: bool,
    ) -> Result<Self, Error> {
        let dims = parse_dims(&config.shape)?;
        let widths = parse_widths(config.width.as_deref(), dims.len())?;
        if config.local_ports == 0 {
            return Err(Error::InvalidParameter("local_ports must be positive".to_string()));
        }
        let mut port_start = Vec::with_capacity(dims.len());
        let mut next = 0;
        for w in widths.iter() {
            port_start.push(next);
            next += 2 * w;
        }
        check_ports(next + config.local_ports, num_ports)?;
        let num_routers: usize = dims.iter().product();
        if id >= num_routers {
            return Err(Error::InvalidRouterId(id));
        }
        let my_loc = delinearize_index(id, &dims);
        Ok(Self {
            id,
            wrap,
            dims,
            widths,
            port_start,
            local_port_start: next,
            local_ports: config.local_ports,
            my_loc,
        })
    }

    fn vcs_per_vn(&self) -> usize {
        if self.wrap {
            2
        } else {
            1
        }
    }

    fn location(&self, router: usize) -> Vec<usize> {
        delinearize_index(router, &self.dims)
    }

    /// (dimension, offset within the dimension) of a router facing port.
    fn dim_of_port(&self, port: usize) -> Option<(usize, usize)> {
        if port >= self.local_port_start {
            return None;
        }
        let dim = self.port_start.iter().rposition(|&start| start <= port)?;
        Some((dim, port - self.port_start[dim]))
    }

    /// whether the link leaving toward `positive` exists in `dim`.
    fn has_link(&self, dim: usize, positive: bool) -> bool {
        if self.dims[dim] < 2 {
            return false;
        }
        if self.wrap {
            return true;
        }
        if positive {
            self.my_loc[dim] + 1 < self.dims[dim]
        } else {
            self.my_loc[dim] > 0
        }
    }

    fn link_port(&self, dim: usize, positive: bool, link: usize) -> usize {
        let start = if positive {
            self.port_start[dim]
        } else {
            self.port_start[dim] + self.widths[dim]
        };
        start + link
    }

    /// direction and hop distance from here to `target` in `dim`.
    fn direction(&self, dim: usize, target: usize) -> (bool, usize) {
        let here = self.my_loc[dim];
        if !self.wrap {
            if target > here {
                return (true, target - here);
            }
            return (false, here - target);
        }
        let size = self.dims[dim];
        let forward = (target + size - here) % size;
        let backward = size - forward;
        if forward <= backward {
            (true, forward)
        } else {
            (false, backward)
        }
    }
}

fn dimensional(ev: &RouterEvent) -> &DimensionalRoute {
    match ev.route_info() {
        RouteInfo::Dimensional(info) => info,
        other => panic!("grid topology got foreign route info {:?}", other),
    }
}

impl Topology for Mesh {
    fn name(&self) -> &'static str {
        if self.wrap {
            "torus"
        } else {
            "mesh"
        }
    }

    fn route(&mut self, port: usize, vc: usize, ev: &mut RouterEvent, _congestion: &Congestion) {
        let per_vn = self.vcs_per_vn();
        let base = vc - vc % per_vn;
        let dest_loc = &dimensional(ev).dest_loc;
        let dim = (0..self.dims.len()).find(|&d| dest_loc[d] != self.my_loc[d]);
        let (next_port, next_vc) = match dim {
            None => (
                self.local_port_start + ev.dest() % self.local_ports,
                base,
            ),
            Some(d) => {
                let (positive, dist) = self.direction(d, dest_loc[d]);
                let port_out = choose_multipath(self.link_port(d, positive, 0), self.widths[d], dist);
                let mut next_vc = vc;
                if self.wrap {
                    if self.dim_of_port(port).map(|(pd, _)| pd) != Some(d) {
                        next_vc = base;
                    }
                    let here = self.my_loc[d];
                    let crosses = if positive {
                        here + 1 == self.dims[d]
                    } else {
                        here == 0
                    };
                    if crosses {
                        next_vc = base + 1;
                    }
                }
                (port_out, next_vc)
            }
        };
        ev.set_next_port(next_port);
        ev.set_vc(next_vc);
    }

    fn process_input(&mut self, packet: Packet) -> RouterEvent {
        let dest_loc = self.location(packet.dest / self.local_ports);
        let vc = packet.vn * self.vcs_per_vn();
        let num_dims = self.dims.len();
        RouterEvent::new(
            packet,
            vc,
            RouteInfo::Dimensional(DimensionalRoute {
                dest_loc,
                intermediate: None,
                derouted: vec![false; num_dims],
                link: 0,
            }),
        )
    }

    /// Dimension ordered spanning tree.
    ///
    /// A router reached through dimension `d` keeps going in `d` and starts
    /// every higher dimension. The mesh starts a dimension in both
    /// directions; the torus only goes around the positive way until the
    /// ring closes.
    fn route_init_data(&mut self, port: usize, ev: &mut RouterEvent) -> Vec<usize> {
        if !ev.is_broadcast() {
            return route_init_unicast(self, port, ev);
        }
        let src_loc = self.location(ev.src() / self.local_ports);
        let mut ports = Vec::new();
        let first_dim = match self.dim_of_port(port) {
            None => 0,
            Some((d, offset)) => {
                // arriving on our positive port means travelling negative
                let positive = offset >= self.widths[d];
                let keep_going = if self.wrap {
                    (self.my_loc[d] + 1) % self.dims[d] != src_loc[d]
                } else {
                    self.has_link(d, positive)
                };
                if keep_going && self.has_link(d, positive) {
                    ports.push(self.link_port(d, positive, 0));
                }
                d + 1
            }
        };
        for d in first_dim..self.dims.len() {
            if self.has_link(d, true) {
                ports.push(self.link_port(d, true, 0));
            }
            if !self.wrap && self.has_link(d, false) {
                ports.push(self.link_port(d, false, 0));
            }
        }
        ports.extend(
            (self.local_port_start..self.local_port_start + self.local_ports).filter(|&p| p != port),
        );
        ports
    }

    fn port_state(&self, port: usize) -> PortState {
        match self.dim_of_port(port) {
            Some((d, offset)) => {
                if self.has_link(d, offset < self.widths[d]) {
                    PortState::RouterToRouter
                } else {
                    PortState::Unconnected
                }
            }
            None if port < self.local_port_start + self.local_ports => PortState::RouterToNode,
            None => PortState::Unconnected,
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
        if self.port_state(port) != PortState::RouterToRouter {
            return None;
        }
        let (d, offset) = self.dim_of_port(port)?;
        let width = self.widths[d];
        let size = self.dims[d];
        let mut loc = self.my_loc.clone();
        let positive = offset < width;
        let link = offset % width;
        // the far end sees us from the opposite direction
        let far_port = if positive {
            loc[d] = (loc[d] + 1) % size;
            self.port_start[d] + width + link
        } else {
            loc[d] = (loc[d] + size - 1) % size;
            self.port_start[d] + link
        };
        Some((linearize_index(&loc, &self.dims), far_port))
    }
}
