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

use super::{route_init_unicast, Congestion, PortState, Topology};
use crate::event::{Packet, RouteInfo, RouterEvent};

/// One router, one endpoint per port; endpoint `i` sits on port `i`.
#[derive(Debug)]
pub struct SingleRouter {
    num_ports: usize,
}

impl SingleRouter {
    pub fn new(num_ports: usize) -> Self {
        Self { num_ports }
    }
}

impl Topology for SingleRouter {
    fn name(&self) -> &'static str {
        "single_router"
    }

    fn route(&mut self, _port: usize, _vc: usize, ev: &mut RouterEvent, _congestion: &Congestion) {
        let dest = ev.dest();
        ev.set_next_port(dest);
    }

    fn process_input(&mut self, packet: Packet) -> RouterEvent {
        let vn = packet.vn;
        RouterEvent::new(packet, vn, RouteInfo::Plain)
    }

    fn route_init_data(&mut self, port: usize, ev: &mut RouterEvent) -> Vec<usize> {
        if !ev.is_broadcast() {
            return route_init_unicast(self, port, ev);
        }
        (0..self.num_ports).filter(|&p| p != port).collect()
    }

    fn port_state(&self, port: usize) -> PortState {
        if port < self.num_ports {
            PortState::RouterToNode
        } else {
            PortState::Unconnected
        }
    }

    fn endpoint_id(&self, port: usize) -> Option<usize> {
        (port < self.num_ports).then(|| port)
    }

    fn compute_num_vcs(&self, num_vns: usize) -> usize {
        num_vns
    }

    fn num_routers(&self) -> usize {
        1
    }

    fn num_endpoints(&self) -> usize {
        self.num_ports
    }

    fn neighbor(&self, _port: usize) -> Option<(usize, usize)> {
        None
    }
}
