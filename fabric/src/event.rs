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

use crate::Cycle;
use serde::{Deserialize, Serialize};

/// Destination used by init-time broadcasts.
pub const BROADCAST_ADDR: usize = usize::MAX;

// next_port of an event that has not been routed yet
const UNROUTED: usize = usize::MAX;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TraceType {
    None,
    Route,
    Full,
}

impl Default for TraceType {
    fn default() -> Self {
        TraceType::None
    }
}

/// A message as seen by an endpoint.
#[derive(Clone, Debug, PartialEq)]
pub struct Packet {
    pub id: u64,
    pub src: usize,
    pub dest: usize,
    pub vn: usize,
    pub inject_time: Cycle,
    pub trace: TraceType,
    size_in_flits: usize,
}

impl Packet {
    pub fn new(id: u64, src: usize, dest: usize, vn: usize, size_in_flits: usize) -> Self {
        assert!(size_in_flits > 0, "packet {} has no flits", id);
        Self {
            id,
            src,
            dest,
            vn,
            inject_time: 0,
            trace: TraceType::None,
            size_in_flits,
        }
    }

    /// A single flit packet flooded to every endpoint during init.
    pub fn broadcast(id: u64, src: usize, vn: usize) -> Self {
        Self::new(id, src, BROADCAST_ADDR, vn, 1)
    }

    pub fn with_inject_time(mut self, cycle: Cycle) -> Self {
        self.inject_time = cycle;
        self
    }

    pub fn with_trace(mut self, trace: TraceType) -> Self {
        self.trace = trace;
        self
    }

    pub fn size_in_flits(&self) -> usize {
        self.size_in_flits
    }

    pub fn is_broadcast(&self) -> bool {
        self.dest == BROADCAST_ADDR
    }
}

/// Dragonfly address of an endpoint.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct DragonflyAddress {
    pub group: usize,
    /// group to visit before `group`; equal to `group` once reached or when
    /// routing minimally.
    pub mid_group: usize,
    pub router: usize,
    pub host: usize,
}

#[derive(Clone, Debug, PartialEq)]
pub struct DragonflyRoute {
    pub dest: DragonflyAddress,
    pub src_group: usize,
    /// valiant group sampled at injection, used by adaptive routing.
    pub mid_candidate: Option<usize>,
}

/// Routing state for grid-like topologies (mesh, torus, hyperx).
#[derive(Clone, Debug, PartialEq)]
pub struct DimensionalRoute {
    pub dest_loc: Vec<usize>,
    /// Valiant intermediate router location.
    pub intermediate: Option<Vec<usize>>,
    /// dimensions in which the packet already took a non-minimal hop.
    pub derouted: Vec<bool>,
    /// parallel link used when more than one link joins two routers.
    pub link: usize,
}

#[derive(Clone, Debug, PartialEq)]
pub struct PolarRoute {
    pub dest_router: usize,
    pub valiant: Option<usize>,
    pub non_minimal: bool,
    /// intermediate routers sampled at injection for adaptive routing.
    pub candidates: Vec<usize>,
}

/// Flooding state of an init-time broadcast in diameter-bounded graphs.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PolarInit {
    /// router the broadcast started from.
    pub root: usize,
    /// router hops taken so far.
    pub phase: usize,
}

/// Topology specific metadata carried by a routed event.
#[derive(Clone, Debug, PartialEq)]
pub enum RouteInfo {
    Plain,
    Dragonfly(DragonflyRoute),
    Dimensional(DimensionalRoute),
    Polar(PolarRoute),
    PolarInit(PolarInit),
}

/// The unit moved through a router.
///
/// It owns the packet until delivery, when `into_packet` hands it back to an
/// endpoint.
#[derive(Clone, Debug, PartialEq)]
pub struct RouterEvent {
    packet: Packet,
    next_port: usize,
    vc: usize,
    route: RouteInfo,
}

impl RouterEvent {
    pub fn new(packet: Packet, vc: usize, route: RouteInfo) -> Self {
        Self {
            packet,
            next_port: UNROUTED,
            vc,
            route,
        }
    }

    pub fn packet(&self) -> &Packet {
        &self.packet
    }

    pub fn into_packet(self) -> Packet {
        self.packet
    }

    pub fn src(&self) -> usize {
        self.packet.src
    }

    pub fn dest(&self) -> usize {
        self.packet.dest
    }

    pub fn vn(&self) -> usize {
        self.packet.vn
    }

    pub fn flit_count(&self) -> usize {
        self.packet.size_in_flits
    }

    pub fn inject_time(&self) -> Cycle {
        self.packet.inject_time
    }

    pub fn trace(&self) -> TraceType {
        self.packet.trace
    }

    pub fn is_broadcast(&self) -> bool {
        self.packet.is_broadcast()
    }

    pub fn next_port(&self) -> usize {
        assert!(
            self.next_port != UNROUTED,
            "packet {} was never routed",
            self.packet.id
        );
        self.next_port
    }

    pub fn is_routed(&self) -> bool {
        self.next_port != UNROUTED
    }

    pub fn set_next_port(&mut self, port: usize) {
        self.next_port = port;
    }

    pub fn vc(&self) -> usize {
        self.vc
    }

    pub fn set_vc(&mut self, vc: usize) {
        self.vc = vc;
    }

    pub fn route_info(&self) -> &RouteInfo {
        &self.route
    }

    pub fn route_info_mut(&mut self) -> &mut RouteInfo {
        &mut self.route
    }

    /// Fan out for `count` egress ports.
    ///
    /// Each copy owns its own packet; `self` is consumed.
    pub fn duplicate(self, count: usize) -> Vec<RouterEvent> {
        if count == 0 {
            return Vec::new();
        }
        let mut copies = Vec::with_capacity(count);
        for _ in 1..count {
            copies.push(self.clone());
        }
        copies.push(self);
        copies
    }
}
