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

//! Crossbar routers for cycle level network simulation: crossbar and
//! output link arbitration, topology aware routing, and a small harness to
//! run whole networks.

pub mod arbitration;
pub mod config;
mod error;
pub mod event;
pub mod network;
pub mod ports;
pub mod router;
pub mod topologies;

// Public types
// type to use for cycles
pub type Cycle = usize;

pub use crate::arbitration::{Progress, SingleArbitration, XbarArbitration};
pub use crate::config::{NetworkConfiguration, RouterConfiguration, TopologyConfiguration};
pub use crate::error::Error;
pub use crate::event::{Packet, RouteInfo, RouterEvent, TraceType, BROADCAST_ADDR};
pub use crate::network::{Delivery, Network, NetworkStatistics};
pub use crate::ports::{CreditReturn, PortControl, PortStatistics};
pub use crate::router::{ClockStatus, InitData, Router, RouterStatistics};
pub use crate::topologies::{Congestion, PortState, Topology};
