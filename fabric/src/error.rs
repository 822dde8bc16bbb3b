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

use std::fmt;

/// Configuration errors.
///
/// All of these are raised while building a router or a network, before any
/// cycle is simulated. Backpressure is never an error.
#[derive(Debug, Eq, PartialEq)]
pub enum Error {
    /// A shape, width or other list parameter could not be parsed.
    InvalidShape(String),
    /// The routing algorithm name is not known by the topology.
    UnknownAlgorithm(String),
    /// The crossbar or output arbitration name is not known.
    UnknownArbitration(String),
    /// The router does not have enough ports for the declared topology.
    InsufficientPorts { needed: usize, available: usize },
    /// A numeric parameter is out of range or inconsistent with others.
    InvalidParameter(String),
    /// The router id does not exist in the declared topology.
    InvalidRouterId(usize),
    /// A route table failed its construction-time check.
    InvalidRouteTable { router: usize, dest: usize },
    /// The adjacency list of a graph topology is malformed.
    InvalidGraph(String),
    /// A configuration or graph file could not be read.
    Io(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::InsufficientPorts { needed, available } => {
                write!(
                    f,
                    "ERROR: topology needs {} ports, router has {}",
                    needed, available
                )
            }
            Self::InvalidRouteTable { router, dest } => {
                write!(
                    f,
                    "ERROR: route table of router {} has no valid entry for router {}",
                    router, dest
                )
            }
            Self::UnknownAlgorithm(name) => write!(f, "ERROR: unknown routing algorithm {}", name),
            Self::UnknownArbitration(name) => write!(f, "ERROR: unknown arbitration {}", name),
            _ => write!(f, "{:?}", self),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        None
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
