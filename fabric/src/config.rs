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

use crate::{Cycle, Error};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// mesh and torus parameters.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct GridConfiguration {
    /// routers per dimension, e.g. "4x4".
    pub shape: String,
    /// parallel links per dimension, e.g. "2x1"; one link when absent.
    pub width: Option<String>,
    pub local_ports: usize,
}

impl Default for GridConfiguration {
    fn default() -> Self {
        Self {
            shape: "2x2".to_string(),
            width: None,
            local_ports: 1,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct HyperXConfiguration {
    pub shape: String,
    pub width: Option<String>,
    pub local_ports: usize,
    /// DOR, DOR-ND, MIN-A, VALIANT, DOAL or VDAL.
    pub algorithm: String,
}

impl Default for HyperXConfiguration {
    fn default() -> Self {
        Self {
            shape: "2x2".to_string(),
            width: None,
            local_ports: 1,
            algorithm: "DOR".to_string(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct FatTreeConfiguration {
    /// down,up port counts per level from the leaves, e.g. "4,4:4,4:8".
    pub shape: String,
    /// deterministic or adaptive.
    pub routing_alg: String,
    /// fraction of the output buffer below which adaptive routing looks
    /// for another up port.
    pub adaptive_threshold: f64,
}

impl Default for FatTreeConfiguration {
    fn default() -> Self {
        Self {
            shape: "2,2:4".to_string(),
            routing_alg: "deterministic".to_string(),
            adaptive_threshold: 0.5,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct DragonflyConfiguration {
    pub hosts_per_router: usize,
    pub routers_per_group: usize,
    pub intergroup_per_router: usize,
    pub num_groups: usize,
    /// minimal, valiant or ugal.
    pub algorithm: String,
    pub adaptive_bias: usize,
}

impl Default for DragonflyConfiguration {
    fn default() -> Self {
        Self {
            hosts_per_router: 1,
            routers_per_group: 2,
            intergroup_per_router: 1,
            num_groups: 3,
            algorithm: "minimal".to_string(),
            adaptive_bias: 0,
        }
    }
}

/// polarfly and polarstar parameters.
///
/// The router graph comes from exactly one of `q` (polarfly only, the ER_q
/// polarity graph for a prime `q`), `graph_file` (an adjacency list file:
/// "V E" then one line of neighbors per router) or an inline `adjacency`.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct PolarConfiguration {
    pub q: Option<usize>,
    pub graph_file: Option<String>,
    pub adjacency: Option<Vec<Vec<usize>>>,
    pub hosts_per_router: usize,
    /// MINIMAL, VALIANT, UGAL or UGAL_PF (polarfly only).
    pub algorithm: String,
    /// topology default when absent.
    pub adaptive_bias: Option<usize>,
}

impl Default for PolarConfiguration {
    fn default() -> Self {
        Self {
            q: None,
            graph_file: None,
            adjacency: None,
            hosts_per_router: 1,
            algorithm: "MINIMAL".to_string(),
            adaptive_bias: None,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TopologyConfiguration {
    SingleRouter,
    Mesh(GridConfiguration),
    Torus(GridConfiguration),
    #[serde(rename = "hyperx")]
    HyperX(HyperXConfiguration),
    FatTree(FatTreeConfiguration),
    Dragonfly(DragonflyConfiguration),
    #[serde(rename = "polarfly")]
    PolarFly(PolarConfiguration),
    #[serde(rename = "polarstar")]
    PolarStar(PolarConfiguration),
}

impl Default for TopologyConfiguration {
    fn default() -> Self {
        TopologyConfiguration::SingleRouter
    }
}

/// Parameters of one router.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct RouterConfiguration {
    pub id: usize,
    pub num_ports: usize,
    pub num_vns: usize,
    /// rr, lru, age, random or lru_infx.
    pub xbar_arb: String,
    /// rr or lru, picks the VC sent next on each output link.
    pub output_arb: String,
    /// per VC, in flits.
    pub input_buf_size: usize,
    /// per VC, in flits.
    pub output_buf_size: usize,
    pub seed: u64,
    pub topology: TopologyConfiguration,
}

impl Default for RouterConfiguration {
    fn default() -> Self {
        Self {
            id: 0,
            num_ports: 4,
            num_vns: 1,
            xbar_arb: "rr".to_string(),
            output_arb: "rr".to_string(),
            input_buf_size: 16,
            output_buf_size: 16,
            seed: 0,
            topology: TopologyConfiguration::default(),
        }
    }
}

impl RouterConfiguration {
    pub fn from_file(config_file: &Path) -> Result<RouterConfiguration, Error> {
        let reader = BufReader::new(File::open(config_file)?);
        serde_yaml::from_reader(reader).map_err(|e| Error::InvalidParameter(e.to_string()))
    }

    pub fn from_str(config: &str) -> Result<RouterConfiguration, Error> {
        serde_yaml::from_str(config).map_err(|e| Error::InvalidParameter(e.to_string()))
    }
}

/// A network of identical routers.
///
/// `router.id` is ignored, every router gets its own.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct NetworkConfiguration {
    pub router: RouterConfiguration,
    pub link_latency: Cycle,
}

impl Default for NetworkConfiguration {
    fn default() -> Self {
        Self {
            router: RouterConfiguration::default(),
            link_latency: 1,
        }
    }
}

impl NetworkConfiguration {
    pub fn from_file(config_file: &Path) -> Result<NetworkConfiguration, Error> {
        let reader = BufReader::new(File::open(config_file)?);
        serde_yaml::from_reader(reader).map_err(|e| Error::InvalidParameter(e.to_string()))
    }

    pub fn from_str(config: &str) -> Result<NetworkConfiguration, Error> {
        serde_yaml::from_str(config).map_err(|e| Error::InvalidParameter(e.to_string()))
    }
}

#[cfg(test)]
mod config_tests {
    use super::*;

    #[test]
    fn test_router_from_str() {
        let config = RouterConfiguration::from_str(
            r#"
id: 3
num_ports: 8
xbar_arb: age
topology:
  type: dragonfly
  hosts_per_router: 4
  routers_per_group: 4
  intergroup_per_router: 1
  num_groups: 4
  algorithm: valiant
"#,
        )
        .unwrap();
        assert_eq!(config.id, 3);
        assert_eq!(config.xbar_arb, "age");
        assert_eq!(config.output_arb, "rr");
        match config.topology {
            TopologyConfiguration::Dragonfly(df) => {
                assert_eq!(df.hosts_per_router, 4);
                assert_eq!(df.algorithm, "valiant");
                assert_eq!(df.adaptive_bias, 0);
            }
            t => panic!("wrong topology {:?}", t),
        }
    }

    #[test]
    fn test_network_from_str() {
        let config = NetworkConfiguration::from_str(
            r#"
router:
  num_ports: 6
  topology:
    type: polarfly
    q: 3
    hosts_per_router: 2
    algorithm: UGAL
"#,
        )
        .unwrap();
        assert_eq!(config.link_latency, 1);
        match config.router.topology {
            TopologyConfiguration::PolarFly(pf) => {
                assert_eq!(pf.q, Some(3));
                assert_eq!(pf.adaptive_bias, None);
            }
            t => panic!("wrong topology {:?}", t),
        }
    }

    #[test]
    fn test_single_router_default() {
        let config = RouterConfiguration::from_str("num_ports: 2\ntopology:\n  type: single_router\n");
        assert!(matches!(
            config.unwrap().topology,
            TopologyConfiguration::SingleRouter
        ));
    }

    #[test]
    fn test_bad_yaml() {
        assert!(matches!(
            RouterConfiguration::from_str("topology:\n  type: ring\n"),
            Err(Error::InvalidParameter(_))
        ));
    }
}
