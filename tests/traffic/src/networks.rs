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

//! Small instances of every topology, in every routing algorithm.

use fabric::config::{
    DragonflyConfiguration, FatTreeConfiguration, GridConfiguration, HyperXConfiguration,
    PolarConfiguration,
};
use fabric::{NetworkConfiguration, RouterConfiguration, TopologyConfiguration};

pub fn network(num_ports: usize, topology: TopologyConfiguration) -> NetworkConfiguration {
    NetworkConfiguration {
        router: RouterConfiguration {
            num_ports,
            topology,
            seed: 11,
            ..Default::default()
        },
        link_latency: 2,
    }
}

fn grid(shape: &str) -> GridConfiguration {
    GridConfiguration {
        shape: shape.to_string(),
        ..Default::default()
    }
}

pub fn hyperx(algorithm: &str) -> NetworkConfiguration {
    network(
        6,
        TopologyConfiguration::HyperX(HyperXConfiguration {
            shape: "3x3".to_string(),
            local_ports: 2,
            algorithm: algorithm.to_string(),
            ..Default::default()
        }),
    )
}

pub fn fat_tree(routing_alg: &str) -> NetworkConfiguration {
    network(
        4,
        TopologyConfiguration::FatTree(FatTreeConfiguration {
            shape: "2,2:2,2:4".to_string(),
            routing_alg: routing_alg.to_string(),
            adaptive_threshold: 0.5,
        }),
    )
}

pub fn dragonfly(algorithm: &str) -> NetworkConfiguration {
    network(
        6,
        TopologyConfiguration::Dragonfly(DragonflyConfiguration {
            hosts_per_router: 2,
            routers_per_group: 3,
            intergroup_per_router: 2,
            num_groups: 5,
            algorithm: algorithm.to_string(),
            adaptive_bias: 1,
        }),
    )
}

pub fn polarfly(algorithm: &str) -> NetworkConfiguration {
    network(
        8,
        TopologyConfiguration::PolarFly(PolarConfiguration {
            q: Some(3),
            hosts_per_router: 2,
            algorithm: algorithm.to_string(),
            ..Default::default()
        }),
    )
}

/// a 3-cube, which has the diameter polarstar routing expects.
pub fn polarstar(algorithm: &str) -> NetworkConfiguration {
    network(
        8,
        TopologyConfiguration::PolarStar(PolarConfiguration {
            adjacency: Some(vec![
                vec![1, 2, 4],
                vec![0, 3, 5],
                vec![0, 3, 6],
                vec![1, 2, 7],
                vec![0, 5, 6],
                vec![1, 4, 7],
                vec![2, 4, 7],
                vec![3, 5, 6],
            ]),
            hosts_per_router: 2,
            algorithm: algorithm.to_string(),
            ..Default::default()
        }),
    )
}

/// Every topology and routing algorithm, named.
pub fn all_networks() -> Vec<(String, NetworkConfiguration)> {
    let mut all = vec![
        (
            "single_router".to_string(),
            network(6, TopologyConfiguration::SingleRouter),
        ),
        (
            "mesh".to_string(),
            network(5, TopologyConfiguration::Mesh(grid("3x3"))),
        ),
        (
            "torus".to_string(),
            network(5, TopologyConfiguration::Torus(grid("3x3"))),
        ),
    ];
    for alg in ["DOR", "DOR-ND", "MIN-A", "VALIANT", "DOAL", "VDAL"] {
        all.push((format!("hyperx {}", alg), hyperx(alg)));
    }
    for alg in ["deterministic", "adaptive"] {
        all.push((format!("fat_tree {}", alg), fat_tree(alg)));
    }
    for alg in ["minimal", "valiant", "ugal"] {
        all.push((format!("dragonfly {}", alg), dragonfly(alg)));
    }
    for alg in ["MINIMAL", "VALIANT", "UGAL", "UGAL_PF"] {
        all.push((format!("polarfly {}", alg), polarfly(alg)));
    }
    for alg in ["MINIMAL", "VALIANT", "UGAL"] {
        all.push((format!("polarstar {}", alg), polarstar(alg)));
    }
    all
}
