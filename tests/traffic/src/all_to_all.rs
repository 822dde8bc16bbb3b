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

//! Every endpoint sends one packet to every other endpoint.

use fabric::{Delivery, Network, NetworkConfiguration, NetworkStatistics, Packet};

const DRAIN_CYCLES: usize = 100_000;

/// Run the exchange; packet `i` carries `1 + i % max_flits` flits.
pub fn run_all_to_all(
    config: &NetworkConfiguration,
    max_flits: usize,
) -> anyhow::Result<(Network, Vec<Delivery>, NetworkStatistics)> {
    let mut network = Network::new(config)?;
    let n = network.num_endpoints();
    let mut id = 0;
    for src in 0..n {
        for dest in (0..n).filter(|&d| d != src) {
            network.send(Packet::new(id, src, dest, 0, 1 + id as usize % max_flits))?;
            id += 1;
        }
    }
    let end = network.run_until_drained(DRAIN_CYCLES)?;
    let delivered = network.take_delivered();
    let stats = network.statistics();
    log::info!(
        "{} endpoints: {} packets in {} cycles, mean latency {:.1}",
        n,
        delivered.len(),
        end,
        stats.mean_latency()
    );
    Ok((network, delivered, stats))
}

#[cfg(test)]
mod tests {
    use super::run_all_to_all;
    use crate::networks::{all_networks, hyperx};
    use fabric::{Network, PortState};
    use itertools::Itertools;

    fn check_credits(network: &Network, config: &fabric::NetworkConfiguration) {
        for r in 0..network.num_routers() {
            let router = network.router(r);
            for port in 0..router.num_ports() {
                if router.topology().port_state(port) == PortState::Unconnected {
                    continue;
                }
                for vc in 0..router.num_vcs() {
                    assert_eq!(
                        router.port(port).remote_credits(vc),
                        config.router.input_buf_size,
                        "router {} port {} vc {}",
                        r,
                        port,
                        vc
                    );
                    assert_eq!(
                        router.port(port).xbar_credits(vc),
                        config.router.output_buf_size
                    );
                }
            }
        }
    }

    #[test]
    fn every_topology_delivers() {
        let _ = env_logger::try_init();
        for (name, config) in all_networks() {
            log::info!("{}", name);
            let (network, delivered, stats) = run_all_to_all(&config, 3)
                .unwrap_or_else(|e| panic!("{}: {}", name, e));
            let n = network.num_endpoints();
            assert_eq!(delivered.len(), n * (n - 1), "{}", name);
            assert_eq!(stats.delivered, stats.injected, "{}", name);
            for d in delivered.iter() {
                assert_eq!(d.endpoint, d.packet.dest, "{}", name);
            }
            let unique = delivered.iter().map(|d| d.packet.id).sorted().dedup().count();
            assert_eq!(unique, delivered.len(), "{}: duplicate delivery", name);
            check_credits(&network, &config);
        }
    }

    #[test]
    fn every_arbiter_delivers() {
        let _ = env_logger::try_init();
        for xbar_arb in ["rr", "lru", "age", "random", "lru_infx"] {
            for output_arb in ["rr", "lru"] {
                let mut config = hyperx("DOAL");
                config.router.xbar_arb = xbar_arb.to_string();
                config.router.output_arb = output_arb.to_string();
                let (network, delivered, _) = run_all_to_all(&config, 4).unwrap();
                let n = network.num_endpoints();
                assert_eq!(delivered.len(), n * (n - 1), "{} {}", xbar_arb, output_arb);
                check_credits(&network, &config);
            }
        }
    }

    #[test]
    fn polar_hop_histogram() {
        let config = crate::networks::polarfly("MINIMAL");
        let (_, delivered, stats) = run_all_to_all(&config, 1).unwrap();
        assert_eq!(stats.hop_counts.iter().sum::<u64>(), delivered.len() as u64);
        // diameter 2: nothing takes more than two router to router hops
        assert!(stats.hop_counts.len() <= 3);
        assert!(stats.hop_counts[2] > 0);
    }

    #[test]
    fn same_seed_same_run() {
        let config = crate::networks::dragonfly("ugal");
        let (_, first, _) = run_all_to_all(&config, 2).unwrap();
        let (_, second, _) = run_all_to_all(&config, 2).unwrap();
        let cycles = |d: &[fabric::Delivery]| d.iter().map(|d| (d.packet.id, d.cycle)).collect_vec();
        assert_eq!(cycles(&first), cycles(&second));
    }

    #[test]
    fn tight_buffers_still_drain() {
        let mut config = crate::networks::fat_tree("adaptive");
        config.router.input_buf_size = 3;
        config.router.output_buf_size = 3;
        let (network, delivered, stats) = run_all_to_all(&config, 3).unwrap();
        let n = network.num_endpoints();
        assert_eq!(delivered.len(), n * (n - 1));
        assert!(stats.xbar_stalls > 0);
        check_credits(&network, &config);
    }
}
