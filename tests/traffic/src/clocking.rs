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

//! Routers declock when idle and pick up where they left off.

use fabric::{Delivery, Network, NetworkConfiguration, Packet};

/// Send packets from `src` to `dest` in bursts separated by `gap` idle
/// cycles.
pub fn run_bursts(
    config: &NetworkConfiguration,
    src: usize,
    dest: usize,
    bursts: usize,
    gap: usize,
) -> anyhow::Result<(Network, Vec<Delivery>)> {
    let mut network = Network::new(config)?;
    for burst in 0..bursts {
        for i in 0..4 {
            network.send(Packet::new((burst * 4 + i) as u64, src, dest, 0, 2))?;
        }
        network.run_until_drained(10_000)?;
        network.run(gap);
    }
    let delivered = network.take_delivered();
    Ok((network, delivered))
}

#[cfg(test)]
mod tests {
    use super::run_bursts;
    use crate::networks::{dragonfly, hyperx};

    #[test]
    fn bursts_with_gaps() {
        let _ = env_logger::try_init();
        let config = hyperx("DOR");
        let (network, delivered) = run_bursts(&config, 0, 17, 5, 50).unwrap();
        assert_eq!(delivered.len(), 20);
        // every burst sees the same empty network
        let latencies: Vec<usize> = delivered.iter().map(|d| d.latency()).collect();
        for burst in latencies.chunks(4) {
            assert_eq!(burst, &latencies[..4]);
        }
        let stats = network.statistics();
        assert!(stats.idle_router_cycles > 0);
        // routers off the path never clock past their first cycle
        let busy: Vec<u64> = (0..network.num_routers())
            .map(|r| network.router(r).statistics().clocked_cycles)
            .collect();
        assert!(busy.iter().filter(|&&c| c == 0).count() > 0, "{:?}", busy);
    }

    #[test]
    fn declocked_routers_reclock() {
        let config = dragonfly("valiant");
        let (network, delivered) = run_bursts(&config, 3, 25, 3, 200).unwrap();
        assert_eq!(delivered.len(), 12);
        for r in 0..network.num_routers() {
            assert!(network.router(r).is_clocked() || !network.router(r).has_data());
        }
    }
}
