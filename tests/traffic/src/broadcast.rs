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

//! Init-time broadcast from every endpoint.

use fabric::{Network, NetworkConfiguration, Packet};

/// Copies received per endpoint, one row per broadcasting endpoint.
pub fn broadcast_from_everyone(config: &NetworkConfiguration) -> anyhow::Result<Vec<Vec<usize>>> {
    let mut network = Network::new(config)?;
    let n = network.num_endpoints();
    let mut rows = Vec::with_capacity(n);
    for src in 0..n {
        let mut row = vec![0; n];
        for (endpoint, packet) in network.init_transfer(Packet::broadcast(src as u64, src, 0)) {
            assert_eq!(packet.src, src);
            row[endpoint] += 1;
        }
        rows.push(row);
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::broadcast_from_everyone;
    use crate::networks::all_networks;
    use fabric::{Network, Packet};

    #[test]
    fn every_endpoint_once() {
        let _ = env_logger::try_init();
        for (name, config) in all_networks() {
            let rows = broadcast_from_everyone(&config).unwrap();
            for (src, row) in rows.iter().enumerate() {
                for (dest, &copies) in row.iter().enumerate() {
                    let expected = (src != dest) as usize;
                    assert_eq!(copies, expected, "{}: {} -> {}", name, src, dest);
                }
            }
        }
    }

    #[test]
    fn init_unicast() {
        for (name, config) in all_networks() {
            let mut network = Network::new(&config).unwrap();
            let n = network.num_endpoints();
            let got = network.init_transfer(Packet::new(1, 0, n - 1, 0, 1));
            assert_eq!(got.len(), 1, "{}", name);
            assert_eq!(got[0].0, n - 1, "{}", name);
        }
    }
}
