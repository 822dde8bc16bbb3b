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

use crate::all_to_all::run_all_to_all;
use crate::broadcast::broadcast_from_everyone;
use crate::clocking::run_bursts;

mod all_to_all;
mod broadcast;
mod clocking;
mod networks;

fn main() -> anyhow::Result<()> {
    env_logger::init();

    for (name, config) in networks::all_networks() {
        let (_, delivered, stats) = run_all_to_all(&config, 3)?;
        log::info!(
            "{}: {} delivered, mean latency {:.1}, max {}, {} crossbar stalls",
            name,
            delivered.len(),
            stats.mean_latency(),
            stats.max_latency,
            stats.xbar_stalls
        );
        let rows = broadcast_from_everyone(&config)?;
        let copies: usize = rows.iter().flatten().sum();
        log::info!("{}: {} broadcast copies", name, copies);
    }

    let (network, delivered) = run_bursts(&networks::hyperx("DOR"), 0, 17, 5, 50)?;
    log::info!(
        "bursts: {} delivered, {} router cycles declocked",
        delivered.len(),
        network.statistics().idle_router_cycles
    );
    Ok(())
}
