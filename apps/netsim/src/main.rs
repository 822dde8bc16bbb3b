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

//! Synthetic traffic over a network of crossbar routers.

use anyhow::Context;
use env_logger::Target;
use std::path::PathBuf;
use structopt::StructOpt;

use fabric::{Network, NetworkConfiguration};

mod traffic;

use traffic::{Traffic, TrafficPattern};

#[derive(StructOpt)]
#[structopt(name = "netsim", about = "Run synthetic traffic through a router network")]
struct Arguments {
    /// network description (YAML)
    #[structopt(parse(from_os_str))]
    config: PathBuf,
    /// cycles with traffic injection
    #[structopt(short, long, default_value = "1000")]
    cycles: usize,
    /// injection probability per endpoint and cycle
    #[structopt(short, long, default_value = "0.1")]
    rate: f64,
    /// supported patterns: uniform, neighbor, transpose
    #[structopt(short, long, default_value = "uniform")]
    pattern: TrafficPattern,
    /// packet size in flits
    #[structopt(short, long, default_value = "1")]
    size: usize,
    #[structopt(long, default_value = "1")]
    seed: u64,
    /// cycles allowed to drain the network once injection stops
    #[structopt(long, default_value = "100000")]
    drain: usize,
}

fn main() -> anyhow::Result<()> {
    let args = Arguments::from_args();

    let _logger = env_logger::builder()
        .filter(Some("netsim"), log::LevelFilter::Info)
        .target(Target::Stderr)
        .init();

    let config = NetworkConfiguration::from_file(&args.config)
        .with_context(|| format!("failed to load {}", args.config.display()))?;
    let mut network = Network::new(&config).context("failed to build the network")?;
    log::info!(
        "{} routers, {} endpoints",
        network.num_routers(),
        network.num_endpoints()
    );

    let mut traffic = Traffic::new(
        args.pattern,
        args.rate,
        args.size,
        network.num_endpoints(),
        args.seed,
    )?;
    for _ in 0..args.cycles {
        for packet in traffic.generate() {
            network.send(packet)?;
        }
        network.step();
    }
    let end = network.run_until_drained(args.drain)?;

    let stats = network.statistics();
    log::info!(
        "{} packets delivered of {} injected in {} cycles",
        stats.delivered,
        stats.injected,
        end
    );
    log::info!(
        "latency: mean {:.2}, max {}",
        stats.mean_latency(),
        stats.max_latency
    );
    log::info!(
        "crossbar stalls {}, declocked router cycles {}",
        stats.xbar_stalls,
        stats.idle_router_cycles
    );
    if !stats.hop_counts.is_empty() {
        log::info!("hops: {:?}", stats.hop_counts);
    }
    Ok(())
}
