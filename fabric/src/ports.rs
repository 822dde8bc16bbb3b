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

use crate::arbitration::SingleArbitration;
use crate::event::RouterEvent;
use std::collections::VecDeque;
use std::fmt;

/// Credits freed in an input buffer, to be sent back upstream.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct CreditReturn {
    pub port: usize,
    pub vc: usize,
    pub flits: usize,
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct PortStatistics {
    /// events taken out of the input buffers by the crossbar.
    pub packets_received: u64,
    pub flits_received: u64,
    pub packets_sent: u64,
    pub flits_sent: u64,
    /// cycles with data in the output buffer but no downstream credit.
    pub output_stalls: u64,
    /// cycles with nothing to send.
    pub idle_cycles: u64,
}

/// One router port: per-VC input buffers filled from the link, per-VC output
/// buffers filled by the crossbar, and the credit state of both sides.
///
/// Capacities are counted in flits. The crossbar writes into the output
/// buffer only when `space_to_send` holds; the link drains it when the
/// downstream input buffer has advertised enough credits.
pub struct PortControl {
    port: usize,
    input_buf_size: usize,
    output_buf_size: usize,
    remote_buf_size: usize,
    input_queues: Vec<VecDeque<RouterEvent>>,
    input_occupancy: Vec<usize>,
    output_queues: Vec<VecDeque<RouterEvent>>,
    xbar_in_credits: Vec<usize>,
    remote_credits: Vec<usize>,
    // cycles left serialising the packet currently on the link
    link_busy: usize,
    output_arb: Box<dyn SingleArbitration>,
    credit_returns: Vec<CreditReturn>,
    stats: PortStatistics,
}

impl PortControl {
    pub fn new(
        port: usize,
        input_buf_size: usize,
        output_buf_size: usize,
        remote_buf_size: usize,
        output_arb: Box<dyn SingleArbitration>,
    ) -> Self {
        let num_vcs = output_arb.size();
        Self {
            port,
            input_buf_size,
            output_buf_size,
            remote_buf_size,
            input_queues: (0..num_vcs).map(|_| VecDeque::new()).collect(),
            input_occupancy: vec![0; num_vcs],
            output_queues: (0..num_vcs).map(|_| VecDeque::new()).collect(),
            xbar_in_credits: vec![output_buf_size; num_vcs],
            remote_credits: vec![remote_buf_size; num_vcs],
            link_busy: 0,
            output_arb,
            credit_returns: Vec::new(),
            stats: PortStatistics::default(),
        }
    }

    pub fn port(&self) -> usize {
        self.port
    }

    pub fn num_vcs(&self) -> usize {
        self.input_queues.len()
    }

    pub fn output_buf_size(&self) -> usize {
        self.output_buf_size
    }

    /// head of line event of every VC, `None` for empty queues.
    pub fn vc_heads(&self) -> Vec<Option<&RouterEvent>> {
        self.input_queues.iter().map(|q| q.front()).collect()
    }

    pub fn vc_head(&self, vc: usize) -> Option<&RouterEvent> {
        self.input_queues[vc].front()
    }

    pub fn vc_head_mut(&mut self, vc: usize) -> Option<&mut RouterEvent> {
        self.input_queues[vc].front_mut()
    }

    /// whether any input VC holds an event.
    pub fn has_data(&self) -> bool {
        self.input_queues.iter().any(|q| !q.is_empty())
    }

    pub fn input_space(&self, vc: usize, flits: usize) -> bool {
        self.input_occupancy[vc] + flits <= self.input_buf_size
    }

    /// Store an event arriving on `vc`.
    ///
    /// The upstream side only sends with credits, so the buffer can't
    /// overflow.
    pub fn push_input(&mut self, vc: usize, ev: RouterEvent) {
        let flits = ev.flit_count();
        assert!(
            self.input_space(vc, flits),
            "port {} vc {}: input buffer overflow ({} + {} > {})",
            self.port,
            vc,
            self.input_occupancy[vc],
            flits,
            self.input_buf_size
        );
        self.input_occupancy[vc] += flits;
        self.input_queues[vc].push_back(ev);
    }

    /// Whether the output buffer of `vc` can take `flits` more.
    pub fn space_to_send(&self, vc: usize, flits: usize) -> bool {
        self.xbar_in_credits[vc] >= flits
    }

    /// Dequeue the head of `vc` and free its input buffer space.
    pub fn recv(&mut self, vc: usize) -> Option<RouterEvent> {
        let ev = self.input_queues[vc].pop_front()?;
        let flits = ev.flit_count();
        self.input_occupancy[vc] -= flits;
        self.stats.packets_received += 1;
        self.stats.flits_received += flits as u64;
        self.credit_returns.push(CreditReturn {
            port: self.port,
            vc,
            flits,
        });
        Some(ev)
    }

    /// Enqueue into the output buffer of `vc`.
    ///
    /// Only called after arbitration checked `space_to_send`.
    pub fn send(&mut self, ev: RouterEvent, vc: usize) -> bool {
        let flits = ev.flit_count();
        assert!(
            self.space_to_send(vc, flits),
            "port {} vc {}: crossbar credit overdrawn",
            self.port,
            vc
        );
        self.xbar_in_credits[vc] -= flits;
        self.output_queues[vc].push_back(ev);
        true
    }

    pub fn xbar_credits(&self, vc: usize) -> usize {
        self.xbar_in_credits[vc]
    }

    /// flits waiting in the output buffer of `vc`.
    pub fn queue_length(&self, vc: usize) -> usize {
        self.output_buf_size - self.xbar_in_credits[vc]
    }

    pub fn remote_credits(&self, vc: usize) -> usize {
        self.remote_credits[vc]
    }

    pub fn input_occupancy(&self, vc: usize) -> usize {
        self.input_occupancy[vc]
    }

    pub fn return_credits(&mut self, vc: usize, flits: usize) {
        self.remote_credits[vc] += flits;
        assert!(
            self.remote_credits[vc] <= self.remote_buf_size,
            "port {} vc {}: more credits returned than advertised",
            self.port,
            vc
        );
    }

    pub fn take_credit_returns(&mut self) -> Vec<CreditReturn> {
        std::mem::take(&mut self.credit_returns)
    }

    pub fn has_output(&self) -> bool {
        self.output_queues.iter().any(|q| !q.is_empty())
    }

    /// Advance the link by one cycle.
    ///
    /// Returns the event put on the wire, if any. A packet keeps the link
    /// busy for one cycle per flit.
    pub fn transmit(&mut self) -> Option<RouterEvent> {
        if self.link_busy > 0 {
            self.link_busy -= 1;
            return None;
        }
        if !self.has_output() {
            self.stats.idle_cycles += 1;
            return None;
        }
        for _ in 0..self.num_vcs() {
            let vc = self.output_arb.next();
            let ready = match self.output_queues[vc].front() {
                Some(head) => self.remote_credits[vc] >= head.flit_count(),
                None => false,
            };
            if ready {
                self.output_arb.satisfied();
                let ev = self.output_queues[vc].pop_front()?;
                let flits = ev.flit_count();
                self.xbar_in_credits[vc] += flits;
                self.remote_credits[vc] -= flits;
                self.link_busy = flits - 1;
                self.stats.packets_sent += 1;
                self.stats.flits_sent += flits as u64;
                return Some(ev);
            }
        }
        self.stats.output_stalls += 1;
        None
    }

    pub fn statistics(&self) -> &PortStatistics {
        &self.stats
    }

    pub fn dump_state(&self, out: &mut dyn fmt::Write) -> fmt::Result {
        writeln!(out, "  port {}: link_busy {}", self.port, self.link_busy)?;
        for vc in 0..self.num_vcs() {
            writeln!(
                out,
                "    vc {}: in {} events ({} flits), out {} events, xbar credits {}, remote credits {}",
                vc,
                self.input_queues[vc].len(),
                self.input_occupancy[vc],
                self.output_queues[vc].len(),
                self.xbar_in_credits[vc],
                self.remote_credits[vc]
            )?;
        }
        Ok(())
    }
}

impl fmt::Debug for PortControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PortControl")
            .field("port", &self.port)
            .field("input_occupancy", &self.input_occupancy)
            .field("xbar_in_credits", &self.xbar_in_credits)
            .field("remote_credits", &self.remote_credits)
            .finish()
    }
}
