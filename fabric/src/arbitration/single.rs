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

/// Picks one winner per round among `size` requestors.
///
/// The caller walks candidates with `next` until one is usable, then calls
/// `satisfied` to commit the grant.
pub trait SingleArbitration: fmt::Debug {
    fn next(&mut self) -> usize;
    fn satisfied(&mut self);
    fn size(&self) -> usize;
}

#[derive(Debug)]
pub struct SingleRoundRobin {
    size: usize,
    current: usize,
}

impl SingleRoundRobin {
    pub fn new(size: usize) -> Self {
        assert!(size > 0, "arbitration over no requestors");
        Self { size, current: 0 }
    }
}

impl SingleArbitration for SingleRoundRobin {
    fn next(&mut self) -> usize {
        self.current = (self.current + 1) % self.size;
        self.current
    }

    fn satisfied(&mut self) {}

    fn size(&self) -> usize {
        self.size
    }
}

/// Least recently used order kept as a circular list over `[0, size)`.
///
/// `succ[i]` is the index following `i`; `tail` links back to `head`.
#[derive(Debug)]
pub struct SingleLru {
    succ: Vec<usize>,
    head: usize,
    tail: usize,
    cursor: usize,
    // element preceding `cursor`, needed to splice it out.
    before_cursor: usize,
    pending: bool,
}

impl SingleLru {
    pub fn new(size: usize) -> Self {
        assert!(size > 0, "arbitration over no requestors");
        Self {
            succ: (0..size).map(|i| (i + 1) % size).collect(),
            head: 0,
            tail: size - 1,
            cursor: 0,
            before_cursor: size - 1,
            pending: false,
        }
    }

    /// Current order, least recently granted first.
    pub fn order(&self) -> Vec<usize> {
        let mut order = Vec::with_capacity(self.succ.len());
        let mut i = self.head;
        for _ in 0..self.succ.len() {
            order.push(i);
            i = self.succ[i];
        }
        order
    }
}

impl SingleArbitration for SingleLru {
    fn next(&mut self) -> usize {
        self.before_cursor = self.cursor;
        self.cursor = self.succ[self.cursor];
        self.pending = true;
        self.cursor
    }

    fn satisfied(&mut self) {
        if !self.pending {
            return;
        }
        self.pending = false;
        let granted = self.cursor;
        if granted == self.head {
            // the ring is closed, so moving head forward turns the old head
            // into the tail without relinking
            self.head = self.succ[granted];
            self.tail = granted;
        } else if granted != self.tail {
            self.succ[self.before_cursor] = self.succ[granted];
            self.succ[granted] = self.head;
            self.succ[self.tail] = granted;
            self.tail = granted;
        }
        self.cursor = self.head;
    }

    fn size(&self) -> usize {
        self.succ.len()
    }
}
