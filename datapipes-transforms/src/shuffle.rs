//! Bounded-window shuffle
//!
//! The first `initial` records are only buffered. From then on every
//! arrival is inserted and one uniformly random record leaves the buffer,
//! so occupancy stays at `initial` and never exceeds `bufsize`. A record
//! can be emitted at most `initial` positions earlier than it arrived;
//! how long it stays behind is only bounded in expectation.

use datapipes_core::{BoxFuture, Emitter, Error, Record, RecordStream, Result, RunContext, Stage};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

/// Randomly reorders records within a sliding window
#[derive(Debug)]
pub struct Shuffle {
    /// Maximum number of records held
    bufsize: usize,

    /// Records held before the first one is emitted
    initial: usize,

    /// Held records
    buffer: Vec<Record>,

    rng: StdRng,
}

impl Shuffle {
    /// Shuffle with the given window, seeded from the operating system
    pub fn new(bufsize: usize, initial: usize) -> Result<Self> {
        Self::with_rng(bufsize, initial, StdRng::from_os_rng())
    }

    /// Shuffle with a fixed seed, for reproducible output
    pub fn with_seed(bufsize: usize, initial: usize, seed: u64) -> Result<Self> {
        Self::with_rng(bufsize, initial, StdRng::seed_from_u64(seed))
    }

    /// Window derived from a single size `n`: `bufsize = n + 1` and
    /// `initial = n / 2 + 1`.
    pub fn from_size(n: usize) -> Result<Self> {
        Self::new(n + 1, n / 2 + 1)
    }

    fn with_rng(bufsize: usize, initial: usize, rng: StdRng) -> Result<Self> {
        if bufsize == 0 {
            return Err(Error::Config("shuffle buffer size must be positive".into()));
        }
        Ok(Self {
            bufsize,
            // The insert preceding an eviction briefly holds one more.
            initial: initial.min(bufsize - 1),
            buffer: Vec::with_capacity(bufsize),
            rng,
        })
    }

    /// Maximum number of records held
    pub fn bufsize(&self) -> usize {
        self.bufsize
    }

    /// Records held before the first emission
    pub fn initial(&self) -> usize {
        self.initial
    }

    /// Accept one record and return the record to emit, if any.
    fn push(&mut self, record: Record) -> Option<Record> {
        let held = self.buffer.len();
        self.buffer.push(record);
        if held < self.initial {
            return None;
        }
        self.take_random()
    }

    fn take_random(&mut self) -> Option<Record> {
        if self.buffer.is_empty() {
            return None;
        }
        let slot = self.rng.random_range(0..self.buffer.len());
        Some(self.buffer.swap_remove(slot))
    }
}

impl Stage for Shuffle {
    fn name(&self) -> &str {
        "shuffle"
    }

    fn run<'a>(
        &'a mut self,
        input: &'a mut RecordStream,
        output: &'a mut Emitter,
        _ctx: &'a RunContext,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            while let Some(record) = input.next().await? {
                if let Some(record) = self.push(record) {
                    output.emit(record).await?;
                }
            }

            debug!(remaining = self.buffer.len(), "draining shuffle buffer");
            while let Some(record) = self.take_random() {
                output.emit(record).await?;
            }
            Ok(())
        })
    }

    fn preserves_order(&self) -> bool {
        false
    }
}
