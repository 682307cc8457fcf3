//! Index window over a record stream

use datapipes_core::{BoxFuture, Emitter, RecordStream, Result, RunContext, Stage};
use tracing::debug;

/// Passes records whose 0-based index lies in `start..end`.
///
/// Without an end the window runs to the end of the stream. Once the
/// window is past, the stage stops reading and closes its output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slice {
    start: usize,
    end: Option<usize>,
}

impl Slice {
    /// Window `start..end`, unbounded when `end` is `None`
    pub fn new(start: usize, end: Option<usize>) -> Self {
        Self { start, end }
    }

    /// Window from command-line style bounds. A negative `end` means
    /// unbounded; a negative `start` admits every index from 0.
    pub fn from_bounds(start: i64, end: i64) -> Self {
        Self::new(usize::try_from(start).unwrap_or(0), usize::try_from(end).ok())
    }

    /// First index passed
    pub fn start(&self) -> usize {
        self.start
    }

    /// First index no longer passed, if bounded
    pub fn end(&self) -> Option<usize> {
        self.end
    }

    /// Whether no index can fall in the window
    pub fn is_empty(&self) -> bool {
        self.end.is_some_and(|end| self.start >= end)
    }
}

impl Default for Slice {
    fn default() -> Self {
        Self::new(0, None)
    }
}

impl Stage for Slice {
    fn name(&self) -> &str {
        "slice"
    }

    fn run<'a>(
        &'a mut self,
        input: &'a mut RecordStream,
        output: &'a mut Emitter,
        _ctx: &'a RunContext,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            if self.is_empty() {
                return Ok(());
            }

            let mut index = 0usize;
            while let Some(record) = input.next().await? {
                if index >= self.start {
                    output.emit(record).await?;
                }
                index += 1;
                if self.end.is_some_and(|end| index >= end) {
                    debug!(start = self.start, end = index, "slice window complete");
                    break;
                }
            }
            Ok(())
        })
    }
}
