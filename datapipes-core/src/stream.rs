//! Bounded single-producer, single-consumer record streams
//!
//! A stream carries records in emission order followed by exactly one
//! terminal event: an end marker after [`Emitter::close`], or a fault
//! marker after [`Emitter::fail`]. A producer that is dropped without
//! sending either is seen by the consumer as a fault.

use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::record::Record;

/// Items travelling over a stream
#[derive(Debug)]
enum Message {
    Record(Record),
    End,
    Fault(String),
}

/// Create a connected producer/consumer pair holding at most `capacity`
/// records in flight.
pub fn channel(capacity: usize) -> (Emitter, RecordStream) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        Emitter {
            tx: Some(tx),
            emitted: 0,
        },
        RecordStream {
            rx,
            finished: false,
            received: 0,
        },
    )
}

/// Producing half of a record stream
#[derive(Debug)]
pub struct Emitter {
    /// Sender, taken once the terminal event has been sent
    tx: Option<mpsc::Sender<Message>>,

    /// Records emitted so far
    emitted: u64,
}

impl Emitter {
    /// Send one record, waiting while the stream is full.
    ///
    /// Fails with [`Error::DownstreamClosed`] once the consumer has gone
    /// away and [`Error::StreamClosed`] after the stream was terminated.
    pub async fn emit(&mut self, record: Record) -> Result<()> {
        let tx = self.tx.as_ref().ok_or(Error::StreamClosed)?;
        tx.send(Message::Record(record))
            .await
            .map_err(|_| Error::DownstreamClosed)?;
        self.emitted += 1;
        Ok(())
    }

    /// Send the end marker. Only the first call sends anything.
    pub async fn close(&mut self) -> Result<()> {
        let Some(tx) = self.tx.take() else {
            return Ok(());
        };
        tx.send(Message::End)
            .await
            .map_err(|_| Error::DownstreamClosed)
    }

    /// Terminate the stream with a fault marker.
    ///
    /// Never waits: if the stream is full the marker is dropped and the
    /// consumer observes the disconnect instead.
    pub fn fail(&mut self, error: &Error) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.try_send(Message::Fault(error.to_string()));
        }
    }

    /// Whether a terminal event has been sent
    pub fn is_closed(&self) -> bool {
        self.tx.is_none()
    }

    /// Number of records emitted
    pub fn emitted(&self) -> u64 {
        self.emitted
    }

    /// Settle the stream after its producer finished with `result`.
    ///
    /// Success closes the stream. A vanished consumer is a normal early
    /// stop and also counts as success. Any other error is forwarded as a
    /// fault marker and returned.
    pub async fn settle(&mut self, result: Result<()>) -> Result<()> {
        match result {
            Ok(()) | Err(Error::DownstreamClosed) => match self.close().await {
                Ok(()) | Err(Error::DownstreamClosed) => Ok(()),
                Err(error) => Err(error),
            },
            Err(error) => {
                self.fail(&error);
                Err(error)
            }
        }
    }
}

/// Consuming half of a record stream
#[derive(Debug)]
pub struct RecordStream {
    /// Receiver
    rx: mpsc::Receiver<Message>,

    /// Set once the terminal event was observed
    finished: bool,

    /// Records received so far
    received: u64,
}

impl RecordStream {
    /// Receive the next record.
    ///
    /// Returns `Ok(None)` at the end marker and [`Error::Upstream`] if the
    /// producer faulted. Reading past the terminal event is
    /// [`Error::ReadAfterEnd`].
    pub async fn next(&mut self) -> Result<Option<Record>> {
        if self.finished {
            return Err(Error::ReadAfterEnd);
        }
        match self.rx.recv().await {
            Some(Message::Record(record)) => {
                self.received += 1;
                Ok(Some(record))
            }
            Some(Message::End) => {
                self.finished = true;
                self.rx.close();
                Ok(None)
            }
            Some(Message::Fault(reason)) => {
                self.finished = true;
                Err(Error::Upstream(reason))
            }
            None => {
                self.finished = true;
                Err(Error::Upstream(
                    "producer exited without closing the stream".into(),
                ))
            }
        }
    }

    /// Stop accepting records so a blocked producer wakes up with
    /// [`Error::DownstreamClosed`].
    pub fn release(&mut self) {
        self.rx.close();
    }

    /// Whether the terminal event was observed
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Number of records received
    pub fn received(&self) -> u64 {
        self.received
    }

    /// Drain the stream into a vector
    pub async fn collect(mut self) -> Result<Vec<Record>> {
        let mut records = Vec::new();
        while let Some(record) = self.next().await? {
            records.push(record);
        }
        Ok(records)
    }
}

/// Copy every record from `input` to `output` until the end marker.
///
/// Does not close `output`.
pub async fn forward(input: &mut RecordStream, output: &mut Emitter) -> Result<u64> {
    let mut count = 0;
    while let Some(record) = input.next().await? {
        output.emit(record).await?;
        count += 1;
    }
    Ok(count)
}
