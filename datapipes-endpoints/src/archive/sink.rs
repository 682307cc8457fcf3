//! Sink writing records into a single tar container

use std::fs::File;
use std::io::{self, BufWriter, Write};

use datapipes_core::{BoxFuture, Record, RecordStream, Result, RunContext, Sink};
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::codec::TarWriter;
use super::STDIO;

/// Work items for the encoding thread
enum Command {
    Write(Record),
    Finish,
}

/// Writes every record into one tar container, finalized at end of stream.
///
/// A faulted or cancelled input leaves the members written so far in
/// place without end-of-archive blocks.
#[derive(Debug, Clone)]
pub struct ArchiveSink {
    /// Output path, `-` for standard output
    location: String,

    /// Description used in logs and errors
    name: String,
}

impl ArchiveSink {
    /// Sink writing to `location`
    pub fn new(location: impl Into<String>) -> Self {
        let location = location.into();
        let name = format!("archive {location}");
        Self { location, name }
    }

    /// Output location
    pub fn location(&self) -> &str {
        &self.location
    }
}

fn create(location: &str) -> io::Result<Box<dyn Write>> {
    if location == STDIO {
        Ok(Box::new(io::stdout().lock()))
    } else {
        Ok(Box::new(BufWriter::new(File::create(location)?)))
    }
}

/// Encode commands until `Finish` or until the sending side is dropped.
fn encode(location: &str, rx: &mut mpsc::Receiver<Command>) -> crate::Result<u64> {
    info!(location = %location, "creating container");
    let mut writer = TarWriter::new(create(location)?);
    while let Some(command) = rx.blocking_recv() {
        match command {
            Command::Write(record) => writer.write_record(&record)?,
            Command::Finish => {
                let written = writer.records_written();
                writer.finish()?;
                return Ok(written);
            }
        }
    }
    debug!(location = %location, "container abandoned before end of stream");
    Ok(writer.records_written())
}

impl Sink for ArchiveSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn run<'a>(&'a mut self, input: &'a mut RecordStream, ctx: &'a RunContext) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let (tx, mut rx) = mpsc::channel(ctx.config().channel_capacity.max(1));
            let location = self.location.clone();
            let writer = tokio::task::spawn_blocking(move || {
                encode(&location, &mut rx).map_err(|error| error.at(&location))
            });

            loop {
                let command = match input.next().await? {
                    Some(record) => Command::Write(record),
                    None => Command::Finish,
                };
                let finishing = matches!(command, Command::Finish);
                if tx.send(command).await.is_err() {
                    // The encoder stopped early, which only happens on a fault.
                    break;
                }
                if finishing {
                    break;
                }
            }
            drop(tx);

            let written = writer.await??;
            debug!(location = %self.location, records = written, "container finished");
            Ok(())
        })
    }
}
