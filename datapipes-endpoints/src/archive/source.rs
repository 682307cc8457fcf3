//! Source reading records from a list of tar containers

use std::fs::File;
use std::io::{self, BufReader, Read};

use datapipes_core::{BoxFuture, Emitter, Record, Result, RunContext, Source};
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::codec::TarReader;
use super::STDIO;

/// Reads tar containers in order and emits their records as one stream.
///
/// Decoding happens on a blocking thread; records cross over to the async
/// side through a bounded channel so at most `capacity` decoded records
/// are held at a time.
#[derive(Debug, Clone)]
pub struct ArchiveSource {
    /// Container paths, `-` for standard input
    locations: Vec<String>,

    /// Description used in logs and errors
    name: String,
}

impl ArchiveSource {
    /// Source over the given containers, read in list order
    pub fn new(locations: Vec<String>) -> Self {
        let name = format!("archive {}", locations.join(" "));
        Self { locations, name }
    }

    /// Container locations
    pub fn locations(&self) -> &[String] {
        &self.locations
    }
}

fn open(location: &str) -> io::Result<Box<dyn Read>> {
    if location == STDIO {
        Ok(Box::new(io::stdin().lock()))
    } else {
        Ok(Box::new(BufReader::new(File::open(location)?)))
    }
}

/// Decode one container into `tx`. Returns `false` once the receiver is
/// gone.
fn decode(location: &str, tx: &mpsc::Sender<Result<Record>>) -> crate::Result<bool> {
    let mut reader = TarReader::new(open(location)?);
    for record in reader.records()? {
        if tx.blocking_send(Ok(record?)).is_err() {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Decode every container in order. The first fault is sent through the
/// channel and ends decoding.
fn decode_all(locations: &[String], tx: &mpsc::Sender<Result<Record>>) {
    for location in locations {
        info!(location = %location, "opening container");
        match decode(location, tx) {
            Ok(true) => {}
            Ok(false) => {
                debug!(location = %location, "archive source released");
                return;
            }
            Err(error) => {
                let _ = tx.blocking_send(Err(error.at(location).into()));
                return;
            }
        }
    }
}

impl Source for ArchiveSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn run<'a>(&'a mut self, output: &'a mut Emitter, ctx: &'a RunContext) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let (tx, mut rx) = mpsc::channel(ctx.config().channel_capacity.max(1));
            let locations = self.locations.clone();
            let reader = tokio::task::spawn_blocking(move || decode_all(&locations, &tx));

            while let Some(record) = rx.recv().await {
                output.emit(record?).await?;
            }
            reader.await?;
            Ok(())
        })
    }
}
