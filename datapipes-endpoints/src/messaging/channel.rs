//! Framed record transport over TCP
//!
//! Every frame is a big-endian `u32` length followed by the bincode
//! encoding of a [`Frame`].

use std::net::SocketAddr;

use bytes::Bytes;
use datapipes_core::Record;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tracing::debug;

use crate::error::{Error, Result};

/// Largest accepted frame
pub const MAX_FRAME_LENGTH: usize = 256 * 1024 * 1024;

/// Unit of transmission between a messaging sink and source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Frame {
    /// One record
    Record(Record),

    /// The sender has no more records
    Eof,
}

fn codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .length_field_length(4)
        .big_endian()
        .max_frame_length(MAX_FRAME_LENGTH)
        .new_codec()
}

/// One connected peer
#[derive(Debug)]
pub struct MessageChannel {
    framed: Framed<TcpStream, LengthDelimitedCodec>,
    peer: SocketAddr,
}

impl MessageChannel {
    fn from_stream(stream: TcpStream) -> Result<Self> {
        stream.set_nodelay(true)?;
        let peer = stream.peer_addr()?;
        Ok(Self {
            framed: Framed::new(stream, codec()),
            peer,
        })
    }

    /// Connect to a listening peer
    pub async fn connect(address: &str) -> Result<Self> {
        let stream = TcpStream::connect(address)
            .await
            .map_err(|error| Error::Transport(format!("connect to {address}: {error}")))?;
        let channel = Self::from_stream(stream)?;
        debug!(peer = %channel.peer, "connected");
        Ok(channel)
    }

    /// Wait for the next peer on `listener`
    pub async fn accept(listener: &TcpListener) -> Result<Self> {
        let (stream, _) = listener.accept().await?;
        let channel = Self::from_stream(stream)?;
        debug!(peer = %channel.peer, "accepted");
        Ok(channel)
    }

    /// Address of the peer
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Receive the next frame, or `None` when the peer closed the
    /// connection.
    pub async fn receive(&mut self) -> Result<Option<Frame>> {
        match self.framed.next().await {
            Some(Ok(bytes)) => Ok(Some(bincode::deserialize(&bytes)?)),
            Some(Err(error)) => Err(Error::Transport(format!("receive from {}: {error}", self.peer))),
            None => Ok(None),
        }
    }

    /// Send one record
    pub async fn send(&mut self, record: Record) -> Result<()> {
        self.send_frame(&Frame::Record(record)).await
    }

    /// Tell the peer no more records follow
    pub async fn send_eof(&mut self) -> Result<()> {
        self.send_frame(&Frame::Eof).await
    }

    async fn send_frame(&mut self, frame: &Frame) -> Result<()> {
        let bytes = bincode::serialize(frame)?;
        self.framed
            .send(Bytes::from(bytes))
            .await
            .map_err(|error| Error::Transport(format!("send to {}: {error}", self.peer)))
    }

    /// Flush pending frames and close the write half
    pub async fn shutdown(&mut self) -> Result<()> {
        SinkExt::<Bytes>::flush(&mut self.framed)
            .await
            .map_err(|error| Error::Transport(format!("flush to {}: {error}", self.peer)))?;
        self.framed.get_mut().shutdown().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn pair() -> (MessageChannel, MessageChannel) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let (accepted, connected) =
            tokio::join!(MessageChannel::accept(&listener), MessageChannel::connect(&address));
        (accepted.unwrap(), connected.unwrap())
    }

    #[tokio::test]
    async fn frames_arrive_in_order() {
        let (mut receiver, mut sender) = pair().await;
        for i in 0..3 {
            sender.send(Record::new(i.to_string()).with_field("txt", "x")).await.unwrap();
        }
        sender.send_eof().await.unwrap();
        sender.shutdown().await.unwrap();

        for i in 0..3 {
            match receiver.receive().await.unwrap() {
                Some(Frame::Record(record)) => assert_eq!(record.key(), i.to_string()),
                other => panic!("unexpected {other:?}"),
            }
        }
        assert_eq!(receiver.receive().await.unwrap(), Some(Frame::Eof));
        assert_eq!(receiver.receive().await.unwrap(), None);
    }

    #[tokio::test]
    async fn garbage_frame_is_an_error() {
        let (mut receiver, mut sender) = pair().await;
        sender.framed.send(Bytes::from(vec![0xff; 3])).await.unwrap();
        assert!(matches!(receiver.receive().await, Err(Error::Frame(_))));
    }

    #[tokio::test]
    async fn connect_to_nothing_is_a_transport_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        drop(listener);
        assert!(matches!(
            MessageChannel::connect(&address).await,
            Err(Error::Transport(_))
        ));
    }
}
