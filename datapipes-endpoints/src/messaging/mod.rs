//! Record transport between processes over TCP
//!
//! A messaging sink in one process feeds a messaging source in another.
//! Exactly one side listens; which one depends on the location scheme
//! (see [`crate::location`]). With EOF signalling enabled the sink ends
//! its stream with an explicit [`Frame::Eof`], which closes the source's
//! stream in turn.

mod channel;
mod sink;
mod source;

pub use channel::{Frame, MessageChannel, MAX_FRAME_LENGTH};
pub use sink::MessagingSink;
pub use source::MessagingSource;

use std::time::Duration;

use tokio::net::TcpListener;
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Delay before the first connect retry
const CONNECT_BACKOFF: Duration = Duration::from_millis(50);

/// Longest delay between connect retries
const MAX_CONNECT_BACKOFF: Duration = Duration::from_secs(2);

/// How an endpoint reaches its peer
#[derive(Debug)]
pub enum Endpoint {
    /// Connect to a listening peer
    Connect(String),

    /// Accept peers on `address`, bound on first use
    Listen {
        /// Address to bind
        address: String,

        /// Bound listener, kept across peers
        listener: Option<TcpListener>,
    },
}

impl Endpoint {
    /// Endpoint connecting to `address`
    pub fn connect(address: impl Into<String>) -> Self {
        Self::Connect(address.into())
    }

    /// Endpoint binding `address` when first opened
    pub fn bind(address: impl Into<String>) -> Self {
        Self::Listen {
            address: address.into(),
            listener: None,
        }
    }

    /// Endpoint accepting on an already bound listener
    pub fn from_listener(listener: TcpListener) -> Result<Self> {
        Ok(Self::Listen {
            address: listener.local_addr()?.to_string(),
            listener: Some(listener),
        })
    }

    /// Whether this side waits for peers
    pub fn is_listening(&self) -> bool {
        matches!(self, Self::Listen { .. })
    }

    /// Human-readable form used in component names
    pub fn describe(&self) -> String {
        match self {
            Self::Connect(address) => format!("connect {address}"),
            Self::Listen { address, .. } => format!("bind {address}"),
        }
    }

    /// Open a channel to one peer.
    ///
    /// A connecting endpoint keeps retrying until its peer listens, so
    /// either side may start first; the run's cancellation ends the wait.
    async fn open(&mut self) -> Result<MessageChannel> {
        match self {
            Self::Connect(address) => connect_with_backoff(address).await,
            Self::Listen { address, listener } => {
                let bound = match listener.take() {
                    Some(bound) => bound,
                    None => {
                        let bound = TcpListener::bind(address.as_str()).await?;
                        info!(address = %bound.local_addr()?, "listening for peers");
                        bound
                    }
                };
                let channel = MessageChannel::accept(&bound).await;
                *listener = Some(bound);
                channel
            }
        }
    }
}

async fn connect_with_backoff(address: &str) -> Result<MessageChannel> {
    let mut backoff = CONNECT_BACKOFF;
    let mut attempts = 0u32;
    loop {
        match MessageChannel::connect(address).await {
            Ok(channel) => return Ok(channel),
            Err(Error::Transport(reason)) => {
                attempts += 1;
                if attempts == 1 {
                    info!(%address, "peer not reachable yet, retrying");
                }
                debug!(%address, attempts, %reason, ?backoff, "connect failed");
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(MAX_CONNECT_BACKOFF);
            }
            Err(error) => return Err(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connect_waits_for_a_late_listener() {
        let address = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().to_string()
        };

        let mut endpoint = Endpoint::connect(address.clone());
        let connecting = tokio::spawn(async move { endpoint.open().await.map(|channel| channel.peer()) });

        tokio::time::sleep(Duration::from_millis(200)).await;
        let listener = TcpListener::bind(address.as_str()).await.unwrap();
        let accepted = MessageChannel::accept(&listener).await.unwrap();

        let peer = connecting.await.unwrap().unwrap();
        assert_eq!(peer, listener.local_addr().unwrap());
        drop(accepted);
    }
}
