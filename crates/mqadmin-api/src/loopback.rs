// In-process transport backed by tokio channels.
//
// `LoopbackTransport` is the client half handed to a session;
// `LoopbackPeer` is the broker half. Whatever drives the peer (an embedded
// simulator, a test script) decides how each handshake and request is
// answered.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::future::BoxFuture;
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::{Mutex, mpsc, oneshot};
use tracing::debug;

use crate::error::Error;
use crate::message::{Reply, Request};
use crate::transport::Transport;

/// Traffic seen by the broker half of a loopback pair.
#[derive(Debug)]
pub enum PeerMessage {
    /// A session is opening the channel. The peer accepts or refuses the
    /// credentials through `respond`.
    Open {
        username: String,
        password: SecretString,
        respond: oneshot::Sender<Result<(), Error>>,
    },
    Request(Request),
    Close,
}

/// Client half of a loopback pair.
pub struct LoopbackTransport {
    to_peer: mpsc::UnboundedSender<PeerMessage>,
    replies: Mutex<mpsc::UnboundedReceiver<Reply>>,
    open: AtomicBool,
}

/// Broker half of a loopback pair.
pub struct LoopbackPeer {
    inbox: mpsc::UnboundedReceiver<PeerMessage>,
    replies: mpsc::UnboundedSender<Reply>,
}

/// Cloneable handle for answering from another task.
#[derive(Debug, Clone)]
pub struct ReplySender {
    tx: mpsc::UnboundedSender<Reply>,
}

impl LoopbackTransport {
    /// Create a connected transport/peer pair.
    pub fn pair() -> (Self, LoopbackPeer) {
        let (to_peer, inbox) = mpsc::unbounded_channel();
        let (replies_tx, replies_rx) = mpsc::unbounded_channel();
        let transport = Self {
            to_peer,
            replies: Mutex::new(replies_rx),
            open: AtomicBool::new(false),
        };
        let peer = LoopbackPeer {
            inbox,
            replies: replies_tx,
        };
        (transport, peer)
    }

    /// Replies left over from a previous connection must not leak into a
    /// new one.
    async fn discard_pending(&self) {
        let mut replies = self.replies.lock().await;
        let mut dropped = 0_usize;
        while replies.try_recv().is_ok() {
            dropped += 1;
        }
        if dropped > 0 {
            debug!(dropped, "discarded replies from previous connection");
        }
    }
}

impl Transport for LoopbackTransport {
    fn open<'a>(
        &'a self,
        username: &'a str,
        password: &'a SecretString,
    ) -> BoxFuture<'a, Result<(), Error>> {
        Box::pin(async move {
            self.discard_pending().await;

            let (respond, verdict) = oneshot::channel();
            self.to_peer
                .send(PeerMessage::Open {
                    username: username.to_owned(),
                    password: SecretString::from(password.expose_secret().to_owned()),
                    respond,
                })
                .map_err(|_| Error::Connect {
                    reason: "broker endpoint is not running".into(),
                })?;

            verdict.await.map_err(|_| Error::Connect {
                reason: "broker dropped the handshake".into(),
            })??;

            self.open.store(true, Ordering::Release);
            debug!(username, "loopback transport open");
            Ok(())
        })
    }

    fn close(&self) -> BoxFuture<'_, Result<(), Error>> {
        Box::pin(async move {
            if self.open.swap(false, Ordering::AcqRel) {
                // The peer may already be gone; closing still succeeds.
                let _ = self.to_peer.send(PeerMessage::Close);
                debug!("loopback transport closed");
            }
            Ok(())
        })
    }

    fn send(&self, request: Request) -> BoxFuture<'_, Result<(), Error>> {
        Box::pin(async move {
            if !self.is_open() {
                return Err(Error::NotOpen);
            }
            self.to_peer
                .send(PeerMessage::Request(request))
                .map_err(|_| {
                    self.open.store(false, Ordering::Release);
                    Error::Closed {
                        reason: "broker endpoint went away".into(),
                    }
                })
        })
    }

    fn receive(&self, window: Duration) -> BoxFuture<'_, Result<Option<Reply>, Error>> {
        Box::pin(async move {
            if !self.is_open() {
                return Err(Error::NotOpen);
            }
            let mut replies = self.replies.lock().await;
            match tokio::time::timeout(window, replies.recv()).await {
                Ok(Some(reply)) => Ok(Some(reply)),
                Ok(None) => {
                    self.open.store(false, Ordering::Release);
                    Err(Error::Closed {
                        reason: "broker endpoint went away".into(),
                    })
                }
                Err(_) => Ok(None),
            }
        })
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }
}

impl LoopbackPeer {
    /// Next message from the client half, or `None` once it is dropped.
    pub async fn recv(&mut self) -> Option<PeerMessage> {
        self.inbox.recv().await
    }

    /// Queue a reply for the client half.
    pub fn reply(&self, reply: Reply) -> Result<(), Error> {
        self.replies.send(reply).map_err(|_| Error::Closed {
            reason: "client half dropped".into(),
        })
    }

    /// Handle for replying from a different task (late or delayed replies).
    pub fn reply_sender(&self) -> ReplySender {
        ReplySender {
            tx: self.replies.clone(),
        }
    }
}

impl ReplySender {
    pub fn send(&self, reply: Reply) -> Result<(), Error> {
        self.tx.send(reply).map_err(|_| Error::Closed {
            reason: "client half dropped".into(),
        })
    }
}
