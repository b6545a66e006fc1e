use crate::error::SignalingError;
use crate::signaling::message::SignalMessage;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Raw frames coming up from a transport.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    Text(String),
    Closed(String),
}

/// An open duplex connection to the matching server.
pub struct SignalingLink {
    pub outbound: mpsc::UnboundedSender<SignalMessage>,
    pub inbound: mpsc::UnboundedReceiver<LinkEvent>,
}

#[async_trait]
pub trait SignalingConnector: Send + Sync {
    async fn open(&self, session_id: &str) -> Result<SignalingLink, SignalingError>;
}

/// Events posted by the channel's pump task, tagged with the connection generation.
#[derive(Debug)]
pub enum ChannelEvent {
    Opened {
        generation: u64,
        outbound: mpsc::UnboundedSender<SignalMessage>,
    },
    Message {
        generation: u64,
        message: SignalMessage,
    },
    Closed {
        generation: u64,
        reason: String,
    },
}

/// What a current-generation [`ChannelEvent`] means to the owner.
#[derive(Debug, PartialEq)]
pub enum ChannelNotice {
    Opened,
    Message(SignalMessage),
    Lost(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelStatus {
    Closed,
    Connecting,
    Open,
}

enum Link {
    Closed,
    Connecting,
    Open(mpsc::UnboundedSender<SignalMessage>),
}

/// Single signaling connection per session.
///
/// `connect` is guarded: while a connection is connecting or open a second
/// request is a no-op. JOIN is sent as the first frame on every open and at
/// most one JOIN is outstanding until the server answers with a match.
/// The channel never reconnects on its own.
pub struct SignalingChannel {
    connector: Arc<dyn SignalingConnector>,
    events: mpsc::UnboundedSender<ChannelEvent>,
    session_id: String,
    generation: u64,
    link: Link,
    join_outstanding: bool,
    pump: Option<JoinHandle<()>>,
}

impl SignalingChannel {
    pub fn new(
        connector: Arc<dyn SignalingConnector>,
        session_id: impl Into<String>,
        events: mpsc::UnboundedSender<ChannelEvent>,
    ) -> Self {
        Self {
            connector,
            events,
            session_id: session_id.into(),
            generation: 0,
            link: Link::Closed,
            join_outstanding: false,
            pump: None,
        }
    }

    pub fn status(&self) -> ChannelStatus {
        match self.link {
            Link::Closed => ChannelStatus::Closed,
            Link::Connecting => ChannelStatus::Connecting,
            Link::Open(_) => ChannelStatus::Open,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Returns `false` when a connection is already connecting or open.
    pub fn connect(&mut self) -> bool {
        if !matches!(self.link, Link::Closed) {
            debug!(
                session_id = %self.session_id,
                generation = self.generation,
                "signaling channel already active; connect ignored"
            );
            return false;
        }
        self.generation += 1;
        self.link = Link::Connecting;
        self.join_outstanding = false;
        let generation = self.generation;
        let connector = Arc::clone(&self.connector);
        let events = self.events.clone();
        let session_id = self.session_id.clone();
        debug!(%session_id, generation, "opening signaling channel");
        self.pump = Some(tokio::spawn(async move {
            pump(connector, session_id, generation, events).await;
        }));
        true
    }

    /// Opens the channel if needed, otherwise queues a JOIN unless one is outstanding.
    pub fn request_match(&mut self) {
        match self.link {
            Link::Closed => {
                self.connect();
            }
            Link::Connecting => {}
            Link::Open(_) => self.join(),
        }
    }

    fn join(&mut self) {
        if self.join_outstanding {
            debug!(session_id = %self.session_id, "join already outstanding");
            return;
        }
        if self.send(SignalMessage::join(&self.session_id)) {
            self.join_outstanding = true;
        }
    }

    pub fn send(&self, message: SignalMessage) -> bool {
        match &self.link {
            Link::Open(outbound) => {
                debug!(kind = %message.kind, generation = self.generation, "signaling send");
                outbound.send(message).is_ok()
            }
            _ => {
                debug!(kind = %message.kind, "signaling channel not open; dropping message");
                false
            }
        }
    }

    /// Applies a pump event; stale generations yield `None`.
    pub fn accept(&mut self, event: ChannelEvent) -> Option<ChannelNotice> {
        match event {
            ChannelEvent::Opened {
                generation,
                outbound,
            } => {
                if generation != self.generation || !matches!(self.link, Link::Connecting) {
                    debug!(generation, "dropping stale signaling connection");
                    return None;
                }
                self.link = Link::Open(outbound);
                self.join();
                Some(ChannelNotice::Opened)
            }
            ChannelEvent::Message {
                generation,
                message,
            } => {
                if generation != self.generation || !matches!(self.link, Link::Open(_)) {
                    return None;
                }
                if message.kind.is_match() {
                    self.join_outstanding = false;
                }
                Some(ChannelNotice::Message(message))
            }
            ChannelEvent::Closed { generation, reason } => {
                if generation != self.generation || matches!(self.link, Link::Closed) {
                    return None;
                }
                self.link = Link::Closed;
                self.join_outstanding = false;
                self.pump = None;
                Some(ChannelNotice::Lost(reason))
            }
        }
    }

    /// Idempotent. Later events from the closed connection are discarded.
    pub fn close(&mut self) {
        if matches!(self.link, Link::Closed) {
            return;
        }
        debug!(session_id = %self.session_id, generation = self.generation, "closing signaling channel");
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
        self.link = Link::Closed;
        self.join_outstanding = false;
        self.generation += 1;
    }
}

impl Drop for SignalingChannel {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
    }
}

async fn pump(
    connector: Arc<dyn SignalingConnector>,
    session_id: String,
    generation: u64,
    events: mpsc::UnboundedSender<ChannelEvent>,
) {
    let mut link = match connector.open(&session_id).await {
        Ok(link) => link,
        Err(err) => {
            warn!(%session_id, generation, error = %err, "signaling connect failed");
            let _ = events.send(ChannelEvent::Closed {
                generation,
                reason: err.to_string(),
            });
            return;
        }
    };
    if events
        .send(ChannelEvent::Opened {
            generation,
            outbound: link.outbound.clone(),
        })
        .is_err()
    {
        return;
    }
    drop(link.outbound);

    let reason = loop {
        match link.inbound.recv().await {
            Some(LinkEvent::Text(text)) => match SignalMessage::decode(&text) {
                Ok(message) => {
                    if events
                        .send(ChannelEvent::Message {
                            generation,
                            message,
                        })
                        .is_err()
                    {
                        return;
                    }
                }
                Err(err) => {
                    warn!(generation, error = %err, len = text.len(), "dropping malformed signaling frame");
                }
            },
            Some(LinkEvent::Closed(reason)) => break reason,
            None => break "signaling transport ended".to_string(),
        }
    };
    debug!(generation, %reason, "signaling channel closed");
    let _ = events.send(ChannelEvent::Closed { generation, reason });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signaling::message::MessageType;
    use parking_lot::Mutex;
    use std::time::Duration;
    use tokio::time::timeout;

    struct ServerEnd {
        from_client: mpsc::UnboundedReceiver<SignalMessage>,
        to_client: mpsc::UnboundedSender<LinkEvent>,
    }

    #[derive(Default)]
    struct LoopbackConnector {
        opens: Mutex<Vec<ServerEnd>>,
    }

    #[async_trait]
    impl SignalingConnector for LoopbackConnector {
        async fn open(&self, _session_id: &str) -> Result<SignalingLink, SignalingError> {
            let (outbound, from_client) = mpsc::unbounded_channel();
            let (to_client, inbound) = mpsc::unbounded_channel();
            self.opens.lock().push(ServerEnd {
                from_client,
                to_client,
            });
            Ok(SignalingLink { outbound, inbound })
        }
    }

    async fn next(rx: &mut mpsc::UnboundedReceiver<ChannelEvent>) -> ChannelEvent {
        timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("channel event")
            .expect("event stream open")
    }

    #[tokio::test]
    async fn second_connect_is_short_circuited() {
        let connector = Arc::new(LoopbackConnector::default());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut channel = SignalingChannel::new(connector.clone(), "s1", tx);

        assert!(channel.connect());
        assert!(!channel.connect());
        channel.request_match();
        assert_eq!(channel.status(), ChannelStatus::Connecting);

        let opened = next(&mut rx).await;
        assert_eq!(channel.accept(opened), Some(ChannelNotice::Opened));
        assert!(!channel.connect());
        assert_eq!(connector.opens.lock().len(), 1);
    }

    #[tokio::test]
    async fn join_is_first_frame_and_not_repeated() {
        let connector = Arc::new(LoopbackConnector::default());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut channel = SignalingChannel::new(connector.clone(), "s1", tx);
        channel.connect();
        let opened = next(&mut rx).await;
        channel.accept(opened);
        channel.request_match();

        let mut server = connector.opens.lock().pop().unwrap();
        let first = server.from_client.recv().await.unwrap();
        assert_eq!(first.kind, MessageType::Join);
        assert_eq!(first.session_id, "s1");
        assert!(server.from_client.try_recv().is_err());

        server
            .to_client
            .send(LinkEvent::Text(r#"{"type":"MATCHED","roomId":"r1"}"#.into()))
            .unwrap();
        let matched = next(&mut rx).await;
        assert!(matches!(
            channel.accept(matched),
            Some(ChannelNotice::Message(_))
        ));
        channel.request_match();
        assert_eq!(
            server.from_client.recv().await.unwrap().kind,
            MessageType::Join
        );
    }

    #[tokio::test]
    async fn malformed_frames_are_dropped() {
        let connector = Arc::new(LoopbackConnector::default());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut channel = SignalingChannel::new(connector.clone(), "s1", tx);
        channel.connect();
        let opened = next(&mut rx).await;
        channel.accept(opened);

        let server = connector.opens.lock().pop().unwrap();
        server.to_client.send(LinkEvent::Text("{not json".into())).unwrap();
        server
            .to_client
            .send(LinkEvent::Text(r#"{"type":"SYSTEM","content":"hi"}"#.into()))
            .unwrap();
        match next(&mut rx).await {
            ChannelEvent::Message { message, .. } => assert_eq!(message.kind, MessageType::System),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn events_after_close_are_stale() {
        let connector = Arc::new(LoopbackConnector::default());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut channel = SignalingChannel::new(connector.clone(), "s1", tx);
        channel.connect();
        let opened = next(&mut rx).await;
        channel.accept(opened);
        let old_generation = channel.generation();

        channel.close();
        channel.close();
        assert_eq!(channel.status(), ChannelStatus::Closed);
        assert!(!channel.send(SignalMessage::join("s1")));
        assert_eq!(
            channel.accept(ChannelEvent::Closed {
                generation: old_generation,
                reason: "late".into()
            }),
            None
        );
    }

    #[tokio::test]
    async fn remote_close_is_reported_once() {
        let connector = Arc::new(LoopbackConnector::default());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut channel = SignalingChannel::new(connector.clone(), "s1", tx);
        channel.connect();
        let opened = next(&mut rx).await;
        channel.accept(opened);

        let server = connector.opens.lock().pop().unwrap();
        server
            .to_client
            .send(LinkEvent::Closed("going away".into()))
            .unwrap();
        let closed = next(&mut rx).await;
        assert_eq!(
            channel.accept(closed),
            Some(ChannelNotice::Lost("going away".into()))
        );
        assert_eq!(channel.status(), ChannelStatus::Closed);
    }
}
