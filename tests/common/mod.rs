#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use randchat::error::{MediaError, PeerError, SignalingError};
use randchat::events::ChatEvent;
use randchat::peer::engine::{PeerEvents, PeerFactory, PeerLink};
use randchat::peer::media::{LocalMediaStream, LocalTrack, MediaDevices};
use randchat::peer::types::{IceCandidate, MediaKind, PeerEvent, SdpPayload, ServerConfig};
use randchat::signaling::{LinkEvent, MessageType, SignalMessage, SignalingConnector, SignalingLink};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{sleep, timeout, Instant};

pub const WAIT: Duration = Duration::from_secs(3);

// ---------- signaling ----------

/// Server side of one fake signaling connection.
pub struct ServerEnd {
    pub session_id: String,
    from_client: mpsc::UnboundedReceiver<SignalMessage>,
    to_client: mpsc::UnboundedSender<LinkEvent>,
}

impl ServerEnd {
    pub async fn recv(&mut self) -> SignalMessage {
        timeout(WAIT, self.from_client.recv())
            .await
            .expect("client message")
            .expect("client connection open")
    }

    /// Skips frames until one of `kind` arrives.
    pub async fn recv_kind(&mut self, kind: MessageType) -> SignalMessage {
        loop {
            let msg = self.recv().await;
            if msg.kind == kind {
                return msg;
            }
        }
    }

    /// Everything the client sent within `window`. `None` marks a closed connection.
    pub async fn drain(&mut self, window: Duration) -> (Vec<SignalMessage>, bool) {
        let mut out = Vec::new();
        let deadline = Instant::now() + window;
        loop {
            match timeout(deadline.saturating_duration_since(Instant::now()), self.from_client.recv())
                .await
            {
                Ok(Some(msg)) => out.push(msg),
                Ok(None) => return (out, true),
                Err(_) => return (out, false),
            }
        }
    }

    pub fn send_json(&self, json: &str) {
        self.to_client
            .send(LinkEvent::Text(json.to_string()))
            .expect("client listening");
    }

    pub fn close(&self, reason: &str) {
        let _ = self.to_client.send(LinkEvent::Closed(reason.to_string()));
    }
}

pub struct FakeConnector {
    connections: mpsc::UnboundedSender<ServerEnd>,
    refuse: AtomicBool,
    pub opens: AtomicUsize,
}

impl FakeConnector {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<ServerEnd>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                connections: tx,
                refuse: AtomicBool::new(false),
                opens: AtomicUsize::new(0),
            }),
            rx,
        )
    }

    pub fn refuse_connections(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }
}

#[async_trait]
impl SignalingConnector for FakeConnector {
    async fn open(&self, session_id: &str) -> Result<SignalingLink, SignalingError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        if self.refuse.load(Ordering::SeqCst) {
            return Err(SignalingError::Connect("connection refused".into()));
        }
        let (outbound, from_client) = mpsc::unbounded_channel();
        let (to_client, inbound) = mpsc::unbounded_channel();
        let _ = self.connections.send(ServerEnd {
            session_id: session_id.to_string(),
            from_client,
            to_client,
        });
        Ok(SignalingLink { outbound, inbound })
    }
}

pub async fn next_connection(rx: &mut mpsc::UnboundedReceiver<ServerEnd>) -> ServerEnd {
    timeout(WAIT, rx.recv())
        .await
        .expect("signaling connection")
        .expect("connector alive")
}

pub fn matched_json(room: &str, initiator: bool, mode: Option<&str>) -> String {
    let mut value = serde_json::json!({
        "type": "MATCHED",
        "roomId": room,
        "isInitiator": initiator,
        "partnerUsername": "Stranger",
    });
    if let Some(mode) = mode {
        value["chatMode"] = serde_json::Value::String(mode.to_string());
    }
    value.to_string()
}

pub fn candidate(n: u16) -> IceCandidate {
    IceCandidate {
        candidate: format!("candidate:{n} 1 udp 2122260223 192.168.1.{n} 5000{n} typ host"),
        sdp_mid: Some("0".into()),
        sdp_mline_index: Some(0),
        username_fragment: None,
    }
}

pub fn candidate_json(c: &IceCandidate) -> String {
    SignalMessage::ice_candidate("partner", Some("r1"), c)
        .unwrap()
        .encode()
        .unwrap()
}

pub fn offer_json() -> String {
    SignalMessage::description("partner", Some("r1"), &SdpPayload::offer("remote-offer"))
        .unwrap()
        .encode()
        .unwrap()
}

pub fn answer_json() -> String {
    SignalMessage::description("partner", Some("r1"), &SdpPayload::answer("remote-answer"))
        .unwrap()
        .encode()
        .unwrap()
}

// ---------- peers ----------

#[derive(Default)]
pub struct PeerLedger {
    pub created: AtomicUsize,
    pub closed: AtomicUsize,
    pub live: AtomicUsize,
    pub max_live: AtomicUsize,
    pub offers: AtomicUsize,
    pub answers: AtomicUsize,
    pub with_media: AtomicUsize,
    pub receive_only: AtomicUsize,
    pub remote_descriptions: Mutex<Vec<SdpPayload>>,
    pub candidates_added: Mutex<Vec<IceCandidate>>,
    pub ice_servers_seen: Mutex<Vec<Vec<ServerConfig>>>,
}

impl PeerLedger {
    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

pub struct FakePeerFactory {
    pub ledger: Arc<PeerLedger>,
}

impl FakePeerFactory {
    pub fn new() -> (Arc<Self>, Arc<PeerLedger>) {
        let ledger = Arc::new(PeerLedger::default());
        (
            Arc::new(Self {
                ledger: Arc::clone(&ledger),
            }),
            ledger,
        )
    }
}

#[async_trait]
impl PeerFactory for FakePeerFactory {
    async fn create(
        &self,
        ice_servers: &[ServerConfig],
        events: PeerEvents,
    ) -> Result<Box<dyn PeerLink>, PeerError> {
        let ledger = &self.ledger;
        ledger.created.fetch_add(1, Ordering::SeqCst);
        let live = ledger.live.fetch_add(1, Ordering::SeqCst) + 1;
        ledger.max_live.fetch_max(live, Ordering::SeqCst);
        ledger.ice_servers_seen.lock().push(ice_servers.to_vec());
        Ok(Box::new(FakeLink {
            ledger: Arc::clone(ledger),
            events,
            remote_set: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }))
    }
}

struct FakeLink {
    ledger: Arc<PeerLedger>,
    events: PeerEvents,
    remote_set: AtomicBool,
    closed: AtomicBool,
}

#[async_trait]
impl PeerLink for FakeLink {
    async fn attach_stream(&self, _stream: &LocalMediaStream) -> Result<(), PeerError> {
        self.ledger.with_media.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn receive_only(&self) -> Result<(), PeerError> {
        self.ledger.receive_only.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn create_offer(&self) -> Result<SdpPayload, PeerError> {
        self.ledger.offers.fetch_add(1, Ordering::SeqCst);
        self.events.emit(PeerEvent::LocalCandidate(candidate(90)));
        Ok(SdpPayload::offer("local-offer"))
    }

    async fn create_answer(&self) -> Result<SdpPayload, PeerError> {
        if !self.remote_set.load(Ordering::SeqCst) {
            return Err(PeerError::MissingLocalDescription);
        }
        self.ledger.answers.fetch_add(1, Ordering::SeqCst);
        Ok(SdpPayload::answer("local-answer"))
    }

    async fn set_remote_description(&self, description: SdpPayload) -> Result<(), PeerError> {
        self.ledger.remote_descriptions.lock().push(description);
        self.remote_set.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), PeerError> {
        assert!(
            self.remote_set.load(Ordering::SeqCst),
            "candidate applied before the remote description"
        );
        self.ledger.candidates_added.lock().push(candidate);
        Ok(())
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.ledger.closed.fetch_add(1, Ordering::SeqCst);
            self.ledger.live.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

// ---------- media ----------

#[derive(Default)]
pub struct CountingDevices {
    pub acquired: AtomicUsize,
    pub released: AtomicUsize,
    pub deny: AtomicBool,
}

#[async_trait]
impl MediaDevices for CountingDevices {
    async fn acquire(&self) -> Result<LocalMediaStream, MediaError> {
        self.acquired.fetch_add(1, Ordering::SeqCst);
        if self.deny.load(Ordering::SeqCst) {
            return Err(MediaError::PermissionDenied);
        }
        Ok(LocalMediaStream::new(
            "cam",
            vec![
                LocalTrack::sample(MediaKind::Audio, "cam"),
                LocalTrack::sample(MediaKind::Video, "cam"),
            ],
        ))
    }

    fn release(&self, stream: &LocalMediaStream) {
        self.released.fetch_add(1, Ordering::SeqCst);
        stream.stop();
    }
}

// ---------- waiting ----------

pub async fn expect_event<F>(rx: &mut broadcast::Receiver<ChatEvent>, mut pred: F) -> ChatEvent
where
    F: FnMut(&ChatEvent) -> bool,
{
    let deadline = Instant::now() + WAIT;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match timeout(remaining, rx.recv()).await {
            Ok(Ok(event)) if pred(&event) => return event,
            Ok(Ok(_)) => continue,
            Ok(Err(broadcast::error::RecvError::Lagged(_))) => continue,
            Ok(Err(err)) => panic!("event stream ended: {err}"),
            Err(_) => panic!("timed out waiting for chat event"),
        }
    }
}

pub async fn eventually<F>(mut check: F)
where
    F: FnMut() -> bool,
{
    let deadline = Instant::now() + WAIT;
    while !check() {
        if Instant::now() >= deadline {
            panic!("condition not reached in time");
        }
        sleep(Duration::from_millis(10)).await;
    }
}
