use crate::error::PeerError;
use crate::logger::log_candidate;
use crate::peer::engine::{PeerEvents, PeerFactory, PeerLink};
use crate::peer::media::LocalMediaStream;
use crate::peer::types::{
    IceCandidate, MediaKind, PeerConnectionState, PeerEvent, SdpKind, SdpPayload, ServerConfig,
};
use crate::utils::add_ice_url_scheme;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::policy::bundle_policy::RTCBundlePolicy;
use webrtc::peer_connection::policy::rtcp_mux_policy::RTCRtcpMuxPolicy;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::{RTCRtpTransceiver, RTCRtpTransceiverInit};
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

/// Receives remote tracks for rendering (the remote preview).
pub trait RemoteTrackSink: Send + Sync {
    fn attach(&self, track: Arc<TrackRemote>);
    fn detach(&self);
}

/// Builds `webrtc` peer connections.
#[derive(Clone, Default)]
pub struct RtcPeerFactory {
    remote_sink: Option<Arc<dyn RemoteTrackSink>>,
}

impl RtcPeerFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_remote_sink(mut self, sink: Arc<dyn RemoteTrackSink>) -> Self {
        self.remote_sink = Some(sink);
        self
    }
}

#[async_trait]
impl PeerFactory for RtcPeerFactory {
    async fn create(
        &self,
        ice_servers: &[ServerConfig],
        events: PeerEvents,
    ) -> Result<Box<dyn PeerLink>, PeerError> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs()?;
        let registry = register_default_interceptors(Registry::new(), &mut media_engine)?;
        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let pc = Arc::new(api.new_peer_connection(rtc_config(ice_servers)).await?);
        wire_callbacks(&pc, &events, self.remote_sink.clone());
        Ok(Box::new(RtcPeerLink {
            pc,
            remote_sink: self.remote_sink.clone(),
        }))
    }
}

fn wire_callbacks(
    pc: &Arc<RTCPeerConnection>,
    events: &PeerEvents,
    remote_sink: Option<Arc<dyn RemoteTrackSink>>,
) {
    let candidate_events = events.clone();
    pc.on_ice_candidate(Box::new(move |cand: Option<RTCIceCandidate>| {
        let events = candidate_events.clone();
        Box::pin(async move {
            let Some(c) = cand else {
                debug!(room_epoch = events.room_epoch(), "ice candidate gathering complete");
                return;
            };
            match c.to_json() {
                Ok(init) => {
                    let candidate = IceCandidate {
                        candidate: init.candidate,
                        sdp_mid: init.sdp_mid,
                        sdp_mline_index: init.sdp_mline_index,
                        username_fragment: init.username_fragment,
                    };
                    log_candidate("LOCAL", &candidate);
                    events.emit(PeerEvent::LocalCandidate(candidate));
                }
                Err(err) => warn!(error = %err, "failed to serialize local candidate"),
            }
        })
    }));

    pc.on_ice_gathering_state_change(Box::new(move |state| {
        debug!("ice gathering state changed to: {:?}", state);
        Box::pin(async {})
    }));

    let state_events = events.clone();
    let pc_stats = Arc::downgrade(pc);
    pc.on_peer_connection_state_change(Box::new(move |st: RTCPeerConnectionState| {
        info!(room_epoch = state_events.room_epoch(), "peer connection state changed to: {:?}", st);
        let mapped = map_state(st);
        if mapped == PeerConnectionState::Failed {
            if let Some(pc) = pc_stats.upgrade() {
                tokio::spawn(async move {
                    log_selected_pair(&pc, "FAILED").await;
                });
            }
        }
        state_events.emit(PeerEvent::ConnectionState(mapped));
        Box::pin(async {})
    }));

    let track_events = events.clone();
    pc.on_track(Box::new(
        move |track: Arc<TrackRemote>,
              _receiver: Arc<RTCRtpReceiver>,
              _transceiver: Arc<RTCRtpTransceiver>| {
            let kind = match track.kind() {
                RTPCodecType::Audio => MediaKind::Audio,
                _ => MediaKind::Video,
            };
            let track_id = track.id();
            debug!(%kind, %track_id, "remote track received");
            if let Some(sink) = &remote_sink {
                sink.attach(Arc::clone(&track));
            }
            track_events.emit(PeerEvent::RemoteTrack { kind, track_id });
            Box::pin(async {})
        },
    ));
}

fn map_state(state: RTCPeerConnectionState) -> PeerConnectionState {
    match state {
        RTCPeerConnectionState::Connecting => PeerConnectionState::Connecting,
        RTCPeerConnectionState::Connected => PeerConnectionState::Connected,
        RTCPeerConnectionState::Disconnected => PeerConnectionState::Disconnected,
        RTCPeerConnectionState::Failed => PeerConnectionState::Failed,
        RTCPeerConnectionState::Closed => PeerConnectionState::Closed,
        _ => PeerConnectionState::New,
    }
}

fn rtc_config(servers: &[ServerConfig]) -> RTCConfiguration {
    RTCConfiguration {
        ice_servers: to_rtc_ice_servers(servers),
        bundle_policy: RTCBundlePolicy::MaxBundle,
        rtcp_mux_policy: RTCRtcpMuxPolicy::Require,
        ..Default::default()
    }
}

pub fn to_rtc_ice_servers(servers: &[ServerConfig]) -> Vec<RTCIceServer> {
    servers
        .iter()
        .map(|config| RTCIceServer {
            urls: vec![add_ice_url_scheme(config)],
            username: config.username.clone().unwrap_or_default(),
            credential: config.credential.clone().unwrap_or_default(),
            ..Default::default()
        })
        .collect()
}

/// Snapshot of the nominated candidate pair.
pub async fn log_selected_pair(pc: &RTCPeerConnection, moment: &str) {
    let stats = pc.get_stats().await;
    for (_, v) in stats.reports {
        if let webrtc::stats::StatsReportType::CandidatePair(pair) = v {
            if pair.nominated {
                info!(
                    "STATS {moment}: {}:{} bytes={}/{} state={:?}",
                    pair.local_candidate_id,
                    pair.remote_candidate_id,
                    pair.bytes_sent,
                    pair.bytes_received,
                    pair.state
                );
            }
        }
    }
}

struct RtcPeerLink {
    pc: Arc<RTCPeerConnection>,
    remote_sink: Option<Arc<dyn RemoteTrackSink>>,
}

impl RtcPeerLink {
    async fn local_payload(&self) -> Result<SdpPayload, PeerError> {
        let local = self
            .pc
            .local_description()
            .await
            .ok_or(PeerError::MissingLocalDescription)?;
        to_payload(local)
    }
}

fn to_payload(desc: RTCSessionDescription) -> Result<SdpPayload, PeerError> {
    match desc.sdp_type {
        RTCSdpType::Offer => Ok(SdpPayload::offer(desc.sdp)),
        RTCSdpType::Answer => Ok(SdpPayload::answer(desc.sdp)),
        other => Err(PeerError::UnsupportedSdp(other.to_string())),
    }
}

fn from_payload(payload: SdpPayload) -> Result<RTCSessionDescription, PeerError> {
    let desc = match payload.kind {
        SdpKind::Offer => RTCSessionDescription::offer(payload.sdp)?,
        SdpKind::Answer => RTCSessionDescription::answer(payload.sdp)?,
    };
    Ok(desc)
}

#[async_trait]
impl PeerLink for RtcPeerLink {
    async fn attach_stream(&self, stream: &LocalMediaStream) -> Result<(), PeerError> {
        for track in stream.tracks() {
            let rtc_track: Arc<dyn TrackLocal + Send + Sync> = track.rtc_track();
            let sender = self.pc.add_track(rtc_track).await?;
            // RTCP has to be drained for the interceptors to work.
            tokio::spawn(async move {
                let mut rtcp_buf = vec![0u8; 1500];
                while sender.read(&mut rtcp_buf).await.is_ok() {}
            });
        }
        Ok(())
    }

    async fn receive_only(&self) -> Result<(), PeerError> {
        for kind in [RTPCodecType::Audio, RTPCodecType::Video] {
            self.pc
                .add_transceiver_from_kind(
                    kind,
                    Some(RTCRtpTransceiverInit {
                        direction: RTCRtpTransceiverDirection::Recvonly,
                        send_encodings: vec![],
                    }),
                )
                .await?;
        }
        Ok(())
    }

    async fn create_offer(&self) -> Result<SdpPayload, PeerError> {
        let offer = self.pc.create_offer(None).await?;
        self.pc.set_local_description(offer).await?;
        self.local_payload().await
    }

    async fn create_answer(&self) -> Result<SdpPayload, PeerError> {
        let answer = self.pc.create_answer(None).await?;
        self.pc.set_local_description(answer).await?;
        self.local_payload().await
    }

    async fn set_remote_description(&self, description: SdpPayload) -> Result<(), PeerError> {
        self.pc
            .set_remote_description(from_payload(description)?)
            .await?;
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), PeerError> {
        self.pc
            .add_ice_candidate(RTCIceCandidateInit {
                candidate: candidate.candidate,
                sdp_mid: candidate.sdp_mid,
                sdp_mline_index: candidate.sdp_mline_index,
                username_fragment: candidate.username_fragment,
            })
            .await?;
        Ok(())
    }

    async fn close(&self) {
        if let Some(sink) = &self.remote_sink {
            sink.detach();
        }
        if let Err(err) = self.pc.close().await {
            warn!(error = %err, "peer connection close failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ice_servers_get_schemes_and_credentials() {
        let servers = vec![
            ServerConfig::stun("a", "stun.example.com:19302"),
            ServerConfig {
                id: "b".into(),
                r#type: "turn".into(),
                url: "turn.example.com:3478".into(),
                username: Some("user".into()),
                credential: Some("pass".into()),
            },
        ];
        let rtc = to_rtc_ice_servers(&servers);
        assert_eq!(rtc[0].urls, vec!["stun:stun.example.com:19302".to_string()]);
        assert_eq!(rtc[1].urls, vec!["turn:turn.example.com:3478".to_string()]);
        assert_eq!(rtc[1].username, "user");
        assert_eq!(rtc[1].credential, "pass");
    }

    #[test]
    fn payload_conversion_keeps_type() {
        let sdp = "v=0\r\no=- 0 0 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\n";
        let desc = from_payload(SdpPayload::answer(sdp)).unwrap();
        assert_eq!(desc.sdp_type, RTCSdpType::Answer);
        assert_eq!(to_payload(desc).unwrap(), SdpPayload::answer(sdp));
    }
}
