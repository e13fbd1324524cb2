//! Native media platform on top of the `webrtc` crate.
//!
//! Local media is an Opus sample track. Feeding captured audio into it is
//! the job of whatever owns the capture device; the engine only needs the
//! handle to attach it to each session's connection.

use crate::config::IceServerConfig;
use async_trait::async_trait;
use callcore::{
    ConnectionFactory, ConnectionObserver, IceCandidate, MediaSource, MediaStream, MediaTrack,
    PeerConnection, PlatformError, SdpKind, SessionDescription, TrackKind,
};
use dashmap::DashMap;
use log::{debug, info, trace, warn};
use std::sync::Arc;
use tokio::sync::Mutex;
use webrtc::api::APIBuilder;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MediaEngine};
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_remote::TrackRemote;

const AUDIO_TRACK_ID: &str = "audio";

fn negotiation(err: webrtc::Error) -> PlatformError {
    PlatformError::Negotiation(err.to_string())
}

pub struct WebRtcPlatform {
    stream_id: String,
    ice_servers: Vec<RTCIceServer>,
    /// Local tracks by stream id, so a [`MediaStream`] handle can be resolved
    /// back to the track it describes.
    tracks: Arc<DashMap<String, Arc<TrackLocalStaticSample>>>,
}

impl WebRtcPlatform {
    pub fn new(local_id: &str, ice_servers: &[IceServerConfig]) -> Self {
        let ice_servers = ice_servers
            .iter()
            .map(|server| RTCIceServer {
                urls: vec![server.url_with_scheme()],
                username: server.username.clone().unwrap_or_default(),
                credential: server.credential.clone().unwrap_or_default(),
                ..Default::default()
            })
            .collect();
        Self {
            stream_id: format!("peercall-{local_id}"),
            ice_servers,
            tracks: Arc::new(DashMap::new()),
        }
    }

    fn build_api() -> Result<webrtc::api::API, webrtc::Error> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs()?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)?;

        Ok(APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build())
    }
}

#[async_trait]
impl MediaSource for WebRtcPlatform {
    async fn acquire_local_media(&self) -> Result<MediaStream, PlatformError> {
        let track = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_owned(),
                clock_rate: 48000,
                channels: 2,
                ..Default::default()
            },
            AUDIO_TRACK_ID.to_owned(),
            self.stream_id.clone(),
        ));
        self.tracks.insert(self.stream_id.clone(), track);
        info!(target: "Platform/WebRtc", "Local audio track ready ({})", self.stream_id);
        Ok(MediaStream::audio(self.stream_id.clone(), AUDIO_TRACK_ID))
    }
}

#[async_trait]
impl ConnectionFactory for WebRtcPlatform {
    async fn create_connection(
        &self,
        observer: Arc<dyn ConnectionObserver>,
    ) -> Result<Box<dyn PeerConnection>, PlatformError> {
        let api = Self::build_api().map_err(|e| PlatformError::Connection(e.to_string()))?;
        let config = RTCConfiguration {
            ice_servers: self.ice_servers.clone(),
            ..Default::default()
        };
        let pc = Arc::new(
            api.new_peer_connection(config)
                .await
                .map_err(|e| PlatformError::Connection(e.to_string()))?,
        );

        let candidates = Arc::clone(&observer);
        pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let observer = Arc::clone(&candidates);
            Box::pin(async move {
                // `None` marks the end of gathering.
                let Some(candidate) = candidate else {
                    trace!(target: "Platform/WebRtc", "Candidate gathering complete");
                    return;
                };
                match candidate.to_json() {
                    Ok(init) => observer.on_local_candidate(IceCandidate {
                        candidate: init.candidate,
                        sdp_mid: init.sdp_mid,
                        sdp_mline_index: init.sdp_mline_index,
                        username_fragment: init.username_fragment,
                    }),
                    Err(e) => warn!(target: "Platform/WebRtc", "Unserializable candidate: {e}"),
                }
            })
        }));

        let media = Arc::clone(&observer);
        pc.on_track(Box::new(move |track: Arc<TrackRemote>, _receiver, _transceiver| {
            let observer = Arc::clone(&media);
            Box::pin(async move {
                if track.kind() != RTPCodecType::Audio {
                    debug!(target: "Platform/WebRtc", "Ignoring remote {:?} track", track.kind());
                    return;
                }
                observer.on_remote_media(MediaStream {
                    id: track.stream_id(),
                    tracks: vec![MediaTrack {
                        id: track.id(),
                        kind: TrackKind::Audio,
                    }],
                });
            })
        }));

        Ok(Box::new(WebRtcConnection {
            pc: Mutex::new(Some(pc)),
            tracks: Arc::clone(&self.tracks),
        }))
    }
}

struct WebRtcConnection {
    pc: Mutex<Option<Arc<RTCPeerConnection>>>,
    tracks: Arc<DashMap<String, Arc<TrackLocalStaticSample>>>,
}

impl WebRtcConnection {
    async fn peer(&self) -> Result<Arc<RTCPeerConnection>, PlatformError> {
        self.pc.lock().await.clone().ok_or(PlatformError::Closed)
    }
}

#[async_trait]
impl PeerConnection for WebRtcConnection {
    async fn attach_local_media(&self, stream: &MediaStream) -> Result<(), PlatformError> {
        let track = self
            .tracks
            .get(&stream.id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| PlatformError::Media(format!("unknown local stream {}", stream.id)))?;
        let pc = self.peer().await?;
        pc.add_track(track as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(negotiation)?;
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription, PlatformError> {
        let pc = self.peer().await?;
        let offer = pc.create_offer(None).await.map_err(negotiation)?;
        pc.set_local_description(offer.clone())
            .await
            .map_err(negotiation)?;
        Ok(SessionDescription::offer(offer.sdp))
    }

    async fn create_answer(&self) -> Result<SessionDescription, PlatformError> {
        let pc = self.peer().await?;
        let answer = pc.create_answer(None).await.map_err(negotiation)?;
        pc.set_local_description(answer.clone())
            .await
            .map_err(negotiation)?;
        Ok(SessionDescription::answer(answer.sdp))
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), PlatformError> {
        let pc = self.peer().await?;
        let remote = match desc.kind {
            SdpKind::Offer => RTCSessionDescription::offer(desc.sdp),
            SdpKind::Answer => RTCSessionDescription::answer(desc.sdp),
        }
        .map_err(negotiation)?;
        pc.set_remote_description(remote).await.map_err(negotiation)
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), PlatformError> {
        let pc = self.peer().await?;
        pc.add_ice_candidate(RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: candidate.username_fragment,
        })
        .await
        .map_err(negotiation)
    }

    async fn close(&self) -> Result<(), PlatformError> {
        let Some(pc) = self.pc.lock().await.take() else {
            return Ok(());
        };
        pc.close()
            .await
            .map_err(|e| PlatformError::Connection(e.to_string()))?;
        debug!(target: "Platform/WebRtc", "Peer connection closed");
        Ok(())
    }
}
