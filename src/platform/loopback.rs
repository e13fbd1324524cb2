//! Deterministic in-process media platform.
//!
//! No audio flows. A connection behaves like a well-mannered peer
//! connection: it produces local candidates once a local description is
//! set, refuses remote candidates until the remote description is set, and
//! reports remote media once both descriptions are in place.

use async_trait::async_trait;
use callcore::{
    ConnectionFactory, ConnectionObserver, IceCandidate, MediaSource, MediaStream, PeerConnection,
    PlatformError, SdpKind, SessionDescription,
};
use log::{debug, trace};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

#[derive(Debug, Default)]
struct Counters {
    created: AtomicUsize,
    live: AtomicUsize,
}

#[derive(Debug, Clone)]
struct Behaviour {
    media_failure: Option<String>,
    local_candidates: usize,
    reject_remote_descriptions: bool,
    step_delay: Option<Duration>,
}

impl Default for Behaviour {
    fn default() -> Self {
        Self {
            media_failure: None,
            local_candidates: 2,
            reject_remote_descriptions: false,
            step_delay: None,
        }
    }
}

/// Shared handle; clones observe the same counters.
#[derive(Clone, Default)]
pub struct LoopbackPlatform {
    name: String,
    behaviour: Behaviour,
    counters: Arc<Counters>,
    applied: Arc<Mutex<Vec<IceCandidate>>>,
}

impl LoopbackPlatform {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Local media acquisition fails with `reason`.
    pub fn with_media_failure(mut self, reason: impl Into<String>) -> Self {
        self.behaviour.media_failure = Some(reason.into());
        self
    }

    pub fn with_local_candidates(mut self, count: usize) -> Self {
        self.behaviour.local_candidates = count;
        self
    }

    /// Every `set_remote_description` fails.
    pub fn rejecting_remote_descriptions(mut self) -> Self {
        self.behaviour.reject_remote_descriptions = true;
        self
    }

    /// Offer, answer and remote description steps each take `delay`.
    pub fn with_step_delay(mut self, delay: Duration) -> Self {
        self.behaviour.step_delay = Some(delay);
        self
    }

    pub fn connections_created(&self) -> usize {
        self.counters.created.load(Ordering::SeqCst)
    }

    /// Connections created and not yet closed.
    pub fn live_connections(&self) -> usize {
        self.counters.live.load(Ordering::SeqCst)
    }

    /// Remote candidates applied across all connections, in order.
    pub fn applied_candidates(&self) -> Vec<IceCandidate> {
        lock(&self.applied).clone()
    }
}

#[async_trait]
impl MediaSource for LoopbackPlatform {
    async fn acquire_local_media(&self) -> Result<MediaStream, PlatformError> {
        if let Some(reason) = &self.behaviour.media_failure {
            return Err(PlatformError::Media(reason.clone()));
        }
        Ok(MediaStream::audio(
            format!("{}-local", self.name),
            format!("{}-mic", self.name),
        ))
    }
}

#[async_trait]
impl ConnectionFactory for LoopbackPlatform {
    async fn create_connection(
        &self,
        observer: Arc<dyn ConnectionObserver>,
    ) -> Result<Box<dyn PeerConnection>, PlatformError> {
        let index = self.counters.created.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters.live.fetch_add(1, Ordering::SeqCst);
        debug!(target: "Platform/Loopback", "{}: connection {index} created", self.name);
        Ok(Box::new(LoopbackConnection {
            label: format!("{}-{index}", self.name),
            behaviour: self.behaviour.clone(),
            counters: Arc::clone(&self.counters),
            applied: Arc::clone(&self.applied),
            observer,
            state: Mutex::new(ConnectionState::default()),
        }))
    }
}

#[derive(Default)]
struct ConnectionState {
    local_media: Option<MediaStream>,
    local_description: Option<SdpKind>,
    remote_description: Option<SdpKind>,
    remote_media_reported: bool,
    closed: bool,
}

struct LoopbackConnection {
    label: String,
    behaviour: Behaviour,
    counters: Arc<Counters>,
    applied: Arc<Mutex<Vec<IceCandidate>>>,
    observer: Arc<dyn ConnectionObserver>,
    state: Mutex<ConnectionState>,
}

impl LoopbackConnection {
    fn open_state(&self) -> Result<MutexGuard<'_, ConnectionState>, PlatformError> {
        let state = lock(&self.state);
        if state.closed {
            return Err(PlatformError::Closed);
        }
        Ok(state)
    }

    fn sdp(&self, kind: SdpKind) -> String {
        format!(
            "v=0\r\no=- {} 1 IN IP4 127.0.0.1\r\ns=loopback-{kind}\r\nt=0 0\r\nm=audio 9 UDP/TLS/RTP/SAVPF 111\r\na=sendrecv\r\n",
            self.label
        )
    }

    fn set_local(&self, kind: SdpKind) -> Result<SessionDescription, PlatformError> {
        let report_media = {
            let mut state = self.open_state()?;
            if state.local_media.is_none() {
                return Err(PlatformError::Negotiation("no local media attached".into()));
            }
            if kind == SdpKind::Answer && state.remote_description != Some(SdpKind::Offer) {
                return Err(PlatformError::Negotiation("answer without a remote offer".into()));
            }
            state.local_description = Some(kind);
            take_media_report(&mut state)
        };

        for n in 0..self.behaviour.local_candidates {
            self.observer.on_local_candidate(IceCandidate {
                candidate: format!(
                    "candidate:{n} 1 udp {} 127.0.0.1 {} typ host",
                    2_122_260_223 - n,
                    50_000 + n
                ),
                sdp_mid: Some("0".into()),
                sdp_mline_index: Some(0),
                username_fragment: Some(self.label.clone()),
            });
        }
        if report_media {
            self.report_remote_media();
        }

        let sdp = self.sdp(kind);
        Ok(match kind {
            SdpKind::Offer => SessionDescription::offer(sdp),
            SdpKind::Answer => SessionDescription::answer(sdp),
        })
    }

    async fn pause(&self) {
        if let Some(delay) = self.behaviour.step_delay {
            tokio::time::sleep(delay).await;
        }
    }

    fn report_remote_media(&self) {
        trace!(target: "Platform/Loopback", "{}: remote media flowing", self.label);
        self.observer.on_remote_media(MediaStream::audio(
            format!("{}-remote", self.label),
            format!("{}-remote-audio", self.label),
        ));
    }
}

fn take_media_report(state: &mut ConnectionState) -> bool {
    let ready = state.local_description.is_some() && state.remote_description.is_some();
    if ready && !state.remote_media_reported {
        state.remote_media_reported = true;
        return true;
    }
    false
}

#[async_trait]
impl PeerConnection for LoopbackConnection {
    async fn attach_local_media(&self, stream: &MediaStream) -> Result<(), PlatformError> {
        self.open_state()?.local_media = Some(stream.clone());
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription, PlatformError> {
        self.pause().await;
        self.set_local(SdpKind::Offer)
    }

    async fn create_answer(&self) -> Result<SessionDescription, PlatformError> {
        self.pause().await;
        self.set_local(SdpKind::Answer)
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), PlatformError> {
        self.pause().await;
        if self.behaviour.reject_remote_descriptions {
            return Err(PlatformError::Negotiation("remote description refused".into()));
        }
        if !desc.sdp.starts_with("v=0") {
            return Err(PlatformError::Negotiation(format!(
                "unparseable {} sdp",
                desc.kind
            )));
        }
        let report_media = {
            let mut state = self.open_state()?;
            state.remote_description = Some(desc.kind);
            take_media_report(&mut state)
        };
        if report_media {
            self.report_remote_media();
        }
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), PlatformError> {
        if self.open_state()?.remote_description.is_none() {
            return Err(PlatformError::Negotiation(
                "candidate applied before remote description".into(),
            ));
        }
        trace!(target: "Platform/Loopback", "{}: applied {}", self.label, candidate.candidate);
        lock(&self.applied).push(candidate);
        Ok(())
    }

    async fn close(&self) -> Result<(), PlatformError> {
        let mut state = lock(&self.state);
        if !state.closed {
            state.closed = true;
            self.counters.live.fetch_sub(1, Ordering::SeqCst);
            debug!(target: "Platform/Loopback", "{}: closed", self.label);
        }
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Events {
        candidates: Mutex<Vec<IceCandidate>>,
        media: Mutex<Vec<MediaStream>>,
    }

    impl ConnectionObserver for Events {
        fn on_local_candidate(&self, candidate: IceCandidate) {
            self.candidates.lock().unwrap().push(candidate);
        }

        fn on_remote_media(&self, stream: MediaStream) {
            self.media.lock().unwrap().push(stream);
        }
    }

    #[tokio::test]
    async fn test_offer_answer_exchange_reports_media_on_both_sides() {
        let platform = LoopbackPlatform::new("t");
        let media = platform.acquire_local_media().await.unwrap();
        let caller_events = Arc::new(Events::default());
        let callee_events = Arc::new(Events::default());
        let caller = platform.create_connection(caller_events.clone()).await.unwrap();
        let callee = platform.create_connection(callee_events.clone()).await.unwrap();

        caller.attach_local_media(&media).await.unwrap();
        let offer = caller.create_offer().await.unwrap();
        assert_eq!(caller_events.candidates.lock().unwrap().len(), 2);

        callee.set_remote_description(offer).await.unwrap();
        callee.attach_local_media(&media).await.unwrap();
        let answer = callee.create_answer().await.unwrap();
        assert_eq!(callee_events.media.lock().unwrap().len(), 1);

        caller.set_remote_description(answer).await.unwrap();
        assert_eq!(caller_events.media.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_candidate_before_remote_description_fails() {
        let platform = LoopbackPlatform::new("t");
        let conn = platform
            .create_connection(Arc::new(Events::default()))
            .await
            .unwrap();
        assert!(conn.add_ice_candidate(IceCandidate::new("c")).await.is_err());
        assert!(platform.applied_candidates().is_empty());
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let platform = LoopbackPlatform::new("t");
        let conn = platform
            .create_connection(Arc::new(Events::default()))
            .await
            .unwrap();
        assert_eq!(platform.live_connections(), 1);
        conn.close().await.unwrap();
        conn.close().await.unwrap();
        assert_eq!(platform.live_connections(), 0);
        assert_eq!(platform.connections_created(), 1);
        assert!(matches!(conn.create_offer().await, Err(PlatformError::Closed)));
    }

    #[tokio::test]
    async fn test_media_failure() {
        let platform = LoopbackPlatform::new("t").with_media_failure("no microphone");
        assert_eq!(
            platform.acquire_local_media().await,
            Err(PlatformError::Media("no microphone".into()))
        );
    }
}
