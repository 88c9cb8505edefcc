//! The single playback session: current request, metadata, artwork and state.
//!
//! Every mutation goes through an explicit operation on [`PlaybackSession`],
//! called from one task only. Listeners are told about each change
//! synchronously and only ever see snapshots.

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::artwork::Artwork;
use crate::engine::{EngineEvent, EngineState, EngineUpdate, PlaybackEngine};
use crate::error::{Result, ServiceError};
use crate::icy::IcyInfo;
use crate::metadata::{project_icy, StreamMetadata};
use crate::notification::NowPlaying;
use crate::playlist::{ResolvedPlaylist, StreamRequest};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlaybackState {
    Idle,
    Buffering,
    Playing,
    Paused,
    Stopped,
}

impl PlaybackState {
    pub fn from_engine(state: EngineState, play_when_ready: bool) -> Self {
        match state {
            EngineState::Idle => PlaybackState::Idle,
            EngineState::Buffering => PlaybackState::Buffering,
            EngineState::Ready if play_when_ready => PlaybackState::Playing,
            EngineState::Ready => PlaybackState::Paused,
            EngineState::Ended => PlaybackState::Stopped,
        }
    }
}

/// Notification sent to listeners after a session change.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    StateChanged {
        play_when_ready: bool,
        state: PlaybackState,
    },
    MetadataChanged(StreamMetadata),
    NowPlaying(NowPlaying),
    PlaybackFailed {
        message: String,
    },
}

pub trait SessionListener: Send + Sync {
    fn on_event(&self, event: &SessionEvent);
}

impl<F> SessionListener for F
where
    F: Fn(&SessionEvent) + Send + Sync,
{
    fn on_event(&self, event: &SessionEvent) {
        self(event)
    }
}

/// Handle for an in-flight resolution.
#[derive(Debug)]
pub struct LoadTicket {
    generation: u64,
    pub request: StreamRequest,
    pub token: CancellationToken,
}

/// Handle for an in-flight artwork download.
#[derive(Debug)]
pub struct ArtworkRequest {
    generation: u64,
    metadata_seq: u64,
    pub url: String,
    pub token: CancellationToken,
}

pub struct PlaybackSession {
    engine: Box<dyn PlaybackEngine>,
    listeners: Vec<Arc<dyn SessionListener>>,
    request: Option<StreamRequest>,
    /// Items for the current request are with the engine
    loaded: bool,
    metadata: Option<StreamMetadata>,
    metadata_seq: u64,
    artwork: Option<Artwork>,
    default_artwork: Option<Artwork>,
    state: PlaybackState,
    play_when_ready: bool,
    /// Last readiness the engine reported for the current items
    engine_state: EngineState,
    /// Epoch of the items the engine holds; events from other epochs are stale
    engine_epoch: u64,
    /// Set by an engine error until the next load or play
    failed: bool,
    generation: u64,
    load_token: CancellationToken,
    artwork_token: CancellationToken,
    released: bool,
}

impl PlaybackSession {
    pub fn new(engine: Box<dyn PlaybackEngine>) -> Self {
        let play_when_ready = engine.play_when_ready();
        let load_token = CancellationToken::new();
        let artwork_token = load_token.child_token();
        Self {
            engine,
            listeners: Vec::new(),
            request: None,
            loaded: false,
            metadata: None,
            metadata_seq: 0,
            artwork: None,
            default_artwork: None,
            state: PlaybackState::Idle,
            play_when_ready,
            engine_state: EngineState::Idle,
            engine_epoch: 0,
            failed: false,
            generation: 0,
            load_token,
            artwork_token,
            released: false,
        }
    }

    pub fn add_listener(&mut self, listener: Arc<dyn SessionListener>) {
        self.listeners.push(listener);
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn play_when_ready(&self) -> bool {
        self.play_when_ready
    }

    pub fn request(&self) -> Option<&StreamRequest> {
        self.request.as_ref()
    }

    pub fn metadata(&self) -> Option<&StreamMetadata> {
        self.metadata.as_ref()
    }

    pub fn artwork(&self) -> Option<&Artwork> {
        self.artwork.as_ref()
    }

    pub fn now_playing(&self) -> NowPlaying {
        NowPlaying::describe(
            self.request.as_ref(),
            self.metadata.as_ref(),
            self.artwork.as_ref(),
            self.default_artwork.as_ref(),
            self.play_when_ready,
            self.state,
        )
    }

    /// Start loading a new request.
    ///
    /// Work belonging to the previous request is cancelled and everything
    /// derived from it is cleared before the caller resolves the playlist.
    pub fn begin_load(&mut self, request: StreamRequest) -> LoadTicket {
        self.load_token.cancel();
        self.generation += 1;
        self.load_token = CancellationToken::new();
        self.artwork_token = self.load_token.child_token();

        debug!("Loading {:?} (generation {})", request, self.generation);

        self.request = Some(request.clone());
        self.loaded = false;
        self.failed = false;
        self.metadata = None;
        self.artwork = None;
        self.default_artwork = None;
        self.engine.stop();
        self.emit_now_playing();

        LoadTicket {
            generation: self.generation,
            request,
            token: self.load_token.clone(),
        }
    }

    /// Apply the outcome of a resolution started by [`begin_load`](Self::begin_load).
    pub fn finish_load(
        &mut self,
        ticket: LoadTicket,
        resolved: Result<ResolvedPlaylist>,
    ) -> Result<()> {
        if ticket.generation != self.generation || ticket.token.is_cancelled() {
            debug!("Dropping resolution of superseded {:?}", ticket.request);
            return Err(ServiceError::Superseded);
        }

        let generation = self.generation;
        let loaded = resolved.and_then(|playlist| {
            self.engine
                .set_media_items(generation, playlist.into_urls())
                .map_err(ServiceError::Engine)
        });

        match loaded {
            Ok(()) => {
                self.engine_epoch = generation;
                self.engine_state = EngineState::Idle;
                self.loaded = true;
                self.engine.prepare();
                Ok(())
            }
            Err(e) => {
                warn!("Failed to load {}: {}", ticket.request.source_url, e);
                self.engine.stop();
                self.metadata = None;
                self.artwork = None;
                self.set_state(self.play_when_ready, PlaybackState::Idle);
                self.emit_now_playing();
                Err(e)
            }
        }
    }

    pub fn play(&mut self) {
        self.engine.set_play_when_ready(true);
        self.apply_play_when_ready(true);
        if self.failed && self.loaded {
            debug!("Retrying playback after failure");
            self.failed = false;
            self.engine.prepare();
        }
    }

    pub fn pause(&mut self) {
        self.engine.set_play_when_ready(false);
        self.apply_play_when_ready(false);
    }

    // The engine's confirmation can arrive with a retired epoch and be dropped
    fn apply_play_when_ready(&mut self, play_when_ready: bool) {
        let state = if self.failed {
            PlaybackState::Idle
        } else {
            PlaybackState::from_engine(self.engine_state, play_when_ready)
        };
        if self.set_state(play_when_ready, state) {
            self.emit_now_playing();
        }
    }

    pub fn set_default_artwork(&mut self, artwork: Artwork) {
        self.default_artwork = Some(artwork);
        self.emit_now_playing();
    }

    /// Apply one engine callback. Returns the artwork download to start, if any.
    ///
    /// Updates stamped with an epoch other than the one of the items last
    /// handed to the engine belong to a replaced stream and are dropped.
    pub fn apply_engine_event(&mut self, update: EngineUpdate) -> Option<ArtworkRequest> {
        if update.epoch != self.engine_epoch {
            debug!(
                "Dropping engine event from epoch {} (current {}): {:?}",
                update.epoch, self.engine_epoch, update.event
            );
            return None;
        }

        match update.event {
            EngineEvent::StateChanged {
                play_when_ready,
                state,
            } => {
                self.engine_state = state;
                if state == EngineState::Idle && self.loaded && !self.failed {
                    self.engine.prepare();
                }
                if state != EngineState::Idle {
                    self.failed = false;
                }
                let changed =
                    self.set_state(play_when_ready, PlaybackState::from_engine(state, play_when_ready));
                if changed {
                    self.emit_now_playing();
                }
                None
            }
            EngineEvent::Metadata(info) => self.apply_metadata(info),
            EngineEvent::Error(message) => {
                self.engine_state = EngineState::Idle;
                if self.failed {
                    debug!("Ignoring repeated playback failure: {}", message);
                    return None;
                }
                warn!("Playback failed: {}", message);
                self.failed = true;
                self.emit(SessionEvent::PlaybackFailed { message });
                self.set_state(self.play_when_ready, PlaybackState::Idle);
                self.emit_now_playing();
                None
            }
        }
    }

    fn apply_metadata(&mut self, info: IcyInfo) -> Option<ArtworkRequest> {
        if !self.loaded {
            debug!("Ignoring metadata received while no stream is loaded");
            return None;
        }

        let metadata = match project_icy(&info) {
            Ok(metadata) => metadata,
            Err(e) => {
                debug!("Skipping metadata event: {}", e);
                return None;
            }
        };

        self.artwork_token.cancel();
        self.artwork_token = self.load_token.child_token();
        self.metadata_seq += 1;
        self.artwork = None;
        self.metadata = Some(metadata.clone());

        self.emit(SessionEvent::MetadataChanged(metadata.clone()));
        self.emit_now_playing();

        metadata.has_artwork().then(|| ArtworkRequest {
            generation: self.generation,
            metadata_seq: self.metadata_seq,
            url: metadata.artwork_url,
            token: self.artwork_token.clone(),
        })
    }

    /// Apply a finished artwork download. Returns whether it was shown.
    pub fn apply_artwork(&mut self, request: ArtworkRequest, artwork: Option<Artwork>) -> bool {
        if request.generation != self.generation
            || request.metadata_seq != self.metadata_seq
            || request.token.is_cancelled()
        {
            debug!("Dropping stale artwork from {}", request.url);
            return false;
        }

        match artwork {
            Some(artwork) => {
                self.artwork = Some(artwork);
                self.emit_now_playing();
                true
            }
            None => false,
        }
    }

    /// Cancel outstanding work and free the engine.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.load_token.cancel();
        self.engine.release();
        self.released = true;
        debug!("Playback session released");
    }

    fn set_state(&mut self, play_when_ready: bool, state: PlaybackState) -> bool {
        if self.play_when_ready == play_when_ready && self.state == state {
            return false;
        }
        debug!("Session state changing from {:?} to {:?}", self.state, state);
        self.play_when_ready = play_when_ready;
        self.state = state;
        self.emit(SessionEvent::StateChanged {
            play_when_ready,
            state,
        });
        true
    }

    fn emit_now_playing(&self) {
        self.emit(SessionEvent::NowPlaying(self.now_playing()));
    }

    fn emit(&self, event: SessionEvent) {
        for listener in &self.listeners {
            listener.on_event(&event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::{EngineCall, FakeEngine};
    use image::{DynamicImage, RgbImage};
    use std::sync::Mutex;

    struct Harness {
        session: PlaybackSession,
        calls: Arc<Mutex<Vec<EngineCall>>>,
        events: Arc<Mutex<Vec<SessionEvent>>>,
    }

    impl Harness {
        fn new() -> Self {
            let (engine, calls) = FakeEngine::new();
            let mut session = PlaybackSession::new(Box::new(engine));
            let events = Arc::new(Mutex::new(Vec::new()));
            let sink = events.clone();
            session.add_listener(Arc::new(move |event: &SessionEvent| {
                sink.lock().unwrap().push(event.clone());
            }));
            Self {
                session,
                calls,
                events,
            }
        }

        fn load(&mut self, title: &str, url: &str) {
            let ticket = self.session.begin_load(StreamRequest::new(title, url));
            let playlist = ResolvedPlaylist::new(url, vec![url.to_string()]).unwrap();
            self.session.finish_load(ticket, Ok(playlist)).unwrap();
        }

        /// Apply an event stamped with the epoch the engine currently holds.
        fn apply(&mut self, event: EngineEvent) -> Option<ArtworkRequest> {
            let epoch = self.session.engine_epoch;
            self.session.apply_engine_event(EngineUpdate::new(epoch, event))
        }

        fn take_events(&self) -> Vec<SessionEvent> {
            std::mem::take(&mut *self.events.lock().unwrap())
        }

        fn take_calls(&self) -> Vec<EngineCall> {
            std::mem::take(&mut *self.calls.lock().unwrap())
        }
    }

    fn icy(title: &str, url: Option<&str>) -> EngineEvent {
        EngineEvent::Metadata(IcyInfo {
            title: Some(title.to_string()),
            url: url.map(str::to_string),
        })
    }

    fn artwork() -> Artwork {
        Artwork::new(DynamicImage::ImageRgb8(RgbImage::new(2, 2)))
    }

    #[test]
    fn test_load_hands_urls_to_engine() {
        let mut h = Harness::new();
        h.load("Radio", "http://a/stream");

        assert_eq!(
            h.take_calls(),
            vec![
                EngineCall::Stop,
                EngineCall::SetMediaItems(vec!["http://a/stream".to_string()]),
                EngineCall::Prepare,
            ]
        );
        assert_eq!(h.session.now_playing().title, "Radio");
    }

    #[test]
    fn test_metadata_replaces_previous() {
        let mut h = Harness::new();
        h.load("Radio", "http://a/stream");
        h.take_events();

        assert!(h.apply(icy("A - One", None)).is_none());
        h.apply(icy("B", None));

        let metadata = h.session.metadata().unwrap();
        assert_eq!(metadata.title, "B");
        assert_eq!(metadata.subtitle, "");

        let changes: Vec<_> = h
            .take_events()
            .into_iter()
            .filter_map(|event| match event {
                SessionEvent::MetadataChanged(metadata) => Some(metadata.title),
                _ => None,
            })
            .collect();
        assert_eq!(changes, vec!["A".to_string(), "B".to_string()]);
    }

    #[test]
    fn test_metadata_without_title_is_suppressed() {
        let mut h = Harness::new();
        h.load("Radio", "http://a/stream");
        h.apply(icy("Artist - Song", None));
        h.take_events();

        let request = h.apply(EngineEvent::Metadata(IcyInfo {
            title: None,
            url: Some("http://cover".to_string()),
        }));

        assert!(request.is_none());
        assert!(h.take_events().is_empty());
        assert_eq!(h.session.metadata().unwrap().title, "Artist");
    }

    #[test]
    fn test_new_load_clears_metadata() {
        let mut h = Harness::new();
        h.load("First", "http://a/stream");
        h.apply(icy("Artist - Song", None));

        h.session.begin_load(StreamRequest::new("Second", "http://b/stream"));

        assert!(h.session.metadata().is_none());
        let now = h.session.now_playing();
        assert_eq!(now.title, "Second");
        assert_eq!(now.subtitle, None);
    }

    #[test]
    fn test_metadata_before_load_completes_is_ignored() {
        let mut h = Harness::new();
        h.session.begin_load(StreamRequest::new("Radio", "http://a/radio.pls"));

        assert!(h.apply(icy("Old - Track", Some("http://cover"))).is_none());
        assert!(h.session.metadata().is_none());
    }

    #[test]
    fn test_stale_artwork_is_not_applied_after_new_load() {
        let mut h = Harness::new();
        h.load("First", "http://a/stream");
        let request = h.apply(icy("Artist - Song", Some("http://cover"))).unwrap();
        assert_eq!(request.url, "http://cover");

        h.load("Second", "http://b/stream");
        assert!(request.token.is_cancelled());
        h.take_events();

        assert!(!h.session.apply_artwork(request, Some(artwork())));
        assert!(h.session.artwork().is_none());
        assert!(h.take_events().is_empty());
    }

    #[test]
    fn test_artwork_for_replaced_metadata_is_dropped() {
        let mut h = Harness::new();
        h.load("Radio", "http://a/stream");
        let first = h.apply(icy("A - One", Some("http://cover/1"))).unwrap();
        let second = h.apply(icy("B - Two", Some("http://cover/2"))).unwrap();

        assert!(!h.session.apply_artwork(first, Some(artwork())));
        assert!(h.session.apply_artwork(second, Some(artwork())));
        assert!(h.session.now_playing().artwork.is_some());
    }

    #[test]
    fn test_missing_artwork_keeps_default() {
        let mut h = Harness::new();
        h.load("Radio", "http://a/stream");
        let fallback = artwork();
        h.session.set_default_artwork(fallback.clone());

        let request = h.apply(icy("A - One", Some("http://cover/1"))).unwrap();
        assert!(!h.session.apply_artwork(request, None));

        let now = h.session.now_playing();
        assert!(now.artwork.unwrap().ptr_eq(&fallback));
    }

    #[test]
    fn test_load_failure_clears_to_idle() {
        let mut h = Harness::new();
        h.load("First", "http://a/stream");
        h.apply(EngineEvent::StateChanged {
            play_when_ready: true,
            state: EngineState::Ready,
        });
        h.apply(icy("Artist - Song", None));
        assert_eq!(h.session.state(), PlaybackState::Playing);

        let ticket = h
            .session
            .begin_load(StreamRequest::new("Second", "http://b/radio.pls"));
        let err = h
            .session
            .finish_load(
                ticket,
                Err(ServiceError::EmptyPlaylist {
                    url: "http://b/radio.pls".to_string(),
                }),
            )
            .unwrap_err();

        assert!(matches!(err, ServiceError::EmptyPlaylist { .. }));
        assert_eq!(h.session.state(), PlaybackState::Idle);
        assert!(h.session.metadata().is_none());
        assert_eq!(h.session.now_playing().title, "Second");
    }

    #[test]
    fn test_superseded_ticket_is_rejected() {
        let mut h = Harness::new();
        let first = h.session.begin_load(StreamRequest::new("First", "http://a/radio.pls"));
        h.session.begin_load(StreamRequest::new("Second", "http://b/stream"));
        assert!(first.token.is_cancelled());

        let playlist = ResolvedPlaylist::new("http://a/radio.pls", vec!["http://a/1".to_string()]);
        let err = h.session.finish_load(first, playlist).unwrap_err();
        assert!(matches!(err, ServiceError::Superseded));
        assert!(!h
            .take_calls()
            .contains(&EngineCall::SetMediaItems(vec!["http://a/1".to_string()])));
    }

    #[test]
    fn test_state_changes_notify_once() {
        let mut h = Harness::new();
        h.load("Radio", "http://a/stream");
        h.take_events();

        let ready = EngineEvent::StateChanged {
            play_when_ready: false,
            state: EngineState::Ready,
        };
        h.apply(ready.clone());
        h.apply(ready);

        let states: Vec<_> = h
            .take_events()
            .into_iter()
            .filter(|event| matches!(event, SessionEvent::StateChanged { .. }))
            .collect();
        assert_eq!(states.len(), 1);
        assert_eq!(h.session.state(), PlaybackState::Paused);
    }

    #[test]
    fn test_idle_triggers_prepare() {
        let mut h = Harness::new();
        h.load("Radio", "http://a/stream");
        h.take_calls();

        h.apply(EngineEvent::StateChanged {
            play_when_ready: true,
            state: EngineState::Idle,
        });

        assert_eq!(h.take_calls(), vec![EngineCall::Prepare]);
    }

    #[test]
    fn test_failure_is_reported_once_and_not_retried() {
        let mut h = Harness::new();
        h.load("Radio", "http://a/stream");
        h.take_calls();
        h.take_events();

        h.apply(EngineEvent::Error("connection refused".to_string()));
        h.apply(EngineEvent::Error("connection refused".to_string()));
        h.apply(EngineEvent::StateChanged {
            play_when_ready: false,
            state: EngineState::Idle,
        });

        let failures = h
            .take_events()
            .into_iter()
            .filter(|event| matches!(event, SessionEvent::PlaybackFailed { .. }))
            .count();
        assert_eq!(failures, 1);
        assert_eq!(h.session.state(), PlaybackState::Idle);
        assert!(!h.take_calls().contains(&EngineCall::Prepare));

        h.session.play();
        assert_eq!(
            h.take_calls(),
            vec![EngineCall::SetPlayWhenReady(true), EngineCall::Prepare]
        );
    }

    #[test]
    fn test_events_from_replaced_items_are_dropped() {
        let mut h = Harness::new();
        h.load("First", "http://a/stream");
        let first_epoch = h.session.engine_epoch;
        h.load("Second", "http://b/stream");
        assert_ne!(h.session.engine_epoch, first_epoch);
        h.take_events();

        let late = EngineUpdate::new(
            first_epoch,
            icy("Old Station - Old Song", Some("http://cover")),
        );
        assert!(h.session.apply_engine_event(late).is_none());
        h.session.apply_engine_event(EngineUpdate::new(
            first_epoch,
            EngineEvent::StateChanged {
                play_when_ready: true,
                state: EngineState::Ready,
            },
        ));

        assert!(h.session.metadata().is_none());
        assert_eq!(h.session.now_playing().title, "Second");
        assert_eq!(h.session.state(), PlaybackState::Idle);
        assert!(h.take_events().is_empty());

        h.apply(icy("New Artist - New Song", None));
        assert_eq!(h.session.metadata().unwrap().title, "New Artist");
    }

    #[test]
    fn test_play_and_pause_update_state_without_engine_echo() {
        let mut h = Harness::new();
        h.load("Radio", "http://a/stream");
        h.apply(EngineEvent::StateChanged {
            play_when_ready: false,
            state: EngineState::Ready,
        });
        assert_eq!(h.session.state(), PlaybackState::Paused);

        h.session.play();
        assert_eq!(h.session.state(), PlaybackState::Playing);
        assert!(h.session.now_playing().play_when_ready);

        h.session.pause();
        assert_eq!(h.session.state(), PlaybackState::Paused);
        assert!(!h.session.play_when_ready());
    }

    #[test]
    fn test_release_frees_engine_once() {
        let mut h = Harness::new();
        h.session.release();
        h.session.release();
        assert_eq!(h.take_calls(), vec![EngineCall::Release]);
    }

    #[test]
    fn test_session_event_serializes_with_tag() {
        let event = SessionEvent::StateChanged {
            play_when_ready: true,
            state: PlaybackState::Playing,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "state_changed");
        assert_eq!(json["play_when_ready"], true);
        assert_eq!(json["state"], "Playing");
    }
}
