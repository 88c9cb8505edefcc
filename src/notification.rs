//! Notification content and the stock session listeners.

use log::info;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::artwork::Artwork;
use crate::metadata::StreamMetadata;
use crate::playlist::StreamRequest;
use crate::session::{PlaybackState, SessionEvent, SessionListener};

/// What the media notification shows right now.
#[derive(Debug, Clone, Serialize)]
pub struct NowPlaying {
    pub title: String,
    pub subtitle: Option<String>,
    #[serde(skip)]
    pub artwork: Option<Artwork>,
    pub play_when_ready: bool,
    pub state: PlaybackState,
}

impl NowPlaying {
    /// Stream metadata wins over the request title, track artwork over the default.
    pub fn describe(
        request: Option<&StreamRequest>,
        metadata: Option<&StreamMetadata>,
        track_artwork: Option<&Artwork>,
        default_artwork: Option<&Artwork>,
        play_when_ready: bool,
        state: PlaybackState,
    ) -> Self {
        let title = match (metadata, request) {
            (Some(metadata), _) => metadata.title.clone(),
            (None, Some(request)) => request.display_title.clone(),
            (None, None) => String::new(),
        };
        let subtitle = metadata
            .map(|metadata| metadata.subtitle.clone())
            .filter(|subtitle| !subtitle.is_empty());

        Self {
            title,
            subtitle,
            artwork: track_artwork.or(default_artwork).cloned(),
            play_when_ready,
            state,
        }
    }
}

/// Forwards every event to an async consumer.
pub struct ChannelListener {
    sender: mpsc::UnboundedSender<SessionEvent>,
}

impl ChannelListener {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl SessionListener for ChannelListener {
    fn on_event(&self, event: &SessionEvent) {
        // A closed receiver only means nobody renders anymore
        let _ = self.sender.send(event.clone());
    }
}

/// Logs state and metadata changes.
pub struct LogListener;

impl SessionListener for LogListener {
    fn on_event(&self, event: &SessionEvent) {
        match event {
            SessionEvent::StateChanged {
                play_when_ready,
                state,
            } => info!("State changed: {:?} (play when ready: {})", state, play_when_ready),
            SessionEvent::MetadataChanged(metadata) => {
                info!("Now playing: {} / {}", metadata.title, metadata.subtitle)
            }
            SessionEvent::PlaybackFailed { message } => info!("Playback failed: {}", message),
            SessionEvent::NowPlaying(_) => {}
        }
    }
}
