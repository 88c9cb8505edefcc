//! Seam between the session and the library that actually plays audio.

use serde::Serialize;
use tokio::sync::mpsc;

use crate::icy::IcyInfo;

/// Readiness reported by a playback engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EngineState {
    /// Nothing prepared, the engine waits for `prepare`
    Idle,
    Buffering,
    Ready,
    Ended,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    StateChanged {
        play_when_ready: bool,
        state: EngineState,
    },
    Metadata(IcyInfo),
    /// Every item failed; the engine has gone idle
    Error(String),
}

/// An [`EngineEvent`] stamped with the epoch of the media items it belongs to.
///
/// The epoch is the one passed to the latest
/// [`set_media_items`](PlaybackEngine::set_media_items) when the event was
/// produced, so events from replaced items can be told apart.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineUpdate {
    pub epoch: u64,
    pub event: EngineEvent,
}

impl EngineUpdate {
    pub fn new(epoch: u64, event: EngineEvent) -> Self {
        Self { epoch, event }
    }
}

pub type EngineEventSender = mpsc::UnboundedSender<EngineUpdate>;
pub type EngineEventReceiver = mpsc::UnboundedReceiver<EngineUpdate>;

/// Unbounded so metadata is never coalesced or dropped.
pub fn engine_channel() -> (EngineEventSender, EngineEventReceiver) {
    mpsc::unbounded_channel()
}

/// Operations the session needs from a playback engine.
///
/// Implementations report progress on the channel handed to them at
/// construction; calls here must not block.
pub trait PlaybackEngine: Send {
    /// Stop, drop the current items, rewind to zero and queue `urls`.
    ///
    /// Every event produced from here on carries `epoch`.
    fn set_media_items(&mut self, epoch: u64, urls: Vec<String>) -> anyhow::Result<()>;

    fn stop(&mut self);

    fn set_play_when_ready(&mut self, play_when_ready: bool);

    fn play_when_ready(&self) -> bool;

    /// Start buffering the queued items.
    fn prepare(&mut self);

    /// Free every playback resource. The engine is unusable afterwards.
    fn release(&mut self);
}
