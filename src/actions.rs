//! Messages for async service operations
use tokio::sync::oneshot;

use crate::artwork::Artwork;
use crate::error::Result;
use crate::playlist::{ResolvedPlaylist, StreamRequest};
use crate::session::{ArtworkRequest, LoadTicket};

// Requests from handles to the service loop
#[derive(Debug)]
pub enum Command {
    Load {
        request: StreamRequest,
        reply: oneshot::Sender<Result<()>>,
    },
    Play,
    Pause,
    SetDefaultArtwork(Artwork),
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

// Results from background tasks back to the service loop
#[derive(Debug)]
pub enum Completion {
    Resolved {
        ticket: LoadTicket,
        result: Result<ResolvedPlaylist>,
        reply: oneshot::Sender<Result<()>>,
    },
    Artwork {
        request: ArtworkRequest,
        artwork: Option<Artwork>,
    },
}
