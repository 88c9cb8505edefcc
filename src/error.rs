//! Error taxonomy shared by the resolver, projector and session.

/// Errors surfaced by the radio service core.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Failed to fetch playlist {url}: {source}")]
    Fetch {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("Playlist {url} contains no playable URLs")]
    EmptyPlaylist { url: String },

    #[error("Artwork unavailable: {0}")]
    Artwork(String),

    #[error("Metadata event has no title")]
    NoTitle,

    #[error("Load was superseded by a newer request")]
    Superseded,

    #[error("Playback engine error: {0}")]
    Engine(#[from] anyhow::Error),

    #[error("Radio service is not running")]
    ServiceStopped,
}

pub type Result<T> = std::result::Result<T, ServiceError>;
