//! Background internet radio playback.
//!
//! A [`RadioService`] resolves `.pls`/`.m3u` playlists, plays the streams
//! through a [`PlaybackEngine`], turns ICY metadata into [`StreamMetadata`]
//! and keeps listeners informed of what the media notification should show.

pub mod actions;
pub mod artwork;
pub mod audio;
pub mod config;
pub mod engine;
pub mod error;
pub mod icy;
pub mod metadata;
pub mod notification;
pub mod playlist;
pub mod service;
pub mod session;
pub mod utils;

use log::warn;

pub use artwork::{Artwork, ArtworkFetcher};
pub use audio::RodioEngine;
pub use config::{Cli, ServiceConfig};
pub use engine::{EngineEvent, EngineState, EngineUpdate, PlaybackEngine};
pub use error::ServiceError;
pub use metadata::{project, StreamMetadata};
pub use notification::NowPlaying;
pub use playlist::{PlaylistResolver, ResolvedPlaylist, StreamRequest};
pub use service::{RadioService, ServiceHandle};
pub use session::{PlaybackSession, PlaybackState, SessionEvent, SessionListener};

/// A service playing through the default audio output.
pub fn build_service(config: &ServiceConfig) -> anyhow::Result<RadioService> {
    let (events_tx, events_rx) = engine::engine_channel();
    let engine = RodioEngine::new(config, events_tx)?;
    Ok(RadioService::new(config, Box::new(engine), events_rx)?)
}

/// Load the stream named on the command line.
///
/// The configured default artwork is set after the load since loading clears it.
pub async fn start_stream(
    handle: &ServiceHandle,
    config: &ServiceConfig,
    cli: &Cli,
) -> anyhow::Result<()> {
    if !cli.paused {
        handle.play().await?;
    }
    handle.load_stream(cli.title.as_str(), cli.url.as_str()).await?;

    if let Some(path) = &config.default_artwork {
        match Artwork::open(path.clone()).await {
            Ok(artwork) => handle.set_default_artwork(artwork).await?,
            Err(e) => warn!("Could not load default artwork {}: {}", path.display(), e),
        }
    }
    Ok(())
}
