//! The radio service loop.
//!
//! One task owns the [`PlaybackSession`]. Commands from [`ServiceHandle`]s,
//! engine callbacks and background completions are all applied from that task,
//! so the session needs no lock. Playlist resolution and artwork downloads run
//! on their own tasks and can be cancelled by a newer load.

use log::{debug, info};
use std::ops::ControlFlow;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

use crate::actions::{Command, Completion};
use crate::artwork::{Artwork, ArtworkFetcher};
use crate::config::ServiceConfig;
use crate::engine::{EngineEventReceiver, PlaybackEngine};
use crate::error::{Result, ServiceError};
use crate::playlist::{PlaylistResolver, StreamRequest};
use crate::session::{ArtworkRequest, LoadTicket, PlaybackSession, SessionListener};

const COMMAND_QUEUE_SIZE: usize = 32;

pub struct RadioService {
    session: PlaybackSession,
    engine_events: EngineEventReceiver,
    resolver: Arc<PlaylistResolver>,
    artwork: Arc<ArtworkFetcher>,
    completions_tx: mpsc::UnboundedSender<Completion>,
    completions_rx: mpsc::UnboundedReceiver<Completion>,
}

impl RadioService {
    pub fn new(
        config: &ServiceConfig,
        engine: Box<dyn PlaybackEngine>,
        engine_events: EngineEventReceiver,
    ) -> Result<Self> {
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();
        Ok(Self {
            session: PlaybackSession::new(engine),
            engine_events,
            resolver: Arc::new(PlaylistResolver::new(config)?),
            artwork: Arc::new(ArtworkFetcher::new(config)?),
            completions_tx,
            completions_rx,
        })
    }

    pub fn add_listener(&mut self, listener: Arc<dyn SessionListener>) {
        self.session.add_listener(listener);
    }

    /// Run the service on the current tokio runtime.
    pub fn spawn(self) -> ServiceHandle {
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_QUEUE_SIZE);
        tokio::spawn(self.run(commands_rx));
        ServiceHandle {
            commands: commands_tx,
        }
    }

    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        debug!("Radio service started");
        let mut shutdown_reply = None;

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => {
                        if let ControlFlow::Break(reply) = self.handle_command(command) {
                            shutdown_reply = Some(reply);
                            break;
                        }
                    }
                    None => break,
                },
                Some(update) = self.engine_events.recv() => {
                    if let Some(request) = self.session.apply_engine_event(update) {
                        self.spawn_artwork(request);
                    }
                }
                Some(completion) = self.completions_rx.recv() => self.handle_completion(completion),
            }
        }

        self.session.release();
        // Refuse further commands before acknowledging the shutdown
        drop(commands);
        if let Some(reply) = shutdown_reply {
            let _ = reply.send(());
        }
        info!("Radio service stopped");
    }

    fn handle_command(&mut self, command: Command) -> ControlFlow<oneshot::Sender<()>> {
        match command {
            Command::Load { request, reply } => {
                let ticket = self.session.begin_load(request);
                self.spawn_resolution(ticket, reply);
            }
            Command::Play => self.session.play(),
            Command::Pause => self.session.pause(),
            Command::SetDefaultArtwork(artwork) => self.session.set_default_artwork(artwork),
            Command::Shutdown { reply } => return ControlFlow::Break(reply),
        }
        ControlFlow::Continue(())
    }

    fn handle_completion(&mut self, completion: Completion) {
        match completion {
            Completion::Resolved {
                ticket,
                result,
                reply,
            } => {
                let outcome = self.session.finish_load(ticket, result);
                let _ = reply.send(outcome);
            }
            Completion::Artwork { request, artwork } => {
                self.session.apply_artwork(request, artwork);
            }
        }
    }

    fn spawn_resolution(&self, ticket: LoadTicket, reply: oneshot::Sender<Result<()>>) {
        let resolver = self.resolver.clone();
        let completions = self.completions_tx.clone();
        let token = ticket.token.clone();

        tokio::spawn(async move {
            let result = tokio::select! {
                _ = token.cancelled() => {
                    debug!("Resolution of {} cancelled", ticket.request.source_url);
                    let _ = reply.send(Err(ServiceError::Superseded));
                    return;
                }
                result = resolver.resolve(&ticket.request.source_url) => result,
            };
            let _ = completions.send(Completion::Resolved {
                ticket,
                result,
                reply,
            });
        });
    }

    fn spawn_artwork(&self, request: ArtworkRequest) {
        let fetcher = self.artwork.clone();
        let completions = self.completions_tx.clone();
        let token = request.token.clone();

        tokio::spawn(async move {
            let artwork = tokio::select! {
                _ = token.cancelled() => {
                    debug!("Artwork download from {} cancelled", request.url);
                    return;
                }
                artwork = fetcher.download_image(Some(&request.url)) => artwork,
            };
            let _ = completions.send(Completion::Artwork { request, artwork });
        });
    }
}

/// Cloneable front door to a running [`RadioService`].
#[derive(Clone)]
pub struct ServiceHandle {
    commands: mpsc::Sender<Command>,
}

impl ServiceHandle {
    /// Resolve `url` and hand the streams to the engine.
    ///
    /// Resolves once the load has been applied or has failed; a newer load
    /// makes this one fail with [`ServiceError::Superseded`].
    pub async fn load_stream(
        &self,
        title: impl Into<String>,
        url: impl Into<String>,
    ) -> Result<()> {
        let (reply, response) = oneshot::channel();
        self.send(Command::Load {
            request: StreamRequest::new(title, url),
            reply,
        })
        .await?;
        response.await.map_err(|_| ServiceError::ServiceStopped)?
    }

    pub async fn play(&self) -> Result<()> {
        self.send(Command::Play).await
    }

    pub async fn pause(&self) -> Result<()> {
        self.send(Command::Pause).await
    }

    pub async fn set_default_artwork(&self, artwork: Artwork) -> Result<()> {
        self.send(Command::SetDefaultArtwork(artwork)).await
    }

    /// Release playback resources and stop the service loop.
    pub async fn shutdown(&self) -> Result<()> {
        let (reply, response) = oneshot::channel();
        self.send(Command::Shutdown { reply }).await?;
        response.await.map_err(|_| ServiceError::ServiceStopped)
    }

    async fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| ServiceError::ServiceStopped)
    }
}
