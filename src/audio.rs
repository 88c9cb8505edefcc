use anyhow::{anyhow, Result};
use futures_util::stream::StreamExt;
use log::{debug, warn};
use reqwest::header::CONTENT_TYPE;
use rodio::{OutputStream, OutputStreamHandle, Sink};
use std::io::{Read, Seek, SeekFrom};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Duration;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::{MediaSource, MediaSourceStream, MediaSourceStreamOptions};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::default::{get_codecs, get_probe};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::ServiceConfig;
use crate::engine::{EngineEvent, EngineEventSender, EngineState, EngineUpdate, PlaybackEngine};
use crate::icy::{self, IcyDemuxer};

const AUDIO_CHUNK_QUEUE: usize = 32;
const RECONNECT_DELAY_MS: u64 = 2000;
/// Decoded buffers the sink may hold before decoding waits
const MAX_QUEUED_BUFFERS: usize = 64;

/// A wrapper so we can feed network chunks into Symphonia.
///
/// Reads block the decode thread until the network task delivers the next
/// chunk; a closed channel reads as end of stream.
struct ChannelSource {
    receiver: mpsc::Receiver<Vec<u8>>,
    chunk: Vec<u8>,
    pos: usize,
}

impl ChannelSource {
    fn new(receiver: mpsc::Receiver<Vec<u8>>) -> Self {
        Self {
            receiver,
            chunk: Vec::new(),
            pos: 0,
        }
    }
}

impl Read for ChannelSource {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        while self.pos >= self.chunk.len() {
            match self.receiver.blocking_recv() {
                Some(chunk) => {
                    self.chunk = chunk;
                    self.pos = 0;
                }
                None => return Ok(0),
            }
        }

        let n = std::cmp::min(buf.len(), self.chunk.len() - self.pos);
        buf[..n].copy_from_slice(&self.chunk[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

impl Seek for ChannelSource {
    fn seek(&mut self, _: SeekFrom) -> std::io::Result<u64> {
        Err(std::io::Error::new(std::io::ErrorKind::Unsupported, "seek not supported"))
    }
}

impl MediaSource for ChannelSource {
    fn is_seekable(&self) -> bool {
        false
    }

    fn byte_len(&self) -> Option<u64> {
        None
    }
}

/// Essence of a `Content-Type` header usable as a Symphonia hint.
fn mime_essence(content_type: &str) -> Option<&str> {
    let essence = content_type.split(';').next()?.trim();
    if essence.is_empty() {
        None
    } else {
        Some(essence)
    }
}

/// Consolidated player state to avoid multiple mutex locks
struct PlayerState {
    items: Vec<String>,
    /// Stamped into every event about `items`
    epoch: u64,
    play_when_ready: bool,
    engine_state: EngineState,
    sink: Option<Sink>,
    cancellation_token: Option<CancellationToken>,
}

impl std::fmt::Debug for PlayerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlayerState")
            .field("items", &self.items)
            .field("epoch", &self.epoch)
            .field("play_when_ready", &self.play_when_ready)
            .field("engine_state", &self.engine_state)
            .field("sink", &self.sink.as_ref().map(|_| "Some(Sink)"))
            .field("cancellation_token", &self.cancellation_token.as_ref().map(|_| "Some(Token)"))
            .finish()
    }
}

impl PlayerState {
    fn new() -> Self {
        Self {
            items: Vec::new(),
            epoch: 0,
            play_when_ready: false,
            engine_state: EngineState::Idle,
            sink: None,
            cancellation_token: None,
        }
    }

    fn set_state(&mut self, state: EngineState, events: &EngineEventSender) {
        if self.engine_state == state {
            return;
        }
        debug!("Engine state changing from {:?} to {:?}", self.engine_state, state);
        self.engine_state = state;
        self.report(
            EngineEvent::StateChanged {
                play_when_ready: self.play_when_ready,
                state,
            },
            events,
        );
    }

    fn report(&self, event: EngineEvent, events: &EngineEventSender) {
        let _ = events.send(EngineUpdate::new(self.epoch, event));
    }

    fn backlog(&self) -> usize {
        self.sink.as_ref().map(|sink| sink.len()).unwrap_or(0)
    }
}

fn lock(state: &Mutex<PlayerState>) -> Result<MutexGuard<'_, PlayerState>> {
    state
        .lock()
        .map_err(|_| anyhow!("Failed to acquire state lock"))
}

/// Owns the audio device on its own thread; rodio's stream cannot move between threads.
struct OutputThread {
    handle: OutputStreamHandle,
    shutdown: Option<std::sync::mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl OutputThread {
    fn start() -> Result<Self> {
        let (ready_tx, ready_rx) = std::sync::mpsc::channel();
        let (shutdown_tx, shutdown_rx) = std::sync::mpsc::channel::<()>();

        let thread = std::thread::Builder::new()
            .name("radio-output".to_string())
            .spawn(move || match OutputStream::try_default() {
                Ok((stream, handle)) => {
                    let _ = ready_tx.send(Ok(handle));
                    // Returns once the sender is dropped
                    let _ = shutdown_rx.recv();
                    drop(stream);
                    debug!("Audio output closed");
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                }
            })?;

        let handle = ready_rx
            .recv()
            .map_err(|_| anyhow!("Audio output thread exited"))??;

        Ok(Self {
            handle,
            shutdown: Some(shutdown_tx),
            thread: Some(thread),
        })
    }

    fn stop(&mut self) {
        drop(self.shutdown.take());
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for OutputThread {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Streams internet radio through rodio, decoding with Symphonia.
///
/// `prepare` spawns onto the ambient Tokio runtime, so the engine must be
/// driven from inside one.
pub struct RodioEngine {
    state: Arc<Mutex<PlayerState>>,
    output: OutputThread,
    events: EngineEventSender,
    client: reqwest::Client,
}

impl RodioEngine {
    pub fn new(config: &ServiceConfig, events: EngineEventSender) -> Result<Self> {
        let output = OutputThread::start()?;
        // No overall timeout: radio streams never finish
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .connect_timeout(config.playlist_timeout)
            .build()?;

        Ok(Self {
            state: Arc::new(Mutex::new(PlayerState::new())),
            output,
            events,
            client,
        })
    }

    /// Play the items in order, falling through to the next on failure and
    /// reconnecting to the current one when its stream ends.
    async fn play_items(
        items: Vec<String>,
        epoch: u64,
        state: Arc<Mutex<PlayerState>>,
        stream_handle: OutputStreamHandle,
        events: EngineEventSender,
        client: reqwest::Client,
        cancellation_token: CancellationToken,
    ) {
        let mut index = 0;
        let mut failures = 0;

        while !cancellation_token.is_cancelled() {
            let url = &items[index];
            match Self::play_stream(
                url,
                epoch,
                &client,
                &stream_handle,
                &state,
                &events,
                &cancellation_token,
            )
            .await
            {
                Ok(frames) => {
                    debug!("Stream {} ended after {} frames", url, frames);
                    failures = 0;
                }
                Err(e) => {
                    warn!("Stream {} failed: {}", url, e);
                    failures += 1;
                    if failures >= items.len() {
                        Self::fail(&state, &events, &cancellation_token, e.to_string());
                        return;
                    }
                    index = (index + 1) % items.len();
                    continue;
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(RECONNECT_DELAY_MS)) => {},
                _ = cancellation_token.cancelled() => {
                    debug!("Reconnect cancelled");
                    break;
                }
            }
        }
    }

    fn fail(
        state: &Mutex<PlayerState>,
        events: &EngineEventSender,
        cancellation_token: &CancellationToken,
        message: String,
    ) {
        let Ok(mut state) = lock(state) else {
            return;
        };
        // A stop() or new items already replaced this playback
        if cancellation_token.is_cancelled() {
            return;
        }
        state.cancellation_token = None;
        if let Some(sink) = state.sink.take() {
            sink.stop();
        }
        state.report(EngineEvent::Error(message), events);
        state.set_state(EngineState::Idle, events);
    }

    /// Connect to one stream and play it until it ends or is cancelled.
    /// Returns the number of frames handed to the sink.
    async fn play_stream(
        url: &str,
        epoch: u64,
        client: &reqwest::Client,
        stream_handle: &OutputStreamHandle,
        state: &Arc<Mutex<PlayerState>>,
        events: &EngineEventSender,
        cancellation_token: &CancellationToken,
    ) -> Result<u64> {
        debug!("Fetching stream from URL: {}", url);

        let response = client
            .get(url)
            .header("Icy-MetaData", "1")
            .send()
            .await?
            .error_for_status()?;

        let demuxer = icy::metaint_from_headers(response.headers()).and_then(IcyDemuxer::new);
        let mut hint = Hint::new();
        if let Some(mime) = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .and_then(mime_essence)
        {
            hint.mime_type(mime);
        }
        debug!("Connected to {} (ICY metadata: {})", url, demuxer.is_some());

        {
            let sink = Sink::try_new(stream_handle)?;
            let mut state_guard = lock(state)?;
            if cancellation_token.is_cancelled() {
                return Ok(0);
            }
            if !state_guard.play_when_ready {
                sink.pause();
            }
            if let Some(old_sink) = state_guard.sink.replace(sink) {
                old_sink.stop();
            }
            state_guard.set_state(EngineState::Buffering, events);
        }

        let (chunk_tx, chunk_rx) = mpsc::channel::<Vec<u8>>(AUDIO_CHUNK_QUEUE);

        // Keep feeding network bytes to the decoder, peeling off ICY metadata
        let network = {
            let cancellation_token = cancellation_token.clone();
            let events = events.clone();
            tokio::spawn(async move {
                let mut stream = response.bytes_stream();
                let mut demuxer = demuxer;
                let mut total_bytes = 0usize;

                loop {
                    let chunk = tokio::select! {
                        _ = cancellation_token.cancelled() => {
                            debug!("Network fetch cancelled");
                            break;
                        }
                        chunk = stream.next() => chunk,
                    };
                    let chunk = match chunk {
                        Some(Ok(chunk)) => chunk,
                        Some(Err(e)) => {
                            warn!("Network stream error: {}", e);
                            break;
                        }
                        None => break,
                    };
                    total_bytes += chunk.len();

                    let audio = match demuxer.as_mut() {
                        Some(demuxer) => {
                            let demuxed = demuxer.push(&chunk);
                            // A stop() may have landed while the chunk was in flight
                            if cancellation_token.is_cancelled() {
                                break;
                            }
                            for info in demuxed.metadata {
                                let update = EngineUpdate::new(epoch, EngineEvent::Metadata(info));
                                let _ = events.send(update);
                            }
                            demuxed.audio
                        }
                        None => chunk.to_vec(),
                    };
                    if audio.is_empty() {
                        continue;
                    }

                    tokio::select! {
                        sent = chunk_tx.send(audio) => {
                            if sent.is_err() {
                                break;
                            }
                        }
                        _ = cancellation_token.cancelled() => break,
                    }
                }
                debug!("Network stream ended, total bytes: {}KB", total_bytes / 1024);
            })
        };

        let decode_task = {
            let state = state.clone();
            let events = events.clone();
            let cancellation_token = cancellation_token.clone();
            let source = ChannelSource::new(chunk_rx);
            tokio::task::spawn_blocking(move || {
                Self::decode_blocking_task(source, hint, &state, &events, &cancellation_token)
            })
        };

        let frames = decode_task.await?;
        network.abort();
        let frames = frames?;

        if frames == 0 && !cancellation_token.is_cancelled() {
            return Err(anyhow!("stream ended without audio"));
        }
        Ok(frames)
    }

    /// CPU-heavy blocking task for Symphonia decoding
    fn decode_blocking_task(
        source: ChannelSource,
        hint: Hint,
        state: &Mutex<PlayerState>,
        events: &EngineEventSender,
        cancellation_token: &CancellationToken,
    ) -> Result<u64> {
        let mss = MediaSourceStream::new(
            Box::new(source) as Box<dyn MediaSource>,
            MediaSourceStreamOptions::default(),
        );

        let probed = get_probe().format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )?;
        let mut format = probed.format;

        let track = format
            .default_track()
            .ok_or_else(|| anyhow!("no default track"))?;
        let track_id = track.id;
        let mut decoder = get_codecs().make(&track.codec_params, &DecoderOptions::default())?;

        debug!(
            "Found audio track: codec={:?}, sample_rate={:?}, channels={:?}",
            track.codec_params.codec, track.codec_params.sample_rate, track.codec_params.channels
        );

        let mut frames = 0u64;

        loop {
            if cancellation_token.is_cancelled() {
                debug!("Decode task cancelled");
                break;
            }

            let packet = match format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    debug!("End of stream");
                    break;
                }
                Err(SymphoniaError::ResetRequired) => {
                    warn!("Decoder reset required (unsupported)");
                    break;
                }
                Err(e) => {
                    debug!("Format error: {}", e);
                    break;
                }
            };
            if packet.track_id() != track_id {
                continue;
            }

            let decoded = match decoder.decode(&packet) {
                Ok(decoded) => decoded,
                Err(SymphoniaError::DecodeError(e)) => {
                    // Non-fatal, skip bad frame
                    debug!("Skipping undecodable frame: {}", e);
                    continue;
                }
                Err(e) => {
                    debug!("Decoder error: {}", e);
                    break;
                }
            };

            let spec = *decoded.spec();
            let channels = spec.channels.count();
            let mut samples = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
            samples.copy_interleaved_ref(decoded);
            if samples.samples().is_empty() || channels == 0 {
                continue;
            }
            frames += (samples.samples().len() / channels) as u64;

            let source = rodio::buffer::SamplesBuffer::new(
                channels as u16,
                spec.rate,
                samples.samples().to_vec(),
            );

            {
                let mut state_guard = lock(state)?;
                if cancellation_token.is_cancelled() {
                    break;
                }
                let Some(sink) = state_guard.sink.as_ref() else {
                    break;
                };
                sink.append(source);
                state_guard.set_state(EngineState::Ready, events);
            }

            // Decoding outpaces real time; wait while the sink is well fed
            while !cancellation_token.is_cancelled() && lock(state)?.backlog() > MAX_QUEUED_BUFFERS
            {
                std::thread::sleep(Duration::from_millis(20));
            }
        }

        debug!("Decode blocking task ended after {} frames", frames);
        Ok(frames)
    }
}

impl PlaybackEngine for RodioEngine {
    fn set_media_items(&mut self, epoch: u64, urls: Vec<String>) -> Result<()> {
        self.stop();
        let mut state = lock(&self.state)?;
        debug!("Queued {} media item(s) for epoch {}", urls.len(), epoch);
        state.items = urls;
        state.epoch = epoch;
        Ok(())
    }

    fn stop(&mut self) {
        if let Ok(mut state) = self.state.lock() {
            if let Some(token) = state.cancellation_token.take() {
                token.cancel();
            }
            if let Some(sink) = state.sink.take() {
                sink.stop();
            }
            state.set_state(EngineState::Idle, &self.events);
            debug!("Audio stopped");
        }
    }

    fn set_play_when_ready(&mut self, play_when_ready: bool) {
        if let Ok(mut state) = self.state.lock() {
            if state.play_when_ready == play_when_ready {
                return;
            }
            state.play_when_ready = play_when_ready;
            if let Some(sink) = state.sink.as_ref() {
                if play_when_ready {
                    sink.play();
                } else {
                    sink.pause();
                }
            }
            state.report(
                EngineEvent::StateChanged {
                    play_when_ready,
                    state: state.engine_state,
                },
                &self.events,
            );
        }
    }

    fn play_when_ready(&self) -> bool {
        self.state
            .lock()
            .map(|state| state.play_when_ready)
            .unwrap_or(false)
    }

    fn prepare(&mut self) {
        let (items, epoch, cancellation_token) = {
            let Ok(mut state) = self.state.lock() else {
                return;
            };
            if state.items.is_empty() || state.cancellation_token.is_some() {
                return;
            }
            let cancellation_token = CancellationToken::new();
            state.cancellation_token = Some(cancellation_token.clone());
            state.set_state(EngineState::Buffering, &self.events);
            (state.items.clone(), state.epoch, cancellation_token)
        };

        tokio::spawn(Self::play_items(
            items,
            epoch,
            self.state.clone(),
            self.output.handle.clone(),
            self.events.clone(),
            self.client.clone(),
            cancellation_token,
        ));
    }

    fn release(&mut self) {
        debug!("Releasing audio engine");
        self.stop();
        self.output.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::engine_channel;

    #[test]
    fn test_mime_essence() {
        assert_eq!(mime_essence("audio/mpeg"), Some("audio/mpeg"));
        assert_eq!(mime_essence("audio/aac; charset=utf-8"), Some("audio/aac"));
        assert_eq!(mime_essence(" ;x"), None);
    }

    #[test]
    fn test_channel_source_reads_across_chunks() {
        let (tx, rx) = mpsc::channel(4);
        tx.try_send(vec![1, 2, 3]).unwrap();
        tx.try_send(Vec::new()).unwrap();
        tx.try_send(vec![4, 5]).unwrap();
        drop(tx);

        let mut source = ChannelSource::new(rx);
        let mut out = Vec::new();
        source.read_to_end(&mut out).unwrap();
        assert_eq!(out, vec![1, 2, 3, 4, 5]);
        assert!(!source.is_seekable());
        assert!(source.seek(SeekFrom::Start(0)).is_err());
    }

    #[test]
    fn test_player_state_reports_changes_only() {
        let (events, mut receiver) = engine_channel();
        let mut state = PlayerState::new();
        state.play_when_ready = true;

        state.set_state(EngineState::Idle, &events);
        state.set_state(EngineState::Buffering, &events);
        state.set_state(EngineState::Buffering, &events);

        assert_eq!(
            receiver.try_recv().unwrap(),
            EngineUpdate::new(
                0,
                EngineEvent::StateChanged {
                    play_when_ready: true,
                    state: EngineState::Buffering,
                }
            )
        );
        assert!(receiver.try_recv().is_err());
        assert_eq!(state.backlog(), 0);
    }

    #[test]
    fn test_player_state_stamps_current_epoch() {
        let (events, mut receiver) = engine_channel();
        let mut state = PlayerState::new();
        state.epoch = 3;

        state.set_state(EngineState::Buffering, &events);
        state.report(EngineEvent::Error("unreachable".to_string()), &events);

        let epochs: Vec<u64> = std::iter::from_fn(|| receiver.try_recv().ok())
            .map(|update| update.epoch)
            .collect();
        assert_eq!(epochs, vec![3, 3]);
    }
}
