use anyhow::Result;
use crossterm::event::KeyCode;
use log::debug;
use radio_service::{ServiceError, ServiceHandle, SessionEvent};

use crate::ui::UIState;

pub struct AppController {
    pub ui_state: UIState,
    handle: ServiceHandle,
}

impl AppController {
    pub fn new(handle: ServiceHandle, stream_url: String) -> Self {
        Self {
            ui_state: UIState::new(stream_url),
            handle,
        }
    }

    pub async fn handle_key_event(&mut self, key_code: KeyCode) -> Result<bool> {
        match key_code {
            KeyCode::Char('q') | KeyCode::Esc | KeyCode::Char('Q') => {
                self.ui_state.quit();
                return Ok(true);
            }
            KeyCode::Char(' ') => {
                self.toggle_playback().await?;
            }
            _ => {}
        }
        Ok(false)
    }

    async fn toggle_playback(&mut self) -> Result<()> {
        if self.ui_state.play_when_ready() {
            debug!("Pausing");
            self.handle.pause().await?;
            self.ui_state.status_message = "Paused".to_string();
        } else {
            debug!("Resuming");
            self.handle.play().await?;
            self.ui_state.status_message = "Playing".to_string();
        }
        Ok(())
    }

    pub fn process_event(&mut self, event: &SessionEvent) {
        apply_event(&mut self.ui_state, event);
    }

    pub fn load_finished(&mut self, result: Result<()>) {
        apply_load_result(&mut self.ui_state, result);
    }

    pub fn should_quit(&self) -> bool {
        self.ui_state.should_quit
    }
}

fn apply_event(ui: &mut UIState, event: &SessionEvent) {
    match event {
        SessionEvent::NowPlaying(now_playing) => ui.set_now_playing(now_playing.clone()),
        SessionEvent::MetadataChanged(metadata) => {
            ui.last_error = None;
            ui.status_message = if metadata.subtitle.is_empty() {
                format!("♪ {}", metadata.title)
            } else {
                format!("♪ {} - {}", metadata.title, metadata.subtitle)
            };
        }
        SessionEvent::PlaybackFailed { message } => {
            ui.last_error = Some(message.clone());
        }
        // The NowPlaying event that follows carries the same state
        SessionEvent::StateChanged { .. } => {}
    }
}

fn apply_load_result(ui: &mut UIState, result: Result<()>) {
    ui.is_loading = false;
    match result {
        Ok(()) => ui.last_error = None,
        Err(e) => {
            if matches!(e.downcast_ref::<ServiceError>(), Some(ServiceError::Superseded)) {
                return;
            }
            ui.last_error = Some(format!("Could not load stream: {}", e));
        }
    }
}
