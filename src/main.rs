mod app;
mod ui;

use anyhow::Result;
use app::AppController;
use clap::Parser;
use crossterm::{
    event::{self, Event},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use radio_service::notification::{ChannelListener, LogListener};
use radio_service::{build_service, start_stream, Cli, SessionEvent};
use ratatui::{backend::CrosstermBackend, Terminal};
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::sleep;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    let config = cli.service_config();

    // Audio output must exist before the terminal is taken over
    let mut service = build_service(&config)?;
    let (listener, events) = ChannelListener::new();
    service.add_listener(Arc::new(listener));
    service.add_listener(Arc::new(LogListener));
    let handle = service.spawn();

    // Set up panic handler to restore terminal
    let original_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic| {
        let _ = disable_raw_mode();
        let _ = execute!(io::stdout(), LeaveAlternateScreen);
        original_hook(panic);
    }));

    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    // Resolve in the background so the panel shows progress
    let (load_tx, load_rx) = oneshot::channel();
    let loader = handle.clone();
    let load_config = config.clone();
    let load_cli = cli.clone();
    tokio::spawn(async move {
        let _ = load_tx.send(start_stream(&loader, &load_config, &load_cli).await);
    });

    let mut app_controller = AppController::new(handle.clone(), cli.url.clone());
    let res = run_app(&mut terminal, &mut app_controller, events, load_rx).await;

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    handle.shutdown().await?;
    res
}

async fn run_app(
    terminal: &mut Terminal<CrosstermBackend<std::io::Stdout>>,
    app_controller: &mut AppController,
    mut events: mpsc::UnboundedReceiver<SessionEvent>,
    mut load_rx: oneshot::Receiver<Result<()>>,
) -> Result<()> {
    let mut load_pending = true;

    loop {
        // Render UI
        terminal.draw(|f| ui::render_ui(f, &app_controller.ui_state))?;

        // Handle input with shorter timeout for better responsiveness
        if event::poll(Duration::from_millis(50))? {
            if let Ok(Event::Key(key)) = event::read() {
                if app_controller.handle_key_event(key.code).await? {
                    break; // Quit was requested
                }
            }
        }

        // Drain session events without blocking
        while let Ok(event) = events.try_recv() {
            app_controller.process_event(&event);
        }

        if load_pending {
            match load_rx.try_recv() {
                Ok(result) => {
                    app_controller.load_finished(result);
                    load_pending = false;
                }
                Err(oneshot::error::TryRecvError::Empty) => {}
                Err(oneshot::error::TryRecvError::Closed) => load_pending = false,
            }
        }

        // Small delay to prevent high CPU usage but keep responsive
        sleep(Duration::from_millis(16)).await; // ~60 FPS

        if app_controller.should_quit() {
            break;
        }
    }

    Ok(())
}
