use radio_service::{Artwork, NowPlaying, PlaybackState};
use ratatui::{
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span, Text},
    widgets::{Block, Borders, Paragraph},
    Frame,
};

// Layout constants for better maintainability
const HEADER_HEIGHT: u16 = 3;
const FOOTER_HEIGHT: u16 = 3;
const STATUS_HEIGHT: u16 = 3;
const MARGIN: u16 = 1;

// Artwork is drawn with half blocks, two pixels per cell
const ARTWORK_COLS: u32 = 24;
const ARTWORK_ROWS: u32 = 12;
const ARTWORK_PANEL_WIDTH: u16 = ARTWORK_COLS as u16 + 2;

pub struct UIState {
    pub stream_url: String,
    pub now_playing: Option<NowPlaying>,
    pub should_quit: bool,
    // Status and loading flags
    pub status_message: String,
    pub is_loading: bool,
    pub last_error: Option<String>,
    // Rendered artwork, rebuilt only when the image changes
    thumbnail: Option<(Artwork, Vec<Line<'static>>)>,
}

impl UIState {
    pub fn new(stream_url: String) -> Self {
        Self {
            stream_url,
            now_playing: None,
            should_quit: false,
            status_message: String::new(),
            is_loading: true,
            last_error: None,
            thumbnail: None,
        }
    }

    pub fn play_when_ready(&self) -> bool {
        self.now_playing
            .as_ref()
            .map(|now| now.play_when_ready)
            .unwrap_or(false)
    }

    pub fn set_now_playing(&mut self, now_playing: NowPlaying) {
        let unchanged = match (&self.thumbnail, &now_playing.artwork) {
            (Some((cached, _)), Some(artwork)) => cached.ptr_eq(artwork),
            (None, None) => true,
            _ => false,
        };
        if !unchanged {
            self.thumbnail = now_playing
                .artwork
                .as_ref()
                .map(|artwork| (artwork.clone(), artwork_lines(artwork)));
        }
        self.now_playing = Some(now_playing);
    }

    pub fn quit(&mut self) {
        self.should_quit = true;
    }
}

/// Render the artwork as rows of `▀` cells: foreground is the upper pixel,
/// background the lower one.
fn artwork_lines(artwork: &Artwork) -> Vec<Line<'static>> {
    let pixels = artwork
        .image()
        .thumbnail_exact(ARTWORK_COLS, ARTWORK_ROWS * 2)
        .to_rgb8();

    (0..ARTWORK_ROWS)
        .map(|row| {
            let spans: Vec<Span<'static>> = (0..ARTWORK_COLS)
                .map(|col| {
                    let top = pixels.get_pixel(col, row * 2);
                    let bottom = pixels.get_pixel(col, row * 2 + 1);
                    Span::styled(
                        "▀",
                        Style::default()
                            .fg(Color::Rgb(top[0], top[1], top[2]))
                            .bg(Color::Rgb(bottom[0], bottom[1], bottom[2])),
                    )
                })
                .collect();
            Line::from(spans)
        })
        .collect()
}

pub fn render_ui(f: &mut Frame, app: &UIState) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .margin(MARGIN)
        .constraints([
            Constraint::Length(HEADER_HEIGHT),
            Constraint::Min(ARTWORK_ROWS as u16 + 2),
            Constraint::Length(STATUS_HEIGHT),
            Constraint::Length(FOOTER_HEIGHT),
        ])
        .split(f.area());

    render_header(f, chunks[0], app);
    render_notification(f, chunks[1], app);
    render_status(f, chunks[2], app);
    render_footer(f, chunks[3]);
}

fn state_label(now: Option<&NowPlaying>) -> (&'static str, Color) {
    match now.map(|now| now.state) {
        Some(PlaybackState::Playing) => ("PLAYING", Color::Green),
        Some(PlaybackState::Paused) => ("PAUSED", Color::Yellow),
        Some(PlaybackState::Buffering) => ("BUFFERING", Color::Cyan),
        Some(PlaybackState::Stopped) => ("STOPPED", Color::Gray),
        Some(PlaybackState::Idle) | None => ("IDLE", Color::Gray),
    }
}

fn render_header(f: &mut Frame, area: Rect, app: &UIState) {
    let (status, color) = state_label(app.now_playing.as_ref());
    let line = Line::from(vec![
        Span::styled("RADIO ", Style::default().fg(Color::Magenta).add_modifier(Modifier::BOLD)),
        Span::styled(
            truncate_string(&app.stream_url, area.width.saturating_sub(20) as usize),
            Style::default().fg(Color::Cyan),
        ),
        Span::styled(" ", Style::default()),
        Span::styled(status, Style::default().fg(color).add_modifier(Modifier::BOLD)),
    ]);

    let header = Paragraph::new(line).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Magenta)),
    );
    f.render_widget(header, area);
}

fn render_notification(f: &mut Frame, area: Rect, app: &UIState) {
    let columns = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Length(ARTWORK_PANEL_WIDTH), Constraint::Min(20)])
        .split(area);

    let artwork = match &app.thumbnail {
        Some((_, lines)) => Paragraph::new(Text::from(lines.clone())),
        None => Paragraph::new("No artwork")
            .alignment(Alignment::Center)
            .style(Style::default().fg(Color::DarkGray)),
    };
    f.render_widget(
        artwork.block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::Yellow)),
        ),
        columns[0],
    );

    let text_width = columns[1].width.saturating_sub(4) as usize;
    let content = match &app.now_playing {
        Some(now) => {
            let mut lines = vec![
                Line::from(""),
                Line::from(Span::styled(
                    truncate_string(&now.title, text_width),
                    Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
                )),
            ];
            if let Some(subtitle) = &now.subtitle {
                lines.push(Line::from(Span::styled(
                    truncate_string(subtitle, text_width),
                    Style::default().fg(Color::White),
                )));
            }
            lines
        }
        None => vec![Line::from(Span::styled(
            "Waiting for the stream…",
            Style::default().fg(Color::Gray),
        ))],
    };

    let details = Paragraph::new(Text::from(content)).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Yellow))
            .title("Now Playing"),
    );
    f.render_widget(details, columns[1]);
}

fn render_status(f: &mut Frame, area: Rect, app: &UIState) {
    // Errors win over progress, progress over messages
    let (text, color) = if let Some(error) = &app.last_error {
        (format!("✖ {}", error), Color::Red)
    } else if app.is_loading {
        ("Resolving stream…".to_string(), Color::White)
    } else if !app.status_message.is_empty() {
        (app.status_message.clone(), Color::White)
    } else {
        (String::new(), Color::White)
    };

    let status = Paragraph::new(Line::from(Span::styled(
        truncate_string(&text, area.width.saturating_sub(4) as usize),
        Style::default().fg(color),
    )))
    .block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Blue))
            .title("Status"),
    );
    f.render_widget(status, area);
}

fn render_footer(f: &mut Frame, area: Rect) {
    let controls_text = Line::from(vec![
        Span::styled("SPACE ", Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD)),
        Span::styled("Play/Pause • ", Style::default().fg(Color::White)),
        Span::styled("Q ", Style::default().fg(Color::Red).add_modifier(Modifier::BOLD)),
        Span::styled("Quit", Style::default().fg(Color::White)),
    ]);

    let controls = Paragraph::new(controls_text)
        .alignment(Alignment::Center)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::Gray))
                .title("Controls"),
        );
    f.render_widget(controls, area);
}

fn truncate_string(s: &str, max_len: usize) -> String {
    // Char-aware truncation to avoid breaking UTF-8 boundaries
    if s.chars().count() <= max_len {
        return s.to_string();
    }
    if max_len <= 3 {
        return s.chars().take(max_len).collect();
    }
    let mut trimmed: String = s.chars().take(max_len - 3).collect();
    trimmed.push_str("...");
    trimmed
}
