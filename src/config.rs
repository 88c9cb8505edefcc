use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_USER_AGENT: &str = concat!("radio-service/", env!("CARGO_PKG_VERSION"));

/// Runtime settings for the radio service
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub user_agent: String,
    /// Upper bound for fetching a .pls/.m3u body
    pub playlist_timeout: Duration,
    /// Upper bound for downloading cover art
    pub artwork_timeout: Duration,
    pub default_artwork: Option<PathBuf>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            playlist_timeout: Duration::from_secs(15),
            artwork_timeout: Duration::from_secs(10),
            default_artwork: None,
        }
    }
}

/// Command line shared by both binaries
#[derive(Debug, Clone, Parser)]
#[command(version, about = "Play an internet radio stream in the background")]
pub struct Cli {
    /// Stream, .pls or .m3u URL to play
    pub url: String,

    /// Title shown until the stream sends its own metadata
    #[arg(short, long, default_value = "Radio")]
    pub title: String,

    /// Image shown when the stream has no cover art
    #[arg(long)]
    pub default_artwork: Option<PathBuf>,

    /// Seconds to wait for a playlist body
    #[arg(long, default_value_t = 15)]
    pub playlist_timeout: u64,

    /// Seconds to wait for cover art
    #[arg(long, default_value_t = 10)]
    pub artwork_timeout: u64,

    #[arg(long, default_value = DEFAULT_USER_AGENT)]
    pub user_agent: String,

    /// Load the stream without starting playback
    #[arg(long)]
    pub paused: bool,
}

impl Cli {
    pub fn service_config(&self) -> ServiceConfig {
        ServiceConfig {
            user_agent: self.user_agent.clone(),
            playlist_timeout: Duration::from_secs(self.playlist_timeout),
            artwork_timeout: Duration::from_secs(self.artwork_timeout),
            default_artwork: self.default_artwork.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_maps_to_config() {
        let cli = Cli::parse_from([
            "radio-service",
            "http://example.com/radio.pls",
            "--title",
            "Groove Salad",
            "--artwork-timeout",
            "3",
        ]);

        assert_eq!(cli.url, "http://example.com/radio.pls");
        assert_eq!(cli.title, "Groove Salad");
        assert!(!cli.paused);

        let config = cli.service_config();
        assert_eq!(config.artwork_timeout, Duration::from_secs(3));
        assert_eq!(config.playlist_timeout, Duration::from_secs(15));
        assert_eq!(config.user_agent, DEFAULT_USER_AGENT);
        assert!(config.default_artwork.is_none());
    }
}
