//! Playlist resolution: turns a user supplied URL into playable stream URLs.

use log::debug;
use serde::Serialize;

use crate::config::ServiceConfig;
use crate::error::{Result, ServiceError};
use crate::utils::parsing::ParsingUtils;

/// What a user supplied URL points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaylistKind {
    Pls,
    M3u,
    Direct,
}

impl PlaylistKind {
    pub fn sniff(url: &str) -> Self {
        match ParsingUtils::playlist_extension(url).as_deref() {
            Some("pls") => PlaylistKind::Pls,
            Some("m3u") => PlaylistKind::M3u,
            _ => PlaylistKind::Direct,
        }
    }
}

/// Request to play a stream under a display title.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreamRequest {
    pub display_title: String,
    pub source_url: String,
}

impl StreamRequest {
    pub fn new(display_title: impl Into<String>, source_url: impl Into<String>) -> Self {
        Self {
            display_title: display_title.into(),
            source_url: source_url.into(),
        }
    }
}

/// Ordered, non-empty list of playable URLs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedPlaylist(Vec<String>);

impl ResolvedPlaylist {
    pub fn new(source_url: &str, urls: Vec<String>) -> Result<Self> {
        if urls.is_empty() {
            return Err(ServiceError::EmptyPlaylist {
                url: source_url.to_string(),
            });
        }
        Ok(Self(urls))
    }

    pub fn urls(&self) -> &[String] {
        &self.0
    }

    pub fn into_urls(self) -> Vec<String> {
        self.0
    }
}

pub struct PlaylistResolver {
    client: reqwest::Client,
}

impl PlaylistResolver {
    pub fn new(config: &ServiceConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(config.playlist_timeout)
            .build()
            .map_err(ServiceError::Client)?;
        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Resolve `url` into playable stream URLs.
    ///
    /// Only `.pls` and `.m3u` URLs touch the network; anything else is
    /// returned as the single entry.
    pub async fn resolve(&self, url: &str) -> Result<ResolvedPlaylist> {
        let urls = match PlaylistKind::sniff(url) {
            PlaylistKind::Pls => {
                let content = self.fetch_text(url).await?;
                ParsingUtils::parse_pls_content(&content)
            }
            PlaylistKind::M3u => {
                let content = self.fetch_text(url).await?;
                ParsingUtils::parse_m3u_content(&content).into_iter().collect()
            }
            PlaylistKind::Direct => vec![url.to_string()],
        };

        debug!("Resolved {} into {} stream URL(s)", url, urls.len());
        ResolvedPlaylist::new(url, urls)
    }

    async fn fetch_text(&self, url: &str) -> Result<String> {
        debug!("Fetching playlist from URL: {}", url);

        let fetch_error = |source| ServiceError::Fetch {
            url: url.to_string(),
            source,
        };

        let response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(fetch_error)?;

        response.text().await.map_err(fetch_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::{
        matchers::{method, path},
        Mock, MockServer, ResponseTemplate,
    };

    fn resolver() -> PlaylistResolver {
        PlaylistResolver::new(&ServiceConfig::default()).unwrap()
    }

    async fn serve(server: &MockServer, route: &str, body: &str) {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(server)
            .await;
    }

    #[test]
    fn test_invalid_user_agent_is_client_error() {
        let config = ServiceConfig {
            user_agent: "radio\nservice".to_string(),
            ..ServiceConfig::default()
        };
        assert!(matches!(
            PlaylistResolver::new(&config),
            Err(ServiceError::Client(_))
        ));
    }

    #[test]
    fn test_sniff_kind() {
        assert_eq!(PlaylistKind::sniff("http://a/b.pls"), PlaylistKind::Pls);
        assert_eq!(PlaylistKind::sniff("http://a/b.m3u"), PlaylistKind::M3u);
        assert_eq!(PlaylistKind::sniff("http://a/b.m3u8"), PlaylistKind::Direct);
        assert_eq!(PlaylistKind::sniff("http://a/stream"), PlaylistKind::Direct);
    }

    #[test]
    fn test_empty_playlist_rejected() {
        let err = ResolvedPlaylist::new("http://a/b.pls", Vec::new()).unwrap_err();
        assert!(matches!(err, ServiceError::EmptyPlaylist { .. }));
    }

    #[tokio::test]
    async fn test_resolve_pls() {
        let server = MockServer::start().await;
        serve(
            &server,
            "/radio.pls",
            "[playlist]\nNumberOfEntries=2\nFile1=http://a/one\nTitle1=One\nFile2=http://a/two\nVersion=2\n",
        )
        .await;

        let playlist = resolver()
            .resolve(&format!("{}/radio.pls", server.uri()))
            .await
            .unwrap();

        assert_eq!(playlist.urls(), ["http://a/one", "http://a/two"]);
    }

    #[tokio::test]
    async fn test_resolve_m3u_uses_trimmed_body() {
        let server = MockServer::start().await;
        serve(&server, "/radio.m3u", "  http://a/stream\n").await;

        let playlist = resolver()
            .resolve(&format!("{}/radio.m3u", server.uri()))
            .await
            .unwrap();

        assert_eq!(playlist.into_urls(), vec!["http://a/stream".to_string()]);
    }

    #[tokio::test]
    async fn test_resolve_direct_url_without_network() {
        // Nothing listens on the discard port, a fetch would fail
        let url = "http://127.0.0.1:9/stream";
        let playlist = resolver().resolve(url).await.unwrap();
        assert_eq!(playlist.urls(), [url]);
    }

    #[tokio::test]
    async fn test_resolve_pls_without_streams_is_empty() {
        let server = MockServer::start().await;
        serve(&server, "/empty.pls", "[playlist]\nNumberOfEntries=0\n").await;

        let err = resolver()
            .resolve(&format!("{}/empty.pls", server.uri()))
            .await
            .unwrap_err();

        assert!(matches!(err, ServiceError::EmptyPlaylist { .. }));
    }

    #[tokio::test]
    async fn test_resolve_http_error_is_fetch_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing.m3u"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let err = resolver()
            .resolve(&format!("{}/missing.m3u", server.uri()))
            .await
            .unwrap_err();

        assert!(matches!(err, ServiceError::Fetch { .. }));
    }
}
