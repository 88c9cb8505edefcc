use url::Url;

use crate::icy::IcyInfo;

/// Common parsing utilities used across the service
pub struct ParsingUtils;

impl ParsingUtils {
    /// Extension of the trailing path segment, lowercased.
    ///
    /// Query strings and fragments are ignored, so
    /// `http://host/radio.pls?sid=1` reports `pls`.
    pub fn playlist_extension(url: &str) -> Option<String> {
        let path = match Url::parse(url) {
            Ok(parsed) => parsed.path().to_string(),
            Err(_) => url.split(['?', '#']).next().unwrap_or(url).to_string(),
        };

        let segment = path.rsplit('/').next()?;
        let (_, extension) = segment.rsplit_once('.')?;
        if extension.is_empty() {
            None
        } else {
            Some(extension.to_ascii_lowercase())
        }
    }

    /// Parse a .pls playlist body into its stream URLs.
    ///
    /// Every line holding `=http` contributes the text after its first `=`,
    /// so key names and their ordering don't matter.
    pub fn parse_pls_content(content: &str) -> Vec<String> {
        content
            .lines()
            .filter(|line| line.contains("=http"))
            .filter_map(|line| line.split_once('=').map(|(_, value)| value.to_string()))
            .collect()
    }

    /// Parse a .m3u playlist body. The whole trimmed body is one URL.
    pub fn parse_m3u_content(content: &str) -> Option<String> {
        let trimmed = content.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    }

    /// Parse an ICY metadata block, e.g. `StreamTitle='Artist - Song';StreamUrl='...';`
    pub fn parse_icy_metadata(raw: &str) -> IcyInfo {
        let raw = raw.trim_end_matches('\0');
        IcyInfo {
            title: Self::icy_field(raw, "StreamTitle"),
            url: Self::icy_field(raw, "StreamUrl").filter(|url| !url.is_empty()),
        }
    }

    fn icy_field(raw: &str, key: &str) -> Option<String> {
        let marker = format!("{}='", key);
        let start = raw.find(&marker)? + marker.len();
        let rest = &raw[start..];
        // Titles may contain apostrophes, the value ends at `';`
        let end = rest
            .find("';")
            .or_else(|| rest.rfind('\''))
            .unwrap_or(rest.len());
        Some(rest[..end].to_string())
    }
}
