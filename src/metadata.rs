use serde::{Deserialize, Serialize};

use crate::error::{Result, ServiceError};
use crate::icy::IcyInfo;

const TITLE_SEPARATOR: &str = " - ";

/// Normalized display tuple derived from in-stream metadata
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamMetadata {
    pub title: String,
    /// Empty when the raw title has no separator
    pub subtitle: String,
    /// Empty when the stream sent no cover URL
    pub artwork_url: String,
}

impl StreamMetadata {
    pub fn has_artwork(&self) -> bool {
        !self.artwork_url.is_empty()
    }
}

/// Project a raw `"title - subtitle"` string and optional cover URL.
///
/// Segments past the second are dropped. Fails only when the title is absent;
/// an empty title is valid.
pub fn project(raw_title: Option<&str>, cover_url: Option<&str>) -> Result<StreamMetadata> {
    let raw_title = raw_title.ok_or(ServiceError::NoTitle)?;

    let mut segments = raw_title.split(TITLE_SEPARATOR);
    let title = segments.next().unwrap_or_default().to_string();
    let subtitle = segments.next().unwrap_or_default().to_string();

    Ok(StreamMetadata {
        title,
        subtitle,
        artwork_url: cover_url.unwrap_or_default().to_string(),
    })
}

pub fn project_icy(info: &IcyInfo) -> Result<StreamMetadata> {
    project(info.title.as_deref(), info.url.as_deref())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_project_title_and_subtitle() {
        let metadata = project(Some("Artist - Song"), Some("http://cover")).unwrap();
        assert_eq!(
            metadata,
            StreamMetadata {
                title: "Artist".to_string(),
                subtitle: "Song".to_string(),
                artwork_url: "http://cover".to_string(),
            }
        );
        assert!(metadata.has_artwork());
    }

    #[test]
    fn test_project_without_separator() {
        let metadata = project(Some("JustATitle"), Some("")).unwrap();
        assert_eq!(metadata.title, "JustATitle");
        assert_eq!(metadata.subtitle, "");
        assert_eq!(metadata.artwork_url, "");
        assert!(!metadata.has_artwork());
    }

    #[test]
    fn test_project_ignores_extra_segments() {
        let metadata = project(Some("A - B - C"), None).unwrap();
        assert_eq!(metadata.title, "A");
        assert_eq!(metadata.subtitle, "B");
    }

    #[test]
    fn test_project_hyphen_without_spaces_is_not_a_separator() {
        let metadata = project(Some("Jay-Z"), None).unwrap();
        assert_eq!(metadata.title, "Jay-Z");
        assert_eq!(metadata.subtitle, "");
    }

    #[test]
    fn test_project_empty_title_is_valid() {
        let metadata = project(Some(""), None).unwrap();
        assert_eq!(metadata, StreamMetadata::default());
    }

    #[test]
    fn test_project_missing_title() {
        assert!(matches!(project(None, Some("http://cover")), Err(ServiceError::NoTitle)));

        let info = IcyInfo { title: None, url: None };
        assert!(matches!(project_icy(&info), Err(ServiceError::NoTitle)));
    }
}
