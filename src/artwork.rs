//! Best-effort cover art.

use image::DynamicImage;
use log::{debug, warn};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use url::Url;

use crate::config::ServiceConfig;
use crate::error::{Result, ServiceError};

/// A decoded image, cheap to clone.
#[derive(Clone)]
pub struct Artwork {
    image: Arc<DynamicImage>,
}

impl Artwork {
    pub fn new(image: DynamicImage) -> Self {
        Self {
            image: Arc::new(image),
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let image = image::load_from_memory(bytes)
            .map_err(|e| ServiceError::Artwork(format!("Image decode error: {}", e)))?;
        Ok(Self::new(image))
    }

    /// Load an image file without blocking the runtime.
    pub async fn open(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();
        let image = tokio::task::spawn_blocking(move || image::open(path)).await??;
        Ok(Self::new(image))
    }

    pub fn image(&self) -> &DynamicImage {
        &self.image
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn ptr_eq(&self, other: &Artwork) -> bool {
        Arc::ptr_eq(&self.image, &other.image)
    }
}

impl fmt::Debug for Artwork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Artwork")
            .field("width", &self.width())
            .field("height", &self.height())
            .finish()
    }
}

pub struct ArtworkFetcher {
    client: reqwest::Client,
}

impl ArtworkFetcher {
    pub fn new(config: &ServiceConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(config.artwork_timeout)
            .build()
            .map_err(ServiceError::Client)?;
        Ok(Self { client })
    }

    /// Download and decode cover art. Every failure degrades to `None`.
    pub async fn download_image(&self, url: Option<&str>) -> Option<Artwork> {
        let url = url.filter(|url| !url.is_empty())?;

        match self.try_download(url).await {
            Ok(artwork) => {
                debug!("Downloaded artwork {:?} from {}", artwork, url);
                Some(artwork)
            }
            Err(e) => {
                warn!("Ignoring artwork from {}: {}", url, e);
                None
            }
        }
    }

    async fn try_download(&self, url: &str) -> Result<Artwork> {
        let artwork_error = |e: &dyn fmt::Display| ServiceError::Artwork(e.to_string());

        let url = Url::parse(url).map_err(|e| artwork_error(&e))?;
        let response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|e| artwork_error(&e))?;
        let bytes = response.bytes().await.map_err(|e| artwork_error(&e))?;

        tokio::task::spawn_blocking(move || Artwork::from_bytes(&bytes))
            .await
            .map_err(|e| artwork_error(&e))?
    }
}
