use anyhow::Context;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

/// One catalog entry as seen by the rotation: its identifier and whether audio is attached.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CatalogTrack {
    pub id: String,
    pub has_audio: bool,
}

impl CatalogTrack {
    pub fn new(id: impl Into<String>, has_audio: bool) -> Self {
        Self {
            id: id.into(),
            has_audio,
        }
    }
}

/// Read-only access to the track catalog.
#[async_trait]
pub trait CatalogReader: Send + Sync {
    async fn fetch_tracks(&self, limit: usize) -> anyhow::Result<Vec<CatalogTrack>>;
}

// --- Catalog API Models ---

#[derive(Deserialize, Debug)]
struct TrackList {
    #[serde(default)]
    tracks: Vec<RemoteTrack>,
}

#[derive(Deserialize, Debug)]
struct RemoteTrack {
    slug: String,
    #[serde(rename = "audioFile", default)]
    audio_file: Option<String>,
}

impl From<RemoteTrack> for CatalogTrack {
    fn from(t: RemoteTrack) -> Self {
        let has_audio = t.audio_file.is_some_and(|f| !f.is_empty());
        CatalogTrack {
            id: t.slug,
            has_audio,
        }
    }
}

/// Catalog reader backed by the tracks HTTP API.
#[derive(Clone)]
pub struct HttpCatalog {
    client: Client,
    base_url: String,
}

impl HttpCatalog {
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl CatalogReader for HttpCatalog {
    /// Uses the catalog endpoint: GET {base}/tracks?limit={limit}
    async fn fetch_tracks(&self, limit: usize) -> anyhow::Result<Vec<CatalogTrack>> {
        let url = format!("{}/tracks", self.base_url);

        let resp = self
            .client
            .get(&url)
            .header("Accept", "application/json")
            .query(&[("limit", limit.to_string())])
            .send()
            .await
            .with_context(|| format!("catalog request to {} failed", url))?
            .error_for_status()?
            .json::<TrackList>()
            .await
            .context("catalog returned an unreadable track list")?;

        Ok(resp.tracks.into_iter().map(CatalogTrack::from).collect())
    }
}

/// In-memory catalog whose contents can be swapped at runtime.
#[cfg(test)]
#[derive(Default)]
pub(crate) struct StaticCatalog {
    tracks: std::sync::Mutex<Vec<CatalogTrack>>,
}

#[cfg(test)]
impl StaticCatalog {
    pub fn new(tracks: Vec<CatalogTrack>) -> Self {
        Self {
            tracks: std::sync::Mutex::new(tracks),
        }
    }

    /// Convenience constructor: every id gets audio attached.
    pub fn with_audio<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(ids.into_iter().map(|id| CatalogTrack::new(id, true)).collect())
    }

    pub fn replace(&self, tracks: Vec<CatalogTrack>) {
        if let Ok(mut current) = self.tracks.lock() {
            *current = tracks;
        }
    }
}

#[cfg(test)]
#[async_trait]
impl CatalogReader for StaticCatalog {
    async fn fetch_tracks(&self, limit: usize) -> anyhow::Result<Vec<CatalogTrack>> {
        let tracks = self
            .tracks
            .lock()
            .map_err(|_| anyhow::anyhow!("static catalog lock poisoned"))?;
        Ok(tracks.iter().take(limit).cloned().collect())
    }
}
