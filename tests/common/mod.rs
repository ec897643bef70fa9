//! Shared fixtures for the integration suites.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};

use tracks_radio::{
    catalog::{CatalogReader, CatalogTrack},
    channel::{DisconnectPolicy, RadioChannel},
    events::Broadcaster,
    rotation::{RotationEngine, RotationSettings},
    server::{router, AppState},
};

/// Catalog held in memory; contents can be swapped between pool loads.
#[derive(Default)]
pub struct FixedCatalog {
    tracks: Mutex<Vec<CatalogTrack>>,
}

impl FixedCatalog {
    pub fn with_audio(ids: &[&str]) -> Arc<Self> {
        let catalog = Self::default();
        catalog.replace(ids.iter().map(|id| CatalogTrack::new(*id, true)).collect());
        Arc::new(catalog)
    }

    pub fn replace(&self, tracks: Vec<CatalogTrack>) {
        *self.tracks.lock().unwrap() = tracks;
    }
}

#[async_trait]
impl CatalogReader for FixedCatalog {
    async fn fetch_tracks(&self, limit: usize) -> anyhow::Result<Vec<CatalogTrack>> {
        Ok(self.tracks.lock().unwrap().iter().take(limit).cloned().collect())
    }
}

/// Builds the router over a freshly loaded engine.
pub async fn setup(catalog: Arc<FixedCatalog>) -> (axum::Router, RadioChannel) {
    let broadcaster = Broadcaster::new(64);
    let engine = RotationEngine::new(catalog, broadcaster.clone(), RotationSettings::default());
    engine.load_pool().await;
    let channel = RadioChannel::new(engine, broadcaster, DisconnectPolicy::StopOnAny);
    (router(AppState { channel: channel.clone() }), channel)
}
