//! The track rotation: one global "now playing" selection that advances on a
//! fixed period and is announced to every listener.

use rand::{seq::SliceRandom, Rng};
use serde::Serialize;
use std::{
    collections::HashSet,
    sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak},
    time::Duration,
};
use tokio::{
    task::JoinHandle,
    time::{self, Instant, MissedTickBehavior},
};
use tracing::{debug, error, info};

use crate::catalog::{CatalogReader, CatalogTrack};
use crate::events::{Broadcaster, RadioEvent};

#[derive(Clone, Debug)]
pub struct RotationSettings {
    /// Time between two ticks while playing.
    pub period: Duration,
    /// Maximum number of catalog entries fetched per pool load.
    pub pool_limit: usize,
}

impl Default for RotationSettings {
    fn default() -> Self {
        Self {
            period: Duration::from_secs(5),
            pool_limit: 1000,
        }
    }
}

/// Point-in-time view of the rotation, for status reporting.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RotationSnapshot {
    pub playing: bool,
    pub current_track: Option<String>,
    pub pool_size: usize,
}

#[derive(Default)]
struct RotationState {
    current_track: Option<String>,
    // Present iff playing.
    timer: Option<JoinHandle<()>>,
    // Bumped on every start; a timer task only ticks while its generation is the armed one.
    generation: u64,
}

pub struct RotationEngine {
    catalog: Arc<dyn CatalogReader>,
    broadcaster: Broadcaster,
    settings: RotationSettings,
    pool: RwLock<Arc<Vec<String>>>,
    state: Mutex<RotationState>,
}

impl RotationEngine {
    /// Creates a stopped engine with an empty pool. Call [`RotationEngine::load_pool`] to fill it.
    ///
    /// # Panics
    ///
    /// Panics if `settings.period` is zero.
    pub fn new(
        catalog: Arc<dyn CatalogReader>,
        broadcaster: Broadcaster,
        settings: RotationSettings,
    ) -> Arc<Self> {
        assert!(!settings.period.is_zero(), "rotation period must be non-zero");
        Arc::new(Self {
            catalog,
            broadcaster,
            settings,
            pool: RwLock::new(Arc::new(Vec::new())),
            state: Mutex::new(RotationState::default()),
        })
    }

    /// Fetches the catalog and swaps in a new pool of playable tracks.
    ///
    /// A failed fetch is logged and leaves the previous pool in place. Returns
    /// the pool size after the attempt.
    pub async fn load_pool(&self) -> usize {
        let limit = self.settings.pool_limit;
        match self.catalog.fetch_tracks(limit).await {
            Ok(tracks) => {
                let pool = build_pool(tracks);
                let size = pool.len();
                *self.pool.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(pool);
                info!("Loaded {} tracks into rotation.", size);
                size
            }
            Err(e) => {
                error!("Failed to load track pool, keeping previous pool: {:#}", e);
                self.pool_size()
            }
        }
    }

    /// Reloads the pool after the catalog changed.
    pub async fn refresh_pool(&self) -> usize {
        self.load_pool().await
    }

    /// Starts the rotation: announces a track right away, then every period.
    /// Does nothing if already playing.
    pub fn start(self: &Arc<Self>) {
        let mut state = self.lock_state();
        if state.timer.is_some() {
            return;
        }

        state.generation += 1;
        info!("Radio rotation started (every {:?})", self.settings.period);
        self.broadcaster.broadcast(RadioEvent::Status(true));
        self.select_and_broadcast(&mut state);

        let period = self.settings.period;
        state.timer = Some(tokio::spawn(run_timer(
            Arc::downgrade(self),
            state.generation,
            Instant::now() + period,
            period,
        )));
    }

    /// Stops the rotation. No tick is announced after this returns.
    pub fn stop(&self) {
        let mut state = self.lock_state();
        let Some(timer) = state.timer.take() else {
            return;
        };
        timer.abort();
        info!("Radio rotation stopped");
        self.broadcaster.broadcast(RadioEvent::Status(false));
    }

    pub fn status(&self) -> bool {
        self.lock_state().timer.is_some()
    }

    pub fn current_track(&self) -> Option<String> {
        self.lock_state().current_track.clone()
    }

    pub fn pool_size(&self) -> usize {
        self.current_pool().len()
    }

    pub fn snapshot(&self) -> RotationSnapshot {
        let state = self.lock_state();
        RotationSnapshot {
            playing: state.timer.is_some(),
            current_track: state.current_track.clone(),
            pool_size: self.pool_size(),
        }
    }

    fn tick(&self, generation: u64) -> bool {
        let mut state = self.lock_state();
        if state.timer.is_none() || state.generation != generation {
            return false;
        }
        self.select_and_broadcast(&mut state);
        true
    }

    fn select_and_broadcast(&self, state: &mut RotationState) {
        let pool = self.current_pool();
        let next = pick_next(&pool, state.current_track.as_deref(), &mut rand::thread_rng());

        match next {
            Some(track) => {
                debug!("Now playing: {}", track);
                state.current_track = Some(track.clone());
                self.broadcaster.broadcast(RadioEvent::Track(track));
            }
            None => debug!("Rotation pool is empty, nothing to announce"),
        }
    }

    fn current_pool(&self) -> Arc<Vec<String>> {
        self.pool
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn lock_state(&self) -> MutexGuard<'_, RotationState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for RotationEngine {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
    }
}

async fn run_timer(engine: Weak<RotationEngine>, generation: u64, first: Instant, period: Duration) {
    let mut ticker = time::interval_at(first, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let Some(engine) = engine.upgrade() else {
            break;
        };
        if !engine.tick(generation) {
            break;
        }
    }
}

/// Playable, de-duplicated track ids in catalog order.
fn build_pool(tracks: Vec<CatalogTrack>) -> Vec<String> {
    let mut seen = HashSet::new();
    tracks
        .into_iter()
        .filter(|t| t.has_audio)
        .filter_map(|t| seen.insert(t.id.clone()).then_some(t.id))
        .collect()
}

/// Chooses the next track. A single-track pool always yields that track; larger
/// pools never yield `current`.
fn pick_next<R: Rng + ?Sized>(pool: &[String], current: Option<&str>, rng: &mut R) -> Option<String> {
    match pool {
        [] => None,
        [only] => Some(only.clone()),
        _ => {
            let candidates: Vec<&String> = pool
                .iter()
                .filter(|id| Some(id.as_str()) != current)
                .collect();
            candidates.choose(rng).map(|id| (*id).clone())
        }
    }
}
