//! Collaborator interfaces for the cascade
//!
//! The cascade never talks to the ticketing backend or the UI directly. Hosts
//! implement [`CascadeSource`] to fetch candidate lists and apply selections,
//! and [`CascadeObserver`] to receive progress notifications. Timeouts belong
//! to the `CascadeSource` implementation; the cascade waits for as long as a
//! call takes.

use async_trait::async_trait;

use crate::types::{
    CinemaRecord, FilmRecord, MatchCandidate, OrderIntent, ResolvedBundle, Selection,
    SeatRecord, ShowtimeRecord, Stage, StageRecord,
};

/// Data source and selection sink for one cascade.
///
/// Any `Err` (or `Ok(false)` from `apply_selection`) fails the current stage
/// with the error text; it never escapes the cascade.
#[async_trait]
pub trait CascadeSource: Send + Sync {
    async fn fetch_cinemas(&self, intent: &OrderIntent) -> anyhow::Result<Vec<CinemaRecord>>;

    async fn fetch_films(&self, cinema: &CinemaRecord) -> anyhow::Result<Vec<FilmRecord>>;

    async fn fetch_showtimes(
        &self,
        cinema: &CinemaRecord,
        film: &FilmRecord,
    ) -> anyhow::Result<Vec<ShowtimeRecord>>;

    async fn fetch_seat_map(&self, showtime: &ShowtimeRecord) -> anyhow::Result<Vec<SeatRecord>>;

    /// Push a resolved selection to the external (UI) state.
    async fn apply_selection(&self, selection: &Selection) -> anyhow::Result<bool>;

    /// Current external selection, captured before a cascade so it can be
    /// rolled back. `Err` disables rollback for that run.
    async fn capture_selection(&self) -> anyhow::Result<ResolvedBundle>;

    /// Reinstate a selection captured by `capture_selection`.
    async fn restore_selection(&self, snapshot: &ResolvedBundle) -> anyhow::Result<()>;
}

/// Fire-and-forget notifications. Every method defaults to a no-op.
pub trait CascadeObserver: Send + Sync {
    fn on_stage_started(&self, _stage: Stage) {}

    fn on_stage_completed(&self, _stage: Stage, _success: bool, _message: &str) {}

    fn on_progress(&self, _percent: u8) {}

    fn on_completed(&self, _success: bool, _result: &ResolvedBundle) {}

    fn on_needs_confirmation(&self, _stage: Stage, _candidates: &[MatchCandidate<StageRecord>]) {}
}

/// Observer that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl CascadeObserver for NoopObserver {}
