//! Cascade orchestrator - resolves cinema, film, showtime and seats in order
//!
//! One cascade runs at a time per orchestrator. Stages never overlap: a stage's
//! selection is applied and marked `Success` before the next stage fetches.
//! Every failure is absorbed into [`CascadeState`] and observer notifications;
//! no public method returns an error.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};

use crate::config::CascadeConfig;
use crate::entities::{normalize_session_time, parse_seat_token, SeatPosition};
use crate::matcher::{confidence_of, MatchStats, MatchingEngine};
use crate::ports::{CascadeObserver, CascadeSource, NoopObserver};
use crate::types::{
    Candidate, MatchCandidate, MatchType, OrderIntent, ResolvedBundle, SeatRecord, Selection,
    ShowtimeRecord, Stage, StageRecord,
};

const STAGE_SHARE: u8 = 25;
const STAGE_START_INCREMENT: u8 = 5;
const HALL_BONUS: f64 = 0.05;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Pending,
    Loading,
    Success,
    Failed,
    Skipped,
}

/// Progress of one cascade stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectionStep {
    pub stage: Stage,
    pub name: String,
    pub status: StepStatus,
    pub resolved: Option<Selection>,
    /// How the selection was matched; `None` when the user picked it.
    pub match_type: Option<MatchType>,
    pub error_message: Option<String>,
    pub progress: u8,
}

impl SelectionStep {
    fn new(stage: Stage) -> Self {
        Self {
            stage,
            name: format!("{}选择", stage.display_name()),
            status: StepStatus::Pending,
            resolved: None,
            match_type: None,
            error_message: None,
            progress: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CascadePhase {
    NotStarted,
    Running,
    AwaitingConfirmation,
    Succeeded,
    Failed,
}

/// Ranked candidates offered to the user when a stage has no confident match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingConfirmation {
    pub stage: Stage,
    pub message: String,
    pub candidates: Vec<MatchCandidate<StageRecord>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CascadeState {
    pub steps: Vec<SelectionStep>,
    pub overall_progress: u8,
    pub is_running: bool,
    pub can_rollback: bool,
    pub phase: CascadePhase,
    pub pending_confirmation: Option<PendingConfirmation>,
}

impl CascadeState {
    pub fn new() -> Self {
        Self {
            steps: Stage::ALL.iter().map(|s| SelectionStep::new(*s)).collect(),
            overall_progress: 0,
            is_running: false,
            can_rollback: false,
            phase: CascadePhase::NotStarted,
            pending_confirmation: None,
        }
    }

    pub fn step(&self, stage: Stage) -> &SelectionStep {
        &self.steps[stage.index()]
    }

    fn step_mut(&mut self, stage: Stage) -> &mut SelectionStep {
        &mut self.steps[stage.index()]
    }
}

impl Default for CascadeState {
    fn default() -> Self {
        Self::new()
    }
}

enum StageOutcome {
    Resolved,
    Failed,
    AwaitingConfirmation,
}

#[derive(Default)]
struct Inner {
    state: CascadeState,
    intent: OrderIntent,
    auto_mode: bool,
    snapshot: Option<ResolvedBundle>,
    resolved: ResolvedBundle,
    /// True while an external call of this cascade is outstanding.
    in_flight: bool,
}

/// Showtime projected onto the part of its start time the order specifies.
#[derive(Clone)]
struct ShowtimeKey {
    record: ShowtimeRecord,
    key: String,
}

impl Candidate for ShowtimeKey {
    fn primary_name(&self) -> std::borrow::Cow<'_, str> {
        std::borrow::Cow::Borrowed(&self.key)
    }
}

/// Drives an [`OrderIntent`] through the four selection stages.
pub struct CascadeOrchestrator {
    source: Arc<dyn CascadeSource>,
    observer: Arc<dyn CascadeObserver>,
    config: CascadeConfig,
    engine: Mutex<MatchingEngine>,
    inner: Mutex<Inner>,
}

impl CascadeOrchestrator {
    pub fn new(source: Arc<dyn CascadeSource>, config: CascadeConfig) -> Self {
        Self::with_observer(source, Arc::new(NoopObserver), config)
    }

    pub fn with_observer(
        source: Arc<dyn CascadeSource>,
        observer: Arc<dyn CascadeObserver>,
        config: CascadeConfig,
    ) -> Self {
        let engine = MatchingEngine::new(config.matcher.clone());
        Self {
            source,
            observer,
            config,
            engine: Mutex::new(engine),
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn state(&self) -> CascadeState {
        self.lock().state.clone()
    }

    pub fn is_running(&self) -> bool {
        self.lock().state.is_running
    }

    pub fn can_rollback(&self) -> bool {
        self.lock().state.can_rollback
    }

    pub fn match_stats(&self) -> MatchStats {
        self.engine().stats().clone()
    }

    pub fn clear_match_cache(&self) {
        self.engine().clear();
    }

    /// Run a cascade for `intent`.
    ///
    /// Returns `true` only when all four stages resolved. Returns `false`
    /// immediately, without touching state, if a cascade is already running.
    /// In manual mode a stage without a confident match pauses the cascade
    /// (still running) until [`confirm_selection`](Self::confirm_selection).
    pub async fn start(&self, intent: OrderIntent, auto_mode: bool) -> bool {
        {
            let mut inner = self.lock();
            if inner.state.is_running || inner.in_flight {
                tracing::warn!("cascade already running, start rejected");
                return false;
            }
            inner.state = CascadeState::new();
            inner.state.is_running = true;
            inner.state.phase = CascadePhase::Running;
            inner.intent = intent;
            inner.auto_mode = auto_mode;
            inner.snapshot = None;
            inner.resolved = ResolvedBundle::default();
            inner.in_flight = true;
        }
        tracing::info!(auto_mode, "cascade started");

        let snapshot = match self.source.capture_selection().await {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                tracing::warn!(error = %format!("{e:#}"), "selection snapshot failed, rollback disabled");
                None
            }
        };
        {
            let mut inner = self.lock();
            inner.state.can_rollback = snapshot.is_some();
            inner.snapshot = snapshot;
        }
        self.observer.on_progress(0);

        self.run_from(Stage::Cinema).await
    }

    /// Resume a cascade paused for confirmation.
    ///
    /// `Some(record)` applies the user's choice for the awaiting stage and
    /// continues; `None` cancels the cascade. Returns `true` only when the
    /// cascade then completes successfully. A record for the wrong stage is
    /// rejected without changing state.
    pub async fn confirm_selection(&self, record: Option<StageRecord>) -> bool {
        let stage = {
            let mut inner = self.lock();
            let Some(pending) = inner.state.pending_confirmation.as_ref() else {
                tracing::warn!("no stage awaiting confirmation");
                return false;
            };
            let stage = pending.stage;

            if let Some(record) = &record {
                if record.stage() != stage {
                    tracing::warn!(
                        expected = %stage,
                        got = %record.stage(),
                        "confirmation record is for a different stage"
                    );
                    return false;
                }
            }

            inner.state.pending_confirmation = None;
            inner.state.phase = CascadePhase::Running;
            inner.in_flight = true;
            if record.is_some() {
                inner.state.step_mut(stage).status = StepStatus::Loading;
            }
            stage
        };

        let Some(record) = record else {
            self.fail_stage(stage, "用户取消选择".to_string());
            self.finish(false);
            return false;
        };

        let message = format!("已手动选择{}: {}", stage, record.primary_name());
        match self.apply(stage, Selection::from(record), None, message).await {
            StageOutcome::Resolved => match Stage::ALL.get(stage.index() + 1) {
                Some(next) => self.run_from(*next).await,
                None => {
                    self.finish(true);
                    true
                }
            },
            _ => {
                self.finish(false);
                false
            }
        }
    }

    /// Restore the selection captured before the last cascade and reset the
    /// state. Refused while an external call is outstanding or when no
    /// snapshot was captured.
    pub async fn rollback(&self) -> bool {
        let snapshot = {
            let mut inner = self.lock();
            if !inner.state.can_rollback || inner.in_flight {
                return false;
            }
            let Some(snapshot) = inner.snapshot.clone() else {
                return false;
            };
            inner.in_flight = true;
            snapshot
        };

        if let Err(e) = self.source.restore_selection(&snapshot).await {
            tracing::warn!(error = %format!("{e:#}"), "rollback failed");
            self.lock().in_flight = false;
            return false;
        }

        {
            let mut inner = self.lock();
            *inner = Inner::default();
        }
        tracing::info!("cascade rolled back");
        self.observer.on_progress(0);
        true
    }

    async fn run_from(&self, first: Stage) -> bool {
        for stage in &Stage::ALL[first.index()..] {
            let outcome = self.run_stage(*stage).await;
            match outcome {
                StageOutcome::Resolved => continue,
                StageOutcome::Failed => {
                    self.finish(false);
                    return false;
                }
                StageOutcome::AwaitingConfirmation => {
                    self.lock().in_flight = false;
                    return false;
                }
            }
        }
        self.finish(true);
        true
    }

    async fn run_stage(&self, stage: Stage) -> StageOutcome {
        let (intent, resolved) = self.begin_stage(stage);

        match stage {
            Stage::Cinema => {
                let fetched = self.source.fetch_cinemas(&intent).await;
                let Some(cinemas) = self.fetched(stage, fetched) else {
                    return StageOutcome::Failed;
                };
                let ranked = self.rank(stage, &intent.cinema_name, &cinemas);
                let all = cinemas.into_iter().map(StageRecord::from).collect();
                self.settle(stage, &intent.cinema_name, ranked, false, all).await
            }
            Stage::Film => {
                let Some(cinema) = resolved.cinema else {
                    return self.prerequisite_missing(stage);
                };
                let fetched = self.source.fetch_films(&cinema).await;
                let Some(films) = self.fetched(stage, fetched) else {
                    return StageOutcome::Failed;
                };
                let ranked = self.rank(stage, &intent.film_name, &films);
                let all = films.into_iter().map(StageRecord::from).collect();
                self.settle(stage, &intent.film_name, ranked, false, all).await
            }
            Stage::Showtime => {
                let (Some(cinema), Some(film)) = (resolved.cinema, resolved.film) else {
                    return self.prerequisite_missing(stage);
                };
                let fetched = self.source.fetch_showtimes(&cinema, &film).await;
                let Some(showtimes) = self.fetched(stage, fetched) else {
                    return StageOutcome::Failed;
                };
                let target = normalize_session_time(&intent.session_time);
                let (ranked, ambiguous) =
                    self.rank_showtimes(&target, &intent.hall_name, &showtimes);
                let all = showtimes.into_iter().map(StageRecord::from).collect();
                self.settle(stage, &target, ranked, ambiguous, all).await
            }
            Stage::Seats => {
                let Some(showtime) = resolved.showtime else {
                    return self.prerequisite_missing(stage);
                };
                self.resolve_seats(&intent.seats, &showtime).await
            }
        }
    }

    fn rank<T: Candidate + Clone + Into<StageRecord>>(
        &self,
        stage: Stage,
        target: &str,
        candidates: &[T],
    ) -> Vec<MatchCandidate<StageRecord>> {
        self.engine()
            .find_candidates_in(stage, target, candidates)
            .into_iter()
            .map(|m| m.map(Into::into))
            .collect()
    }

    /// Showtimes are compared on the normalized start time, reduced to the
    /// clock or the date when the order carries only that part. A matching
    /// hall lifts a candidate above same-time neighbours.
    ///
    /// The flag is true when the two best candidates are both exact and
    /// equally supported by the hall, so neither can be picked.
    fn rank_showtimes(
        &self,
        target: &str,
        hall: &str,
        showtimes: &[ShowtimeRecord],
    ) -> (Vec<MatchCandidate<StageRecord>>, bool) {
        let clock_only = !target.contains(' ') && target.len() == 5 && target.contains(':');
        let date_only = !target.contains(' ') && target.len() == 10 && target.contains('-');
        let keyed: Vec<ShowtimeKey> = showtimes
            .iter()
            .map(|record| {
                let full = normalize_session_time(&record.start_time);
                let key = if clock_only {
                    full.rsplit(' ').next().unwrap_or_default().to_string()
                } else if date_only {
                    full.split(' ').next().unwrap_or_default().to_string()
                } else {
                    full
                };
                ShowtimeKey {
                    record: record.clone(),
                    key,
                }
            })
            .collect();

        let hall = hall.trim();
        let mut ranked: Vec<(MatchCandidate<StageRecord>, bool)> = self
            .engine()
            .find_candidates_in(Stage::Showtime, target, &keyed)
            .into_iter()
            .map(|mut m| {
                let record_hall = m.record.record.hall_name.trim();
                let hall_hit = !hall.is_empty()
                    && !record_hall.is_empty()
                    && (record_hall.contains(hall) || hall.contains(record_hall));
                if hall_hit {
                    m.score = (m.score + HALL_BONUS).min(1.0);
                    m.reasons.push(format!("影厅匹配: {record_hall}"));
                    m.confidence = confidence_of(m.score, m.match_type, m.reasons.len());
                }
                (m.map(|k| StageRecord::from(k.record)), hall_hit)
            })
            .collect();

        ranked.sort_by(|(a, a_hall), (b, b_hall)| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b_hall.cmp(a_hall))
        });

        let ambiguous = match (ranked.first(), ranked.get(1)) {
            (Some((first, first_hall)), Some((second, second_hall))) => {
                first.match_type == MatchType::Exact
                    && second.match_type == MatchType::Exact
                    && first_hall == second_hall
            }
            _ => false,
        };
        (ranked.into_iter().map(|(m, _)| m).collect(), ambiguous)
    }

    async fn settle(
        &self,
        stage: Stage,
        target: &str,
        ranked: Vec<MatchCandidate<StageRecord>>,
        ambiguous: bool,
        all: Vec<StageRecord>,
    ) -> StageOutcome {
        let min_score = self.config.matcher.min_match_score;

        if !target.trim().is_empty() && !ambiguous {
            // A near showtime is a different screening, so only an exact time is taken.
            let acceptable = |m: &&MatchCandidate<StageRecord>| {
                m.score >= min_score
                    && (stage != Stage::Showtime || m.match_type == MatchType::Exact)
            };
            if let Some(best) = ranked.first().filter(acceptable) {
                tracing::info!(
                    stage = %stage,
                    matched = %best.record.primary_name(),
                    score = best.score,
                    match_type = %best.match_type,
                    "stage matched"
                );
                let message = format!(
                    "已选择{}: {} ({}, {:.2})",
                    stage,
                    best.record.primary_name(),
                    best.match_type,
                    best.score
                );
                let selection = Selection::from(best.record.clone());
                return self.apply(stage, selection, Some(best.match_type), message).await;
            }
        }

        let message = if target.trim().is_empty() {
            format!("订单中缺少{stage}信息")
        } else if ambiguous {
            format!("匹配到多个{stage}: {target}")
        } else {
            format!("未找到匹配的{stage}: {target}")
        };

        if self.lock().auto_mode {
            self.fail_stage(stage, message);
            return StageOutcome::Failed;
        }

        let limit = self.config.max_confirmation_candidates;
        let candidates: Vec<MatchCandidate<StageRecord>> = if ranked.is_empty() {
            all.into_iter()
                .take(limit)
                .map(|record| MatchCandidate {
                    record,
                    score: 0.0,
                    match_type: MatchType::Fuzzy,
                    confidence: 0.0,
                    reasons: vec!["未达到匹配阈值".to_string()],
                })
                .collect()
        } else {
            ranked.into_iter().take(limit).collect()
        };

        self.await_confirmation(stage, message, candidates);
        StageOutcome::AwaitingConfirmation
    }

    async fn resolve_seats(&self, tokens: &[String], showtime: &ShowtimeRecord) -> StageOutcome {
        let stage = Stage::Seats;
        if tokens.is_empty() {
            self.fail_stage(stage, format!("订单中缺少{stage}信息"));
            return StageOutcome::Failed;
        }

        // Binding only some of the seats would book the wrong count.
        let positions = match tokens
            .iter()
            .map(|t| parse_seat_token(t))
            .collect::<Result<Vec<SeatPosition>, _>>()
        {
            Ok(positions) => positions,
            Err(e) => {
                self.fail_stage(stage, e.to_string());
                return StageOutcome::Failed;
            }
        };

        let fetched = self.source.fetch_seat_map(showtime).await;
        let Some(seat_map) = self.fetched(stage, fetched) else {
            return StageOutcome::Failed;
        };
        if seat_map.is_empty() {
            self.fail_stage(stage, "未获取到座位图".to_string());
            return StageOutcome::Failed;
        }

        let mut chosen: Vec<SeatRecord> = Vec::with_capacity(positions.len());
        for pos in &positions {
            match seat_map
                .iter()
                .find(|s| s.row == pos.row && s.col == pos.col && s.available)
            {
                Some(seat) => chosen.push(seat.clone()),
                None => {
                    self.fail_stage(stage, format!("座位不可用: {}排{}座", pos.row, pos.col));
                    return StageOutcome::Failed;
                }
            }
        }

        let message = format!("已选择{}个座位", chosen.len());
        self.apply(stage, Selection::Seats(chosen), Some(MatchType::Exact), message).await
    }

    async fn apply(
        &self,
        stage: Stage,
        selection: Selection,
        match_type: Option<MatchType>,
        message: String,
    ) -> StageOutcome {
        match self.source.apply_selection(&selection).await {
            Ok(true) => {
                self.succeed_stage(stage, selection, match_type, message);
                StageOutcome::Resolved
            }
            Ok(false) => {
                self.fail_stage(stage, format!("应用{stage}选择失败"));
                StageOutcome::Failed
            }
            Err(e) => {
                tracing::warn!(stage = %stage, error = %format!("{e:#}"), "apply selection failed");
                self.fail_stage(stage, format!("应用{stage}选择失败: {e:#}"));
                StageOutcome::Failed
            }
        }
    }

    /// Unwrap a fetch result, failing the stage on error.
    fn fetched<T>(&self, stage: Stage, result: anyhow::Result<Vec<T>>) -> Option<Vec<T>> {
        match result {
            Ok(list) => {
                let mut inner = self.lock();
                inner.state.step_mut(stage).progress = 50;
                Some(list)
            }
            Err(e) => {
                tracing::warn!(stage = %stage, error = %format!("{e:#}"), "fetch candidates failed");
                self.fail_stage(stage, format!("获取{stage}列表失败: {e:#}"));
                None
            }
        }
    }

    fn prerequisite_missing(&self, stage: Stage) -> StageOutcome {
        self.fail_stage(stage, format!("{stage}选择缺少前置结果"));
        StageOutcome::Failed
    }

    fn begin_stage(&self, stage: Stage) -> (OrderIntent, ResolvedBundle) {
        let (intent, resolved, progress) = {
            let mut inner = self.lock();
            inner.in_flight = true;
            let step = inner.state.step_mut(stage);
            step.status = StepStatus::Loading;
            step.error_message = None;
            step.progress = 10;
            let progress = (stage.index() as u8) * STAGE_SHARE + STAGE_START_INCREMENT;
            inner.state.overall_progress = progress;
            (inner.intent.clone(), inner.resolved.clone(), progress)
        };
        tracing::info!(stage = %stage, "stage started");
        self.observer.on_stage_started(stage);
        self.observer.on_progress(progress);
        (intent, resolved)
    }

    fn succeed_stage(
        &self,
        stage: Stage,
        selection: Selection,
        match_type: Option<MatchType>,
        message: String,
    ) {
        let progress = {
            let mut inner = self.lock();
            inner.resolved.record(&selection);
            let step = inner.state.step_mut(stage);
            step.status = StepStatus::Success;
            step.resolved = Some(selection);
            step.match_type = match_type;
            step.error_message = None;
            step.progress = 100;
            let progress = (stage.index() as u8 + 1) * STAGE_SHARE;
            inner.state.overall_progress = progress;
            progress
        };
        self.observer.on_stage_completed(stage, true, &message);
        self.observer.on_progress(progress);
    }

    /// Mark `stage` failed and every later stage skipped.
    fn fail_stage(&self, stage: Stage, message: String) {
        tracing::info!(stage = %stage, message = %message, "stage failed");
        {
            let mut inner = self.lock();
            let step = inner.state.step_mut(stage);
            step.status = StepStatus::Failed;
            step.error_message = Some(message.clone());
            for later in &Stage::ALL[stage.index() + 1..] {
                inner.state.step_mut(*later).status = StepStatus::Skipped;
            }
        }
        self.observer.on_stage_completed(stage, false, &message);
    }

    fn await_confirmation(
        &self,
        stage: Stage,
        message: String,
        candidates: Vec<MatchCandidate<StageRecord>>,
    ) {
        tracing::info!(stage = %stage, candidates = candidates.len(), "awaiting user confirmation");
        {
            let mut inner = self.lock();
            let step = inner.state.step_mut(stage);
            step.status = StepStatus::Pending;
            step.error_message = Some(message.clone());
            inner.state.phase = CascadePhase::AwaitingConfirmation;
            inner.state.pending_confirmation = Some(PendingConfirmation {
                stage,
                message,
                candidates: candidates.clone(),
            });
        }
        self.observer.on_needs_confirmation(stage, &candidates);
    }

    fn finish(&self, success: bool) {
        let bundle = {
            let mut inner = self.lock();
            inner.state.is_running = false;
            inner.state.pending_confirmation = None;
            inner.in_flight = false;
            if success {
                inner.state.phase = CascadePhase::Succeeded;
                inner.state.overall_progress = 100;
                inner.resolved.clone()
            } else {
                inner.state.phase = CascadePhase::Failed;
                ResolvedBundle::default()
            }
        };
        tracing::info!(success, "cascade completed");
        if success {
            self.observer.on_progress(100);
        }
        self.observer.on_completed(success, &bundle);
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn engine(&self) -> MutexGuard<'_, MatchingEngine> {
        self.engine.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
