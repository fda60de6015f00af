//! Keeps a local, paginated copy of one trader's closed-position history in
//! step with a remote [`HistorySource`].
//!
//! Three paths feed the dataset:
//! - the resync loader replaces it wholesale whenever the fingerprint of
//!   `{subject, filters, quota}` changes,
//! - the delta poller prepends positions closed after the high-water mark,
//! - the page advancer appends one page on demand.
//!
//! Every request captures the epoch it was issued under. An invalidation bumps
//! the epoch, so anything resolving afterwards is dropped on arrival instead of
//! being cancelled.

use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::{interval, interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::batch;
use crate::config::SyncSettings;
use crate::delta::fetch_delta;
use crate::fingerprint::fingerprint;
use crate::loader::load_baseline;
use crate::merge::{append_new, prepend_new};
use crate::models::{ClosedPosition, FilterState, HistoryQuery, PageMeta, Quota, SortSpec, Subject};
use crate::pager::{fetch_page, next_offset, page_limit};
use crate::quota::QuotaProvider;
use crate::source::HistorySource;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Empty,
    Resyncing,
    Ready,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    NoSubject,
    NotReady,
    UpToDate,
    InFlight,
    AlreadyLoaded,
    Exhausted,
    DetailView,
    GracePeriod,
    NoAccess,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum SyncOutcome {
    Applied { added: usize },
    Skipped(SkipReason),
    /// The request resolved after an invalidation; its result was dropped.
    Discarded,
    /// The source call failed; state was left as it was.
    Failed,
}

/// What the consumer sees.
#[derive(Debug, Clone, Serialize)]
pub struct SyncSnapshot {
    pub phase: Phase,
    pub dataset: Vec<ClosedPosition>,
    pub meta: PageMeta,
    pub is_loading: bool,
    pub is_fetching_more: bool,
    pub has_next_page: bool,
    pub requested_page: usize,
    pub high_water_mark: Option<u64>,
    pub filters: FilterState,
}

#[derive(Serialize)]
struct FingerprintInput<'a> {
    subject: &'a Subject,
    filters: &'a FilterState,
    quota: &'a Quota,
}

struct SyncState {
    subject: Option<Subject>,
    filters: FilterState,
    quota: Quota,
    detail_view: bool,
    mounted_at: Instant,

    epoch: u64,
    fingerprint: Option<String>,
    last_fingerprint: Option<String>,
    initiated: bool,
    requested_page: usize,

    dataset: Vec<ClosedPosition>,
    meta: PageMeta,
    high_water_mark: Option<u64>,

    // In-flight guards hold the epoch they were set under.
    resync_in_flight: Option<u64>,
    page_in_flight: Option<u64>,
    delta_in_flight: Option<u64>,
    failed_resyncs: u32,
}

impl SyncState {
    fn new() -> Self {
        Self {
            subject: None,
            filters: FilterState::default(),
            quota: Quota::default(),
            detail_view: false,
            mounted_at: Instant::now(),
            epoch: 0,
            fingerprint: None,
            last_fingerprint: None,
            initiated: false,
            requested_page: 1,
            dataset: Vec::new(),
            meta: PageMeta::default(),
            high_water_mark: None,
            resync_in_flight: None,
            page_in_flight: None,
            delta_in_flight: None,
            failed_resyncs: 0,
        }
    }

    /// Starts a new epoch with an empty dataset.
    fn invalidate(&mut self, fingerprint: Option<String>) {
        self.epoch += 1;
        self.fingerprint = fingerprint;
        self.initiated = false;
        self.dataset.clear();
        self.meta = PageMeta::default();
        self.high_water_mark = None;
        self.resync_in_flight = None;
        self.page_in_flight = None;
        self.delta_in_flight = None;
        self.failed_resyncs = 0;
    }

    fn phase(&self) -> Phase {
        match (&self.subject, self.initiated) {
            (None, _) => Phase::Empty,
            (Some(_), false) => Phase::Resyncing,
            (Some(_), true) => Phase::Ready,
        }
    }

    fn has_next_page(&self) -> bool {
        if !self.initiated {
            return false;
        }
        let ceiling = match self.quota.ceiling() {
            Some(max_allowed) => max_allowed,
            None => self.meta.total,
        };
        self.meta.limit + self.meta.offset < ceiling
    }

    fn in_flight(guard: Option<u64>, epoch: u64) -> bool {
        guard == Some(epoch)
    }

    fn release(guard: &mut Option<u64>, epoch: u64) {
        if *guard == Some(epoch) {
            *guard = None;
        }
    }
}

pub struct Synchronizer {
    source: Arc<dyn HistorySource>,
    quota: Arc<dyn QuotaProvider>,
    settings: SyncSettings,
    state: Mutex<SyncState>,
    wake: Notify,
}

impl Synchronizer {
    pub fn new(source: Arc<dyn HistorySource>, quota: Arc<dyn QuotaProvider>, settings: SyncSettings) -> Self {
        Self {
            source,
            quota,
            settings,
            state: Mutex::new(SyncState::new()),
            wake: Notify::new(),
        }
    }

    /// Re-reads the quota and recomputes the fingerprint; a change starts a new
    /// epoch and wakes the driver. Returns whether an invalidation happened.
    fn refresh_fingerprint(&self, state: &mut SyncState) -> anyhow::Result<bool> {
        let Some(subject) = &state.subject else {
            return Ok(false);
        };
        let quota = self.quota.quota(subject);
        let fp = fingerprint(&FingerprintInput {
            subject,
            filters: &state.filters,
            quota: &quota,
        })?;
        state.quota = quota;

        if state.fingerprint.as_deref() == Some(fp.as_str()) {
            return Ok(false);
        }
        debug!(epoch = state.epoch + 1, fingerprint = %fp, "fingerprint changed, resyncing");
        state.invalidate(Some(fp));
        self.wake.notify_one();
        Ok(true)
    }

    /// `None` when the fingerprint could not be computed.
    fn try_refresh(&self, state: &mut SyncState) -> Option<bool> {
        match self.refresh_fingerprint(state) {
            Ok(changed) => Some(changed),
            Err(e) => {
                warn!("failed to fingerprint filter state: {:#}", e);
                None
            }
        }
    }

    // --- Lifecycle ---

    pub async fn mount(&self, subject: Subject, filters: FilterState) {
        let mut state = self.state.lock().await;
        info!(account = %subject.account(), context = %subject.context, "mounting history synchronizer");
        state.subject = Some(subject);
        state.filters = filters;
        state.detail_view = false;
        state.requested_page = 1;
        state.mounted_at = Instant::now();
        state.fingerprint = None;
        self.try_refresh(&mut state);
    }

    pub async fn unmount(&self) {
        let mut state = self.state.lock().await;
        if let Some(subject) = state.subject.take() {
            info!(account = %subject.account(), "unmounting history synchronizer");
        }
        state.requested_page = 1;
        state.detail_view = false;
        state.last_fingerprint = None;
        state.invalidate(None);
    }

    // --- Consumer surface ---

    /// Current view. Re-reads the quota first, so a plan change made elsewhere
    /// shows up here (and starts a resync) without waiting for the next tick.
    pub async fn snapshot(&self) -> SyncSnapshot {
        let mut state = self.state.lock().await;
        self.try_refresh(&mut state);
        SyncSnapshot {
            phase: state.phase(),
            dataset: state.dataset.clone(),
            meta: state.meta,
            is_loading: state.phase() == Phase::Resyncing,
            is_fetching_more: SyncState::in_flight(state.page_in_flight, state.epoch),
            has_next_page: state.has_next_page(),
            requested_page: state.requested_page,
            high_water_mark: state.high_water_mark,
            filters: state.filters.clone(),
        }
    }

    /// Replaces the filter state. Returns whether a resync was triggered.
    pub async fn set_filters(&self, filters: FilterState) -> bool {
        let mut state = self.state.lock().await;
        state.filters = filters;
        self.try_refresh(&mut state).unwrap_or(false)
    }

    pub async fn change_sort(&self, sort: SortSpec) -> bool {
        let mut state = self.state.lock().await;
        state.filters.sort = sort;
        self.try_refresh(&mut state).unwrap_or(false)
    }

    pub async fn reset_sort(&self) -> bool {
        self.change_sort(SortSpec::default()).await
    }

    /// While expanded, background delta polls are suppressed.
    pub async fn set_detail_view(&self, expanded: bool) {
        self.state.lock().await.detail_view = expanded;
    }

    /// Drops the current epoch and resyncs even if nothing changed.
    pub async fn refresh(&self) -> SyncOutcome {
        {
            let mut state = self.state.lock().await;
            if state.subject.is_none() {
                return SyncOutcome::Skipped(SkipReason::NoSubject);
            }
            state.fingerprint = None;
            if self.try_refresh(&mut state).is_none() {
                return SyncOutcome::Failed;
            }
        }
        self.sync().await
    }

    // --- Resync ---

    /// Establishes the baseline for the current fingerprint if there is none.
    pub async fn sync(&self) -> SyncOutcome {
        let (epoch, base, plan) = {
            let mut state = self.state.lock().await;
            let Some(subject) = state.subject.clone() else {
                return SyncOutcome::Skipped(SkipReason::NoSubject);
            };
            if self.try_refresh(&mut state).is_none() {
                return SyncOutcome::Failed;
            }
            if state.initiated && state.last_fingerprint == state.fingerprint {
                return SyncOutcome::Skipped(SkipReason::UpToDate);
            }
            if SyncState::in_flight(state.resync_in_flight, state.epoch) {
                return SyncOutcome::Skipped(SkipReason::InFlight);
            }

            state.resync_in_flight = Some(state.epoch);
            let plan = batch::plan(
                state.requested_page,
                self.settings.page_size,
                self.settings.max_batch_size,
                &state.quota,
            );
            debug!(epoch = state.epoch, page = state.requested_page, batches = plan.len(), "resyncing");
            (state.epoch, HistoryQuery::new(&subject, &state.filters), plan)
        };

        let result = load_baseline(self.source.as_ref(), &base, &plan).await;

        let mut state = self.state.lock().await;
        SyncState::release(&mut state.resync_in_flight, epoch);
        if state.epoch != epoch {
            debug!(epoch, current = state.epoch, "discarding stale baseline");
            return SyncOutcome::Discarded;
        }

        match result {
            Ok(baseline) => {
                let added = baseline.dataset.len();
                state.dataset = baseline.dataset;
                state.meta = baseline.meta;
                state.high_water_mark = baseline.high_water_mark;
                state.initiated = true;
                state.last_fingerprint = state.fingerprint.clone();
                state.failed_resyncs = 0;
                info!(
                    account = %base.account,
                    records = added,
                    total = state.meta.total,
                    high_water_mark = ?state.high_water_mark,
                    "history baseline established"
                );
                SyncOutcome::Applied { added }
            }
            Err(e) => {
                state.requested_page = 1;
                state.failed_resyncs += 1;
                warn!(attempt = state.failed_resyncs, "history resync failed: {:#}", e);
                SyncOutcome::Failed
            }
        }
    }

    // --- Page advance ---

    /// Asks for everything up to `page`. Fetches at most one more page per call;
    /// before a baseline exists the request is routed to a resync instead.
    pub async fn request_page(&self, page: usize) -> SyncOutcome {
        let (epoch, base, limit, offset) = {
            let mut state = self.state.lock().await;
            let Some(subject) = state.subject.clone() else {
                return SyncOutcome::Skipped(SkipReason::NoSubject);
            };
            state.requested_page = page.max(1);
            if self.try_refresh(&mut state).is_none() {
                return SyncOutcome::Failed;
            }
            if !state.initiated {
                drop(state);
                return self.sync().await;
            }

            let page_size = self.settings.page_size;
            if state.dataset.len() >= state.requested_page * page_size {
                return SyncOutcome::Skipped(SkipReason::AlreadyLoaded);
            }
            if SyncState::in_flight(state.page_in_flight, state.epoch) {
                return SyncOutcome::Skipped(SkipReason::InFlight);
            }
            if !state.has_next_page() {
                return SyncOutcome::Skipped(SkipReason::Exhausted);
            }
            let offset = next_offset(state.dataset.len(), page_size);
            let limit = page_limit(offset, page_size, &state.quota);
            if limit == 0 {
                return SyncOutcome::Skipped(SkipReason::Exhausted);
            }

            state.page_in_flight = Some(state.epoch);
            (state.epoch, HistoryQuery::new(&subject, &state.filters), limit, offset)
        };

        debug!(epoch, limit, offset, "fetching next history page");
        let result = fetch_page(self.source.as_ref(), &base, limit, offset).await;

        let mut state = self.state.lock().await;
        SyncState::release(&mut state.page_in_flight, epoch);
        if state.epoch != epoch {
            debug!(epoch, current = state.epoch, "discarding stale page");
            return SyncOutcome::Discarded;
        }

        match result {
            Ok(page) => {
                let added = append_new(&mut state.dataset, page.data);
                state.meta = page.meta;
                debug!(added, total = state.meta.total, "history page appended");
                SyncOutcome::Applied { added }
            }
            Err(e) => {
                warn!(offset, "history page fetch failed: {:#}", e);
                SyncOutcome::Failed
            }
        }
    }

    pub async fn load_more(&self) -> SyncOutcome {
        let next = self.state.lock().await.requested_page + 1;
        self.request_page(next).await
    }

    // --- Delta ---

    /// One delta poll: prepends positions closed after the high-water mark.
    pub async fn poll_delta(&self) -> SyncOutcome {
        let (epoch, base, high_water_mark) = {
            let mut state = self.state.lock().await;
            let Some(subject) = state.subject.clone() else {
                return SyncOutcome::Skipped(SkipReason::NoSubject);
            };
            if self.try_refresh(&mut state).is_none() {
                return SyncOutcome::Failed;
            }
            if !state.initiated {
                return SyncOutcome::Skipped(SkipReason::NotReady);
            }
            if state.detail_view {
                return SyncOutcome::Skipped(SkipReason::DetailView);
            }
            if state.mounted_at.elapsed() < self.settings.delta_grace {
                return SyncOutcome::Skipped(SkipReason::GracePeriod);
            }
            if !state.quota.has_access() {
                return SyncOutcome::Skipped(SkipReason::NoAccess);
            }
            if SyncState::in_flight(state.delta_in_flight, state.epoch) {
                return SyncOutcome::Skipped(SkipReason::InFlight);
            }

            state.delta_in_flight = Some(state.epoch);
            (state.epoch, HistoryQuery::new(&subject, &state.filters), state.high_water_mark)
        };

        let result = fetch_delta(self.source.as_ref(), &base, high_water_mark, self.settings.page_size).await;

        let mut state = self.state.lock().await;
        SyncState::release(&mut state.delta_in_flight, epoch);
        if state.epoch != epoch {
            debug!(epoch, current = state.epoch, "discarding stale delta");
            return SyncOutcome::Discarded;
        }

        match result {
            Ok(incoming) => {
                let added = prepend_new(&mut state.dataset, incoming);
                if added > 0 {
                    debug!(added, high_water_mark = ?state.high_water_mark, "new closed positions prepended");
                }
                SyncOutcome::Applied { added }
            }
            Err(e) => {
                warn!("history delta poll failed: {:#}", e);
                SyncOutcome::Failed
            }
        }
    }

    // --- Driver ---

    async fn should_retry(&self) -> bool {
        let state = self.state.lock().await;
        state.subject.is_some()
            && !state.initiated
            && !SyncState::in_flight(state.resync_in_flight, state.epoch)
            && self
                .settings
                .max_resync_attempts
                .map_or(true, |max| state.failed_resyncs < max)
    }

    /// Starts the background task that resyncs on invalidation, retries failed
    /// resyncs and runs the delta poller.
    pub fn spawn_driver(self: &Arc<Self>) -> SyncDriver {
        let sync = Arc::clone(self);
        SyncDriver {
            handle: tokio::spawn(async move { sync.drive().await }),
        }
    }

    async fn drive(self: Arc<Self>) {
        let mut retry = interval(self.settings.resync_retry);
        retry.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut delta = interval_at(Instant::now() + self.settings.delta_grace, self.settings.delta_interval);
        delta.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = self.wake.notified() => {
                    let sync = Arc::clone(&self);
                    tokio::spawn(async move { sync.sync().await });
                }
                _ = retry.tick() => {
                    if self.should_retry().await {
                        let sync = Arc::clone(&self);
                        tokio::spawn(async move { sync.sync().await });
                    }
                }
                _ = delta.tick() => {
                    let sync = Arc::clone(&self);
                    tokio::spawn(async move { sync.poll_delta().await });
                }
            }
        }
    }
}

/// Handle to the background task started by [`Synchronizer::spawn_driver`].
pub struct SyncDriver {
    handle: JoinHandle<()>,
}

impl SyncDriver {
    pub fn shutdown(self) {
        self.handle.abort();
    }
}
