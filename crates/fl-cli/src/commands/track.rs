//! Track command: loading detection over a live location feed.
//!
//! Reads location samples as JSON lines, derives speeds, and feeds them to
//! the loading detector while a workday is active. Detected stops are
//! recorded as `LOADING_START`/`LOADING_END` events.
//!
//! The detector's dwell timer runs on the sample clock: a pending stop is
//! promoted once the dwell has elapsed since the stop began, measured from
//! the last sample's timestamp plus the wall time since it arrived. A feed
//! replayed from a file therefore behaves like the original live feed.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use fl_core::{
    IntervalKind, LoadingConfig, LoadingDetector, LoadingTransition, Location, LocationSample,
    NewEvent, SpeedEstimator, UserId, WorkdayContext,
};
use fl_db::Database;
use fs2::FileExt;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::sync::{client, sync_once};
use crate::Config;

/// How often the store is checked for commits from other processes.
const REFRESH_INTERVAL: std::time::Duration = std::time::Duration::from_secs(5);

/// Counters for one tracking run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrackSummary {
    pub samples: usize,
    pub skipped: usize,
    pub recorded: usize,
}

/// Whether the heuristic may run, derived from the open workday and break
/// events in the store.
pub fn workday_context(db: &Database, user_id: &UserId) -> Result<WorkdayContext> {
    Ok(WorkdayContext {
        workday_active: db.open_event(user_id, IntervalKind::Work)?.is_some(),
        break_active: db.open_event(user_id, IntervalKind::Break)?.is_some(),
    })
}

/// Detector state plus what it needs from the feed and the store.
#[derive(Debug)]
pub struct Tracker {
    user_id: UserId,
    detector: LoadingDetector,
    estimator: SpeedEstimator,
    context: WorkdayContext,
    /// Timestamp of the last speed sample and when it arrived.
    clock: Option<(DateTime<Utc>, Instant)>,
    last_location: Option<Location>,
    summary: TrackSummary,
}

impl Tracker {
    /// Creates a tracker, continuing a loading interval left open by an
    /// earlier run.
    pub fn new(db: &Database, user_id: UserId, config: LoadingConfig) -> Result<Self> {
        let open_since = db
            .open_event(&user_id, IntervalKind::Loading)?
            .map(|event| event.data.timestamp);
        if let Some(since) = open_since {
            tracing::info!(%since, "resuming open loading interval");
        }
        let context = workday_context(db, &user_id)?;
        Ok(Self {
            user_id,
            detector: LoadingDetector::resume(config, open_since),
            estimator: SpeedEstimator::new(),
            context,
            clock: None,
            last_location: None,
            summary: TrackSummary::default(),
        })
    }

    pub const fn context(&self) -> WorkdayContext {
        self.context
    }

    pub const fn detector(&self) -> &LoadingDetector {
        &self.detector
    }

    /// Current time on the sample clock.
    fn now(&self) -> DateTime<Utc> {
        self.clock.map_or_else(Utc::now, |(at, received)| {
            at + Duration::from_std(received.elapsed()).unwrap_or_else(|_| Duration::zero())
        })
    }

    /// When the pending stop should be promoted.
    pub fn wake_at(&self) -> Option<Instant> {
        let deadline = self.detector.deadline()?;
        let (at, received) = self.clock?;
        Some(received + (deadline - at).to_std().unwrap_or_default())
    }

    /// Handles one input line. Malformed lines are logged and skipped.
    pub fn line<W: Write>(&mut self, db: &mut Database, writer: &mut W, line: &str) -> Result<()> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(());
        }
        match serde_json::from_str::<LocationSample>(line) {
            Ok(sample) => self.sample(db, writer, sample),
            Err(err) => {
                tracing::warn!(error = %err, "skipping malformed location sample");
                self.summary.skipped += 1;
                Ok(())
            }
        }
    }

    /// Feeds one location sample.
    pub fn sample<W: Write>(
        &mut self,
        db: &mut Database,
        writer: &mut W,
        sample: LocationSample,
    ) -> Result<()> {
        self.summary.samples += 1;
        if db.refresh()? {
            self.apply_context(db, writer, sample.timestamp)?;
        }

        let Some(speed) = self.estimator.next(sample) else {
            return Ok(());
        };
        self.clock = Some((speed.timestamp, Instant::now()));
        if speed.location.is_some() {
            self.last_location.clone_from(&speed.location);
        }

        for transition in self.detector.observe(&speed, self.context) {
            self.record(db, writer, &transition)?;
        }
        Ok(())
    }

    /// Promotes the pending stop once its deadline has passed.
    ///
    /// Picks up workday changes from other processes first; a stop whose
    /// workday ended or paused in the meantime is cancelled, not promoted.
    pub fn fire<W: Write>(&mut self, db: &mut Database, writer: &mut W) -> Result<()> {
        if self.detector.deadline().is_none() {
            return Ok(());
        }
        if db.refresh()? {
            let now = self.now();
            self.apply_context(db, writer, now)?;
        }
        let Some(deadline) = self.detector.deadline() else {
            return Ok(());
        };
        if let Some(transition) = self.detector.fire(deadline) {
            self.record(db, writer, &transition)?;
        }
        Ok(())
    }

    /// Re-derives the workday state after the store changed.
    pub fn store_changed<W: Write>(&mut self, db: &mut Database, writer: &mut W) -> Result<()> {
        let now = self.now();
        self.apply_context(db, writer, now)
    }

    fn apply_context<W: Write>(
        &mut self,
        db: &mut Database,
        writer: &mut W,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let context = workday_context(db, &self.user_id)?;
        if context == self.context {
            return Ok(());
        }
        tracing::debug!(?context, "workday state changed");
        self.context = context;
        if !context.is_eligible() {
            if let Some(transition) = self.detector.suspend(at, self.last_location.clone()) {
                self.record(db, writer, &transition)?;
            }
        }
        Ok(())
    }

    fn record<W: Write>(
        &mut self,
        db: &mut Database,
        writer: &mut W,
        transition: &LoadingTransition,
    ) -> Result<()> {
        let mut event = NewEvent::new(self.user_id.clone(), transition.event_type(), transition.at());
        if let Some(location) = transition.location() {
            event = event.with_location(location.clone());
        }
        let id = db.insert(&event).context("failed to record loading event")?;
        self.summary.recorded += 1;
        writeln!(
            writer,
            "Recorded {} #{id} at {}",
            event.event_type,
            event.timestamp.format("%Y-%m-%d %H:%M:%S")
        )?;
        Ok(())
    }

    pub const fn summary(&self) -> TrackSummary {
        self.summary
    }
}

/// Runs the detector until the input ends.
///
/// Races the next input line against the store's change feed and the
/// pending stop's deadline. Input is preferred when several are ready. The
/// store is polled for commits from other processes in between.
pub async fn track<R, W>(
    reader: R,
    writer: &mut W,
    db: &mut Database,
    user_id: UserId,
    config: LoadingConfig,
) -> Result<TrackSummary>
where
    R: AsyncBufRead + Unpin,
    W: Write,
{
    let mut tracker = Tracker::new(db, user_id, config)?;
    let mut changes = db.subscribe();
    let mut lines = reader.lines();
    let mut refresh = tokio::time::interval(REFRESH_INTERVAL);
    refresh.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        let wake_at = tracker.wake_at();
        let timer = async move {
            match wake_at {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            line = lines.next_line() => {
                let Some(line) = line.context("failed to read location samples")? else {
                    break;
                };
                tracker.line(db, writer, &line)?;
            }
            changed = changes.changed() => {
                if changed.is_err() {
                    break;
                }
                tracker.store_changed(db, writer)?;
            }
            () = timer => tracker.fire(db, writer)?,
            _ = refresh.tick() => {
                // Changes are handled through the feed above.
                db.refresh()?;
            }
        }
    }

    Ok(tracker.summary())
}

fn lock_path(database_path: &Path) -> PathBuf {
    database_path.with_extension("track.lock")
}

/// Holds the tracking lock for as long as the file is open.
fn acquire_lock(database_path: &Path) -> Result<File> {
    let lock_file = File::create(lock_path(database_path)).context("failed to create lock file")?;
    lock_file
        .try_lock_exclusive()
        .context("another `fl track` is already running")?;
    Ok(lock_file)
}

/// Uploads on every store change, on its own connection.
fn spawn_sync(config: &Config, mut changes: watch::Receiver<u64>) -> Result<JoinHandle<()>> {
    let client = client(config)?;
    let config = config.clone();
    let mut db = Database::open(&config.database_path).context("failed to open database for sync")?;

    Ok(tokio::spawn(async move {
        loop {
            match sync_once(&mut db, &client, &config).await {
                Ok(report) => tracing::debug!(uploaded = report.uploaded, "background sync pass"),
                Err(err) => tracing::warn!(error = %format!("{err:#}"), "background sync failed"),
            }
            if changes.changed().await.is_err() {
                break;
            }
        }
    }))
}

/// Runs the track command on stdin.
pub fn run<W: Write>(writer: &mut W, mut db: Database, config: &Config, sync: bool) -> Result<TrackSummary> {
    let user_id = config.user_id()?;
    let _lock = acquire_lock(&config.database_path)?;
    let runtime = tokio::runtime::Runtime::new().context("failed to initialize tokio runtime")?;

    let summary = runtime.block_on(async {
        let background = if sync {
            Some(spawn_sync(config, db.subscribe())?)
        } else {
            None
        };

        let stdin = BufReader::new(tokio::io::stdin());
        let summary = track(stdin, writer, &mut db, user_id, config.loading).await?;

        if let Some(handle) = background {
            handle.abort();
            let client = client(config)?;
            if let Err(err) = sync_once(&mut db, &client, config).await {
                tracing::warn!(error = %format!("{err:#}"), "final sync failed");
            }
        }
        anyhow::Ok(summary)
    })?;

    writeln!(
        writer,
        "Processed {} sample(s), recorded {} loading event(s)",
        summary.samples, summary.recorded
    )?;
    if summary.skipped > 0 {
        writeln!(writer, "Skipped {} malformed line(s)", summary.skipped)?;
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use fl_core::{DetectorState, EventType};
    use tokio::io::AsyncWriteExt;

    fn user() -> UserId {
        UserId::new("driver-1").unwrap()
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 15, 9, 0, 0).unwrap()
    }

    fn line(secs: i64, speed: f64) -> String {
        format!(
            r#"{{"timestamp":"{}","latitude":52.5,"longitude":13.4,"speed_kmh":{speed}}}"#,
            (t0() + Duration::seconds(secs)).to_rfc3339()
        )
    }

    fn feed(lines: &[String]) -> std::io::Cursor<Vec<u8>> {
        std::io::Cursor::new(format!("{}\n", lines.join("\n")).into_bytes())
    }

    fn db_with_workday() -> Database {
        let mut db = Database::open_in_memory().unwrap();
        db.insert(&NewEvent::new(
            user(),
            EventType::WorkStart,
            t0() - Duration::hours(1),
        ))
        .unwrap();
        db
    }

    fn loading_events(db: &Database) -> Vec<(EventType, DateTime<Utc>)> {
        db.list_events(&user(), None)
            .unwrap()
            .into_iter()
            .filter(|e| {
                matches!(
                    e.data.event_type,
                    EventType::LoadingStart | EventType::LoadingEnd
                )
            })
            .map(|e| (e.data.event_type, e.data.timestamp))
            .collect()
    }

    #[tokio::test]
    async fn test_stop_longer_than_dwell_records_interval() {
        let mut db = db_with_workday();
        let input = feed(&[
            line(0, 50.0),
            line(10, 5.0),
            line(70, 3.0),
            line(140, 0.0),
            line(200, 40.0),
        ]);
        let mut out = Vec::new();

        let summary = track(input, &mut out, &mut db, user(), LoadingConfig::default())
            .await
            .unwrap();

        assert_eq!(summary.recorded, 2);
        assert_eq!(
            loading_events(&db),
            vec![
                (EventType::LoadingStart, t0() + Duration::seconds(10)),
                (EventType::LoadingEnd, t0() + Duration::seconds(200)),
            ]
        );
        let stored = db.list_events(&user(), None).unwrap();
        assert!(stored.iter().skip(1).all(|e| e.data.location.is_some()));
    }

    #[tokio::test]
    async fn test_short_stop_records_nothing() {
        let mut db = db_with_workday();
        let input = feed(&[line(0, 5.0), line(90, 30.0)]);
        let mut out = Vec::new();

        let summary = track(input, &mut out, &mut db, user(), LoadingConfig::default())
            .await
            .unwrap();

        assert_eq!(summary.samples, 2);
        assert_eq!(summary.recorded, 0);
        assert!(loading_events(&db).is_empty());
    }

    #[tokio::test]
    async fn test_no_detection_outside_workday() {
        let mut db = Database::open_in_memory().unwrap();
        let input = feed(&[line(0, 0.0), line(300, 0.0), line(600, 50.0)]);
        let mut out = Vec::new();

        track(input, &mut out, &mut db, user(), LoadingConfig::default())
            .await
            .unwrap();

        assert!(loading_events(&db).is_empty());
    }

    #[tokio::test]
    async fn test_resumes_open_loading_interval() {
        let mut db = db_with_workday();
        db.insert(&NewEvent::new(user(), EventType::LoadingStart, t0()))
            .unwrap();
        let input = feed(&[line(60, 35.0)]);
        let mut out = Vec::new();

        track(input, &mut out, &mut db, user(), LoadingConfig::default())
            .await
            .unwrap();

        assert_eq!(
            loading_events(&db),
            vec![
                (EventType::LoadingStart, t0()),
                (EventType::LoadingEnd, t0() + Duration::seconds(60)),
            ]
        );
    }

    #[tokio::test]
    async fn test_malformed_lines_are_skipped() {
        let mut db = db_with_workday();
        let input = feed(&["not json".to_string(), String::new(), line(0, 50.0)]);
        let mut out = Vec::new();

        let summary = track(input, &mut out, &mut db, user(), LoadingConfig::default())
            .await
            .unwrap();

        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.samples, 1);
    }

    #[tokio::test]
    async fn test_dwell_timer_promotes_without_further_samples() {
        let mut db = db_with_workday();
        let config = LoadingConfig {
            dwell_secs: 1,
            ..LoadingConfig::default()
        };
        let (reader, mut feed_writer) = tokio::io::duplex(1024);
        let slow = format!("{}\n", line(0, 2.0));
        let feeder = tokio::spawn(async move {
            feed_writer.write_all(slow.as_bytes()).await.unwrap();
            tokio::time::sleep(std::time::Duration::from_millis(1500)).await;
            drop(feed_writer);
        });
        let mut out = Vec::new();

        let summary = track(BufReader::new(reader), &mut out, &mut db, user(), config)
            .await
            .unwrap();
        feeder.await.unwrap();

        assert_eq!(summary.recorded, 1);
        assert_eq!(loading_events(&db), vec![(EventType::LoadingStart, t0())]);
    }

    #[test]
    fn test_workday_end_closes_active_loading() {
        let mut db = db_with_workday();
        let mut out = Vec::new();
        let config = LoadingConfig {
            dwell_secs: 0,
            ..LoadingConfig::default()
        };
        let mut tracker = Tracker::new(&db, user(), config).unwrap();

        tracker.line(&mut db, &mut out, &line(0, 1.0)).unwrap();
        tracker.line(&mut db, &mut out, &line(5, 1.0)).unwrap();
        assert!(matches!(
            tracker.detector().state(),
            DetectorState::Active { .. }
        ));

        db.insert(&NewEvent::new(
            user(),
            EventType::WorkEnd,
            t0() + Duration::seconds(30),
        ))
        .unwrap();
        tracker.store_changed(&mut db, &mut out).unwrap();

        assert!(!tracker.context().is_eligible());
        assert_eq!(*tracker.detector().state(), DetectorState::Above);
        let events = loading_events(&db);
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].0, EventType::LoadingEnd);
    }

    #[test]
    fn test_break_start_cancels_pending_stop() {
        let mut db = db_with_workday();
        let mut out = Vec::new();
        let mut tracker = Tracker::new(&db, user(), LoadingConfig::default()).unwrap();

        tracker.line(&mut db, &mut out, &line(0, 1.0)).unwrap();
        assert!(tracker.wake_at().is_some());

        db.insert(&NewEvent::new(
            user(),
            EventType::BreakStart,
            t0() + Duration::seconds(30),
        ))
        .unwrap();
        tracker.store_changed(&mut db, &mut out).unwrap();

        assert!(tracker.wake_at().is_none());
        assert!(loading_events(&db).is_empty());
    }

    #[test]
    fn test_break_from_other_process_stops_promotion() {
        let temp = tempfile::tempdir().unwrap();
        let db_path = temp.path().join("fleetlog.db");
        let mut db = Database::open(&db_path).unwrap();
        db.insert(&NewEvent::new(
            user(),
            EventType::WorkStart,
            t0() - Duration::hours(1),
        ))
        .unwrap();
        let mut out = Vec::new();
        let mut tracker = Tracker::new(&db, user(), LoadingConfig::default()).unwrap();
        tracker.line(&mut db, &mut out, &line(0, 1.0)).unwrap();
        assert!(tracker.wake_at().is_some());

        let mut other = Database::open(&db_path).unwrap();
        other
            .insert(&NewEvent::new(
                user(),
                EventType::BreakStart,
                t0() + Duration::seconds(30),
            ))
            .unwrap();
        tracker.fire(&mut db, &mut out).unwrap();

        assert!(!tracker.context().is_eligible());
        assert!(tracker.wake_at().is_none());
        assert!(loading_events(&db).is_empty());
    }

    #[test]
    fn test_lock_is_exclusive() {
        let temp = tempfile::tempdir().unwrap();
        let db_path = temp.path().join("fleetlog.db");

        let _held = acquire_lock(&db_path).unwrap();
        let err = acquire_lock(&db_path).unwrap_err();

        assert!(err.to_string().contains("already running"));
    }
}
