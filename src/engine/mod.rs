mod conflict;
mod error;
mod lifecycle;
mod mutations;
mod queries;
mod slots;
mod store;

pub use error::EngineError;
pub use slots::slots;
pub use store::{InMemoryStore, SharedCalendar, SharedLedger};

use std::collections::HashMap;
use std::io;
use std::ops::{Deref, DerefMut};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{mpsc, oneshot, OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};
use tracing::info;
use ulid::Ulid;

use crate::calendar::InstitutionCalendar;
use crate::directory::Directory;
use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

use store::{Apply, IdClaim, IdKind};

/// How much of a resource's timeline one reservation claims.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ResourceConflictPolicy {
    /// The whole institution-local day containing `reserved_at`.
    #[default]
    CalendarDay,
    /// `[reserved_at, reserved_at + ms)`.
    FixedDuration(Ms),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    pub calendar: InstitutionCalendar,
    pub resource_policy: ResourceConflictPolicy,
    pub default_horizon_days: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            calendar: InstitutionCalendar::utc(),
            resource_policy: ResourceConflictPolicy::CalendarDay,
            default_horizon_days: DEFAULT_HORIZON_DAYS,
        }
    }
}

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Owns the WAL. Appends that are already queued when the first one is taken
/// share a single fsync; any other command closes the batch.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let WalCommand::Append { event, response } = cmd else {
            handle_non_append(&mut wal, cmd);
            continue;
        };
        let mut batch = vec![(event, response)];
        let mut trailing = None;
        while let Ok(next) = rx.try_recv() {
            match next {
                WalCommand::Append { event, response } => batch.push((event, response)),
                other => {
                    trailing = Some(other);
                    break;
                }
            }
        }
        commit_batch(&mut wal, batch);
        if let Some(cmd) = trailing {
            handle_non_append(&mut wal, cmd);
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: Vec<PendingAppend>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let started = Instant::now();
    let result = flush_batch(wal, &batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(started.elapsed().as_secs_f64());
    if let Err(e) = &result {
        tracing::error!("WAL flush of {} events failed: {e}", batch.len());
    }
    for (_, tx) in batch {
        let _ = tx.send(match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        });
    }
}

fn flush_batch(wal: &mut Wal, batch: &[PendingAppend]) -> io::Result<()> {
    let appended = batch.iter().try_for_each(|(event, _)| wal.append_buffered(event));
    // Flush regardless so a failed batch leaves nothing buffered for the next one.
    let flushed = wal.flush_sync();
    appended.and(flushed)
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events).and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { event, response } => commit_batch(wal, vec![(event, response)]),
    }
}

async fn wal_append(wal_tx: &mpsc::Sender<WalCommand>, event: &Event) -> Result<(), EngineError> {
    let (tx, rx) = oneshot::channel();
    wal_tx
        .send(WalCommand::Append {
            event: event.clone(),
            response: tx,
        })
        .await
        .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
    rx.await
        .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
        .map_err(|e| EngineError::WalError(e.to_string()))
}

/// Write access to one calendar or ledger, plus a share of the commit gate.
/// Compaction takes the gate exclusively, so it never races a commit.
/// Fields drop in order: the id claim outlives the state guard.
pub(super) struct Locked<S> {
    _gate: OwnedRwLockReadGuard<()>,
    guard: OwnedRwLockWriteGuard<S>,
    _claim: Option<IdClaim>,
}

impl<S> Locked<S> {
    /// Keep `claim` until this commit is applied or abandoned.
    pub(super) fn holding(mut self, claim: IdClaim) -> Self {
        self._claim = Some(claim);
        self
    }
}

impl<S> Deref for Locked<S> {
    type Target = S;
    fn deref(&self) -> &S {
        &self.guard
    }
}

impl<S> DerefMut for Locked<S> {
    fn deref_mut(&mut self) -> &mut S {
        &mut self.guard
    }
}

pub struct Engine {
    pub(super) store: Arc<InMemoryStore>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    pub(super) directory: Arc<dyn Directory>,
    pub(super) config: EngineConfig,
    pub(super) commit_gate: Arc<RwLock<()>>,
}

impl Engine {
    pub fn new(
        wal_path: PathBuf,
        notify: Arc<NotifyHub>,
        directory: Arc<dyn Directory>,
        config: EngineConfig,
    ) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        // Replay into plain values first; nothing else can see them yet.
        let store = Arc::new(InMemoryStore::new());
        let mut calendars: HashMap<Ulid, ProfessorCalendar> = HashMap::new();
        let mut ledgers: HashMap<Ulid, ResourceLedger> = HashMap::new();
        for event in &events {
            match event.owner() {
                BookingOwner::Professor(id) => calendars
                    .entry(id)
                    .or_insert_with(|| ProfessorCalendar::new(id))
                    .apply(event, &store),
                BookingOwner::Resource(id) => ledgers
                    .entry(id)
                    .or_insert_with(|| ResourceLedger::new(id))
                    .apply(event, &store),
            }
        }
        if !events.is_empty() {
            info!(
                events = events.len(),
                professors = calendars.len(),
                resources = ledgers.len(),
                "replayed {}",
                wal_path.display()
            );
        }
        calendars.into_values().for_each(|c| store.insert_calendar(c));
        ledgers.into_values().for_each(|l| store.insert_ledger(l));

        Ok(Self {
            store,
            wal_tx,
            notify,
            directory,
            config,
            commit_gate: Arc::new(RwLock::new(())),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn subscribe(&self, channel: Ulid) -> tokio::sync::broadcast::Receiver<Event> {
        self.notify.subscribe(channel)
    }

    pub(super) async fn lock_calendar(&self, calendar: SharedCalendar) -> Locked<ProfessorCalendar> {
        let gate = self.commit_gate.clone().read_owned().await;
        Locked {
            _gate: gate,
            guard: calendar.write_owned().await,
            _claim: None,
        }
    }

    pub(super) async fn lock_ledger(&self, ledger: SharedLedger) -> Locked<ResourceLedger> {
        let gate = self.commit_gate.clone().read_owned().await;
        Locked {
            _gate: gate,
            guard: ledger.write_owned().await,
            _claim: None,
        }
    }

    /// WAL-append, apply, notify. Runs detached so the commit completes even
    /// if the caller is dropped while waiting for the fsync.
    pub(super) async fn persist_and_apply<S>(&self, mut locked: Locked<S>, event: Event) -> Result<(), EngineError>
    where
        S: Apply + Send + Sync + 'static,
    {
        let wal_tx = self.wal_tx.clone();
        let store = self.store.clone();
        let notify = self.notify.clone();
        tokio::spawn(async move {
            wal_append(&wal_tx, &event).await?;
            locked.apply(&event, &store);
            notify.send(event.channel(), &event);
            Ok(())
        })
        .await
        .map_err(|e| EngineError::WalError(format!("commit task failed: {e}")))?
    }
}
