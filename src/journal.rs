//! Persistence boundary: where engine state changes become durable.

use std::io;
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use crate::model::Event;
use crate::observability;
use crate::wal::{Replay, Wal};

/// Durable, ordered event storage. An `append` that returns `Ok` survives a crash.
#[async_trait]
pub trait EventStore: Send + Sync + 'static {
    async fn append(&self, event: &Event) -> io::Result<()>;

    /// Replace the stored history with `snapshot`, which must rebuild the same state.
    async fn compact(&self, snapshot: Vec<Event>) -> io::Result<()>;

    async fn appends_since_compact(&self) -> u64;
}

enum JournalCommand {
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

/// WAL-backed store. A single writer task owns the file and group-commits
/// appends: it drains whatever is queued, writes it all, and fsyncs once.
pub struct WalJournal {
    tx: mpsc::Sender<JournalCommand>,
}

impl WalJournal {
    /// Replay the log at `path`, then open it for appends. Spawns the writer
    /// task, so this must run inside a Tokio runtime.
    pub fn open(path: &Path) -> io::Result<(Self, Replay)> {
        let replay = Wal::replay(path)?;
        if replay.torn_tail {
            tracing::warn!(
                "journal {}: discarding torn trailing frame after {} events",
                path.display(),
                replay.events.len()
            );
            Wal::truncate(path, replay.valid_len)?;
        }
        let wal = Wal::open(path)?;
        let (tx, rx) = mpsc::channel(4096);
        tokio::spawn(writer_loop(wal, rx));
        Ok((Self { tx }, replay))
    }

    async fn request<T>(
        &self,
        command: JournalCommand,
        rx: oneshot::Receiver<T>,
    ) -> io::Result<T> {
        self.tx
            .send(command)
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "journal writer shut down"))?;
        rx.await
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "journal writer dropped response"))
    }
}

#[async_trait]
impl EventStore for WalJournal {
    async fn append(&self, event: &Event) -> io::Result<()> {
        let (response, rx) = oneshot::channel();
        let command = JournalCommand::Append { event: event.clone(), response };
        self.request(command, rx).await?
    }

    async fn compact(&self, events: Vec<Event>) -> io::Result<()> {
        let (response, rx) = oneshot::channel();
        self.request(JournalCommand::Compact { events, response }, rx).await?
    }

    async fn appends_since_compact(&self) -> u64 {
        let (response, rx) = oneshot::channel();
        self.request(JournalCommand::AppendsSinceCompact { response }, rx)
            .await
            .unwrap_or(0)
    }
}

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

async fn writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<JournalCommand>) {
    while let Some(command) = rx.recv().await {
        let (event, response) = match command {
            JournalCommand::Append { event, response } => (event, response),
            other => {
                handle_control(&mut wal, other);
                continue;
            }
        };

        let mut batch: Vec<PendingAppend> = vec![(event, response)];
        let mut deferred = None;
        while let Ok(next) = rx.try_recv() {
            match next {
                JournalCommand::Append { event, response } => batch.push((event, response)),
                other => {
                    // Control commands must observe every append queued before them.
                    deferred = Some(other);
                    break;
                }
            }
        }

        commit_batch(&mut wal, batch);
        if let Some(command) = deferred {
            handle_control(&mut wal, command);
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: Vec<PendingAppend>) {
    metrics::histogram!(observability::JOURNAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let started = std::time::Instant::now();

    // All or nothing: a failed batch leaves the log as it was before it.
    let result = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event))
        .and_then(|()| wal.flush_sync());
    if result.is_err()
        && let Err(e) = wal.rollback()
    {
        tracing::error!("journal {}: rollback failed: {e}", wal.path().display());
    }

    metrics::histogram!(observability::JOURNAL_FLUSH_DURATION_SECONDS)
        .record(started.elapsed().as_secs_f64());
    if let Err(e) = &result {
        tracing::error!("journal {}: commit of {} events failed: {e}", wal.path().display(), batch.len());
    }

    for (_, response) in batch {
        let reply = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = response.send(reply);
    }
}

fn handle_control(wal: &mut Wal, command: JournalCommand) {
    match command {
        JournalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        JournalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        JournalCommand::Append { event, response } => commit_batch(wal, vec![(event, response)]),
    }
}

/// Volatile store for embedding and tests. `set_unavailable(true)` makes every
/// append fail, standing in for a lost disk or database.
#[derive(Default)]
pub struct MemoryJournal {
    events: Mutex<Vec<Event>>,
    appends_since_compact: Mutex<u64>,
    unavailable: AtomicBool,
}

impl MemoryJournal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

fn poisoned<T>(_: T) -> io::Error {
    io::Error::other("memory journal lock poisoned")
}

#[async_trait]
impl EventStore for MemoryJournal {
    async fn append(&self, event: &Event) -> io::Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "store unavailable"));
        }
        self.events.lock().map_err(poisoned)?.push(event.clone());
        *self.appends_since_compact.lock().map_err(poisoned)? += 1;
        Ok(())
    }

    async fn compact(&self, snapshot: Vec<Event>) -> io::Result<()> {
        *self.events.lock().map_err(poisoned)? = snapshot;
        *self.appends_since_compact.lock().map_err(poisoned)? = 0;
        Ok(())
    }

    async fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact.lock().map(|n| *n).unwrap_or(0)
    }
}
