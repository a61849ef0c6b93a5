mod availability;
mod conflict;
mod error;
mod mutations;
mod queries;
mod store;

pub use availability::{free_stays, merge_overlapping, subtract_stays};
pub use error::{EngineError, FieldError};
pub use store::{CalendarStore, SharedRoomCalendar};

pub(crate) use conflict::{field_length_errors, validate_guest, validate_stay};

use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot, OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};
use ulid::Ulid;

use crate::model::*;
use crate::wal::Wal;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        txn: Txn,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        txns: Vec<Txn>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { txn, response } => {
                let mut batch = vec![(txn, response)];

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { txn, response }) => {
                            batch.push((txn, response));
                        }
                        Ok(other) => {
                            // Flush current batch first, then handle the non-append command
                            flush_and_respond(&mut wal, &mut batch);
                            handle_non_append(&mut wal, other);
                            break;
                        }
                        Err(_) => break,
                    }
                }

                if !batch.is_empty() {
                    flush_and_respond(&mut wal, &mut batch);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
    tracing::debug!("WAL writer stopped");
}

fn flush_and_respond(wal: &mut Wal, batch: &mut Vec<(Txn, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    if let Err(e) = &result {
        tracing::error!("WAL flush of {} transactions failed: {e}", batch.len());
    }
    respond_batch(batch, &result);
}

fn flush_batch(wal: &mut Wal, batch: &[(Txn, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let result = batch
        .iter()
        .try_for_each(|(txn, _)| wal.append_buffered(txn))
        .and_then(|()| wal.flush_sync());
    if let Err(e) = result {
        // Every caller in the batch hears failure, so none of it may survive
        // a restart.
        if let Err(undo) = wal.discard_unflushed() {
            tracing::error!("WAL rollback failed, refusing further appends: {undo}");
        }
        return Err(e);
    }
    Ok(())
}

fn respond_batch(batch: &mut Vec<(Txn, oneshot::Sender<io::Result<()>>)>, result: &io::Result<()>) {
    for (_, tx) in batch.drain(..) {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { txns, response } => {
            let result =
                Wal::write_compact_file(wal.path(), &txns).and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

/// Hand a transaction to the WAL writer and wait until it is durable.
async fn wal_append(wal_tx: &mpsc::Sender<WalCommand>, txn: &Txn) -> Result<(), EngineError> {
    let (tx, rx) = oneshot::channel();
    wal_tx
        .send(WalCommand::Append {
            txn: txn.clone(),
            response: tx,
        })
        .await
        .map_err(|_| EngineError::StoreFailure("WAL writer shut down".into()))?;
    rx.await
        .map_err(|_| EngineError::StoreFailure("WAL writer dropped response".into()))?
        .map_err(|e| EngineError::StoreFailure(e.to_string()))
}

/// Availability and reservation engine. One per property; share it as
/// `Arc<Engine>` across request handlers.
pub struct Engine {
    pub(super) store: Arc<CalendarStore>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    /// Writers hold this shared from before they lock a room until their
    /// transaction is applied; compaction holds it exclusively. Always taken
    /// before any room lock.
    pub(super) commit_gate: Arc<RwLock<()>>,
    /// Serializes `create_room` from its existence check until the room is
    /// applied.
    pub(super) catalog: Arc<tokio::sync::Mutex<()>>,
    ids: Mutex<ulid::Generator>,
    #[cfg(test)]
    pub(super) fail_after_reservation_insert: std::sync::atomic::AtomicBool,
}

impl Engine {
    /// Replay the WAL at `wal_path`, cutting any torn tail, and start its
    /// writer task. Must be called inside a tokio runtime.
    pub fn open(wal_path: PathBuf) -> io::Result<Self> {
        let (wal, txns) = Wal::recover(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let store = Arc::new(CalendarStore::new());

        // Replay runs before anyone else holds these Arcs, so try_write
        // always succeeds. Never block here: this may run inside async code.
        for txn in &txns {
            match txn.events.iter().find_map(Event::calendar_room) {
                Some(room_id) => {
                    let cal = store.get_room(room_id).ok_or_else(|| {
                        io::Error::new(
                            io::ErrorKind::InvalidData,
                            format!("WAL references unknown room {room_id}"),
                        )
                    })?;
                    let mut guard = cal
                        .try_write()
                        .map_err(|_| io::Error::other("replay: room calendar contended"))?;
                    store.apply_txn(Some(&mut *guard), txn);
                }
                None => store.apply_txn(None, txn),
            }
        }
        tracing::info!(
            "replayed {} transactions from {}: {} rooms",
            txns.len(),
            wal_path.display(),
            store.room_count()
        );

        Ok(Self {
            store,
            wal_tx,
            commit_gate: Arc::new(RwLock::new(())),
            catalog: Arc::new(tokio::sync::Mutex::new(())),
            ids: Mutex::new(ulid::Generator::new()),
            #[cfg(test)]
            fail_after_reservation_insert: std::sync::atomic::AtomicBool::new(false),
        })
    }

    pub fn store(&self) -> &CalendarStore {
        &self.store
    }

    /// Fresh id plus the timestamp it encodes. Ids come from one monotonic
    /// generator, so id order matches `created_at` order.
    pub(super) fn next_id(&self) -> Result<(Ulid, DateTime<Utc>), EngineError> {
        let now = Utc::now();
        let mut generator = self
            .ids
            .lock()
            .map_err(|_| EngineError::StoreFailure("id generator poisoned".into()))?;
        let id = generator
            .generate_from_datetime(SystemTime::from(now))
            .map_err(|e| EngineError::StoreFailure(format!("id generator: {e}")))?;
        Ok((id, now))
    }

    /// Enter a write: take the commit gate shared.
    pub(super) async fn begin_write(&self) -> OwnedRwLockReadGuard<()> {
        self.commit_gate.clone().read_owned().await
    }

    /// Lookup room, acquire its calendar write lock.
    pub(super) async fn lock_room(
        &self,
        room_id: RoomId,
    ) -> Result<OwnedRwLockWriteGuard<RoomCalendar>, EngineError> {
        let cal = self
            .store
            .get_room(room_id)
            .ok_or(EngineError::RoomNotFound(room_id))?;
        Ok(cal.write_owned().await)
    }

    /// WAL-append + apply as one unit. Runs on its own task so that a caller
    /// dropping this future cannot stop the transaction halfway between the
    /// log and memory; the gate and room lock are released once it is applied.
    pub(super) async fn commit(
        &self,
        gate: OwnedRwLockReadGuard<()>,
        calendar: Option<OwnedRwLockWriteGuard<RoomCalendar>>,
        txn: Txn,
    ) -> Result<(), EngineError> {
        self.commit_holding(gate, calendar, (), txn).await
    }

    /// `commit`, also keeping `held` alive until the transaction is applied.
    pub(super) async fn commit_holding<H: Send + 'static>(
        &self,
        gate: OwnedRwLockReadGuard<()>,
        calendar: Option<OwnedRwLockWriteGuard<RoomCalendar>>,
        held: H,
        txn: Txn,
    ) -> Result<(), EngineError> {
        let store = self.store.clone();
        let wal_tx = self.wal_tx.clone();
        let task = tokio::spawn(async move {
            let _gate = gate;
            let _held = held;
            let mut calendar = calendar;
            wal_append(&wal_tx, &txn).await?;
            store.apply_txn(calendar.as_deref_mut(), &txn);
            Ok(())
        });
        task.await
            .map_err(|e| EngineError::StoreFailure(format!("commit task failed: {e}")))?
    }
}
