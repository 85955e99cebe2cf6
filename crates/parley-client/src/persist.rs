//! Debounced cache persistence.
//!
//! A store subscriber, not reducer code: it watches commit summaries,
//! coalesces bursts of message changes with a trailing debounce, then writes
//! the whole message map (plus schema version) through the store crate.
//! Write failures are logged and forgotten: the cache is a best-effort
//! mirror, never the source of truth.

use std::sync::{Arc, Mutex};

use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use parley_shared::constants::CACHE_WRITE_DEBOUNCE;
use parley_store::Database;

use crate::store::{ChatStore, StoreEvent};

pub(crate) fn spawn_cache_persister(
    store: Arc<ChatStore>,
    db: Arc<Mutex<Database>>,
) -> JoinHandle<()> {
    let mut rx = store.subscribe();
    tokio::spawn(async move {
        loop {
            // Wait for the first message-list change...
            match rx.recv().await {
                Ok(StoreEvent::MessagesChanged(_)) => {}
                Ok(StoreEvent::Updated) => continue,
                // Missed events may have included message changes; persist.
                Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => return,
            }

            // ...then absorb the burst until it has been quiet for the
            // debounce window.  Only further message changes push the
            // deadline out.
            let mut deadline = Instant::now() + CACHE_WRITE_DEBOUNCE;
            loop {
                match tokio::time::timeout_at(deadline, rx.recv()).await {
                    Ok(Ok(StoreEvent::MessagesChanged(_))) | Ok(Err(RecvError::Lagged(_))) => {
                        deadline = Instant::now() + CACHE_WRITE_DEBOUNCE;
                    }
                    Ok(Ok(StoreEvent::Updated)) => {}
                    Ok(Err(RecvError::Closed)) => {
                        persist(&store, &db);
                        return;
                    }
                    Err(_elapsed) => break,
                }
            }

            persist(&store, &db);
        }
    })
}

fn persist(store: &ChatStore, db: &Mutex<Database>) {
    let snapshot = store.snapshot_messages();
    let mut db = match db.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    match db.save_message_cache(&snapshot) {
        Ok(()) => debug!(channels = snapshot.len(), "message cache persisted"),
        Err(e) => warn!(error = %e, "failed to persist message cache"),
    }
}
