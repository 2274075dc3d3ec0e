//! Drives a [`TabEngine`] on tokio.
//!
//! One task per tab owns the timer; activity arrives over a channel and the
//! host queries the engine through a [`TabHandle`]. The engine sits behind a
//! mutex that is never held across an await, so every transition still
//! happens one at a time.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::coordination::IdleSnapshot;
use crate::engine::{SyncStatus, TabEngine, TabEvent, TabInstance};
use crate::idle::{ActivityEvent, IdleState};

fn lock(engine: &Mutex<TabEngine>) -> MutexGuard<'_, TabEngine> {
    // A panic mid-transition leaves the engine usable; keep going.
    engine.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct TabRuntime;

impl TabRuntime {
    /// Start the engine and its timer loop. Must be called inside a tokio
    /// runtime.
    pub fn spawn(
        engine: TabEngine,
        activity_rx: mpsc::Receiver<ActivityEvent>,
        poll_interval: Duration,
    ) -> TabHandle {
        let tab_id = engine.tab_id().to_string();
        let engine = Arc::new(Mutex::new(engine));
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let task = tokio::spawn(run_tab(
            engine.clone(),
            activity_rx,
            shutdown_rx,
            poll_interval,
        ));

        TabHandle {
            tab_id,
            engine,
            shutdown_tx: Some(shutdown_tx),
            task: Some(task),
        }
    }
}

/// Host-side handle to a running tab.
pub struct TabHandle {
    tab_id: String,
    engine: Arc<Mutex<TabEngine>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl TabHandle {
    pub fn tab_id(&self) -> &str {
        &self.tab_id
    }

    /// Feed input directly, without going through the activity channel.
    pub fn submit(&self, event: ActivityEvent) -> bool {
        lock(&self.engine).submit(event)
    }

    pub fn activate(&self) {
        lock(&self.engine).activate();
    }

    pub fn remaining_time(&self) -> u64 {
        lock(&self.engine).remaining_time()
    }

    pub fn state(&self) -> IdleState {
        lock(&self.engine).state()
    }

    pub fn is_idle(&self) -> bool {
        lock(&self.engine).is_idle()
    }

    pub fn is_leader(&self) -> bool {
        lock(&self.engine).is_leader()
    }

    pub fn is_last_active_tab(&self) -> bool {
        lock(&self.engine).is_last_active_tab()
    }

    pub fn snapshot(&self) -> IdleSnapshot {
        lock(&self.engine).snapshot()
    }

    pub fn status(&self) -> SyncStatus {
        lock(&self.engine).status().clone()
    }

    pub fn instance(&self) -> TabInstance {
        lock(&self.engine).instance()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TabEvent> {
        lock(&self.engine).subscribe()
    }

    /// Stop the timer loop and leave the session, resigning leadership.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::error!("Tab task for {} failed: {}", self.tab_id, e);
                lock(&self.engine).shutdown();
            }
        }
    }
}

impl Drop for TabHandle {
    fn drop(&mut self) {
        // The loop notices the dropped sender and shuts the engine down.
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

async fn run_tab(
    engine: Arc<Mutex<TabEngine>>,
    mut activity_rx: mpsc::Receiver<ActivityEvent>,
    mut shutdown_rx: oneshot::Receiver<()>,
    poll_interval: Duration,
) {
    // tokio rejects a zero period.
    let mut interval = tokio::time::interval(poll_interval.max(Duration::from_millis(1)));
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    lock(&engine).start();
    info!("Tab loop running (poll every {:?})", poll_interval);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                lock(&engine).poll();
            }
            Some(event) = activity_rx.recv() => {
                lock(&engine).submit(event);
            }
            _ = &mut shutdown_rx => {
                debug!("Tab loop received shutdown");
                break;
            }
        }
    }

    lock(&engine).shutdown();
}
