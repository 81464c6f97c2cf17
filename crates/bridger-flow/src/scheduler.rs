//! Single-writer task that owns the [`FlowManager`].
//!
//! Intake notifications, FDB removals and the periodic maintenance pass all
//! run on this one task, so no two of them ever touch the flow table at the
//! same time. Other tasks talk to it through a cloneable [`FlowHandle`].

use crate::collaborators::FdbId;
use crate::entry::FlowSummary;
use crate::error::{FlowError, Result};
use crate::key::{FlowKey, PendingFlow};
use crate::manager::{FlowManager, FlowManagerStats};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing::{debug, error, info};

/// Messages accepted by the scheduler task.
#[derive(Debug)]
pub enum FlowEvent {
    /// The datapath saw a flow without an offload entry
    Pending(PendingFlow),
    /// The bridge subsystem dropped an FDB entry
    FdbRemoved(FdbId),
    /// Withdraw one flow
    Remove(FlowKey),
    /// Snapshot of the activity counters
    Stats(oneshot::Sender<FlowManagerStats>),
    /// The `n` busiest flows
    Hottest {
        n: usize,
        reply: oneshot::Sender<Vec<FlowSummary>>,
    },
    /// Remove every flow and stop
    Shutdown,
}

/// Sender side of the scheduler queue.
#[derive(Debug, Clone)]
pub struct FlowHandle {
    tx: mpsc::Sender<FlowEvent>,
}

impl FlowHandle {
    async fn send(&self, event: FlowEvent) -> Result<()> {
        self.tx
            .send(event)
            .await
            .map_err(|_| FlowError::SchedulerStopped)
    }

    pub async fn send_pending(&self, pending: PendingFlow) -> Result<()> {
        self.send(FlowEvent::Pending(pending)).await
    }

    /// Queues a pending flow without waiting.
    ///
    /// Returns `Ok(false)` if the queue is full and the notification was
    /// dropped. The datapath reports the flow again on its next packet.
    pub fn try_send_pending(&self, pending: PendingFlow) -> Result<bool> {
        match self.tx.try_send(FlowEvent::Pending(pending)) {
            Ok(()) => Ok(true),
            Err(mpsc::error::TrySendError::Full(_)) => Ok(false),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(FlowError::SchedulerStopped),
        }
    }

    pub async fn fdb_removed(&self, fdb: FdbId) -> Result<()> {
        self.send(FlowEvent::FdbRemoved(fdb)).await
    }

    pub async fn remove(&self, key: FlowKey) -> Result<()> {
        self.send(FlowEvent::Remove(key)).await
    }

    pub async fn stats(&self) -> Result<FlowManagerStats> {
        let (reply, rx) = oneshot::channel();
        self.send(FlowEvent::Stats(reply)).await?;
        rx.await.map_err(|_| FlowError::SchedulerStopped)
    }

    pub async fn hottest(&self, n: usize) -> Result<Vec<FlowSummary>> {
        let (reply, rx) = oneshot::channel();
        self.send(FlowEvent::Hottest { n, reply }).await?;
        rx.await.map_err(|_| FlowError::SchedulerStopped)
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.send(FlowEvent::Shutdown).await
    }
}

/// A running scheduler task.
#[derive(Debug)]
pub struct FlowScheduler {
    handle: FlowHandle,
    task: JoinHandle<Result<FlowManagerStats>>,
}

impl FlowScheduler {
    /// Moves `manager` onto a new task and starts it.
    ///
    /// The first maintenance pass runs immediately, then every
    /// `update_interval_ms`.
    pub fn spawn(manager: FlowManager) -> Self {
        let (tx, rx) = mpsc::channel(manager.config().event_queue_depth);
        let task = tokio::spawn(run(manager, rx));
        Self {
            handle: FlowHandle { tx },
            task,
        }
    }

    pub fn handle(&self) -> FlowHandle {
        self.handle.clone()
    }

    /// Waits for the task to stop and returns its final counters.
    ///
    /// # Errors
    ///
    /// Returns the fatal error that ended the task, or
    /// [`FlowError::SchedulerStopped`] if it panicked.
    pub async fn join(self) -> Result<FlowManagerStats> {
        let Self { handle, task } = self;
        drop(handle);
        task.await.map_err(|_| FlowError::SchedulerStopped)?
    }
}

/// Resolves when the task stops on its own, without requesting shutdown.
///
/// This lets a caller watch for a fatal stop next to other work in a
/// `select!`. Like a [`JoinHandle`], it must not be polled again once it
/// has completed.
impl Future for FlowScheduler {
    type Output = Result<FlowManagerStats>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.task).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(FlowError::SchedulerStopped)),
            Poll::Pending => Poll::Pending,
        }
    }
}

async fn run(
    mut manager: FlowManager,
    mut rx: mpsc::Receiver<FlowEvent>,
) -> Result<FlowManagerStats> {
    let interval = manager.config().update_interval();

    let timer = time::sleep_until(Instant::now() + interval);
    tokio::pin!(timer);
    manager.init();

    loop {
        tokio::select! {
            biased;

            () = &mut timer => {
                timer.as_mut().reset(Instant::now() + interval);
                let visited = manager.run_maintenance();
                debug!(visited, "Maintenance pass complete");
            }

            event = rx.recv() => match event {
                Some(FlowEvent::Pending(pending)) => {
                    if let Err(e) = manager.admit_pending_flow(&pending) {
                        error!(error = %e, flow = %pending.key, "Cannot admit flow");
                        manager.shutdown();
                        return Err(e);
                    }
                }
                Some(FlowEvent::FdbRemoved(fdb)) => {
                    manager.invalidate_fdb(fdb);
                }
                Some(FlowEvent::Remove(key)) => {
                    manager.remove_flow_by_key(&key);
                }
                Some(FlowEvent::Stats(reply)) => {
                    let _ = reply.send(manager.stats().clone());
                }
                Some(FlowEvent::Hottest { n, reply }) => {
                    let _ = reply.send(manager.hottest(n));
                }
                Some(FlowEvent::Shutdown) | None => break,
            },
        }
    }

    manager.shutdown();
    info!("Flow scheduler stopped");
    Ok(manager.stats().clone())
}
