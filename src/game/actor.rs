//! Single-writer game actors.
//!
//! Each game's state is owned by one tokio task draining a bounded mailbox
//! of closures. All reads and mutations go through `send`, so no lock ever
//! guards the `GameContext` itself. Senders never block: a full mailbox
//! drops the item and bumps a counter.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error};

use crate::game::context::GameContext;
use crate::models::Sport;

/// Items dropped because a mailbox was full.
pub static MAILBOX_DROPPED: AtomicU64 = AtomicU64::new(0);
/// Jobs that panicked inside an actor (the actor keeps running).
pub static JOB_PANICS: AtomicU64 = AtomicU64::new(0);

pub const MAILBOX_CAPACITY: usize = 256;

type Job = Box<dyn FnOnce(&mut GameContext) + Send + 'static>;

enum MailboxItem {
    Job(Job),
    Close,
}

/// Handle to one game's mailbox. Cheap to clone via `Arc`; the identity
/// fields are duplicated here so the store can index actors without
/// touching the context.
pub struct GameActor {
    pub eid: String,
    pub sport: Sport,
    pub home_norm: String,
    pub away_norm: String,
    tickers: Vec<String>,
    tx: mpsc::Sender<MailboxItem>,
}

impl GameActor {
    /// Move the context into its consumer task and return the handle.
    pub fn spawn(ctx: GameContext) -> Arc<Self> {
        Self::spawn_with_capacity(ctx, MAILBOX_CAPACITY)
    }

    pub fn spawn_with_capacity(mut ctx: GameContext, capacity: usize) -> Arc<Self> {
        let (tx, mut rx) = mpsc::channel::<MailboxItem>(capacity);
        let actor = Arc::new(Self {
            eid: ctx.eid.clone(),
            sport: ctx.sport,
            home_norm: ctx.home_norm.clone(),
            away_norm: ctx.away_norm.clone(),
            tickers: ctx.tickers.all(),
            tx,
        });

        let eid = actor.eid.clone();
        tokio::spawn(async move {
            while let Some(item) = rx.recv().await {
                match item {
                    MailboxItem::Job(job) => {
                        let outcome =
                            std::panic::catch_unwind(AssertUnwindSafe(|| job(&mut ctx)));
                        if outcome.is_err() {
                            JOB_PANICS.fetch_add(1, Ordering::Relaxed);
                            error!(eid = %ctx.eid, "actor job panicked; continuing");
                        }
                    }
                    MailboxItem::Close => break,
                }
            }
            debug!(eid = %eid, "actor mailbox closed");
        });

        actor
    }

    /// Enqueue a unit of work. Returns false when the mailbox is full (the
    /// item is dropped and counted) or the actor already closed.
    pub fn send(&self, job: impl FnOnce(&mut GameContext) + Send + 'static) -> bool {
        match self.tx.try_send(MailboxItem::Job(Box::new(job))) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                MAILBOX_DROPPED.fetch_add(1, Ordering::Relaxed);
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Enqueue work that must not be dropped (batch-order responses).
    /// Awaits mailbox capacity instead of dropping; only callable off the
    /// actor's own task.
    pub async fn send_critical(
        &self,
        job: impl FnOnce(&mut GameContext) + Send + 'static,
    ) -> bool {
        self.tx.send(MailboxItem::Job(Box::new(job))).await.is_ok()
    }

    /// Read a value out of the context via a short mailbox round-trip.
    /// Returns None when the mailbox is full or the actor is closed.
    pub async fn read<T, F>(&self, f: F) -> Option<T>
    where
        T: Send + 'static,
        F: FnOnce(&GameContext) -> T + Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        if !self.send(move |ctx| {
            let _ = reply_tx.send(f(ctx));
        }) {
            return None;
        }
        reply_rx.await.ok()
    }

    /// Signal terminal shutdown. Jobs already queued still run; later sends
    /// are dropped.
    pub fn close(&self) {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let _ = tx.send(MailboxItem::Close).await;
        });
    }

    /// Outcome tickers this actor was resolved to at creation.
    pub fn tickers(&self) -> &[String] {
        &self.tickers
    }
}
