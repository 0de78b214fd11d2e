//! Single-writer actor
//!
//! Every ledger serializes its mutations through one Tokio task:
//! - One logical writer per ledger, so two operations on the same record
//!   can never interleave (two concurrent `accept` calls: one wins, the
//!   other sees the new status)
//! - Each job runs to completion, including its batch commit, before the
//!   next job starts
//! - Bounded mailbox gives backpressure
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │        Ledger API (DeliveryCoordinator, ...)          │
//! │        wraps each mutation in a job                   │
//! └─────────────────────┬────────────────────────────────┘
//!                       │
//!                       │ mpsc::channel (bounded)
//!                       ▼
//! ┌──────────────────────────────────────────────────────┐
//! │               WriterActor (Single Task)               │
//! │   job(&Storage): read → check → stage → commit        │
//! │   reply via oneshot                                   │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! Reads that do not need isolation go straight to storage.

use crate::{Error, Result, Storage};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

type Job = Box<dyn FnOnce(&Storage) + Send + 'static>;

/// Message sent to the writer actor
pub enum WriterMessage {
    /// Run a job against storage
    Execute(Job),

    /// Shutdown actor
    Shutdown,
}

impl std::fmt::Debug for WriterMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WriterMessage::Execute(_) => f.write_str("Execute(..)"),
            WriterMessage::Shutdown => f.write_str("Shutdown"),
        }
    }
}

/// Actor that runs ledger mutations one at a time
#[derive(Debug)]
pub struct WriterActor {
    /// Ledger name, for logs
    name: &'static str,

    /// Storage backend
    storage: Arc<Storage>,

    /// Mailbox for incoming messages
    mailbox: mpsc::Receiver<WriterMessage>,
}

impl WriterActor {
    /// Create new actor
    pub fn new(
        name: &'static str,
        storage: Arc<Storage>,
        mailbox: mpsc::Receiver<WriterMessage>,
    ) -> Self {
        Self {
            name,
            storage,
            mailbox,
        }
    }

    /// Run the actor event loop
    pub async fn run(mut self) {
        while let Some(msg) = self.mailbox.recv().await {
            match msg {
                WriterMessage::Execute(job) => job(&self.storage),
                WriterMessage::Shutdown => break,
            }
        }

        tracing::info!(ledger = self.name, "Writer stopped");
    }
}

/// Handle for submitting jobs to the writer
#[derive(Clone)]
pub struct WriterHandle {
    name: &'static str,
    sender: mpsc::Sender<WriterMessage>,
}

impl std::fmt::Debug for WriterHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriterHandle")
            .field("name", &self.name)
            .field("closed", &self.sender.is_closed())
            .finish()
    }
}

impl WriterHandle {
    /// Run `job` on the writer and wait for its result
    pub async fn execute<T, F>(&self, job: F) -> Result<T>
    where
        F: FnOnce(&Storage) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let job: Job = Box::new(move |storage| {
            let _ = tx.send(job(storage));
        });

        self.sender
            .send(WriterMessage::Execute(job))
            .await
            .map_err(|_| Error::Concurrency(format!("{} writer mailbox closed", self.name)))?;

        rx.await
            .map_err(|_| Error::Concurrency(format!("{} writer dropped the response", self.name)))?
    }

    /// Shutdown actor (jobs already queued still run)
    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(WriterMessage::Shutdown)
            .await
            .map_err(|_| Error::Concurrency(format!("{} writer mailbox closed", self.name)))?;
        Ok(())
    }
}

/// Spawn a writer actor for one ledger
pub fn spawn_writer(name: &'static str, storage: Arc<Storage>, mailbox_capacity: usize) -> WriterHandle {
    let (tx, rx) = mpsc::channel(mailbox_capacity);
    let actor = WriterActor::new(name, storage, rx);

    tokio::spawn(async move {
        actor.run().await;
    });

    WriterHandle { name, sender: tx }
}
