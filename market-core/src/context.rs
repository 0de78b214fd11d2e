//! Shared collaborators handed to every ledger

use crate::{
    confidential::{ConfidentialStore, SealedVault},
    ids::{Clock, SystemClock},
    Config, Result, Storage,
};
use std::sync::Arc;

/// Storage, clock and confidential store shared by the ledgers of one node
#[derive(Debug, Clone)]
pub struct LedgerContext {
    /// Shared RocksDB instance
    pub storage: Arc<Storage>,

    /// Time source for timestamps and ids
    pub clock: Arc<dyn Clock>,

    /// Holder of encrypted payloads
    pub confidential: Arc<dyn ConfidentialStore>,

    /// Configuration
    pub config: Config,
}

impl LedgerContext {
    /// Open storage and use the wall clock and the persisted vault
    pub fn open(config: Config) -> Result<Self> {
        config.validate()?;
        let storage = Arc::new(Storage::open(&config)?);
        let confidential = Arc::new(SealedVault::new(storage.clone()));

        Ok(Self {
            storage,
            clock: Arc::new(SystemClock),
            confidential,
            config,
        })
    }

    /// Replace the clock
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replace the confidential store
    pub fn with_confidential_store(mut self, store: Arc<dyn ConfidentialStore>) -> Self {
        self.confidential = store;
        self
    }
}
