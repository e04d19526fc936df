//! Relayer internals: payout bookkeeping, address watching and the
//! scan/confirm/submit control loop.

pub mod config;
pub mod relayer;
pub mod store;
pub mod watcher;

pub use config::{BitcoinBackend, Config, ConfigError};
pub use relayer::{IterationStats, Relayer, RelayerConfig, RelayerError, StopHandle};
pub use store::{
    MemoryPayoutStore, PayoutStore, PendingPayout, SledPayoutStore, StoreError, SubmittedPayout,
};
pub use watcher::{AddressWatcher, WatchedAddress, WatcherError};
