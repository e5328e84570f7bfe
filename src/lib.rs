//! Overtime: live sports feeds in, batched exchange limit orders out.
//!
//! Provider webhooks push game snapshots; per-game actors arbitrate score
//! changes and overturns; sport models price each outcome against live
//! exchange quotes; execution lanes enforce risk caps and idempotency and
//! place batches asynchronously.

pub mod bus;
pub mod config;
pub mod dispatch;
pub mod execution;
pub mod feed;
pub mod game;
pub mod kalshi;
pub mod models;
pub mod notify;
pub mod observers;
pub mod resolver;
pub mod strategy;

pub use bus::{BusEvent, EventBus, EventKind};
pub use game::store::GameStore;
pub use models::{GameUpdate, MatchStatus, OrderIntent, Sport};
