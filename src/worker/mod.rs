//! Distributed-mode workers
//!
//! - [`StrategyWorker`] reads one spider-log partition, runs a
//!   [`CrawlingStrategy`] over it and publishes score updates.
//! - [`DbWorker`] applies spider-log events and score updates to storage and
//!   feeds new batches to downloaders.

mod db_worker;
mod states;
mod strategy;
mod strategy_worker;

pub use db_worker::{DbWorker, DbWorkerStats};
pub use states::{ScoringStream, StatesContext};
pub use strategy::{BasicStrategy, CrawlingStrategy, StrategyContext, WorkerContext};
pub use strategy_worker::StrategyWorker;
