//! Upwatch core: check dispatch, incident state, notification decisions and
//! webhook delivery, driven one cycle at a time.
//!
//! A cycle is one pass over all configured targets producing at most one
//! state write. Presentation layers consume the persisted
//! [`state::MonitorState`] aggregate; they are not part of this crate.

pub mod checker;
pub mod config;
pub mod cycle;
pub mod location;
pub mod maintenance;
pub mod notify;
pub mod pool;
pub mod state;
pub mod store;
pub mod validation;

pub use checker::{CheckResult, Dispatcher, Located};
pub use config::{Config, ConfigLoader, MonitorTarget};
pub use cycle::{CycleReport, Orchestrator, StatusHook};
pub use location::{LocationLookup, TraceLocation};
pub use state::MonitorState;
pub use store::{KvStore, LibsqlStore, MemoryStore};
