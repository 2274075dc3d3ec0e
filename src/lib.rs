//! idlesync - idle detection shared across the tabs of one session.
//!
//! Each tab runs a [`TabEngine`] that turns raw input into a two-stage idle
//! countdown (prompt, then idle) and counts active and idle seconds. Tabs
//! talk only through a [`SharedStore`]: they elect one leader that owns the
//! canonical countdown and publishes it, while the others mirror it.

pub mod clock;
pub mod config;
pub mod coordination;
pub mod engine;
pub mod error;
pub mod idle;
pub mod logging;
pub mod runtime;
pub mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{Config, EngineConfig};
pub use coordination::IdleSnapshot;
pub use engine::{SyncStatus, TabEngine, TabEvent, TabInstance};
pub use error::{ConfigError, StoreError};
pub use idle::{ActivityEvent, ActivityKind, IdleCallbacks, IdleEvent, IdleState};
pub use runtime::{TabHandle, TabRuntime};
pub use store::{FileStore, MemoryStore, SharedStore, StoreChange};
