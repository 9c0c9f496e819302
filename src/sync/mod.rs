//! Axis synchronization engine.
//!
//! The engine owns the axis store and is its only writer. Once per tick it
//! drains commands and local device samples, advances local axes by the
//! elapsed time, ingests one batch of remote reports from the link, relays
//! setpoint feedback, and broadcasts a consistent snapshot of all axes over
//! a watch channel. Consumers predict from the snapshot copy, never from the
//! live store.

pub mod engine;

pub use engine::{
    RigSnapshot, SyncCommand, SyncEngine, SyncError, SyncHandle, SyncSettings, SyncState,
};
