//! # Tally Engine
//!
//! Deterministic convergence core for an offline-first budgeting app.
//!
//! Every device keeps a full copy of the budget. Edits are recorded as
//! timestamped messages, exchanged through a relay server, and merged cell by
//! cell so that all devices end up with the same data regardless of the order
//! in which they saw each other's changes.
//!
//! ## Design Principles
//!
//! - **No IO**: the engine knows nothing about databases or networks
//! - **Deterministic**: the same messages always produce the same state
//! - **Pluggable storage**: merges write through the [`CellStore`] trait
//!
//! ## Core Concepts
//!
//! ### Values
//!
//! A cell holds a [`Value`]: null, a number, or text. On the wire it is a
//! tagged string (`0:`, `N:42`, `S:hello`).
//!
//! ### Timestamps and the clock
//!
//! A [`Timestamp`] is `(millis, counter, node)` with a fixed-width text form
//! whose lexical order equals its logical order. The [`HybridLogicalClock`]
//! issues strictly increasing timestamps per node and absorbs remote ones.
//!
//! ### Messages
//!
//! A [`Message`] assigns one value to one cell `(dataset, row, column)` at a
//! timestamp. Batches travel inside an [`Envelope`] encoded by [`wire`].
//!
//! ### Merge
//!
//! The [`MergeEngine`] applies messages under last-writer-wins with a clock
//! per cell, validating each target against the [`SchemaRegistry`].
//!
//! ## Quick Start
//!
//! ```rust
//! use tally_engine::{
//!     HybridLogicalClock, ManualClock, MemoryStore, MergeEngine, Mutation,
//!     SchemaRegistry, Value, CellKey,
//! };
//! use std::sync::Arc;
//!
//! let clock = HybridLogicalClock::with_wall_clock(
//!     "7B3F00C1D2E4A9F0",
//!     Arc::new(ManualClock::new(1_706_745_600_000)),
//! )
//! .unwrap();
//!
//! let schema = SchemaRegistry::finance();
//! let engine = MergeEngine::new(&schema);
//! let mut store = MemoryStore::new();
//!
//! let message = Mutation::new("accounts", "acct-1", "name", "Checking")
//!     .stamp(clock.now().unwrap());
//! engine.apply(&mut store, &message).unwrap();
//!
//! let cell = CellKey::new("accounts", "acct-1", "name");
//! assert_eq!(store.value(&cell), Some(&Value::Text("Checking".into())));
//! ```

pub mod clock;
pub mod error;
pub mod merge;
pub mod message;
pub mod schema;
pub mod store;
pub mod timestamp;
pub mod value;
pub mod wire;

// Re-export main types at crate root
pub use clock::{HybridLogicalClock, ManualClock, SystemClock, WallClock, DEFAULT_MAX_DRIFT_MS};
pub use error::Error;
pub use merge::{
    BatchReport, CellStore, CellWrite, DiscardReason, MergeEngine, MergeOutcome, MergePlan,
};
pub use message::{CellKey, Message, Mutation, LOCAL_ONLY_DATASET};
pub use schema::{DatasetSchema, FieldDef, FieldType, SchemaRegistry, ID_COLUMN};
pub use store::{MemoryStore, Row, Table};
pub use timestamp::Timestamp;
pub use value::Value;
pub use wire::Envelope;

/// Type aliases for clarity
pub type DatasetName = String;
pub type RowId = String;
pub type ColumnName = String;
pub type NodeId = String;
