//! The relsync commit engine.
//!
//! Turns a session's tracked objects into a confirmed multi-node
//! transaction, in five synchronous stages:
//!
//! 1. [`classify`] buckets dirty objects by node, entity, and operation
//! 2. [`EntitySorter`] orders entities masters-first (and instances of
//!    reflexive entities along their relationship chains)
//! 3. [`resolve_permanent_ids`] fills primary keys from carried values,
//!    master propagation, or the node's key generator
//! 4. [`BatchPlanner`] groups rows into shape-identical DML descriptors
//! 5. [`CommitEngine`] executes the plans inside one transaction per
//!    node, advancing object state and the snapshot cache only after
//!    every node confirms

pub mod batch;
pub mod classify;
pub mod commit;
pub mod keys;
pub mod sort;
pub mod store;

pub use batch::{BatchPlanner, ChangeSet};
pub use classify::{NodeChangeSet, classify};
pub use commit::{CommitEngine, CommitPhase};
pub use keys::resolve_permanent_ids;
pub use sort::{EntitySorter, sort_objects};
pub use store::{ArcOp, FlattenedArc, ObjectStore, TrackedObject};
