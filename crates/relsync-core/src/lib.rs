//! Core types and traits for the relsync commit engine.
//!
//! This crate provides the foundational abstractions shared by the
//! engine and the snapshot cache:
//!
//! - `Value` for dynamically-typed column values
//! - `ObjectId` / `ObjectState` for object identity and lifecycle
//! - `RowSnapshot` for last-known persisted column maps
//! - `EntityModel` metadata consumed (read-only) during commit
//! - `BatchDescriptor` as the abstract DML unit handed to adapters
//! - Store seams: `KeyGenerator`, `BatchExecutor`, `NodeTransaction`

pub mod descriptor;
pub mod error;
pub mod ident;
pub mod node;
pub mod schema;
pub mod snapshot;
pub mod value;

pub use descriptor::{BatchDescriptor, BatchKind, BatchRow, QualifierTemplate};
pub use error::{
    CommitError, Error, ExecutionError, OptimisticLockError, Result, RollbackStatus,
    ValidationError,
};
pub use ident::{ObjectId, ObjectState};
pub use node::{
    BatchExecutor, CommitEvent, CommitListener, DataNode, KeyGenerator, NodeConnection,
    NodeTransaction,
};
pub use schema::{
    Attribute, DeleteRule, Entity, EntityModel, FlattenedJoin, Join, LockMode, Relationship,
};
pub use snapshot::RowSnapshot;
pub use value::Value;
