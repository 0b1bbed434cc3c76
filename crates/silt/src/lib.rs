//! Document-oriented persistence over PostgreSQL.
//!
//! silt stores JSON documents with optimistic-concurrency revision
//! control, routes them into profile-specific sidecar tables
//! (associations, directory entries, events, attachments), and answers a
//! closed family of indexed view queries. Typed records cross the
//! boundary through [`ObjectStore`], serialized with the `silt-wire`
//! codec's JSON bridge and resolved through its type registry.
//!
//! # Layers
//!
//! - [`Datastore`] — database/table lifecycle, raw document CRUD with a
//!   revision guard, attachments, view execution
//! - [`View`] — the query planner: named view shapes compiled to
//!   parameterized SQL
//! - [`ObjectStore`] — typed records, association traversal, resource
//!   finders
//! - [`StatementTracer`] — bounded ring of executed statements
//!
//! Concurrency model: cooperative async tasks over one bounded connection
//! pool; each task holds at most one cursor lease (transaction) at a
//! time. The revision check on update is the externally visible ordering
//! guarantee.

mod config;
mod error;
mod objects;
mod pool;
mod profile;
mod sql;
mod store;
mod tracer;
mod views;

pub use config::{DatastoreConfig, Profile};
pub use error::{Error, Result};
pub use objects::{AnySide, Found, ObjectStore, ResourceQuery};
pub use profile::{TableKind, dispatch};
pub use sql::{BuiltQuery, SqlValue};
pub use store::{
    AttachmentData, AttachmentInfo, Datastore, Doc, DocKind, DocRef, get_unique_id,
};
pub use tracer::{DEFAULT_MAX_ENTRIES, StatementTracer, TraceEntry};
pub use views::{AVAILABILITY_STATES, View, ViewFilter, ViewRow};
