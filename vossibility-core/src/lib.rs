#![doc = "vossibility-core: ingestion pipeline from GitHub events to a searchable store."]

//! Two producers feed the same [`store::TransformingStore`]:
//!
//! - the live path ([`live`]), one message handler per queue message, sharing
//!   a pause gate;
//! - the sync path ([`sync`]), a sequential paginated walk of the issue
//!   history.
//!
//! Transport lives outside this crate, behind the traits of [`contract`].

pub mod blob;
pub mod contract;
pub mod error;
pub mod live;
pub mod repository;
pub mod sink;
pub mod store;
pub mod sync;
pub mod transform;

pub use blob::{Blob, EventKind, LABELS_ATTRIBUTE};
pub use contract::{BlobSink, Destination, Document, Label, PageRequest, StateFilter, Upstream};
pub use repository::Repository;
