//! Job lifecycle tracking across a durable and an ephemeral store.

pub mod error;
pub mod keyspace;
pub mod status;
pub mod store;
pub mod tracker;

pub use error::{Result, StoreError};
pub use keyspace::ProgressKeyspace;
pub use status::{is_plain_segment, JobKind, JobRef, JobStatus};
pub use store::{DurableStatusStore, EphemeralProgressStore, InMemoryProgressStore, InMemoryStatusStore};
pub use tracker::{JobStatusTracker, StatusEntry, StatusView};
