//! Crash-consistent persistence for job records.
//!
//! One JSON document per job under a configurable directory. Writes go
//! through a temp sibling with a single retained backup generation; the
//! rename is the transaction.

pub mod error;
pub mod store;

pub use error::{StoreError, StoreResult};
pub use store::JobStore;
