//! In-process adapters behind the domain ports.
//!
//! These back every service test, the integration suite, and the binary's
//! local mode. The store keeps full `Workload` records in a `RwLock`ed map
//! keyed by `(kind, namespace, name)` and honors the same semantics a
//! cluster-backed adapter must: NotFound on missing keys, the completed
//! precondition on delete, and targeted annotation patches.

mod clock;
mod namespace_source;
mod store;

pub use clock::ManualClock;
pub use namespace_source::InMemoryNamespaceSource;
pub use store::{InMemoryWorkloadStore, PatchRecord};
