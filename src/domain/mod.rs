//! Key enumeration model: paths, filters, walks and host batches.

pub mod cancel;
pub mod diagnostic;
pub mod filter;
pub mod hive;
pub mod hosts;
pub mod record;
pub mod store;
pub mod walk;

pub use cancel::CancellationToken;
pub use diagnostic::{
    CollectingReporter, Diagnostic, EnumerateError, LogReporter, Reporter, Severity,
};
pub use filter::{KeyFilter, matches};
pub use hive::{Hive, UnknownHive};
pub use hosts::{Enumerator, HostRecords, KeyQuery, Probe, local_machine_name, resolve_host};
pub use record::{KeyRecord, SEPARATOR, join_path, normalize_path, same_key_name};
pub use store::{Connection, Provider, RegistryKey, StoreError};
pub use walk::{WalkContext, Walker};
