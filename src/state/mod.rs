//! Persistent state: the channel registry and the progress ledger.
//!
//! Both live as small JSON documents under the state directory. They are
//! loaded once per invocation and rewritten atomically on every change, so
//! an interrupted run resumes from exactly what was recorded.

pub mod error;
pub mod ledger;
pub mod registry;
pub mod store;
pub mod types;

pub use error::StateError;
pub use ledger::{ProgressLedger, LEDGER_FILE};
pub use registry::{ChannelRegistry, RegistryError, REGISTRY_FILE};
pub use store::StateLock;
pub use types::{Channel, ChannelKey};
