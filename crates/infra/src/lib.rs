//! Infrastructure layer: storage, configuration and the multi-entity write
//! flows that tie the permission engine and the saga executor together.

pub mod config;
pub mod flows;
pub mod store;


pub use config::{ConfigError, CoreConfig};
pub use flows::{FlowError, Flows};
pub use store::{InMemoryStore, StoreError, StoreMembershipLookup};
