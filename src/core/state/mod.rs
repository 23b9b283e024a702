pub mod store;

pub use store::{PrefixState, StateStore, VersionRecord};
