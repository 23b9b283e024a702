pub mod compare;
pub mod manifest;
pub mod resolver;

pub use compare::{compare_versions, game_version_matches};
pub use manifest::{ModFile, VersionDocument};
pub use resolver::{VersionDecision, VersionResolver};
