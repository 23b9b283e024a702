pub mod builder;
pub mod components;
pub mod prefix;
pub mod runtime;

pub use builder::{CompatibilityEnvironmentBuilder, EnvironmentReport};
pub use components::{AuxiliaryReport, AuxiliarySources, ComponentStatus};
pub use prefix::{Prefix, PrefixLock};
pub use runtime::{RuntimeResolution, RuntimeSelection, TranslationLayer};
