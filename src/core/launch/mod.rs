pub mod plan;
pub mod session;
pub mod supervisor;

pub use plan::{build_plan, CommandSpec, LaunchPlan};
pub use session::{ExitPolicy, LaunchSession, SessionState};
pub use supervisor::ProcessSupervisor;
