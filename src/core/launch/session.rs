use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;
use uuid::Uuid;

pub const DEFAULT_TERMINATE_GRACE: Duration = Duration::from_secs(5);

/// `Created → Running → {Exited | Killed | Crashed}`; terminal states are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SessionState {
    Created,
    Running,
    Exited { code: i32 },
    /// Stopped by the supervisor.
    Killed,
    /// Ended by a signal the supervisor did not send.
    Crashed { signal: Option<i32> },
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionState::Exited { .. } | SessionState::Killed | SessionState::Crashed { .. }
        )
    }
}

/// How the supervisor tears processes down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitPolicy {
    /// Time between SIGTERM and the forced kill.
    pub terminate_grace: Duration,
}

impl Default for ExitPolicy {
    fn default() -> Self {
        Self {
            terminate_grace: DEFAULT_TERMINATE_GRACE,
        }
    }
}

/// One supervised launch. A new launch always gets a fresh session.
#[derive(Debug, Clone, Serialize)]
pub struct LaunchSession {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    pub state: SessionState,
    pub main_pid: Option<u32>,
    /// Presence-bridge outcome; `None` when no helper ran.
    pub helper: Option<SessionState>,
    pub helper_pid: Option<u32>,
    #[serde(skip)]
    pub policy: ExitPolicy,
}

impl LaunchSession {
    pub fn new(policy: ExitPolicy) -> Self {
        Self {
            id: Uuid::new_v4(),
            started_at: Utc::now(),
            state: SessionState::Created,
            main_pid: None,
            helper: None,
            helper_pid: None,
            policy,
        }
    }

    /// Only called once the OS has handed back a pid.
    pub fn mark_running(&mut self, pid: Option<u32>) {
        if self.state != SessionState::Created {
            warn!("Session {} cannot start from {:?}", self.id, self.state);
            return;
        }
        self.main_pid = pid;
        self.started_at = Utc::now();
        self.state = SessionState::Running;
    }

    pub fn finish(&mut self, state: SessionState) {
        if self.state.is_terminal() {
            warn!("Session {} already ended as {:?}", self.id, self.state);
            return;
        }
        self.state = state;
    }

    /// The game's own exit code, when it exited normally.
    pub fn exit_code(&self) -> Option<i32> {
        match self.state {
            SessionState::Exited { code } => Some(code),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states_are_final() {
        let mut session = LaunchSession::new(ExitPolicy::default());
        assert_eq!(session.state, SessionState::Created);

        session.mark_running(Some(42));
        assert_eq!(session.state, SessionState::Running);
        session.finish(SessionState::Exited { code: 1 });
        session.finish(SessionState::Killed);
        session.mark_running(Some(43));

        assert_eq!(session.state, SessionState::Exited { code: 1 });
        assert_eq!(session.exit_code(), Some(1));
        assert_eq!(session.main_pid, Some(42));
    }

    #[test]
    fn sessions_get_distinct_ids() {
        let a = LaunchSession::new(ExitPolicy::default());
        let b = LaunchSession::new(ExitPolicy::default());
        assert_ne!(a.id, b.id);
    }
}
