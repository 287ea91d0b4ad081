//! Lifecycle state machine for notebooks, clusters and project edge nodes.
//!
//! Every status-changing operation goes through [`UserInstanceStatus::transition`], an
//! exhaustive table of `(current status, action)` pairs. Callers never compare status
//! values by hand to decide whether an action is legal.
//!
//! ```text
//!   CREATING ──► RUNNING ──stop──► STOPPING ──► STOPPED ──start──► STARTING ──► RUNNING
//!                  │  ▲
//!       reconfigure│  │ callback
//!                  ▼  │
//!             RECONFIGURING            (any non-terminal) ──terminate──► TERMINATING ──► TERMINATED
//! ```
//!
//! Statuses reported by the cloud are applied with [`reconcile`], which ignores anything
//! it cannot parse.

use crate::types::ComputationalKind;
use serde::{Deserialize, Serialize};
use std::fmt;
use utoipa::ToSchema;

/// Status of a notebook, cluster or edge node record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum UserInstanceStatus {
    Creating,
    CreatingImage,
    Starting,
    Running,
    Stopping,
    Stopped,
    Terminating,
    Terminated,
    Failed,
    Reconfiguring,
}

/// Operation requested against a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ResourceAction {
    Create,
    Start,
    Stop,
    Terminate,
    Reconfigure,
    CreateImage,
}

/// Result of applying an action to a status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Persist the new status and dispatch the action.
    To(UserInstanceStatus),
    /// The resource is already where the action would take it; nothing to do.
    NoOp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("cannot {action} a resource with status {status}")]
pub struct TransitionError {
    pub status: UserInstanceStatus,
    pub action: ResourceAction,
}

impl UserInstanceStatus {
    pub const ALL: [UserInstanceStatus; 10] = [
        UserInstanceStatus::Creating,
        UserInstanceStatus::CreatingImage,
        UserInstanceStatus::Starting,
        UserInstanceStatus::Running,
        UserInstanceStatus::Stopping,
        UserInstanceStatus::Stopped,
        UserInstanceStatus::Terminating,
        UserInstanceStatus::Terminated,
        UserInstanceStatus::Failed,
        UserInstanceStatus::Reconfiguring,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            UserInstanceStatus::Creating => "creating",
            UserInstanceStatus::CreatingImage => "creating_image",
            UserInstanceStatus::Starting => "starting",
            UserInstanceStatus::Running => "running",
            UserInstanceStatus::Stopping => "stopping",
            UserInstanceStatus::Stopped => "stopped",
            UserInstanceStatus::Terminating => "terminating",
            UserInstanceStatus::Terminated => "terminated",
            UserInstanceStatus::Failed => "failed",
            UserInstanceStatus::Reconfiguring => "reconfiguring",
        }
    }

    /// Parse a status string as reported by the provisioning service.
    ///
    /// Case-insensitive; accepts both `creating_image` and `creating image`. Returns
    /// `None` for anything unknown.
    pub fn parse(s: &str) -> Option<UserInstanceStatus> {
        let normalized = s.trim().to_ascii_lowercase().replace([' ', '-'], "_");
        Self::ALL.into_iter().find(|status| status.as_str() == normalized)
    }

    /// A terminal record never leaves its status through a user action.
    pub fn is_terminal(&self) -> bool {
        matches!(self, UserInstanceStatus::Terminating | UserInstanceStatus::Terminated)
    }

    /// Whether a resource in this status is consuming cloud capacity and should be
    /// stopped when a budget is exhausted.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            UserInstanceStatus::Creating
                | UserInstanceStatus::CreatingImage
                | UserInstanceStatus::Starting
                | UserInstanceStatus::Running
                | UserInstanceStatus::Reconfiguring
        )
    }

    /// The exhaustive transition table.
    pub fn transition(self, action: ResourceAction) -> Result<Transition, TransitionError> {
        use ResourceAction as A;
        use UserInstanceStatus as S;

        let err = Err(TransitionError { status: self, action });
        match (self, action) {
            // Re-creating over a failed or terminated record is allowed; anything else
            // with a live record is a duplicate.
            (S::Failed | S::Terminated, A::Create) => Ok(Transition::To(S::Creating)),
            (
                S::Creating | S::CreatingImage | S::Starting | S::Running | S::Stopping | S::Stopped | S::Terminating | S::Reconfiguring,
                A::Create,
            ) => err,

            (S::Stopped, A::Start) => Ok(Transition::To(S::Starting)),
            (
                S::Creating
                | S::CreatingImage
                | S::Starting
                | S::Running
                | S::Stopping
                | S::Terminating
                | S::Terminated
                | S::Failed
                | S::Reconfiguring,
                A::Start,
            ) => err,

            (S::Running, A::Stop) => Ok(Transition::To(S::Stopping)),
            (
                S::Creating
                | S::CreatingImage
                | S::Starting
                | S::Stopping
                | S::Stopped
                | S::Terminating
                | S::Terminated
                | S::Failed
                | S::Reconfiguring,
                A::Stop,
            ) => err,

            (S::Terminating | S::Terminated, A::Terminate) => Ok(Transition::NoOp),
            (
                S::Creating | S::CreatingImage | S::Starting | S::Running | S::Stopping | S::Stopped | S::Failed | S::Reconfiguring,
                A::Terminate,
            ) => Ok(Transition::To(S::Terminating)),

            (S::Running, A::Reconfigure) => Ok(Transition::To(S::Reconfiguring)),
            (
                S::Creating
                | S::CreatingImage
                | S::Starting
                | S::Stopping
                | S::Stopped
                | S::Terminating
                | S::Terminated
                | S::Failed
                | S::Reconfiguring,
                A::Reconfigure,
            ) => err,

            (S::Running, A::CreateImage) => Ok(Transition::To(S::CreatingImage)),
            (
                S::Creating
                | S::CreatingImage
                | S::Starting
                | S::Stopping
                | S::Stopped
                | S::Terminating
                | S::Terminated
                | S::Failed
                | S::Reconfiguring,
                A::CreateImage,
            ) => err,
        }
    }
}

impl fmt::Display for UserInstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for ResourceAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ResourceAction::Create => "create",
            ResourceAction::Start => "start",
            ResourceAction::Stop => "stop",
            ResourceAction::Terminate => "terminate",
            ResourceAction::Reconfigure => "reconfigure",
            ResourceAction::CreateImage => "create image of",
        };
        f.write_str(s)
    }
}

/// Status a child cluster takes when its notebook is stopped.
///
/// Spark clusters are stopped with the notebook; cloud managed clusters cannot be
/// stopped and are terminated instead.
pub fn child_status_on_parent_stop(kind: ComputationalKind) -> UserInstanceStatus {
    match kind {
        ComputationalKind::Spark => UserInstanceStatus::Stopping,
        ComputationalKind::CloudService => UserInstanceStatus::Terminating,
    }
}

/// Statuses left untouched when a notebook stop cascades to its clusters.
pub const STOP_CASCADE_EXCLUDED: [UserInstanceStatus; 4] = [
    UserInstanceStatus::Failed,
    UserInstanceStatus::Terminated,
    UserInstanceStatus::Terminating,
    UserInstanceStatus::Stopped,
];

/// Statuses left untouched when a notebook termination cascades to its clusters.
pub const TERMINATE_CASCADE_EXCLUDED: [UserInstanceStatus; 2] = [UserInstanceStatus::Terminated, UserInstanceStatus::Terminating];

/// Decide whether a status reported by the cloud should overwrite the stored one.
///
/// Unknown strings are ignored, as are reports that match what is already stored.
pub fn reconcile(stored: UserInstanceStatus, reported: &str) -> Option<UserInstanceStatus> {
    match UserInstanceStatus::parse(reported) {
        Some(observed) if observed != stored => Some(observed),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use UserInstanceStatus as S;

    #[test]
    fn test_start_only_from_stopped() {
        for status in S::ALL {
            let result = status.transition(ResourceAction::Start);
            if status == S::Stopped {
                assert_eq!(result, Ok(Transition::To(S::Starting)));
            } else {
                assert!(result.is_err(), "start must be rejected from {status}");
            }
        }
    }

    #[test]
    fn test_stop_only_from_running() {
        for status in S::ALL {
            let result = status.transition(ResourceAction::Stop);
            if status == S::Running {
                assert_eq!(result, Ok(Transition::To(S::Stopping)));
            } else {
                assert_eq!(
                    result,
                    Err(TransitionError {
                        status,
                        action: ResourceAction::Stop
                    })
                );
            }
        }
    }

    #[test]
    fn test_terminate_is_idempotent() {
        assert_eq!(S::Terminating.transition(ResourceAction::Terminate), Ok(Transition::NoOp));
        assert_eq!(S::Terminated.transition(ResourceAction::Terminate), Ok(Transition::NoOp));
        for status in [S::Creating, S::Running, S::Stopped, S::Failed, S::Reconfiguring, S::Stopping] {
            assert_eq!(status.transition(ResourceAction::Terminate), Ok(Transition::To(S::Terminating)));
        }
    }

    #[test]
    fn test_reconfigure_and_image_require_running() {
        assert_eq!(S::Running.transition(ResourceAction::Reconfigure), Ok(Transition::To(S::Reconfiguring)));
        assert_eq!(S::Running.transition(ResourceAction::CreateImage), Ok(Transition::To(S::CreatingImage)));
        assert!(S::Stopped.transition(ResourceAction::Reconfigure).is_err());
        assert!(S::Reconfiguring.transition(ResourceAction::Reconfigure).is_err());
        assert!(S::CreatingImage.transition(ResourceAction::CreateImage).is_err());
    }

    #[test]
    fn test_create_over_dead_record() {
        assert_eq!(S::Terminated.transition(ResourceAction::Create), Ok(Transition::To(S::Creating)));
        assert_eq!(S::Failed.transition(ResourceAction::Create), Ok(Transition::To(S::Creating)));
        assert!(S::Running.transition(ResourceAction::Create).is_err());
    }

    #[test]
    fn test_parse_is_lenient_about_spelling() {
        assert_eq!(S::parse("RUNNING"), Some(S::Running));
        assert_eq!(S::parse("creating image"), Some(S::CreatingImage));
        assert_eq!(S::parse("creating_image"), Some(S::CreatingImage));
        assert_eq!(S::parse(" stopped "), Some(S::Stopped));
        assert_eq!(S::parse("rebooting"), None);
        assert_eq!(S::parse(""), None);
    }

    #[test]
    fn test_serde_names_match_as_str() {
        for status in S::ALL {
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{}\"", status.as_str()));
        }
    }

    #[test]
    fn test_reconcile() {
        assert_eq!(reconcile(S::Running, "stopped"), Some(S::Stopped));
        assert_eq!(reconcile(S::Running, "running"), None);
        assert_eq!(reconcile(S::Running, "hibernating"), None);
        assert_eq!(reconcile(S::Stopping, "terminated"), Some(S::Terminated));
    }

    #[test]
    fn test_child_status_on_parent_stop() {
        assert_eq!(child_status_on_parent_stop(ComputationalKind::Spark), S::Stopping);
        assert_eq!(child_status_on_parent_stop(ComputationalKind::CloudService), S::Terminating);
    }

    #[test]
    fn test_active_statuses() {
        let active: Vec<_> = S::ALL.into_iter().filter(|s| s.is_active()).collect();
        assert_eq!(
            active,
            vec![S::Creating, S::CreatingImage, S::Starting, S::Running, S::Reconfiguring]
        );
    }
}
