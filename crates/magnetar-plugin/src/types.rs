/// Code returned from a placement operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    /// The operation ran correctly and found the pod placeable
    Success,
    /// The node cannot take this pod; the reason says why
    Unschedulable,
    /// Internal plugin error. Placement fails open on this code, so the
    /// host should treat it as an admit with a logged warning.
    Error,
}

/// Result of a placement operation
#[derive(Debug, Clone)]
pub struct PlacementStatus {
    pub code: StatusCode,
    pub reason: Option<String>,
}

impl PlacementStatus {
    pub fn success() -> Self {
        Self {
            code: StatusCode::Success,
            reason: None,
        }
    }

    pub fn unschedulable(reason: impl Into<String>) -> Self {
        Self {
            code: StatusCode::Unschedulable,
            reason: Some(reason.into()),
        }
    }

    pub fn error(reason: impl Into<String>) -> Self {
        Self {
            code: StatusCode::Error,
            reason: Some(reason.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == StatusCode::Success
    }
}
