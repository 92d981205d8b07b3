//! Row mutation events captured by audit triggers.

use serde::{Deserialize, Serialize};

/// A row mutation that fires a capture trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureEvent {
    /// Row inserted; the shadow row holds the post-state.
    Insert,
    /// Row updated; the shadow row holds the post-state.
    Update,
    /// Row deleted; the shadow row holds the pre-state.
    Delete,
}

impl CaptureEvent {
    /// Every event, in trigger creation order.
    pub const ALL: [CaptureEvent; 3] = [CaptureEvent::Insert, CaptureEvent::Update, CaptureEvent::Delete];

    /// Value written to `operation_code`.
    pub fn operation_code(&self) -> i64 {
        match self {
            CaptureEvent::Insert => 1,
            CaptureEvent::Update => 2,
            CaptureEvent::Delete => 3,
        }
    }

    /// Trigger row alias whose values are captured.
    pub fn row_alias(&self) -> &'static str {
        match self {
            CaptureEvent::Insert | CaptureEvent::Update => "NEW",
            CaptureEvent::Delete => "OLD",
        }
    }

    /// SQL event keyword.
    pub fn as_sql(&self) -> &'static str {
        match self {
            CaptureEvent::Insert => "INSERT",
            CaptureEvent::Update => "UPDATE",
            CaptureEvent::Delete => "DELETE",
        }
    }
}

impl std::fmt::Display for CaptureEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CaptureEvent::Insert => write!(f, "insert"),
            CaptureEvent::Update => write!(f, "update"),
            CaptureEvent::Delete => write!(f, "delete"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_codes() {
        let codes: Vec<i64> = CaptureEvent::ALL.iter().map(|e| e.operation_code()).collect();
        assert_eq!(codes, vec![1, 2, 3]);
    }

    #[test]
    fn test_delete_captures_pre_state() {
        assert_eq!(CaptureEvent::Insert.row_alias(), "NEW");
        assert_eq!(CaptureEvent::Update.row_alias(), "NEW");
        assert_eq!(CaptureEvent::Delete.row_alias(), "OLD");
        assert_eq!(CaptureEvent::Delete.to_string(), "delete");
    }
}
