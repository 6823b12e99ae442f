use serde::{Deserialize, Serialize};

/// Overflow discipline applied when a write does not fit into the buffer.
///
/// The policy is fixed at construction; callers that need different
/// behaviour create a different buffer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum WritePolicy {
    /// Refuse the whole batch and leave the buffer untouched.
    Reject,
    /// Overwrite the oldest unread items to make room, preserving a
    /// rolling window of the newest data.
    #[default]
    Rotate,
    /// Discard every unread item before writing the new batch.
    Reset,
}
