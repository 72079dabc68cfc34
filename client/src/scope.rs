//! Sync scope: a budget file and its sync group.

use std::fmt;

/// A budget file and its sync group.
///
/// Cursors and outbox entries are kept per scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Scope {
    pub file_id: String,
    pub group_id: String,
}

impl Scope {
    pub fn new(file_id: impl Into<String>, group_id: impl Into<String>) -> Self {
        Self {
            file_id: file_id.into(),
            group_id: group_id.into(),
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.file_id, self.group_id)
    }
}
