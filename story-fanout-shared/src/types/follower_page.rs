//! Follower pagination types.

use serde::{Deserialize, Serialize};

use super::UserId;

/// Opaque pagination token into a follower set.
///
/// Callers must treat the contents as meaningless and only hand it back to the
/// store that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FollowerCursor(String);

impl FollowerCursor {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for FollowerCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One page of a follower set.
///
/// `next_cursor` resumes right after this page. When `done` is true there are
/// no further pages; `next_cursor` may still be set and is safe to persist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FollowerPage {
    pub followers: Vec<UserId>,
    pub next_cursor: Option<FollowerCursor>,
    pub done: bool,
}

impl FollowerPage {
    /// The terminal page of an empty (or exhausted) follower set.
    pub fn empty(cursor: Option<FollowerCursor>) -> Self {
        Self {
            followers: Vec::new(),
            next_cursor: cursor,
            done: true,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.followers.is_empty()
    }
}
