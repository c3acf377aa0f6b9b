use core::str::FromStr;

use serde::{Deserialize, Serialize};

/// Verb half of a permission.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Create,
    Read,
    Update,
    Delete,
}

/// Noun half of a permission.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Subject {
    Organization,
    Member,
    Invitation,
    Project,
    Task,
    Subtask,
    Comment,
}

impl Action {
    pub const ALL: [Action; 4] = [Action::Create, Action::Read, Action::Update, Action::Delete];

    pub fn as_str(self) -> &'static str {
        match self {
            Action::Create => "create",
            Action::Read => "read",
            Action::Update => "update",
            Action::Delete => "delete",
        }
    }
}

impl Subject {
    pub const ALL: [Subject; 7] = [
        Subject::Organization,
        Subject::Member,
        Subject::Invitation,
        Subject::Project,
        Subject::Task,
        Subject::Subtask,
        Subject::Comment,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Subject::Organization => "organization",
            Subject::Member => "member",
            Subject::Invitation => "invitation",
            Subject::Project => "project",
            Subject::Task => "task",
            Subject::Subtask => "subtask",
            Subject::Comment => "comment",
        }
    }
}

impl FromStr for Action {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Action::ALL.into_iter().find(|a| a.as_str() == s).ok_or(())
    }
}

impl FromStr for Subject {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Subject::ALL.into_iter().find(|x| x.as_str() == s).ok_or(())
    }
}

/// One allowed operation: an (action, subject) pair.
///
/// Permissions are atomic. There is no wildcard and no prefix matching; a
/// check succeeds only on an exact pair.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Permission {
    pub action: Action,
    pub subject: Subject,
}

impl Permission {
    pub const fn new(action: Action, subject: Subject) -> Self {
        Self { action, subject }
    }

    /// Build a permission from raw string tags.
    ///
    /// Matching is exact: no trimming, no case folding. An unknown tag yields
    /// `None`, which callers must treat as "not granted".
    pub fn from_tags(action: &str, subject: &str) -> Option<Self> {
        Some(Self::new(action.parse().ok()?, subject.parse().ok()?))
    }
}

impl core::fmt::Display for Permission {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}:{}", self.action.as_str(), self.subject.as_str())
    }
}
