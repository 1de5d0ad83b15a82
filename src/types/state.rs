//! Link state definitions

use serde::{Deserialize, Serialize};

/// The binary presence decision for a configured link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LinkState {
    /// Device is present: visible, in range, connected if required
    Linked,
    /// Device is absent or the link requirements are not met
    Unlinked,
}

impl LinkState {
    pub fn is_linked(&self) -> bool {
        matches!(self, LinkState::Linked)
    }

    /// Get ANSI color code for terminal display
    pub fn color_code(&self) -> &'static str {
        match self {
            LinkState::Linked => "\x1b[32m",   // Green
            LinkState::Unlinked => "\x1b[31m", // Red
        }
    }

    /// Reset ANSI color
    pub fn color_reset() -> &'static str {
        "\x1b[0m"
    }

    /// Get emoji for state
    pub fn emoji(&self) -> &'static str {
        match self {
            LinkState::Linked => "🔗",
            LinkState::Unlinked => "🔒",
        }
    }
}

impl std::fmt::Display for LinkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            LinkState::Linked => "LINKED",
            LinkState::Unlinked => "UNLINKED",
        };
        write!(f, "{}", name)
    }
}
