//! Output structures: transitions and link status snapshots

use serde::{Deserialize, Serialize};

use crate::types::{DeviceId, LinkId, LinkState, ReasonCode, Timestamp};

/// Emitted only when a link's decision actually changes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkTransition {
    pub link: LinkId,
    pub old: LinkState,
    pub new: LinkState,
    pub reason: ReasonCode,
    /// Distance estimate behind the decision, if the device was visible
    pub distance: Option<f64>,
    pub at: Timestamp,
}

impl LinkTransition {
    /// Linked → Unlinked, the transition that triggers locking
    pub fn is_unlink(&self) -> bool {
        self.old == LinkState::Linked && self.new == LinkState::Unlinked
    }

    /// Format for terminal display (with colors)
    pub fn to_terminal_string(&self) -> String {
        let color = self.new.color_code();
        let reset = LinkState::color_reset();

        format!(
            "{}{} {} | {} → {} | distance={} | {}{}",
            color,
            self.new.emoji(),
            self.link,
            self.old,
            self.new,
            format_distance(self.distance),
            self.reason.code(),
            reset
        )
    }

    /// Format for parseable output (no colors)
    pub fn to_parseable_string(&self) -> String {
        format!(
            "link={} | old={} | new={} | distance={} | reason={}",
            self.link,
            self.old,
            self.new,
            format_distance(self.distance),
            self.reason.code()
        )
    }
}

/// Read-only snapshot of one link for observers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkStatus {
    pub link: LinkId,
    pub device: DeviceId,
    pub state: LinkState,
    pub reason: ReasonCode,
    pub distance: Option<f64>,
    pub require_connection: bool,
    pub zone_active: bool,
    pub samples: usize,
    pub last_evaluated: Option<Timestamp>,
}

fn format_distance(distance: Option<f64>) -> String {
    match distance {
        Some(d) if d < 10.0 => format!("{:.1}m", d),
        Some(d) => format!("{:.0}m", d),
        None => "-".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_parseable_string() {
        let transition = LinkTransition {
            link: LinkId::from("phone"),
            old: LinkState::Linked,
            new: LinkState::Unlinked,
            reason: ReasonCode::L002_OUT_OF_RANGE,
            distance: Some(4.31),
            at: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
        };
        assert!(transition.is_unlink());
        assert_eq!(
            transition.to_parseable_string(),
            "link=phone | old=LINKED | new=UNLINKED | distance=4.3m | reason=L002_OUT_OF_RANGE"
        );
    }
}
