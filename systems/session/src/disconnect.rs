use exfil_core::{CarriedItem, Location, Timestamp};

/// Snapshot taken when a participant leaves mid-session.
#[derive(Clone, Debug, PartialEq)]
pub struct DisconnectInfo {
    location: Location,
    left_at: Timestamp,
    items: Vec<CarriedItem>,
    forfeited: bool,
}

impl DisconnectInfo {
    pub(crate) fn new(location: Location, left_at: Timestamp, items: Vec<CarriedItem>) -> Self {
        Self {
            location,
            left_at,
            items,
            forfeited: false,
        }
    }

    /// Where the participant stood when leaving.
    #[must_use]
    pub const fn location(&self) -> Location {
        self.location
    }

    /// When the participant left.
    #[must_use]
    pub const fn left_at(&self) -> Timestamp {
        self.left_at
    }

    /// Items carried when leaving.
    #[must_use]
    pub fn items(&self) -> &[CarriedItem] {
        &self.items
    }

    /// Whether the absence was already forfeited.
    #[must_use]
    pub const fn forfeited(&self) -> bool {
        self.forfeited
    }

    /// Seconds away as of `now`.
    #[must_use]
    pub const fn absent_seconds(&self, now: Timestamp) -> u64 {
        now.secs_since(self.left_at)
    }

    /// Marks the record forfeited and hands out the items to drop.
    ///
    /// Returns `None` when the record was forfeited before, so items drop
    /// at most once.
    pub(crate) fn forfeit(&mut self) -> Option<Vec<CarriedItem>> {
        if self.forfeited {
            return None;
        }
        self.forfeited = true;
        Some(std::mem::take(&mut self.items))
    }
}

/// Result of a participant coming back to a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Return {
    /// The participant had no open disconnect record.
    NotAbsent,
    /// Back inside the grace window; the participant was teleported back.
    Rejoined {
        /// Seconds spent away.
        absent_seconds: u64,
    },
    /// Away for too long; items were dropped and the participant removed.
    Forfeited,
    /// The absence was forfeited earlier; nothing happened.
    AlreadyForfeited,
}
