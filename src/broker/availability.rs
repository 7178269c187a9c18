//! Availability tracking and broker selection
//!
//! The tracker owns the per-slot "usable" flags and the shared "internet
//! reachable" flag. Every setter is edge-triggered and reports the selection
//! before and after the change so the caller decides whether to reconcile.

use super::profile::{Slot, SlotProfiles};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which broker should be connected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Selection {
    None,
    Primary,
    Reserved,
}

impl Selection {
    pub fn slot(self) -> Option<Slot> {
        match self {
            Selection::None => None,
            Selection::Primary => Some(Slot::Primary),
            Selection::Reserved => Some(Slot::Reserved),
        }
    }

    /// Selection rule: both eligible prefers the connected slot, otherwise Primary
    pub fn resolve(primary_eligible: bool, reserved_eligible: bool, connected: Option<Slot>) -> Self {
        match (primary_eligible, reserved_eligible) {
            (true, true) => match connected {
                Some(Slot::Reserved) => Selection::Reserved,
                _ => Selection::Primary,
            },
            (true, false) => Selection::Primary,
            (false, true) => Selection::Reserved,
            (false, false) => Selection::None,
        }
    }
}

impl From<Slot> for Selection {
    fn from(slot: Slot) -> Self {
        match slot {
            Slot::Primary => Selection::Primary,
            Slot::Reserved => Selection::Reserved,
        }
    }
}

/// Outcome of one tracker input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AvailabilityUpdate {
    /// False when the input already had the requested value
    pub input_changed: bool,
    pub previous: Selection,
    pub current: Selection,
}

impl AvailabilityUpdate {
    pub fn selection_changed(&self) -> bool {
        self.previous != self.current
    }

    fn unchanged(selection: Selection) -> Self {
        Self {
            input_changed: false,
            previous: selection,
            current: selection,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct SlotAvailability {
    available: bool,
    local: bool,
    activated_at: Option<DateTime<Utc>>,
}

impl SlotAvailability {
    fn new(local: bool) -> Self {
        Self {
            available: true,
            local,
            activated_at: None,
        }
    }

    fn eligible(&self, internet_reachable: bool) -> bool {
        self.available && (internet_reachable || self.local)
    }
}

/// Per-slot availability and the derived broker selection
#[derive(Debug, Clone)]
pub struct AvailabilityTracker {
    primary: SlotAvailability,
    reserved: Option<SlotAvailability>,
    internet_reachable: bool,
    connected: Option<Slot>,
}

impl AvailabilityTracker {
    /// `reserved_local` is `None` when no reserved broker is configured
    pub fn new(primary_local: bool, reserved_local: Option<bool>) -> Self {
        Self {
            primary: SlotAvailability::new(primary_local),
            reserved: reserved_local.map(SlotAvailability::new),
            internet_reachable: false,
            connected: None,
        }
    }

    pub fn from_profiles(profiles: &SlotProfiles) -> Self {
        Self::new(
            profiles.primary.is_local(),
            profiles.reserved.as_ref().map(|profile| profile.is_local()),
        )
    }

    pub fn current_selection(&self) -> Selection {
        Selection::resolve(
            self.is_eligible(Slot::Primary),
            self.is_eligible(Slot::Reserved),
            self.connected,
        )
    }

    pub fn set_primary_available(&mut self, available: bool) -> AvailabilityUpdate {
        self.set_available(Slot::Primary, available)
    }

    /// No-op when no reserved broker is configured
    pub fn set_reserved_available(&mut self, available: bool) -> AvailabilityUpdate {
        self.set_available(Slot::Reserved, available)
    }

    pub fn set_available(&mut self, slot: Slot, available: bool) -> AvailabilityUpdate {
        let previous = self.current_selection();
        let Some(entry) = self.slot_mut(slot) else {
            return AvailabilityUpdate::unchanged(previous);
        };
        if entry.available == available {
            return AvailabilityUpdate::unchanged(previous);
        }
        entry.available = available;
        self.update_from(previous)
    }

    pub fn set_internet_reachable(&mut self, reachable: bool) -> AvailabilityUpdate {
        let previous = self.current_selection();
        if self.internet_reachable == reachable {
            return AvailabilityUpdate::unchanged(previous);
        }
        self.internet_reachable = reachable;
        self.update_from(previous)
    }

    /// Record which slot holds a live connection (tie-break input)
    pub fn set_connected(&mut self, slot: Option<Slot>) -> AvailabilityUpdate {
        let previous = self.current_selection();
        if self.connected == slot {
            return AvailabilityUpdate::unchanged(previous);
        }
        self.connected = slot;
        self.update_from(previous)
    }

    /// Force primary back to usable; the connected-slot preference is
    /// dropped only when primary is eligible to take over
    pub fn reprobe_primary(&mut self) -> AvailabilityUpdate {
        let previous = self.current_selection();
        let mut input_changed = !self.primary.available;
        self.primary.available = true;
        if self.primary.eligible(self.internet_reachable) && self.connected.is_some() {
            self.connected = None;
            input_changed = true;
        }
        AvailabilityUpdate {
            input_changed,
            previous,
            current: self.current_selection(),
        }
    }

    pub fn is_available(&self, slot: Slot) -> bool {
        self.slot(slot).is_some_and(|entry| entry.available)
    }

    pub fn is_eligible(&self, slot: Slot) -> bool {
        self.slot(slot)
            .is_some_and(|entry| entry.eligible(self.internet_reachable))
    }

    pub fn is_configured(&self, slot: Slot) -> bool {
        self.slot(slot).is_some()
    }

    pub fn internet_reachable(&self) -> bool {
        self.internet_reachable
    }

    pub fn connected(&self) -> Option<Slot> {
        self.connected
    }

    pub fn mark_activated(&mut self, slot: Slot, at: DateTime<Utc>) {
        if let Some(entry) = self.slot_mut(slot) {
            entry.activated_at = Some(at);
        }
    }

    pub fn activated_at(&self, slot: Slot) -> Option<DateTime<Utc>> {
        self.slot(slot).and_then(|entry| entry.activated_at)
    }

    fn update_from(&self, previous: Selection) -> AvailabilityUpdate {
        AvailabilityUpdate {
            input_changed: true,
            previous,
            current: self.current_selection(),
        }
    }

    fn slot(&self, slot: Slot) -> Option<&SlotAvailability> {
        match slot {
            Slot::Primary => Some(&self.primary),
            Slot::Reserved => self.reserved.as_ref(),
        }
    }

    fn slot_mut(&mut self, slot: Slot) -> Option<&mut SlotAvailability> {
        match slot {
            Slot::Primary => Some(&mut self.primary),
            Slot::Reserved => self.reserved.as_mut(),
        }
    }
}
