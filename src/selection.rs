// Per-destination user choices that survive result refreshes

use crate::types::{ActivityId, DestinationId, LodgingId};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    pub chosen_lodging: Option<LodgingId>,
    pub chosen_activities: BTreeSet<ActivityId>,
}

impl Selection {
    pub fn has_lodging(&self) -> bool {
        self.chosen_lodging.is_some()
    }
}

/// User selections for one job's results.
///
/// Entries are only ever added, never removed: re-initialising with an
/// overlapping destination set leaves existing choices untouched. A new job
/// gets a fresh store rather than a merge.
#[derive(Debug, Clone, Default)]
pub struct SelectionStore {
    selections: BTreeMap<DestinationId, Selection>,
}

impl SelectionStore {
    pub fn new() -> Self {
        Self::default()
    }

    // Add empty entries for destinations not seen before; returns how many were added
    pub fn initialize<'a>(&mut self, destinations: impl IntoIterator<Item = &'a DestinationId>) -> usize {
        let mut added = 0;
        for destination in destinations {
            if !self.selections.contains_key(destination) {
                self.selections.insert(destination.clone(), Selection::default());
                added += 1;
            }
        }
        debug!(added, total = self.selections.len(), "selection store initialised");
        added
    }

    // Single-choice: a new lodging silently replaces the previous one
    pub fn select_lodging(&mut self, destination: &DestinationId, lodging_id: LodgingId) {
        let selection = self.entry(destination);
        if let Some(previous) = selection.chosen_lodging.replace(lodging_id) {
            debug!(destination = %destination, previous = %previous, "lodging choice replaced");
        }
    }

    pub fn deselect_lodging(&mut self, destination: &DestinationId) -> Option<LodgingId> {
        self.selections
            .get_mut(destination)
            .and_then(|selection| selection.chosen_lodging.take())
    }

    // Returns true when membership actually changed
    pub fn toggle_activity(
        &mut self,
        destination: &DestinationId,
        activity_id: ActivityId,
        included: bool,
    ) -> bool {
        let activities = &mut self.entry(destination).chosen_activities;
        if included {
            activities.insert(activity_id)
        } else {
            activities.remove(&activity_id)
        }
    }

    pub fn selection(&self, destination: &DestinationId) -> Option<&Selection> {
        self.selections.get(destination)
    }

    pub fn destinations(&self) -> impl Iterator<Item = &DestinationId> {
        self.selections.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&DestinationId, &Selection)> {
        self.selections.iter()
    }

    // Destinations that currently have a lodging chosen
    pub fn selected_count(&self) -> usize {
        self.selections.values().filter(|s| s.has_lodging()).count()
    }

    pub fn len(&self) -> usize {
        self.selections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.selections.is_empty()
    }

    // Choices made for a destination the results never mentioned still get an entry
    fn entry(&mut self, destination: &DestinationId) -> &mut Selection {
        self.selections.entry(destination.clone()).or_default()
    }
}
