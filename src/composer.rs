// Turns sparse per-destination selections into persistable packages.
// Composition never fails: stale references are excluded and reported.

use crate::selection::SelectionStore;
use crate::types::{
    Activity, ActivityId, ComposedPackage, DestinationId, Lodging, LodgingId, PackageId,
    SearchResult,
};
use std::collections::BTreeMap;
use tracing::{debug, warn};

// How a lodging contributes to the package price
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PricingMode {
    // One nightly price per destination, as the upstream system prices packages
    #[default]
    PerNight,
    // Nightly price multiplied by the length of stay
    PerStay,
}

#[derive(Debug, Clone, Default)]
pub struct ComposeOptions {
    pub pricing: PricingMode,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CompositionWarning {
    // Chosen lodging no longer exists in the current result; destination skipped
    StaleLodging {
        destination: DestinationId,
        lodging_id: LodgingId,
    },
    // Chosen activities that no longer resolve; dropped from the package
    StaleActivities {
        destination: DestinationId,
        ids: Vec<ActivityId>,
    },
}

#[derive(Debug, Clone, Default)]
pub struct Composition {
    pub packages: Vec<ComposedPackage>,
    pub warnings: Vec<CompositionWarning>,
}

impl Composition {
    // No destination had a resolvable lodging chosen
    pub fn nothing_selected(&self) -> bool {
        self.packages.is_empty()
    }
}

// A destination that passed every validity gate
struct Resolved<'a> {
    destination: &'a DestinationId,
    lodging: &'a Lodging,
    activities: Vec<&'a Activity>,
}

#[derive(Debug, Clone, Default)]
pub struct PackageComposer {
    options: ComposeOptions,
}

impl PackageComposer {
    pub fn new(options: ComposeOptions) -> Self {
        Self { options }
    }

    /// One package per destination with a resolvable lodging choice.
    pub fn compose(&self, result: &SearchResult, selections: &SelectionStore) -> Composition {
        let mut warnings = Vec::new();
        let packages = self
            .resolve(result, selections, &mut warnings)
            .into_iter()
            .map(|resolved| {
                let title = format!("{}: {}", resolved.destination, resolved.lodging.display_name);
                self.build(title, std::slice::from_ref(&resolved))
            })
            .collect::<Vec<_>>();

        debug!(
            packages = packages.len(),
            warnings = warnings.len(),
            "composition finished"
        );
        Composition { packages, warnings }
    }

    /// A single itinerary package spanning every resolvable destination.
    pub fn compose_combined(&self, result: &SearchResult, selections: &SelectionStore) -> Composition {
        let mut warnings = Vec::new();
        let resolved = self.resolve(result, selections, &mut warnings);
        if resolved.is_empty() {
            return Composition {
                packages: Vec::new(),
                warnings,
            };
        }

        let title = resolved
            .iter()
            .map(|r| r.destination.as_str())
            .collect::<Vec<_>>()
            .join(" - ");
        Composition {
            packages: vec![self.build(title, &resolved)],
            warnings,
        }
    }

    fn resolve<'a>(
        &self,
        result: &'a SearchResult,
        selections: &'a SelectionStore,
        warnings: &mut Vec<CompositionWarning>,
    ) -> Vec<Resolved<'a>> {
        let mut resolved = Vec::new();

        for (destination, selection) in selections.iter() {
            let Some(lodging_id) = &selection.chosen_lodging else {
                continue;
            };

            let Some(lodging) = result.lodging(destination, lodging_id) else {
                warn!(
                    destination = %destination,
                    lodging_id = %lodging_id,
                    "chosen lodging not in current results, skipping destination"
                );
                warnings.push(CompositionWarning::StaleLodging {
                    destination: destination.clone(),
                    lodging_id: lodging_id.clone(),
                });
                continue;
            };

            let mut activities = Vec::new();
            let mut stale = Vec::new();
            for &id in &selection.chosen_activities {
                match result.activity(destination, id) {
                    Some(activity) => activities.push(activity),
                    None => stale.push(id),
                }
            }
            if !stale.is_empty() {
                debug!(destination = %destination, dropped = stale.len(), "dropping stale activity choices");
                warnings.push(CompositionWarning::StaleActivities {
                    destination: destination.clone(),
                    ids: stale,
                });
            }

            resolved.push(Resolved {
                destination,
                lodging,
                activities,
            });
        }

        resolved
    }

    fn price(&self, lodging: &Lodging) -> f64 {
        match self.options.pricing {
            PricingMode::PerNight => lodging.nightly_price,
            PricingMode::PerStay => lodging.nightly_price * f64::from(lodging.nights()),
        }
    }

    fn build(&self, title: String, resolved: &[Resolved<'_>]) -> ComposedPackage {
        let mut lodgings = BTreeMap::new();
        let mut activities = BTreeMap::new();
        let mut total_price = 0.0;

        for r in resolved {
            total_price += self.price(r.lodging);
            lodgings.insert(r.destination.clone(), r.lodging.clone());
            activities.insert(
                r.destination.clone(),
                r.activities.iter().map(|&a| a.clone()).collect::<Vec<_>>(),
            );
        }

        ComposedPackage {
            id: PackageId::generate(),
            title,
            destinations: resolved.iter().map(|r| r.destination.clone()).collect(),
            lodgings,
            activities,
            total_price,
        }
    }
}
