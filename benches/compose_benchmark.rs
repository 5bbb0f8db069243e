use chrono::NaiveDate;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::{seq::SliceRandom, thread_rng, Rng};
use travel_package_engine::composer::{ComposeOptions, PackageComposer, PricingMode};
use travel_package_engine::selection::SelectionStore;
use travel_package_engine::types::{
    Activity, ActivityId, DestinationId, Lodging, SearchResult,
};

const LODGINGS_PER_DESTINATION: usize = 40;
const ACTIVITIES_PER_DESTINATION: usize = 25;

fn search_result(destinations: usize) -> SearchResult {
    let mut rng = thread_rng();
    let check_in = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();
    let check_out = NaiveDate::from_ymd_opt(2025, 6, 5).unwrap();
    let mut result = SearchResult::default();

    for d in 0..destinations {
        let destination = DestinationId::new(format!("city{}", d));
        let lodgings = (0..LODGINGS_PER_DESTINATION)
            .map(|i| Lodging {
                id: format!("city{}-hotel{}", d, i).as_str().into(),
                destination: destination.clone(),
                display_name: format!("Hotel {}", i),
                star_rating: rng.gen_range(1..=5),
                nightly_price: rng.gen_range(50.0..400.0),
                check_in,
                check_out,
                description: String::new(),
            })
            .collect();
        let activities = (0..ACTIVITIES_PER_DESTINATION)
            .map(|i| Activity {
                local_index: i,
                destination: destination.clone(),
                title: format!("Activity {}", i),
                description: String::new(),
                tags: Default::default(),
                activity_type: "tour".to_string(),
            })
            .collect();
        result
            .lodgings_by_destination
            .insert(destination.clone(), lodgings);
        result
            .activities_by_destination
            .insert(destination, activities);
    }
    result
}

// Pick a lodging for roughly two thirds of the destinations plus a few activities
fn random_selections(result: &SearchResult) -> SelectionStore {
    let mut rng = thread_rng();
    let mut store = SelectionStore::new();
    store.initialize(&result.destinations());

    for (destination, lodgings) in &result.lodgings_by_destination {
        if rng.gen_bool(0.66) {
            if let Some(lodging) = lodgings.choose(&mut rng) {
                store.select_lodging(destination, lodging.id.clone());
            }
            for _ in 0..3 {
                let id = ActivityId(rng.gen_range(0..ACTIVITIES_PER_DESTINATION + 2));
                store.toggle_activity(destination, id, true);
            }
        }
    }
    store
}

pub fn compose_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("package_composition");

    for destinations in [5, 50, 500].iter() {
        let result = search_result(*destinations);
        let selections = random_selections(&result);

        group.bench_with_input(
            BenchmarkId::new("per_destination", destinations),
            destinations,
            |b, _| {
                let composer = PackageComposer::default();
                b.iter(|| black_box(composer.compose(&result, &selections)));
            },
        );

        group.bench_with_input(
            BenchmarkId::new("combined_per_stay", destinations),
            destinations,
            |b, _| {
                let composer = PackageComposer::new(ComposeOptions {
                    pricing: PricingMode::PerStay,
                });
                b.iter(|| black_box(composer.compose_combined(&result, &selections)));
            },
        );
    }

    group.finish();
}

criterion_group!(benches, compose_benchmark);
criterion_main!(benches);
