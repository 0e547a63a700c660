use std::collections::BTreeSet;

use convert_core::{
    assign,
    region_map::{invert, ForwardMap},
    source_world::{PoliticalEntity, TitleRank},
    CharacterId, DestRegionId, ExplicitRules, NationSlotArena, NationTag, SourceRegionId, TitleId,
};
use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};

/// CK2-sized province table where most provinces map one-to-one and every
/// seventh one is split across two EU3 provinces.
fn forward_map(provinces: u32) -> ForwardMap {
    (0..provinces)
        .map(|id| {
            let mut destinations = BTreeSet::new();
            destinations.insert(DestRegionId(id));
            if id % 7 == 0 {
                destinations.insert(DestRegionId(id + provinces));
            }
            (SourceRegionId(id), destinations)
        })
        .collect()
}

fn realms(count: u32) -> Vec<PoliticalEntity> {
    (0..count)
        .map(|id| PoliticalEntity {
            id: TitleId::new(format!("d_realm_{id:04}")),
            rank: TitleRank::Duchy,
            holder: CharacterId(id),
            merged_titles: Vec::new(),
            regions: (0..(id % 13)).map(|r| SourceRegionId(id * 16 + r)).collect(),
        })
        .collect()
}

fn universe(size: usize) -> Vec<NationTag> {
    (0..size)
        .map(|idx| {
            let letter = (b'A' + (idx / 100) as u8) as char;
            NationTag::new(format!("{letter}{:02}", idx % 100))
        })
        .collect()
}

fn bench_region_inversion(c: &mut Criterion) {
    let mut group = c.benchmark_group("region_inversion");
    for &size in &[500u32, 1_500, 3_000] {
        let forward = forward_map(size);
        group.bench_with_input(BenchmarkId::new("provinces", size), &forward, |b, forward| {
            b.iter(|| invert(forward));
        });
    }
    group.finish();
}

fn bench_country_assignment(c: &mut Criterion) {
    let mut group = c.benchmark_group("country_assignment");
    let tags = universe(600);
    for &count in &[100u32, 300, 550] {
        let entities = realms(count);
        group.bench_with_input(BenchmarkId::new("realms", count), &count, |b, _| {
            b.iter_batched(
                || NationSlotArena::new(tags.iter().cloned(), 600),
                |mut arena| assign(&entities, &mut arena, &ExplicitRules::default()),
                BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

criterion_group!(mapping_benches, bench_region_inversion, bench_country_assignment);
criterion_main!(mapping_benches);
