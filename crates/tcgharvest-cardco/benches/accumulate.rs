use tcgharvest_cardco::{accumulate_partition, PairMap};
use tcgharvest_games::{CardDesc, Partition};

/// Deck-sized partition: `n` distinct cards with mixed copy counts.
fn partition(n: usize) -> Partition {
    Partition::new(
        "Main",
        (0..n)
            .map(|i| CardDesc::new(format!("Card {i:03}"), (i % 4 + 1) as i64))
            .collect(),
    )
}

#[divan::bench(args = [15, 40, 100])]
fn accumulate_one_partition(bencher: divan::Bencher, n: usize) {
    let p = partition(n);
    bencher.bench(|| {
        let mut pairs = PairMap::default();
        accumulate_partition(&mut pairs, &p);
        pairs
    });
}

#[divan::bench]
fn accumulate_thousand_decks(bencher: divan::Bencher) {
    let decks: Vec<Partition> = (0..1000).map(|_| partition(40)).collect();
    bencher.bench(|| {
        let mut pairs = PairMap::default();
        for p in &decks {
            accumulate_partition(&mut pairs, p);
        }
        pairs.len()
    });
}

fn main() {
    divan::main();
}
