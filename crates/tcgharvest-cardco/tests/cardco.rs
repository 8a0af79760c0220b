//! Co-occurrence transform over collections in a memory store

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use tcgharvest_cardco::{CooccurrenceTransform, PairCounts, ATTRIBUTES_CSV_HEADER, CSV_HEADER};
use tcgharvest_core::CancelToken;
use tcgharvest_games::magic::Deck;
use tcgharvest_games::{
    default_registry, Card, CardDesc, CardFace, Collection, CollectionTypeWrapper, Dataset,
    Description, Partition, StoredDataset,
};
use tcgharvest_store::{BlobStore, MemoryStore};

fn store_deck(store: &MemoryStore, source: &str, id: &str, main: &[(&str, i64)], side: &[(&str, i64)]) {
    let cards = |list: &[(&str, i64)]| list.iter().map(|(n, c)| CardDesc::new(*n, *c)).collect();
    let mut partitions = vec![Partition::new("Main", cards(main))];
    if !side.is_empty() {
        partitions.push(Partition::new("Sideboard", cards(side)));
    }
    let c = Collection::new(
        id,
        format!("https://decks.test/{id}"),
        CollectionTypeWrapper::new(Deck::default()),
        Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap(),
        partitions,
    );
    store
        .write(&format!("magic/{source}/{id}.json"), &c.to_json().unwrap())
        .unwrap();
}

fn datasets() -> (StoredDataset, StoredDataset) {
    let store = Arc::new(MemoryStore::new());
    let burn = [("Lightning Bolt", 4), ("Monastery Swiftspear", 2)];
    store_deck(&store, "alpha", "a1", &burn, &[("Smash to Smithereens", 3)]);
    store_deck(&store, "alpha", "a2", &burn, &[]);
    store_deck(&store, "beta", "b1", &[("Lightning Bolt", 1), ("Mountain", 20)], &[]);

    let registry = Arc::new(default_registry());
    (
        StoredDataset::new(Description::new("magic", "alpha"), store.clone(), registry.clone()),
        StoredDataset::new(Description::new("magic", "beta"), store, registry),
    )
}

#[test]
fn counts_pairs_across_datasets() {
    let (alpha, beta) = datasets();
    let sets: [&dyn Dataset; 2] = [&alpha, &beta];
    let report = CooccurrenceTransform {
        parallel: 4,
        ..Default::default()
    }
    .run(&CancelToken::new(), &sets)
    .unwrap();

    assert_eq!(report.metadata.total_collections, 3);
    assert_eq!(report.metadata.game, "magic");

    let find = |a: &str, b: &str| {
        report
            .pairs
            .iter()
            .find(|p| p.name1 == a && p.name2 == b)
            .map(|p| PairCounts {
                set: p.count_set,
                multiset: p.count_multiset,
            })
    };
    assert_eq!(
        find("Lightning Bolt", "Monastery Swiftspear"),
        Some(PairCounts { set: 2, multiset: 16 })
    );
    assert_eq!(
        find("Lightning Bolt", "Lightning Bolt"),
        Some(PairCounts { set: 0, multiset: 6 })
    );
    assert_eq!(
        find("Smash to Smithereens", "Smash to Smithereens"),
        Some(PairCounts { set: 0, multiset: 2 })
    );
    assert_eq!(
        find("Lightning Bolt", "Mountain"),
        Some(PairCounts { set: 1, multiset: 20 })
    );
    // Cards in different partitions never pair
    assert_eq!(find("Lightning Bolt", "Smash to Smithereens"), None);
}

#[test]
fn partition_allow_list_filters() {
    let (alpha, _) = datasets();
    let report = CooccurrenceTransform {
        partitions: vec!["Sideboard".into()],
        ..Default::default()
    }
    .run(&CancelToken::new(), &[&alpha])
    .unwrap();
    assert_eq!(report.pairs.len(), 1);
    assert_eq!(report.pairs[0].name1, "Smash to Smithereens");
}

#[test]
fn limit_stops_early() {
    let (alpha, beta) = datasets();
    let report = CooccurrenceTransform {
        limit: Some(2),
        parallel: 1,
        ..Default::default()
    }
    .run(&CancelToken::new(), &[&alpha, &beta])
    .unwrap();
    assert_eq!(report.metadata.total_collections, 2);
    assert!(!report.pairs.iter().any(|p| p.name2 == "Mountain"));
}

#[test]
fn writes_sorted_csv() {
    let (alpha, beta) = datasets();
    let report = CooccurrenceTransform::default()
        .run(&CancelToken::new(), &[&alpha, &beta])
        .unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("magic.csv");
    report.write_csv(&path).unwrap();
    let text = std::fs::read_to_string(&path).unwrap();
    let lines: Vec<_> = text.lines().collect();
    assert_eq!(lines[0], CSV_HEADER);
    assert_eq!(lines.len(), report.pairs.len() + 1);

    let mut sorted = lines[1..].to_vec();
    sorted.sort();
    assert_eq!(sorted, lines[1..].to_vec());
}

#[test]
fn cancelled_run_fails() {
    let (alpha, _) = datasets();
    let cancel = CancelToken::new();
    cancel.cancel();
    assert!(CooccurrenceTransform::default().run(&cancel, &[&alpha]).is_err());
}

#[test]
fn card_records_become_attributes() {
    let store = Arc::new(MemoryStore::new());
    store_deck(&store, "scry", "s1", &[("Opt", 4), ("Island", 16)], &[]);
    let desc = Description::new("magic", "scry");
    for (name, cmc, type_line) in [("Opt", 1.0, "Instant"), ("Island", 0.0, "Basic Land - Island")] {
        let card = Card::new(
            name,
            cmc,
            vec![CardFace {
                name: name.into(),
                type_line: type_line.into(),
                ..CardFace::default()
            }],
        );
        store.write(&desc.card_key(name), &card.to_json().unwrap()).unwrap();
    }

    let dataset = StoredDataset::new(desc, store, Arc::new(default_registry()));
    let report = CooccurrenceTransform {
        limit: Some(1),
        ..Default::default()
    }
    .run(&CancelToken::new(), &[&dataset])
    .unwrap();

    // Cards do not use up the collection limit
    assert_eq!(report.metadata.total_collections, 1);
    assert_eq!(report.attributes.len(), 2);
    assert_eq!(report.attributes["Island"].type_line, "Basic Land - Island");

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("attributes.csv");
    report.write_attributes_csv(&path).unwrap();
    let text = std::fs::read_to_string(&path).unwrap();
    assert_eq!(
        text.lines().collect::<Vec<_>>(),
        vec![ATTRIBUTES_CSV_HEADER, "Island,0,Basic Land - Island", "Opt,1,Instant"]
    );
}
