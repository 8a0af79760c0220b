//! Harvester over in-memory listing sources (no external network)

use std::collections::BTreeMap;
use std::io::{BufRead, BufReader, Write};
use std::net::TcpListener;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use chrono::{TimeZone, Utc};
use tcgharvest_core::config::{DiscoveryConfig, ExtractConfig, FetchConfig};
use tcgharvest_core::{CancelToken, Fetcher};
use tcgharvest_games::magic::Deck;
use tcgharvest_games::{
    default_registry, Card, CardDesc, Collection, CollectionTypeWrapper, Dataset, DedupTracker,
    Description, DiscoveryTracker, ErrorCategory, ExtractionStats, Harvester, Item, ItemKind,
    IterOption, ListingSource, Partition, SourceContext, UpdateOption,
};
use tcgharvest_store::{BlobStore, MemoryStore};

/// Listing served from a fixed page table.
///
/// Item URL names drive parsing: `bad` fails validation, `err` fails like
/// a dropped connection, `panic` panics, `messy` needs name normalization,
/// `nourl` carries an unparseable url and `dupe` lists one card twice.
struct FakeSource {
    pages: Vec<Vec<String>>,
    listed: Mutex<Vec<u32>>,
}

impl FakeSource {
    fn new(pages: &[&[&str]]) -> Self {
        Self {
            pages: pages
                .iter()
                .map(|p| p.iter().map(|id| format!("https://decks.test/d/{id}")).collect())
                .collect(),
            listed: Mutex::new(Vec::new()),
        }
    }

    fn listed(&self) -> Vec<u32> {
        self.listed.lock().unwrap().clone()
    }
}

impl ListingSource for FakeSource {
    fn description(&self) -> Description {
        Description::new("magic", "fake")
    }

    fn page_urls(&self, _ctx: &SourceContext<'_>, page: u32) -> Result<Vec<String>> {
        self.listed.lock().unwrap().push(page);
        Ok(self.pages.get(page as usize - 1).cloned().unwrap_or_default())
    }

    fn item_id(&self, url: &str) -> Option<String> {
        url.rsplit('/').next().map(str::to_string)
    }

    fn parse_item(&self, _ctx: &SourceContext<'_>, url: &str) -> Result<Collection> {
        let id = self.item_id(url).unwrap();
        if id.starts_with("err") {
            return Err(anyhow!("connection refused"));
        }
        if id.starts_with("panic") {
            panic!("parser blew up on {id}");
        }
        let card = if id.starts_with("messy") {
            "Lightning   Bolt "
        } else {
            "Lightning Bolt"
        };
        let url = if id.starts_with("nourl") { "not a url" } else { url };
        let partitions = if id.starts_with("bad") {
            Vec::new()
        } else if id.starts_with("dupe") {
            vec![Partition::new(
                "Main",
                vec![CardDesc::new("Connection Lost", 2), CardDesc::new("CONNECTION LOST", 1)],
            )]
        } else {
            vec![Partition::new(
                "Main",
                vec![CardDesc::new(card, 4), CardDesc::new("Mountain", 20)],
            )]
        };
        Ok(Collection::new(
            id,
            url,
            CollectionTypeWrapper::new(Deck {
                name: "Burn".into(),
                ..Deck::default()
            }),
            Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap(),
            partitions,
        ))
    }
}

struct Fixture {
    games: Arc<MemoryStore>,
    state: Arc<MemoryStore>,
    fetcher: Fetcher,
}

impl Fixture {
    fn new() -> Self {
        let config = FetchConfig {
            rate_limit: "none".to_string(),
            max_attempts: 1,
            base_delay_ms: 1,
            request_timeout_secs: 5,
            ..FetchConfig::default()
        };
        Self {
            games: Arc::new(MemoryStore::new()),
            state: Arc::new(MemoryStore::new()),
            fetcher: Fetcher::new(Arc::new(MemoryStore::new()), &config).unwrap(),
        }
    }

    fn harvester<S: ListingSource>(&self, source: S) -> Harvester<S> {
        Harvester::new(source, self.games.clone(), Arc::new(default_registry()))
    }

    fn extract<S: ListingSource>(&self, h: &Harvester<S>, options: &[UpdateOption]) -> ExtractionStats {
        let stats = ExtractionStats::new();
        h.extract(&CancelToken::new(), &self.fetcher, &stats, options)
            .unwrap();
        stats
    }

    fn stored(&self) -> Vec<String> {
        self.games
            .list("magic/fake/")
            .collect::<Result<Vec<_>, _>>()
            .unwrap()
    }
}

#[test]
fn failures_are_recorded_and_crawl_continues() {
    let fx = Fixture::new();
    let h = fx.harvester(FakeSource::new(&[&["d1", "d2", "bad3"], &["d4", "err5", "panic6"]]));
    let stats = fx.extract(&h, &[UpdateOption::Parallel(4)]);

    assert_eq!(
        fx.stored(),
        vec!["magic/fake/d1.json", "magic/fake/d2.json", "magic/fake/d4.json"]
    );
    assert_eq!(h.source().listed(), vec![1, 2, 3]);

    let report = stats.report();
    assert_eq!(report.successful, 3);
    assert_eq!(report.failed, 3);
    assert_eq!(report.validation_failures.get("no_partitions"), Some(&1));
    assert_eq!(report.errors_by_category.get(&ErrorCategory::Validation), Some(&1));
    assert_eq!(report.errors_by_category.get(&ErrorCategory::Network), Some(&1));
}

#[test]
fn written_records_are_canonical_and_stamped() {
    let fx = Fixture::new();
    let h = fx.harvester(FakeSource::new(&[&["messy1"]]));
    let stats = fx.extract(&h, &[]);
    assert_eq!(stats.report().normalized, 1);

    let bytes = fx.games.read("magic/fake/messy1.json").unwrap();
    let c = Collection::from_json(&bytes, &default_registry()).unwrap();
    assert_eq!(c.source.as_deref(), Some("fake"));
    assert!(c.extracted_at.is_some());
    let names: Vec<_> = c.partitions[0].cards.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["Lightning Bolt", "Mountain"]);
}

#[test]
fn existing_records_are_skipped_unless_reparse() {
    let fx = Fixture::new();
    let h = fx.harvester(FakeSource::new(&[&["d1", "d2"]]));
    fx.extract(&h, &[]);

    let again = fx.extract(&h, &[]);
    assert_eq!(again.report().skipped, 2);
    assert_eq!(again.successful(), 0);

    let reparsed = fx.extract(&h, &[UpdateOption::Reparse]);
    assert_eq!(reparsed.successful(), 2);
    assert_eq!(reparsed.report().skipped, 0);
}

#[test]
fn item_only_urls_bypass_listing() {
    let fx = Fixture::new();
    let h = fx.harvester(FakeSource::new(&[&["d1", "d2"]]));
    let stats = fx.extract(
        &h,
        &[UpdateOption::ItemOnlyUrls(vec!["https://decks.test/d/x9".into()])],
    );
    assert_eq!(stats.successful(), 1);
    assert!(h.source().listed().is_empty());
    assert_eq!(fx.stored(), vec!["magic/fake/x9.json"]);
}

#[test]
fn scroll_bounds_limit_pages() {
    let fx = Fixture::new();
    let h = fx.harvester(FakeSource::new(&[&["d1"], &["d2"], &["d3"]]));
    fx.extract(&h, &[UpdateOption::ScrollStart(2), UpdateOption::ScrollLimit(1)]);
    assert_eq!(h.source().listed(), vec![2]);
    assert_eq!(fx.stored(), vec!["magic/fake/d2.json"]);
}

#[test]
fn item_limit_is_exact_under_parallelism() {
    let fx = Fixture::new();
    let ids = ["a1", "a2", "a3", "a4", "a5", "a6", "a7", "a8"];
    let h = fx.harvester(FakeSource::new(&[&ids, &ids]));
    let stats = fx.extract(&h, &[UpdateOption::ItemLimit(3), UpdateOption::Parallel(8)]);
    assert_eq!(stats.successful(), 3);
    assert_eq!(fx.stored().len(), 3);
    assert_eq!(h.source().listed(), vec![1]);
}

#[test]
fn negative_scroll_start_is_rejected() {
    let fx = Fixture::new();
    let h = fx.harvester(FakeSource::new(&[&["d1"]]));
    let err = h
        .extract(
            &CancelToken::new(),
            &fx.fetcher,
            &ExtractionStats::new(),
            &[UpdateOption::ScrollStart(-1)],
        )
        .unwrap_err();
    assert!(err.to_string().contains("non-negative"), "{err}");
    assert!(fx.stored().is_empty());
}

#[test]
fn cancelled_extract_reports_cancellation() {
    let fx = Fixture::new();
    let h = fx.harvester(FakeSource::new(&[&["d1"]]));
    let cancel = CancelToken::new();
    cancel.cancel();
    let result = h.extract(&cancel, &fx.fetcher, &ExtractionStats::new(), &[]);
    assert!(result.is_err());
    assert!(fx.stored().is_empty());
}

#[test]
fn discovery_stops_in_known_territory() {
    let fx = Fixture::new();
    let tracker = Arc::new(DiscoveryTracker::new(
        fx.state.clone(),
        DiscoveryConfig {
            max_consecutive_known: 1,
            ..DiscoveryConfig::default()
        },
    ));
    let pages: &[&[&str]] = &[&["d1", "d2"], &["d3"], &["d4"]];
    let h = fx
        .harvester(FakeSource::new(pages))
        .with_discovery(tracker.clone());
    fx.extract(&h, &[]);
    assert_eq!(h.source().listed(), vec![1, 2, 3, 4]);

    let state = tracker.load("fake").unwrap();
    assert_eq!(state.last_page_seen, 3);
    assert_eq!(state.last_item_seen.as_deref(), Some("https://decks.test/d/d1"));
    assert_eq!(state.items_since_start, 4);

    // Next run resumes at max(1, 3 - 3) and stops once d1 shows up again
    let h = fx
        .harvester(FakeSource::new(pages))
        .with_discovery(tracker);
    fx.extract(&h, &[]);
    assert_eq!(h.source().listed(), vec![1]);
}

#[test]
fn duplicates_across_sources_are_counted() {
    let fx = Fixture::new();
    let dedup = Arc::new(DedupTracker::open(fx.state.clone(), "magic").unwrap());
    let h = fx
        .harvester(FakeSource::new(&[&["d1", "d2"]]))
        .with_dedup(dedup.clone());
    let stats = fx.extract(&h, &[UpdateOption::Parallel(1)]);

    // Both decks share a card list
    assert_eq!(stats.report().duplicates, 1);
    assert_eq!(dedup.len(), 1);
    assert!(fx.state.exists("magic/.deduplication.json").unwrap());
}

#[test]
fn iter_items_yields_stored_collections() {
    let fx = Fixture::new();
    let h = fx.harvester(FakeSource::new(&[&["d1", "d2", "d3"]]));
    fx.extract(&h, &[]);

    let seen = Mutex::new(BTreeMap::new());
    h.iter_items(
        &CancelToken::new(),
        &|item: Item| {
            let c = item.into_collection().unwrap();
            seen.lock().unwrap().insert(c.id.clone(), c.card_count());
            Ok(())
        },
        &[],
    )
    .unwrap();
    let seen = seen.into_inner().unwrap();
    assert_eq!(seen.len(), 3);
    assert_eq!(seen["d2"], 24);
}

/// Serve `body` for every request on a loopback port.
fn serve(body: &'static str) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    std::thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(mut stream) = stream else { break };
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut line = String::new();
            while reader.read_line(&mut line).is_ok_and(|n| n > 0) {
                if line == "\r\n" {
                    break;
                }
                line.clear();
            }
            let _ = write!(
                stream,
                "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
        }
    });
    format!("http://{addr}")
}

/// Parses a decklist of `count name` lines fetched from the item URL.
struct HttpSource {
    base: String,
}

impl ListingSource for HttpSource {
    fn description(&self) -> Description {
        Description::new("magic", "fake")
    }

    fn page_urls(&self, _ctx: &SourceContext<'_>, page: u32) -> Result<Vec<String>> {
        Ok(match page {
            1 => vec![format!("{}/deck/7", self.base)],
            _ => Vec::new(),
        })
    }

    fn item_id(&self, url: &str) -> Option<String> {
        url.rsplit('/').next().map(str::to_string)
    }

    fn parse_item(&self, ctx: &SourceContext<'_>, url: &str) -> Result<Collection> {
        let page = ctx.get(url)?;
        let cards = page
            .text()
            .lines()
            .filter_map(|line| {
                let (count, name) = line.split_once(' ')?;
                Some(CardDesc::new(name, count.parse().ok()?))
            })
            .collect();
        Ok(Collection::new(
            "7",
            url,
            CollectionTypeWrapper::new(Deck::default()),
            Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap(),
            vec![Partition::new("Main", cards)],
        ))
    }
}

#[test]
fn plugin_fetches_are_cached_and_counted() {
    let fx = Fixture::new();
    let base = serve("4 Lightning Bolt\n2 Monastery Swiftspear\n");
    let h = fx.harvester(HttpSource { base });

    let first = fx.extract(&h, &[]);
    assert_eq!(first.successful(), 1);
    assert_eq!(first.report().cache_misses, 1);

    let second = fx.extract(&h, &[UpdateOption::Reparse]);
    assert_eq!(second.report().cache_hits, 1);
    assert_eq!(second.hit_rate(), 1.0);

    let bytes = fx.games.read("magic/fake/7.json").unwrap();
    let c = Collection::from_json(&bytes, &default_registry()).unwrap();
    assert_eq!(c.card_count(), 6);
}

#[test]
fn harvests_into_filesystem_store() {
    let dir = tempfile::tempdir().unwrap();
    let games = Arc::new(tcgharvest_store::FsStore::new(dir.path()).unwrap());
    let fx = Fixture::new();
    let h = Harvester::new(
        FakeSource::new(&[&["d1", "bad2"]]),
        games.clone(),
        Arc::new(default_registry()),
    );
    let stats = fx.extract(&h, &[]);
    assert_eq!(stats.successful(), 1);

    assert!(dir.path().join("magic/fake/d1.json").is_file());
    assert!(!dir.path().join("magic/fake/bad2.json").exists());
    assert_eq!(games.cleanup_tmp().unwrap(), 0);
}

#[test]
fn progress_line_does_not_change_results() {
    let fx = Fixture::new();
    let progress = Arc::new(tcgharvest_core::ProgressContext::with_tty(false));
    let h = fx
        .harvester(FakeSource::new(&[&["d1", "d2"]]))
        .with_progress(progress);
    let stats = fx.extract(&h, &[]);
    assert_eq!(stats.successful(), 2);
}

#[test]
fn invalid_collections_count_as_validation_errors() {
    let fx = Fixture::new();
    let h = fx.harvester(FakeSource::new(&[]));
    let stats = fx.extract(
        &h,
        &[UpdateOption::ItemOnlyUrls(vec![
            "https://decks.test/d/nourl1".into(),
            "https://decks.test/d/dupe2".into(),
        ])],
    );

    let report = stats.report();
    assert_eq!(report.failed, 2);
    assert_eq!(report.validation_failures.get("invalid_url"), Some(&1));
    assert_eq!(report.validation_failures.get("duplicate_card"), Some(&1));
    // Error text mentions "parse" and "connection"; neither decides the category
    assert_eq!(report.errors_by_category.get(&ErrorCategory::Validation), Some(&2));
    assert!(!report.errors_by_category.contains_key(&ErrorCategory::Parsing));
    assert!(!report.errors_by_category.contains_key(&ErrorCategory::Network));
    assert!(fx.stored().is_empty());
}

#[test]
fn dedup_index_names_only_stored_records() {
    let fx = Fixture::new();
    let dedup = Arc::new(DedupTracker::open(fx.state.clone(), "magic").unwrap());
    let ids = ["s1", "s2", "s3", "s4", "s5", "s6", "s7", "s8"];
    let h = fx
        .harvester(FakeSource::new(&[&ids]))
        .with_dedup(dedup.clone());
    let stats = fx.extract(&h, &[UpdateOption::ItemLimit(1), UpdateOption::Parallel(8)]);

    let stored = fx.stored();
    assert_eq!(stored.len(), 1);
    let report = stats.report();
    assert_eq!(report.successful, 1);
    assert_eq!(report.duplicates, 0);
    assert!(report.over_limit <= ids.len() - 1);
    assert_eq!(dedup.len(), 1);

    // The canonical record of the shared signature is the one that was written
    let bytes = fx.games.read(&stored[0]).unwrap();
    let mut other = Collection::from_json(&bytes, &default_registry()).unwrap();
    let written_id = other.id.clone();
    other.id = "elsewhere".into();
    let outcome = dedup.find_duplicate(&other);
    assert!(outcome.duplicate);
    assert_eq!(outcome.canonical_id, written_id);
}

#[test]
fn configured_worker_counts_are_used() {
    let fx = Fixture::new();
    let h = fx
        .harvester(FakeSource::new(&[&["d1"]]))
        .with_extract_config(ExtractConfig {
            parallel: 2,
            iter_parallel: 2048,
        });
    assert_eq!(fx.extract(&h, &[]).successful(), 1);

    // The configured iteration default is out of range unless overridden
    let ignore = |_: Item| -> Result<()> { Ok(()) };
    let err = h.iter_items(&CancelToken::new(), &ignore, &[]).unwrap_err();
    assert!(err.to_string().contains("2048"), "{err}");
    h.iter_items(&CancelToken::new(), &ignore, &[IterOption::Parallel(4)])
        .unwrap();
}

#[test]
fn cards_are_filtered_by_kind() {
    let fx = Fixture::new();
    let h = fx.harvester(FakeSource::new(&[&["d1", "d2"]]));
    fx.extract(&h, &[]);
    let desc = h.description();
    let bolt = Card::new("Lightning Bolt", 1.0, Vec::new());
    fx.games
        .write(&desc.card_key(&bolt.name), &bolt.to_json().unwrap())
        .unwrap();

    let count = |options: &[IterOption]| {
        let kinds = Mutex::new(Vec::new());
        h.iter_items(
            &CancelToken::new(),
            &|item: Item| {
                kinds.lock().unwrap().push(item.kind());
                Ok(())
            },
            options,
        )
        .unwrap();
        let kinds = kinds.into_inner().unwrap();
        (
            kinds.iter().filter(|k| **k == ItemKind::Collection).count(),
            kinds.iter().filter(|k| **k == ItemKind::Card).count(),
        )
    };
    assert_eq!(count(&[]), (2, 1));
    assert_eq!(count(&[IterOption::FilterType(ItemKind::Collection)]), (2, 0));
    assert_eq!(count(&[IterOption::FilterType(ItemKind::Card)]), (0, 1));
}
