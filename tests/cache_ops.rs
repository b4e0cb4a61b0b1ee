use tscache::{Cache, CacheConfig};

fn open_cache(dir: &std::path::Path) -> Cache {
    Cache::open(dir).expect("open cache")
}

#[test]
fn round_trip_returns_payload_unchanged() {
    let dir = tempfile::tempdir().expect("tempdir");
    let cache = open_cache(dir.path());
    let payload: Vec<u8> = (0..=255).collect();
    cache.set_page_data("chan1", 0, &payload, false).expect("set");
    let read = cache.get_page_data("chan1", 0).expect("get");
    assert_eq!(read.as_deref(), Some(payload.as_slice()));
}

#[test]
fn empty_page_is_memoized_not_missed() {
    let dir = tempfile::tempdir().expect("tempdir");
    let cache = open_cache(dir.path());
    cache.set_page_data("chan1", 7, b"", false).expect("set empty");

    let read = cache.get_page_data("chan1", 7).expect("get");
    assert_eq!(read.as_deref(), Some(&[][..]));
    assert!(cache.check_page("chan1", 7).expect("check"));
    assert_eq!(cache.page_has_data("chan1", 7).expect("has_data"), Some(false));
    // No payload file is created for a known-empty page.
    assert!(!dir.path().join("chan1").join("page-7.dat").exists());
}

#[test]
fn never_written_page_is_a_miss() {
    let dir = tempfile::tempdir().expect("tempdir");
    let cache = open_cache(dir.path());
    assert!(cache.get_page_data("chan1", 0).expect("get").is_none());
    assert!(!cache.check_page("chan1", 0).expect("check"));
    assert_eq!(cache.page_has_data("chan1", 0).expect("has_data"), None);
}

#[test]
fn duplicate_insert_is_idempotent() {
    let dir = tempfile::tempdir().expect("tempdir");
    let cache = open_cache(dir.path());
    cache.set_page_data("chan1", 0, b"hello", false).expect("first set");
    cache.set_page_data("chan1", 0, b"hello", false).expect("second set");
    let read = cache.get_page_data("chan1", 0).expect("get");
    assert_eq!(read.as_deref(), Some(&b"hello"[..]));
}

#[test]
fn update_refreshes_existing_row_and_inserts_missing_one() {
    let dir = tempfile::tempdir().expect("tempdir");
    let cache = open_cache(dir.path());
    cache.set_page_data("chan1", 0, b"v", false).expect("set");
    cache.set_page_data("chan1", 0, b"v", true).expect("update existing");
    // update=true on a never-seen key still records the page.
    cache.set_page_data("chan1", 1, b"w", true).expect("update new");
    assert!(cache.check_page("chan1", 1).expect("check"));
}

#[test]
fn orphaned_index_row_degrades_to_miss() {
    let dir = tempfile::tempdir().expect("tempdir");
    let cache = open_cache(dir.path());
    cache.set_page_data("chan1", 0, b"data", false).expect("set");

    // Remove the page file out-of-band while the index row still claims
    // has_data = true.
    std::fs::remove_file(dir.path().join("chan1").join("page-0.dat")).expect("remove file");

    let read = cache.get_page_data("chan1", 0).expect("get must not fail");
    assert!(read.is_none());
    assert_eq!(cache.metrics().orphan_reads, 1);
}

#[test]
fn page_size_persists_across_reopens() {
    let dir = tempfile::tempdir().expect("tempdir");
    let first = CacheConfig {
        page_size: 1024,
        ..CacheConfig::default()
    };
    {
        let cache = Cache::open_with_config(dir.path(), first).expect("open");
        cache.set_page_data("chan1", 0, b"data", false).expect("set");
        cache.close();
    }
    let conflicting = CacheConfig {
        page_size: 4096,
        ..CacheConfig::default()
    };
    let cache = Cache::open_with_config(dir.path(), conflicting).expect("reopen must not fail");
    assert_eq!(cache.page_size(), 1024);
    // The previously cached page is still readable.
    let read = cache.get_page_data("chan1", 0).expect("get");
    assert_eq!(read.as_deref(), Some(&b"data"[..]));
}

#[test]
fn clear_resets_to_empty_state() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut cache = open_cache(dir.path());

    cache.set_page_data("chan1", 0, b"hello", false).expect("set");
    assert!(cache.check_page("chan1", 0).expect("check"));
    let read = cache.get_page_data("chan1", 0).expect("get");
    assert_eq!(read.as_deref(), Some(&b"hello"[..]));

    cache.clear().expect("clear");
    assert!(!cache.check_page("chan1", 0).expect("check after clear"));
    assert!(cache.get_page_data("chan1", 0).expect("get after clear").is_none());

    // The cache is usable again after a clear.
    cache.set_page_data("chan2", 5, b"again", false).expect("set after clear");
    let read = cache.get_page_data("chan2", 5).expect("get after clear");
    assert_eq!(read.as_deref(), Some(&b"again"[..]));
}

#[test]
fn metrics_track_hits_and_misses() {
    let dir = tempfile::tempdir().expect("tempdir");
    let cache = open_cache(dir.path());
    cache.set_page_data("chan1", 0, b"data", false).expect("set");
    cache.set_page_data("chan1", 1, b"", false).expect("set empty");

    cache.get_page_data("chan1", 0).expect("hit");
    cache.get_page_data("chan1", 1).expect("known empty");
    cache.get_page_data("chan1", 2).expect("miss");

    let metrics = cache.metrics();
    assert_eq!(metrics.hits, 1);
    assert_eq!(metrics.known_empty_hits, 1);
    assert_eq!(metrics.misses, 1);
    assert_eq!(metrics.writes, 2);
    assert!(metrics.hit_rate() > 0.6 && metrics.hit_rate() < 0.7);
}

#[test]
fn channel_ids_with_separators_get_safe_directories() {
    let dir = tempfile::tempdir().expect("tempdir");
    let cache = open_cache(dir.path());
    cache
        .set_page_data("H1:GDS-CHANNEL.mean", 0, b"ts", false)
        .expect("set");
    assert!(dir.path().join("H1_GDS_CHANNEL_mean").is_dir());
    let read = cache.get_page_data("H1:GDS-CHANNEL.mean", 0).expect("get");
    assert_eq!(read.as_deref(), Some(&b"ts"[..]));
}
