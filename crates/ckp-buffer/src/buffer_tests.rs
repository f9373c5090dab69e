use super::*;
use chrono::{Duration as ChronoDuration, TimeZone};
use ckp_core::{EnhancedFields, EntryType, Importance, Source};
use proptest::prelude::*;
use tempfile::tempdir;

fn buffer_in(dir: &Path) -> SessionBuffer {
    SessionBuffer::new(dir.join("sessions"), dir.join("context.db"))
}

#[test]
fn test_append_creates_session_lazily() {
    let tmp = tempdir().unwrap();
    let buffer = buffer_in(tmp.path());
    assert!(!buffer.session_dir("s1").exists());
    assert!(!buffer.exists("s1"));

    assert!(buffer.append("s1", &Record::new(EntryType::Learning, "first")).unwrap());
    assert!(buffer.exists("s1"));
    assert!(buffer.buffer_path("s1").is_file());
    assert_eq!(buffer.count("s1").unwrap(), 1);
}

#[test]
fn test_append_rejects_invalid_input_without_side_effects() {
    let tmp = tempdir().unwrap();
    let buffer = buffer_in(tmp.path());

    assert!(!buffer.append("", &Record::new(EntryType::Learning, "x")).unwrap());
    assert!(!buffer.append("../escape", &Record::new(EntryType::Learning, "x")).unwrap());
    assert!(!buffer.append("s1", &Record::new(EntryType::Learning, "  ")).unwrap());

    assert!(!buffer.sessions_dir().exists());
    assert!(buffer.read("s1").unwrap().is_empty());
}

#[test]
fn test_append_many_skips_invalid() {
    let tmp = tempdir().unwrap();
    let buffer = buffer_in(tmp.path());
    let records = vec![
        Record::new(EntryType::Learning, "a"),
        Record::new(EntryType::Learning, ""),
        Record::new(EntryType::Decision, "b"),
    ];
    assert_eq!(buffer.append_many("s1", &records).unwrap(), 2);
    assert_eq!(buffer.append_many("s1", &[]).unwrap(), 0);

    let contents: Vec<_> = buffer
        .read("s1")
        .unwrap()
        .into_iter()
        .map(|r| r.content)
        .collect();
    assert_eq!(contents, vec!["a", "b"]);
}

#[test]
fn test_read_skips_malformed_and_blank_lines() {
    let tmp = tempdir().unwrap();
    let buffer = buffer_in(tmp.path());
    buffer
        .append("s1", &Record::new(EntryType::Learning, "good"))
        .unwrap();

    let mut file = OpenOptions::new()
        .append(true)
        .open(buffer.buffer_path("s1"))
        .unwrap();
    writeln!(file, "not json").unwrap();
    writeln!(file).unwrap();
    writeln!(file, r#"{{"entry_type":"mystery","content":"x"}}"#).unwrap();
    writeln!(file, r#"{{"entry_type":"learning"}}"#).unwrap();
    writeln!(file, r#"{{"entry_type":"decision","content":"also good"}}"#).unwrap();

    let records = buffer.read("s1").unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[1].content, "also good");
    assert_eq!(records[1].importance, Importance::Medium);
}

#[test]
fn test_read_missing_session_is_empty() {
    let tmp = tempdir().unwrap();
    let buffer = buffer_in(tmp.path());
    assert!(buffer.read("nobody").unwrap().is_empty());
    assert!(buffer.read("").unwrap().is_empty());
    assert_eq!(buffer.count("nobody").unwrap(), 0);
}

#[test]
fn test_clear_is_idempotent() {
    let tmp = tempdir().unwrap();
    let buffer = buffer_in(tmp.path());
    buffer
        .append("s1", &Record::new(EntryType::Learning, "x"))
        .unwrap();

    assert!(buffer.clear("s1").unwrap());
    assert!(buffer.clear("s1").unwrap());
    assert!(buffer.clear("never-existed").unwrap());
    assert!(!buffer.clear("").unwrap());
    assert_eq!(buffer.count("s1").unwrap(), 0);
}

#[test]
fn test_clear_leaves_snapshot_alone() {
    let tmp = tempdir().unwrap();
    let buffer = buffer_in(tmp.path());
    buffer
        .append("s1", &Record::new(EntryType::Learning, "x"))
        .unwrap();
    fs::write(buffer.flushing_path("s1"), "").unwrap();

    assert!(buffer.clear("s1").unwrap());
    assert!(buffer.flush_in_progress("s1"));
}

#[test]
fn test_list_sessions_sorted_and_directories_only() {
    let tmp = tempdir().unwrap();
    let buffer = buffer_in(tmp.path());
    assert!(buffer.list_sessions().unwrap().is_empty());

    for id in ["zeta", "alpha", "mid"] {
        buffer
            .append(id, &Record::new(EntryType::Learning, "x"))
            .unwrap();
    }
    fs::write(buffer.sessions_dir().join("stray.txt"), "").unwrap();

    assert_eq!(buffer.list_sessions().unwrap(), vec!["alpha", "mid", "zeta"]);
}

#[test]
fn test_flush_due_by_threshold() {
    let tmp = tempdir().unwrap();
    let buffer = buffer_in(tmp.path());
    let settings = BufferSettings {
        flush_threshold: 3,
        flush_interval_secs: 3600,
        async_flush: false,
    };

    assert!(!buffer.flush_due("s1", &settings).unwrap());
    for n in 0..2 {
        buffer
            .append("s1", &Record::new(EntryType::Learning, format!("r{n}")))
            .unwrap();
    }
    assert!(!buffer.flush_due("s1", &settings).unwrap());
    buffer
        .append("s1", &Record::new(EntryType::Learning, "r2"))
        .unwrap();
    assert!(buffer.flush_due("s1", &settings).unwrap());
}

#[test]
fn test_flush_due_by_age() {
    let tmp = tempdir().unwrap();
    let buffer = buffer_in(tmp.path());
    let settings = BufferSettings {
        flush_threshold: 100,
        flush_interval_secs: 60,
        async_flush: false,
    };

    buffer
        .append("fresh", &Record::new(EntryType::Learning, "new"))
        .unwrap();
    assert!(!buffer.flush_due("fresh", &settings).unwrap());

    let stale = Record::new(EntryType::Learning, "old")
        .with_created_at(Utc::now() - ChronoDuration::seconds(120));
    buffer.append("stale", &stale).unwrap();
    assert!(buffer.flush_due("stale", &settings).unwrap());
}

#[test]
fn test_from_paths_uses_resolved_locations() {
    let tmp = tempdir().unwrap();
    let paths = KeeperPaths::with_root(tmp.path());
    let settings = Settings::default();

    let buffer = SessionBuffer::from_paths(&paths, &settings);
    assert_eq!(buffer.sessions_dir(), paths.sessions_dir().as_path());
    assert_eq!(buffer.store_path(), paths.db_path(&settings).as_path());
    assert_eq!(buffer.launcher(), &FlushLauncher::Thread);
}

fn entry_type_strategy() -> impl Strategy<Value = EntryType> {
    prop::sample::select(EntryType::ALL.to_vec())
}

fn importance_strategy() -> impl Strategy<Value = Importance> {
    prop::sample::select(vec![Importance::High, Importance::Medium, Importance::Low])
}

fn source_strategy() -> impl Strategy<Value = Option<Source>> {
    prop::option::of(prop::sample::select(vec![Source::User, Source::Assistant]))
}

prop_compose! {
    fn valid_record()
        (entry_type in entry_type_strategy(),
         content in "[ a-zA-Z0-9.,\"\\\\/{}:\n\t-]{0,40}[a-zA-Z0-9]",
         importance in importance_strategy(),
         source in source_strategy(),
         secs in 1_600_000_000i64..1_900_000_000,
         nanos in 0u32..1_000_000_000,
         category in prop::option::of("[a-z]{1,10}"),
         keywords in prop::collection::vec("[a-z]{1,8}", 0..4))
        -> Record
    {
        let record = Record::new(entry_type, content)
            .with_importance(importance)
            .with_created_at(Utc.timestamp_opt(secs, nanos).unwrap())
            .with_enhanced(EnhancedFields {
                category,
                keywords,
                ..EnhancedFields::default()
            });
        match source {
            Some(source) => record.with_source(source),
            None => record,
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_append_read_round_trip(records in prop::collection::vec(valid_record(), 1..8)) {
        let tmp = tempdir().unwrap();
        let buffer = buffer_in(tmp.path());

        prop_assert_eq!(buffer.append_many("s1", &records).unwrap(), records.len());
        prop_assert_eq!(buffer.read("s1").unwrap(), records);
    }
}
