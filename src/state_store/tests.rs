//! Tests for the snapshot log.

use super::*;
use rstest::{fixture, rstest};
use tempfile::TempDir;

struct StoreFixture {
    _tmp: TempDir,
    root: Utf8PathBuf,
    store: StateStore,
}

#[fixture]
fn store_fixture() -> StoreFixture {
    let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
    let root = Utf8PathBuf::from_path_buf(tmp.path().join("store"))
        .unwrap_or_else(|path| panic!("temp path should be utf8: {}", path.display()));
    StoreFixture {
        _tmp: tmp,
        store: StateStore::new(root.clone()),
        root,
    }
}

fn append(store: &StateStore, host: &str, action: Action, state: &str) -> SnapshotRecord {
    store
        .append("none", host, action, state.as_bytes())
        .unwrap_or_else(|err| panic!("append {action}: {err}"))
}

#[rstest]
fn append_writes_the_documented_layout(store_fixture: StoreFixture) {
    let record = append(&store_fixture.store, "h1", Action::Create, "{}");

    let expected = store_fixture
        .root
        .join("none/machines/h1/log")
        .join(&record.file_name);
    assert!(expected.is_file(), "missing {expected}");
    assert!(record.file_name.ends_with("-create.json"));
    assert_eq!(record.file_name.len(), 20 + "-create.json".len());
}

#[rstest]
fn load_latest_returns_none_without_history(store_fixture: StoreFixture) {
    let latest = store_fixture
        .store
        .load_latest("none", "h1")
        .unwrap_or_else(|err| panic!("load: {err}"));
    assert_eq!(latest, None);
}

#[rstest]
fn load_latest_returns_the_newest_snapshot(store_fixture: StoreFixture) {
    append(&store_fixture.store, "h1", Action::Create, "first");
    append(&store_fixture.store, "h1", Action::Stop, "second");

    let latest = store_fixture
        .store
        .load_latest("none", "h1")
        .unwrap_or_else(|err| panic!("load: {err}"))
        .unwrap_or_else(|| panic!("snapshot should exist"));

    assert_eq!(latest.action, Action::Stop);
    assert_eq!(latest.state, b"second".to_vec());
    assert_eq!(latest.provider, "none");
    assert_eq!(latest.host, "h1");
}

#[rstest]
fn timestamps_strictly_increase_in_rapid_succession(store_fixture: StoreFixture) {
    let records: Vec<SnapshotRecord> = (0..25)
        .map(|_| append(&store_fixture.store, "h1", Action::Restart, "{}"))
        .collect();

    for pair in records.windows(2) {
        let [earlier, later] = pair else {
            panic!("windows(2) yields pairs");
        };
        assert!(later.timestamp > earlier.timestamp);
        assert!(later.file_name > earlier.file_name);
    }
}

#[rstest]
fn append_orders_after_entries_from_the_future(store_fixture: StoreFixture) {
    let log = store_fixture.root.join("none/machines/h1/log");
    Dir::create_ambient_dir_all(&log, ambient_authority())
        .unwrap_or_else(|err| panic!("create log: {err}"));
    let dir = Dir::open_ambient_dir(&log, ambient_authority())
        .unwrap_or_else(|err| panic!("open log: {err}"));
    dir.write("09000000000000000000-create.json", b"future")
        .unwrap_or_else(|err| panic!("seed: {err}"));

    let record = append(&store_fixture.store, "h1", Action::Stop, "now");

    assert_eq!(record.timestamp, 9_000_000_000_000_000_001);
    let latest = store_fixture
        .store
        .load_latest("none", "h1")
        .unwrap_or_else(|err| panic!("load: {err}"))
        .unwrap_or_else(|| panic!("snapshot should exist"));
    assert_eq!(latest.state, b"now".to_vec());
}

#[rstest]
fn load_latest_ignores_foreign_and_temporary_files(store_fixture: StoreFixture) {
    append(&store_fixture.store, "h1", Action::Create, "real");
    let log = store_fixture.root.join("none/machines/h1/log");
    let dir = Dir::open_ambient_dir(&log, ambient_authority())
        .unwrap_or_else(|err| panic!("open log: {err}"));
    dir.write(".tmp-half-written", b"partial")
        .unwrap_or_else(|err| panic!("seed temp: {err}"));
    dir.write("notes.txt", b"operator notes")
        .unwrap_or_else(|err| panic!("seed notes: {err}"));
    dir.write("09000000000000000000-explode.json", b"bogus action")
        .unwrap_or_else(|err| panic!("seed bogus: {err}"));

    let latest = store_fixture
        .store
        .load_latest("none", "h1")
        .unwrap_or_else(|err| panic!("load: {err}"))
        .unwrap_or_else(|| panic!("snapshot should exist"));
    assert_eq!(latest.state, b"real".to_vec());
}

#[rstest]
fn legacy_second_resolution_names_sort_before_new_entries(store_fixture: StoreFixture) {
    let log = store_fixture.root.join("none/machines/h1/log");
    Dir::create_ambient_dir_all(&log, ambient_authority())
        .unwrap_or_else(|err| panic!("create log: {err}"));
    let dir = Dir::open_ambient_dir(&log, ambient_authority())
        .unwrap_or_else(|err| panic!("open log: {err}"));
    dir.write("1450000000-create.json", b"legacy")
        .unwrap_or_else(|err| panic!("seed: {err}"));

    append(&store_fixture.store, "h1", Action::Start, "current");

    let history = store_fixture
        .store
        .history("none", "h1")
        .unwrap_or_else(|err| panic!("history: {err}"));
    let actions: Vec<Action> = history.iter().map(|record| record.action).collect();
    assert_eq!(actions, vec![Action::Create, Action::Start]);
}

#[rstest]
fn listings_reflect_recorded_hosts(store_fixture: StoreFixture) {
    append(&store_fixture.store, "h1", Action::Create, "{}");
    append(&store_fixture.store, "h2", Action::Create, "{}");
    store_fixture
        .store
        .append("scaleway", "web", Action::Create, b"{}")
        .unwrap_or_else(|err| panic!("append: {err}"));
    Dir::create_ambient_dir_all(store_fixture.root.join("empty/machines"), ambient_authority())
        .unwrap_or_else(|err| panic!("create empty provider: {err}"));

    let providers = store_fixture
        .store
        .list_providers()
        .unwrap_or_else(|err| panic!("providers: {err}"));
    assert_eq!(
        providers.into_iter().collect::<Vec<_>>(),
        vec![String::from("none"), String::from("scaleway")]
    );

    let hosts = store_fixture
        .store
        .list_hosts("none")
        .unwrap_or_else(|err| panic!("hosts: {err}"));
    assert_eq!(
        hosts.into_iter().collect::<Vec<_>>(),
        vec![String::from("h1"), String::from("h2")]
    );
}

#[rstest]
fn listings_are_empty_before_the_root_exists(store_fixture: StoreFixture) {
    assert!(!store_fixture.root.exists());
    let providers = store_fixture
        .store
        .list_providers()
        .unwrap_or_else(|err| panic!("providers: {err}"));
    let hosts = store_fixture
        .store
        .list_hosts("none")
        .unwrap_or_else(|err| panic!("hosts: {err}"));
    assert!(providers.is_empty());
    assert!(hosts.is_empty());
}

#[rstest]
#[case("")]
#[case(".")]
#[case("..")]
#[case(".hidden")]
#[case("a/b")]
#[case("a\\b")]
fn invalid_host_names_are_rejected(store_fixture: StoreFixture, #[case] host: &str) {
    let err = store_fixture
        .store
        .append("none", host, Action::Create, b"{}")
        .expect_err("name should be rejected");
    assert!(
        matches!(err, StateStoreError::InvalidName { ref kind, .. } if kind == "host"),
        "unexpected error: {err}"
    );
    assert!(!store_fixture.root.exists());
}

#[rstest]
fn append_reports_io_failures(store_fixture: StoreFixture) {
    let host_dir = store_fixture.root.join("none/machines/h1");
    Dir::create_ambient_dir_all(&host_dir, ambient_authority())
        .unwrap_or_else(|err| panic!("create host dir: {err}"));
    let dir = Dir::open_ambient_dir(&host_dir, ambient_authority())
        .unwrap_or_else(|err| panic!("open host dir: {err}"));
    dir.write(LOG_DIR, b"a file where the log directory belongs")
        .unwrap_or_else(|err| panic!("seed: {err}"));

    let err = store_fixture
        .store
        .append("none", "h1", Action::Create, b"{}")
        .expect_err("append should fail");
    assert!(
        matches!(err, StateStoreError::Io { .. }),
        "unexpected error: {err}"
    );
}

#[rstest]
#[case("00000000000000000042-stop.json", Some((42, Action::Stop)))]
#[case("1450000000-kill.json", Some((1_450_000_000, Action::Kill)))]
#[case("42-stop.yaml", None)]
#[case("-stop.json", None)]
#[case("4x2-stop.json", None)]
#[case("42-pause.json", None)]
#[case(".tmp-0123", None)]
fn snapshot_names_parse(#[case] name: &str, #[case] expected: Option<(u64, Action)>) {
    let parsed = SnapshotRecord::parse(name).map(|record| (record.timestamp, record.action));
    assert_eq!(parsed, expected);
}

fn open_log(root: &Utf8Path, host: &str) -> Dir {
    let log = root.join("none/machines").join(host).join(LOG_DIR);
    Dir::create_ambient_dir_all(&log, ambient_authority())
        .unwrap_or_else(|err| panic!("create log: {err}"));
    Dir::open_ambient_dir(&log, ambient_authority())
        .unwrap_or_else(|err| panic!("open log: {err}"))
}

#[cfg(unix)]
fn non_utf8_path(dir: &Utf8Path, name: &[u8]) -> std::path::PathBuf {
    use std::ffi::OsStr;
    use std::os::unix::ffi::OsStrExt;

    dir.as_std_path().join(OsStr::from_bytes(name))
}

#[cfg(unix)]
#[rstest]
fn log_entries_with_non_utf8_names_are_skipped(store_fixture: StoreFixture) {
    append(&store_fixture.store, "h1", Action::Create, "real");
    let log = store_fixture.root.join("none/machines/h1/log");
    std::fs::write(non_utf8_path(&log, b"junk\xff.bak"), b"stray")
        .unwrap_or_else(|err| panic!("seed stray file: {err}"));

    let latest = store_fixture
        .store
        .load_latest("none", "h1")
        .unwrap_or_else(|err| panic!("load: {err}"))
        .unwrap_or_else(|| panic!("snapshot should exist"));
    assert_eq!(latest.action, Action::Create);
    assert_eq!(latest.state, b"real".to_vec());

    append(&store_fixture.store, "h1", Action::Stop, "later");
    let history = store_fixture
        .store
        .history("none", "h1")
        .unwrap_or_else(|err| panic!("history: {err}"));
    let actions: Vec<Action> = history.iter().map(|record| record.action).collect();
    assert_eq!(actions, [Action::Create, Action::Stop]);
}

#[cfg(unix)]
#[rstest]
fn directories_with_non_utf8_names_are_not_listed(store_fixture: StoreFixture) {
    append(&store_fixture.store, "h1", Action::Create, "{}");
    std::fs::create_dir_all(non_utf8_path(&store_fixture.root, b"stray\xff"))
        .unwrap_or_else(|err| panic!("seed provider dir: {err}"));
    std::fs::create_dir_all(non_utf8_path(
        &store_fixture.root.join("none/machines"),
        b"host\xfe",
    ))
    .unwrap_or_else(|err| panic!("seed host dir: {err}"));

    let providers = store_fixture
        .store
        .list_providers()
        .unwrap_or_else(|err| panic!("providers: {err}"));
    let hosts = store_fixture
        .store
        .list_hosts("none")
        .unwrap_or_else(|err| panic!("hosts: {err}"));
    assert_eq!(providers.into_iter().collect::<Vec<_>>(), ["none"]);
    assert_eq!(hosts.into_iter().collect::<Vec<_>>(), ["h1"]);
}

#[rstest]
fn append_fails_once_timestamps_are_exhausted(store_fixture: StoreFixture) {
    let last = format!("{:020}-create.json", u64::MAX);
    open_log(&store_fixture.root, "h1")
        .write(&last, b"end of time")
        .unwrap_or_else(|err| panic!("seed: {err}"));

    let err = store_fixture
        .store
        .append("none", "h1", Action::Stop, b"{}")
        .expect_err("no timestamp is left");
    assert!(
        matches!(err, StateStoreError::Io { ref message, .. } if message.contains("exhausted")),
        "unexpected error: {err}"
    );

    let history = store_fixture
        .store
        .history("none", "h1")
        .unwrap_or_else(|err| panic!("history: {err}"));
    let names: Vec<&str> = history.iter().map(|record| record.file_name.as_str()).collect();
    assert_eq!(names, [last.as_str()]);
}

#[rstest]
fn publish_never_replaces_an_existing_snapshot(store_fixture: StoreFixture) {
    let existing = append(&store_fixture.store, "h1", Action::Create, "original");
    let log = open_log(&store_fixture.root, "h1");
    log.write(".tmp-other-writer", b"replacement")
        .unwrap_or_else(|err| panic!("seed temp: {err}"));

    let published = publish(&log, ".tmp-other-writer", existing.timestamp, Action::Create)
        .unwrap_or_else(|err| panic!("publish: {err}"));

    assert_eq!(published.timestamp, existing.timestamp + 1);
    let original = log
        .read(&existing.file_name)
        .unwrap_or_else(|err| panic!("read original: {err}"));
    assert_eq!(original, b"original".to_vec());
    let replacement = log
        .read(&published.file_name)
        .unwrap_or_else(|err| panic!("read published: {err}"));
    assert_eq!(replacement, b"replacement".to_vec());
}

#[rstest]
fn append_leaves_no_temporary_files(store_fixture: StoreFixture) {
    append(&store_fixture.store, "h1", Action::Create, "{}");
    append(&store_fixture.store, "h1", Action::Stop, "{}");

    let log = open_log(&store_fixture.root, "h1");
    let names: Vec<String> = log
        .entries()
        .unwrap_or_else(|err| panic!("entries: {err}"))
        .map(|entry| {
            entry
                .and_then(|found| found.file_name())
                .unwrap_or_else(|err| panic!("entry: {err}"))
        })
        .collect();
    assert!(
        names.iter().all(|name| !name.starts_with(TEMP_PREFIX)),
        "{names:?}"
    );
    assert_eq!(names.len(), 2);
}
