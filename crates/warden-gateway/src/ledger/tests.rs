//! Unit tests for the audit ledger.

use std::fs;
use std::io;
use std::sync::Arc;
use std::thread;

use rstest::{fixture, rstest};
use tempfile::TempDir;

use super::*;

fn invoke(run_id: &str, plugin_id: &str, request_id: &str) -> LedgerDraft {
    LedgerDraft::new(LedgerKind::Invoke, run_id, plugin_id)
        .request(request_id)
        .hashes("a".repeat(64), "")
}

fn result(run_id: &str, plugin_id: &str, request_id: &str) -> LedgerDraft {
    LedgerDraft::new(LedgerKind::Result, run_id, plugin_id)
        .request(request_id)
        .hashes("a".repeat(64), "b".repeat(64))
        .meta("status", "ok")
}

#[fixture]
fn ledger() -> Ledger {
    let ledger = Ledger::new();
    for (run_id, plugin_id, request_id) in [
        ("run-1", "echo", "req-1"),
        ("run-1", "lint", "req-2"),
        ("run-2", "echo", "req-3"),
    ] {
        ledger
            .append(invoke(run_id, plugin_id, request_id))
            .expect("append invoke");
        ledger
            .append(result(run_id, plugin_id, request_id))
            .expect("append result");
    }
    ledger
}

#[test]
fn first_entry_has_empty_prev_hash() {
    let ledger = Ledger::new();
    let entry = ledger.append(invoke("run", "echo", "req")).expect("append");
    assert_eq!(entry.seq, 0);
    assert!(entry.prev_hash.is_empty());
    assert_eq!(entry.event_hash.len(), 64);
    assert_eq!(ledger.head(), entry.event_hash);
}

#[rstest]
fn entries_link_to_predecessors(ledger: Ledger) {
    let entries = ledger.entries();
    assert_eq!(entries.len(), 6);
    for pair in entries.windows(2) {
        let [previous, current] = pair else {
            panic!("windows(2) yields pairs");
        };
        assert_eq!(current.prev_hash, previous.event_hash);
        assert_eq!(current.seq, previous.seq + 1);
    }
}

#[rstest]
fn intact_chain_verifies(ledger: Ledger) {
    assert_eq!(
        ledger.verify_chain(),
        ChainVerification {
            valid: true,
            broken_at: None
        }
    );
}

#[rstest]
fn tampered_entry_breaks_chain_at_its_seq(ledger: Ledger) {
    let mut entries = ledger.entries();
    if let Some(entry) = entries.get_mut(3) {
        entry.meta.insert("status".into(), "error".into());
    }
    let verification = ChainVerification::of(&entries);
    assert!(!verification.valid);
    assert_eq!(verification.broken_at, Some(3));
}

#[rstest]
fn removed_entry_breaks_chain(ledger: Ledger) {
    let mut entries = ledger.entries();
    entries.remove(2);
    assert_eq!(ChainVerification::of(&entries).broken_at, Some(3));
}

#[rstest]
fn queries_filter_entries(ledger: Ledger) {
    assert_eq!(ledger.by_run("run-1").len(), 4);
    assert_eq!(ledger.by_plugin("echo").len(), 4);
    let request = ledger.by_request("req-2");
    let kinds: Vec<LedgerKind> = request.iter().map(|entry| entry.kind).collect();
    assert_eq!(kinds, vec![LedgerKind::Invoke, LedgerKind::Result]);
    assert!(ledger.by_run("missing").is_empty());
}

#[rstest]
fn ndjson_has_one_parsable_line_per_entry(ledger: Ledger) {
    let ndjson = ledger.to_ndjson().expect("render");
    let parsed: Vec<LedgerEntry> = ndjson
        .lines()
        .map(|line| serde_json::from_str(line).expect("parse line"))
        .collect();
    assert_eq!(parsed, ledger.entries());
    assert!(ndjson.contains("\"kind\":\"INVOKE\""));
}

#[rstest]
fn proof_bundle_covers_one_run(ledger: Ledger) {
    let digests = BTreeMap::from([("echo".to_owned(), "c".repeat(64))]);
    let proof = ledger.export_proof("run-2", digests.clone());
    assert_eq!(proof.run_id, "run-2");
    assert_eq!(proof.events.len(), 2);
    assert!(proof.events.iter().all(|entry| entry.run_id == "run-2"));
    assert_eq!(proof.plugin_manifest_digests, digests);
    assert_eq!(proof.head_event_hash, ledger.head());
    assert!(proof.chain_valid);
}

#[rstest]
#[case::ok(PluginStatus::Ok, LedgerKind::Result)]
#[case::error(PluginStatus::Error, LedgerKind::Error)]
#[case::timeout(PluginStatus::Timeout, LedgerKind::Error)]
#[case::rejected(PluginStatus::Rejected, LedgerKind::Reject)]
fn terminal_kind_follows_status(#[case] status: PluginStatus, #[case] expected: LedgerKind) {
    let kind = LedgerKind::for_status(status);
    assert_eq!(kind, expected);
    assert!(kind.is_terminal());
}

#[test]
fn pinned_timestamp_is_kept() {
    let ledger = Ledger::new();
    let entry = ledger
        .append(invoke("run", "echo", "req").timestamp("2026-01-01T00:00:00Z"))
        .expect("append");
    assert_eq!(entry.timestamp, "2026-01-01T00:00:00Z");
}

#[test]
fn clock_timestamps_are_rfc3339() {
    let ledger = Ledger::new();
    let entry = ledger.append(invoke("run", "echo", "req")).expect("append");
    assert!(
        OffsetDateTime::parse(&entry.timestamp, &Rfc3339).is_ok(),
        "timestamp: {}",
        entry.timestamp
    );
}

#[test]
fn concurrent_appends_keep_the_chain_intact() {
    let ledger = Arc::new(Ledger::new());
    let writers: Vec<_> = (0..4)
        .map(|writer| {
            let shared = Arc::clone(&ledger);
            thread::spawn(move || {
                for index in 0..25 {
                    let request_id = format!("req-{writer}-{index}");
                    shared
                        .append(invoke("run", "echo", &request_id))
                        .expect("append");
                }
            })
        })
        .collect();
    for writer in writers {
        writer.join().expect("writer thread");
    }
    assert_eq!(ledger.len(), 100);
    assert!(ledger.verify_chain().valid);
}

#[test]
fn file_sink_mirrors_entries() {
    let dir = TempDir::new().expect("temp dir");
    let path = dir.path().join("ledger.ndjson");
    let ledger = Ledger::with_sink(JsonlFileSink::open(&path).expect("open sink"));
    ledger.append(invoke("run", "echo", "req")).expect("append");
    ledger.append(result("run", "echo", "req")).expect("append");

    let written = fs::read_to_string(&path).expect("read sink");
    assert_eq!(written, ledger.to_ndjson().expect("render"));
}

#[test]
fn reopened_file_sink_continues_the_chain() {
    let dir = TempDir::new().expect("temp dir");
    let path = dir.path().join("ledger.ndjson");

    let first = Ledger::with_sink(JsonlFileSink::open(&path).expect("open sink"));
    let opening = first.append(invoke("run-1", "echo", "req-1")).expect("append");
    drop(first);

    let second = Ledger::with_sink(JsonlFileSink::open(&path).expect("reopen sink"));
    assert_eq!(second.len(), 1);
    let next = second.append(result("run-1", "echo", "req-1")).expect("append");
    assert_eq!(next.seq, 1);
    assert_eq!(next.prev_hash, opening.event_hash);

    let persisted: Vec<LedgerEntry> = fs::read_to_string(&path)
        .expect("read sink")
        .lines()
        .map(|line| serde_json::from_str(line).expect("entry"))
        .collect();
    assert_eq!(
        persisted.iter().map(|entry| entry.seq).collect::<Vec<_>>(),
        vec![0, 1]
    );
    assert!(ChainVerification::of(&persisted).valid);
}

#[test]
fn sink_with_partial_line_is_refused() {
    let dir = TempDir::new().expect("temp dir");
    let path = dir.path().join("ledger.ndjson");
    {
        let ledger = Ledger::with_sink(JsonlFileSink::open(&path).expect("open sink"));
        ledger.append(invoke("run", "echo", "req")).expect("append");
    }
    let mut contents = fs::read_to_string(&path).expect("read sink");
    contents.push_str("{\"seq\":1,\"run_id\":");
    fs::write(&path, contents).expect("write partial line");

    let error = JsonlFileSink::open(&path).expect_err("partial line");
    assert!(matches!(error, LedgerError::Corrupt { line: 2, .. }));
}

#[test]
fn sink_with_tampered_entry_is_refused() {
    let dir = TempDir::new().expect("temp dir");
    let path = dir.path().join("ledger.ndjson");
    {
        let ledger = Ledger::with_sink(JsonlFileSink::open(&path).expect("open sink"));
        ledger.append(invoke("run", "echo", "req")).expect("append");
        ledger.append(result("run", "echo", "req")).expect("append");
    }
    let tampered = fs::read_to_string(&path)
        .expect("read sink")
        .replacen("\"plugin_id\":\"echo\"", "\"plugin_id\":\"other\"", 1);
    fs::write(&path, tampered).expect("rewrite sink");

    let error = JsonlFileSink::open(&path).expect_err("tampered chain");
    assert!(matches!(error, LedgerError::Broken { seq: 0, .. }));
}

#[test]
fn from_config_opens_configured_sink() {
    let dir = TempDir::new().expect("temp dir");
    let path = dir.path().join("audit.ndjson");
    let config = GatewayConfig::default().with_ledger_path(utf8_path(&path));
    let ledger = Ledger::from_config(&config).expect("ledger");
    ledger.append(invoke("run", "echo", "req")).expect("append");
    assert!(fs::read_to_string(&path).expect("read").contains("INVOKE"));
}

#[test]
fn unopenable_sink_is_reported() {
    let error = JsonlFileSink::open("/nonexistent/dir/ledger.ndjson").expect_err("missing dir");
    assert!(matches!(error, LedgerError::Open { .. }));
}

struct FailingSink;

impl LedgerSink for FailingSink {
    fn write(&mut self, entry: &LedgerEntry) -> Result<(), LedgerError> {
        Err(LedgerError::Write {
            seq: entry.seq,
            source: Arc::new(io::Error::other("disk full")),
        })
    }
}

#[test]
fn sink_failure_commits_nothing() {
    let ledger = Ledger::with_sink(FailingSink);
    let error = ledger
        .append(invoke("run", "echo", "req"))
        .expect_err("sink refuses");
    assert!(matches!(error, LedgerError::Write { seq: 0, .. }));
    assert!(ledger.is_empty());
    assert!(ledger.head().is_empty());
}

fn utf8_path(path: &std::path::Path) -> String {
    path.to_str().expect("utf-8 temp path").to_owned()
}
