//! JSON-lines ledger on disk.

use agent_immune::ledger::{AuditRecord, JsonlLedger, LedgerLine, LedgerSink};
use agent_immune::registry::PublishStatus;
use agent_immune::{ActionRequest, Decision, RiskCategory};

fn record(action: &str) -> AuditRecord {
    AuditRecord::new(
        "agent-test",
        &ActionRequest::new(action).with_context("session", "s-1"),
        Decision::RequireConfirmation,
        85,
        RiskCategory::Destructive,
        "category DESTRUCTIVE (base 85)",
        PublishStatus::NotRequired,
    )
}

#[tokio::test]
async fn appends_one_verifiable_line_per_record() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("audit").join("ledger.jsonl");
    let ledger = JsonlLedger::new(&path).expect("ledger");

    let first = record("drop table users");
    let second = record("truncate audit_log");
    let r1 = ledger.write(&first).await.expect("write");
    let r2 = ledger.write(&second).await.expect("write");
    assert_ne!(r1, r2);
    assert!(r1.0.starts_with("ledger-"));

    let contents = std::fs::read_to_string(&path).expect("read ledger");
    let lines: Vec<LedgerLine> = contents
        .lines()
        .map(|l| serde_json::from_str(l).expect("valid line"))
        .collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0].record, first);
    assert_eq!(lines[1].record, second);
    for line in &lines {
        assert_eq!(line.hash, line.record.integrity_hash().expect("hash"));
    }
}

#[tokio::test]
async fn reopening_appends_rather_than_truncates() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("ledger.jsonl");

    JsonlLedger::new(&path)
        .expect("ledger")
        .write(&record("drop table users"))
        .await
        .expect("write");
    JsonlLedger::new(&path)
        .expect("ledger")
        .write(&record("truncate audit_log"))
        .await
        .expect("write");

    let contents = std::fs::read_to_string(&path).expect("read ledger");
    assert_eq!(contents.lines().count(), 2);
}
