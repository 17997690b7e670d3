//! Concurrent evaluations against one kernel.

use std::sync::Arc;
use std::time::Duration;

use agent_immune::ledger::AuditStatus;
use agent_immune::{ActionRequest, ComplianceKernel, Decision};

use crate::fakes::{kernel, FakeRegistry, RecordingLedger, AGENT};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn identical_concurrent_actions_see_each_other() {
    let kernel = Arc::new(kernel(RecordingLedger::new(), FakeRegistry::new()).await);

    let handles: Vec<_> = (0..2)
        .map(|_| {
            let kernel = Arc::clone(&kernel);
            tokio::spawn(async move {
                kernel
                    .process(ActionRequest::new("rm -rf /srv/data"))
                    .await
                    .expect("valid request")
            })
        })
        .collect();

    let mut verdicts = Vec::new();
    for handle in handles {
        verdicts.push(handle.await.expect("task completes"));
    }
    let misses = verdicts.iter().filter(|v| v.history.is_none()).count();
    assert_eq!(misses, 1, "exactly one evaluation may miss history");
    assert_eq!(kernel.memory().len(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn distinct_concurrent_actions_are_all_recorded() {
    let ledger = RecordingLedger::new();
    let kernel = Arc::new(kernel(ledger.clone(), FakeRegistry::new()).await);

    let handles: Vec<_> = (0..16)
        .map(|i| {
            let kernel = Arc::clone(&kernel);
            tokio::spawn(async move {
                kernel
                    .process(ActionRequest::new(format!("upload artifact-{i} to bucket-{i}")))
                    .await
                    .expect("valid request")
            })
        })
        .collect();
    for handle in handles {
        let verdict = handle.await.expect("task completes");
        assert_eq!(verdict.decision, Decision::ApproveWithLogging);
    }

    assert_eq!(kernel.memory().len(), 16);
    assert_eq!(ledger.records().len(), 16);
    assert_eq!(kernel.stats().processed, 16);
}

#[tokio::test(start_paused = true)]
async fn slow_audit_does_not_hold_other_evaluations() {
    let kernel = Arc::new(
        ComplianceKernel::builder(RecordingLedger::slow(Duration::from_secs(5)))
            .agent_id(AGENT)
            .external_timeout(Duration::from_secs(10))
            .registry_service(FakeRegistry::new())
            .build()
            .await,
    );

    let audited = {
        let kernel = Arc::clone(&kernel);
        tokio::spawn(async move {
            kernel
                .process(ActionRequest::new("POST status update to API"))
                .await
                .expect("valid request")
        })
    };
    // Let the audited evaluation run up to its ledger write.
    tokio::task::yield_now().await;

    let quick = kernel
        .process(ActionRequest::new("browse to https://docs.example.com"))
        .await
        .expect("valid request");
    assert_eq!(quick.decision, Decision::AutoApprove);
    assert!(!audited.is_finished());

    let audited = audited.await.expect("task completes");
    assert!(matches!(audited.audit, AuditStatus::Recorded { .. }));
}
