//! Concurrency Tests
//!
//! Racing callers against the registry and the workflow. Every race must
//! resolve to exactly one winner with the losers told why.

use chrono::{Duration, Utc};
use std::sync::{Arc, Barrier};
use std::thread;

use partner_trust_core::{
    Caller, CertificateBuilder, CertificateError, CertificateRole, KeyPair, RequestState,
    WorkflowError,
};
use partner_trust_plane::{
    ApiKeyIssuer, ApiKeyRequestWorkflow, CertificateRegistry, MemoryEventSink, TrustChainValidator,
};

const THREADS: usize = 16;

fn registry() -> CertificateRegistry {
    CertificateRegistry::new(TrustChainValidator::default(), Arc::new(MemoryEventSink::new()))
}

fn workflow() -> ApiKeyRequestWorkflow {
    ApiKeyRequestWorkflow::new(ApiKeyIssuer::default(), Arc::new(MemoryEventSink::new()))
}

/// Run `f(i)` on THREADS threads released at the same moment
fn race<T, F>(f: F) -> Vec<T>
where
    T: Send,
    F: Fn(usize) -> T + Sync,
{
    let barrier = Barrier::new(THREADS);
    thread::scope(|scope| {
        let handles: Vec<_> = (0..THREADS)
            .map(|i| {
                let barrier = &barrier;
                let f = &f;
                scope.spawn(move || {
                    barrier.wait();
                    f(i)
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().expect("thread panicked"))
            .collect()
    })
}

// =============================================================================
// Workflow
// =============================================================================

#[test]
fn test_parallel_submits_single_winner() {
    let workflow = workflow();

    let results = race(|_| workflow.submit("P1", "POL1", "parallel"));

    let winners: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
    assert_eq!(winners.len(), 1);
    let winner = winners[0];
    assert_eq!(winner.state, RequestState::Submitted);

    for result in &results {
        if let Err(err) = result {
            assert_eq!(
                err,
                &WorkflowError::DuplicateRequest {
                    partner_id: "P1".into(),
                    policy_id: "POL1".into(),
                    existing: winner.request_id.clone(),
                }
            );
        }
    }
    assert_eq!(workflow.list_by_partner("P1").len(), 1);
}

#[test]
fn test_racing_decisions_single_winner() {
    let workflow = workflow();
    let id = workflow.submit("P1", "POL1", "").unwrap().request_id;
    let manager = Caller::partner_manager("pm-1");

    let results = race(|i| {
        if i % 2 == 0 {
            workflow.approve(&id, &manager)
        } else {
            workflow.reject(&id, &manager, "race")
        }
    });

    let winners: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
    assert_eq!(winners.len(), 1);
    let final_state = workflow.retrieve(&id).unwrap().state;
    assert_eq!(winners[0].state, final_state);

    for err in results.iter().filter_map(|r| r.as_ref().err()) {
        assert!(
            matches!(err, WorkflowError::InvalidStateTransition { from, .. } if *from == final_state),
            "unexpected error {:?}",
            err
        );
    }
}

#[test]
fn test_racing_generate_key_issues_once() {
    let workflow = workflow();
    let id = workflow.submit("P1", "POL1", "").unwrap().request_id;
    let manager = Caller::partner_manager("pm-1");
    workflow.approve(&id, &manager).unwrap();

    let results = race(|_| workflow.generate_key(&id, &manager).unwrap());

    let raw_keys = results.iter().filter(|issued| issued.raw_key.is_some()).count();
    assert_eq!(raw_keys, 1);
    assert!(results.iter().all(|issued| issued.key_ref == results[0].key_ref));
}

// =============================================================================
// Registry
// =============================================================================

#[test]
fn test_racing_uploads_of_same_root() {
    let registry = registry();
    let key = KeyPair::generate();
    let root = CertificateBuilder::new()
        .subject("CN=Root")
        .role(CertificateRole::Root)
        .partner_domain("AUTH")
        .valid_for(Duration::days(365))
        .self_signed(&key)
        .unwrap();

    let results = race(|_| registry.admit(root.clone(), Utc::now()));

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    for err in results.iter().filter_map(|r| r.as_ref().err()) {
        assert_eq!(err, &CertificateError::Duplicate { identity: root.identity() });
    }
    assert_eq!(registry.len(), 1);
}

#[test]
fn test_racing_uploads_in_one_domain() {
    let roots: Vec<_> = (0..THREADS)
        .map(|i| {
            CertificateBuilder::new()
                .subject(format!("CN=Root {}", i))
                .role(CertificateRole::Root)
                .partner_domain("AUTH")
                .valid_for(Duration::days(365))
                .self_signed(&KeyPair::generate())
                .unwrap()
        })
        .collect();

    for round in 0..20 {
        let registry = registry();
        let results = race(|i| registry.admit(roots[i].clone(), Utc::now()));

        // Distinct valid roots never conflict with each other
        for (i, result) in results.iter().enumerate() {
            assert_eq!(result, &Ok(roots[i].identity()), "round {} root {}", round, i);
        }
        assert_eq!(registry.len(), THREADS);
    }
}

#[test]
fn test_racing_leaves_under_one_ca() {
    let registry = registry();
    let root_key = KeyPair::generate();
    let root = CertificateBuilder::new()
        .subject("CN=Root")
        .role(CertificateRole::Root)
        .partner_domain("AUTH")
        .valid_for(Duration::days(365))
        .self_signed(&root_key)
        .unwrap();
    registry.admit(root, Utc::now()).unwrap();

    let leaves: Vec<_> = (0..THREADS)
        .map(|i| {
            CertificateBuilder::new()
                .subject(format!("CN=Partner {}", i))
                .role(CertificateRole::PartnerLeaf)
                .partner_domain("AUTH")
                .public_key(&KeyPair::generate().public_key())
                .valid_for(Duration::days(30))
                .issued_by("CN=Root", &root_key)
                .unwrap()
        })
        .collect();

    let results = race(|i| {
        registry.admit_partner_certificate(leaves[i].clone(), &format!("P{}", i), Utc::now())
    });

    assert!(results.iter().all(|r| r.is_ok()), "{:?}", results);
    assert_eq!(registry.len(), THREADS + 1);
    for i in 0..THREADS {
        let stored = registry.partner_certificate(&format!("P{}", i)).unwrap();
        assert_eq!(stored.entry, leaves[i]);
    }
}
