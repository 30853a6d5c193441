use std::sync::Arc;

use chrono::TimeDelta;
use fileferry_config::GrantRule;
use fileferry_core::{ErrorKind, SessionProbe};
use fileferry_credentials::{
    AllowlistAuthorizer, CredentialBroker, CredentialError, MemorySessionStore, SessionScope,
};
use fileferry_test_support::mocks::ManualClock;
use uuid::Uuid;

fn broker(clock: Arc<ManualClock>) -> Arc<CredentialBroker> {
    let authorizer = AllowlistAuthorizer::new(
        vec![GrantRule {
            requester: "alice".into(),
            bucket: "finance-exports".into(),
            prefix: String::new(),
        }],
        "us-east-1",
    );
    Arc::new(CredentialBroker::new(
        Arc::new(MemorySessionStore::new()),
        Arc::new(authorizer),
        clock,
        vec!["REQ".into(), "INC".into()],
    ))
}

fn scope(approval_ref: &str) -> SessionScope {
    SessionScope {
        run_id: Uuid::new_v4(),
        approval_ref: approval_ref.into(),
        bucket: "finance-exports".into(),
        key: "ledger/2024.csv".into(),
    }
}

#[tokio::test]
async fn session_is_valid_through_its_window_and_not_after() -> anyhow::Result<()> {
    let clock = Arc::new(ManualClock::starting_now());
    let broker = broker(Arc::clone(&clock));
    let session = broker.issue("alice", &scope("REQ-1001")).await?;
    assert_eq!(session.expires_at - session.issued_at, TimeDelta::seconds(10));

    assert!(broker.is_valid(session.token).await);
    broker.material(session.token).await?;

    clock.advance(TimeDelta::milliseconds(9_999));
    assert!(broker.is_valid(session.token).await);

    clock.advance(TimeDelta::milliseconds(2));
    assert!(!broker.is_valid(session.token).await);
    let err = broker
        .material(session.token)
        .await
        .expect_err("expired material");
    assert_eq!(err.kind(), ErrorKind::SessionExpired);

    let info = broker.session_info(session.token).await?;
    assert!(!info.is_valid);
    assert_eq!(info.millis_remaining, 0);
    Ok(())
}

#[tokio::test]
async fn revoke_is_idempotent_and_tolerates_unknown_tokens() -> anyhow::Result<()> {
    let broker = broker(Arc::new(ManualClock::starting_now()));
    let session = broker.issue("alice", &scope("INC42")).await?;
    broker.revoke(session.token).await?;
    broker.revoke(session.token).await?;
    broker.revoke(Uuid::new_v4()).await?;
    assert!(!broker.is_valid(session.token).await);
    assert!(!broker.is_valid(Uuid::new_v4()).await);
    assert!(broker.session_info(session.token).await?.revoked);
    Ok(())
}

#[tokio::test]
async fn approval_reference_backs_one_live_session_at_a_time() -> anyhow::Result<()> {
    let clock = Arc::new(ManualClock::starting_now());
    let broker = broker(Arc::clone(&clock));
    let first = broker.issue("alice", &scope("REQ-2002")).await?;

    let err = broker
        .issue("alice", &scope("REQ-2002"))
        .await
        .expect_err("approval in use");
    assert!(matches!(
        err,
        CredentialError::ApprovalInUse { holder, .. } if holder == first.token
    ));

    broker.revoke(first.token).await?;
    let second = broker.issue("alice", &scope("REQ-2002")).await?;
    assert_ne!(first.token, second.token);

    clock.advance(TimeDelta::seconds(11));
    let third = broker.issue("alice", &scope("REQ-2002")).await?;
    assert_ne!(second.token, third.token);
    Ok(())
}

#[tokio::test]
async fn unauthorized_or_unapproved_requests_are_rejected() {
    let broker = broker(Arc::new(ManualClock::starting_now()));

    let no_grant = broker.issue("mallory", &scope("REQ-1")).await;
    assert!(matches!(no_grant, Err(CredentialError::AuthRejected { .. })));

    let bad_prefix = broker.issue("alice", &scope("CHG-1")).await;
    assert!(matches!(
        bad_prefix,
        Err(CredentialError::ApprovalInvalid {
            reason: "unknown_prefix",
            ..
        })
    ));

    let bare_prefix = broker.issue("alice", &scope("REQ-")).await;
    assert!(matches!(
        bare_prefix,
        Err(CredentialError::ApprovalInvalid {
            reason: "missing_identifier",
            ..
        })
    ));
    for err in [no_grant, bad_prefix, bare_prefix] {
        assert_eq!(
            err.err().map(|e| e.kind()),
            Some(ErrorKind::Authorization)
        );
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_issues_for_one_approval_yield_one_session() -> anyhow::Result<()> {
    let broker = broker(Arc::new(ManualClock::starting_now()));
    let mut handles = Vec::new();
    for _ in 0..16 {
        let broker = Arc::clone(&broker);
        handles.push(tokio::spawn(async move {
            broker.issue("alice", &scope("INC-777")).await.is_ok()
        }));
    }
    let mut issued = 0;
    for handle in handles {
        if handle.await? {
            issued += 1;
        }
    }
    assert_eq!(issued, 1);
    Ok(())
}

#[tokio::test]
async fn guard_tracks_the_session_and_purge_drops_expired_records() -> anyhow::Result<()> {
    let clock = Arc::new(ManualClock::starting_now());
    let broker = broker(Arc::clone(&clock));
    let session = broker.issue("alice", &scope("REQ-3003")).await?;
    let guard = broker.guard(session.token);
    assert_eq!(guard.token(), session.token);
    assert!(guard.is_valid().await);

    clock.advance(TimeDelta::seconds(10) + TimeDelta::milliseconds(1));
    assert!(!guard.is_valid().await);

    assert_eq!(broker.purge_expired().await?, 1);
    let err = broker
        .session_info(session.token)
        .await
        .expect_err("purged");
    assert!(matches!(err, CredentialError::UnknownSession { .. }));
    Ok(())
}
