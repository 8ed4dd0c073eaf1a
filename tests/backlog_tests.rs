use factory_control_plane::Backlog;
use factory_control_plane::MemoryStore;
use factory_control_plane::model::NewTicket;
use factory_control_plane::model::TicketPriority;
use factory_control_plane::model::TicketStatus;
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;

fn backlog() -> Backlog {
    Backlog::new(Arc::new(MemoryStore::new()), 900)
}

fn ticket(id: &str, key: &str, priority: TicketPriority) -> NewTicket {
    NewTicket {
        id: id.to_string(),
        source: "github".to_string(),
        r#type: "bug".to_string(),
        priority,
        repo: "acme/widgets".to_string(),
        context: json!({"issue": 42}),
        acceptance_criteria: vec!["ci is green".to_string()],
        idempotency_key: key.to_string(),
    }
}

#[tokio::test]
async fn create_rejects_empty_idempotency_key() {
    let backlog = backlog();
    let mut new = ticket("t1", "", TicketPriority::Medium);
    new.idempotency_key.clear();
    let err = backlog.create(new).await.unwrap_err();
    assert!(err.to_string().contains("idempotency_key"));
}

#[tokio::test]
async fn create_is_idempotent() {
    let backlog = backlog();
    let a = backlog
        .create(ticket("t1", "dup-key", TicketPriority::Medium))
        .await
        .unwrap();
    let b = backlog
        .create(ticket("t2", "dup-key", TicketPriority::Medium))
        .await
        .unwrap();
    assert_eq!(a.id, b.id);
}

#[tokio::test]
async fn fetch_ready_orders_by_priority_then_age() {
    let backlog = backlog();
    backlog.create(ticket("low", "k1", TicketPriority::Low)).await.unwrap();
    backlog
        .create(ticket("critical", "k2", TicketPriority::Critical))
        .await
        .unwrap();
    backlog.create(ticket("high", "k3", TicketPriority::High)).await.unwrap();

    let ready = backlog.fetch_ready(10).await.unwrap();
    let ids: Vec<&str> = ready.iter().map(|t| t.id.as_str()).collect();
    assert_eq!(ids, vec!["critical", "high", "low"]);
}

#[tokio::test]
async fn only_one_worker_claims_a_ticket() {
    let backlog = backlog();
    backlog.create(ticket("t1", "k1", TicketPriority::Medium)).await.unwrap();

    let a = backlog.claim("t1", "worker-a").await.unwrap();
    let b = backlog.claim("t1", "worker-b").await.unwrap();

    assert!(a.is_some());
    assert!(b.is_none());
}

#[tokio::test]
async fn heartbeat_requires_matching_lease_token() {
    let backlog = backlog();
    backlog.create(ticket("t1", "k1", TicketPriority::Medium)).await.unwrap();
    let lease = backlog.claim("t1", "worker-a").await.unwrap().unwrap();

    let ok = backlog.heartbeat("t1", &lease.token).await.unwrap();
    assert!(ok.is_some());

    let stale = backlog.heartbeat("t1", "not-the-token").await.unwrap();
    assert!(stale.is_none());
}

#[tokio::test]
async fn complete_does_not_increment_attempts() {
    let backlog = backlog();
    backlog.create(ticket("t1", "k1", TicketPriority::Medium)).await.unwrap();
    let lease = backlog.claim("t1", "worker-a").await.unwrap().unwrap();

    let ticket = backlog.complete("t1", &lease.token).await.unwrap().unwrap();
    assert_eq!(ticket.status, TicketStatus::Completed);
    assert_eq!(ticket.attempts, 0);
}

#[tokio::test]
async fn fail_increments_attempts_and_records_reason() {
    let backlog = backlog();
    backlog.create(ticket("t1", "k1", TicketPriority::Medium)).await.unwrap();
    let lease = backlog.claim("t1", "worker-a").await.unwrap().unwrap();

    let ticket = backlog
        .fail("t1", &lease.token, "tests failed")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(ticket.status, TicketStatus::Failed);
    assert_eq!(ticket.attempts, 1);
    assert_eq!(ticket.last_failure_reason.as_deref(), Some("tests failed"));
}

#[tokio::test]
async fn failed_ticket_cannot_be_claimed_again() {
    let backlog = backlog();
    backlog.create(ticket("t1", "k1", TicketPriority::Medium)).await.unwrap();
    let lease = backlog.claim("t1", "worker-a").await.unwrap().unwrap();
    backlog.fail("t1", &lease.token, "boom").await.unwrap();

    let reclaim = backlog.claim("t1", "worker-b").await.unwrap();
    assert!(reclaim.is_none());
}

#[tokio::test]
async fn n_concurrent_claims_yield_exactly_one_winner() {
    let store = Arc::new(MemoryStore::new());
    let backlog = Arc::new(Backlog::new(store, 900));
    backlog.create(ticket("t1", "k1", TicketPriority::Medium)).await.unwrap();

    let wins = Arc::new(AtomicUsize::new(0));
    let mut handles = Vec::new();
    for i in 0..16 {
        let backlog = backlog.clone();
        let wins = wins.clone();
        handles.push(tokio::spawn(async move {
            if backlog
                .claim("t1", &format!("worker-{i}"))
                .await
                .unwrap()
                .is_some()
            {
                wins.fetch_add(1, Ordering::SeqCst);
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(wins.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn settling_with_stale_lease_token_is_rejected() {
    let backlog = backlog();
    backlog.create(ticket("t1", "k1", TicketPriority::Medium)).await.unwrap();
    backlog.claim("t1", "worker-a").await.unwrap().unwrap();

    let result = backlog.complete("t1", "some-other-token").await.unwrap();
    assert!(result.is_none());
}
