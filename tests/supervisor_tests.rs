use factory_control_plane::Backlog;
use factory_control_plane::MemoryStore;
use factory_control_plane::RunSupervisor;
use factory_control_plane::Store;
use factory_control_plane::model::NewTicket;
use factory_control_plane::model::RunBudget;
use factory_control_plane::model::RunState;
use factory_control_plane::model::TicketPriority;
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;

fn ticket(id: &str) -> NewTicket {
    NewTicket {
        id: id.to_string(),
        source: "github".to_string(),
        r#type: "feature".to_string(),
        priority: TicketPriority::High,
        repo: "acme/widgets".to_string(),
        context: json!({}),
        acceptance_criteria: vec![],
        idempotency_key: format!("key-{id}"),
    }
}

async fn setup() -> (Arc<MemoryStore>, RunSupervisor) {
    let store = Arc::new(MemoryStore::new());
    let backlog = Arc::new(Backlog::new(store.clone(), 900));
    let supervisor = RunSupervisor::new(store.clone(), backlog, 120);
    (store, supervisor)
}

#[tokio::test]
async fn dispatch_fails_when_ticket_is_already_claimed() {
    let (store, supervisor) = setup().await;
    store.create_ticket(ticket("t1")).await.unwrap();
    store.claim_ticket("t1", "other-worker", 900).await.unwrap();

    let budget = RunBudget::new(45, 120_000).unwrap();
    let run = supervisor.dispatch("t1", "worker-a", "codex", budget).await.unwrap();
    assert!(run.is_none());
}

#[tokio::test]
async fn dispatch_then_monitor_drives_the_state_machine() {
    let (store, supervisor) = setup().await;
    store.create_ticket(ticket("t1")).await.unwrap();

    let budget = RunBudget::new(45, 120_000).unwrap();
    let run = supervisor
        .dispatch("t1", "worker-a", "codex", budget)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(run.state, RunState::Claimed);

    let running = supervisor
        .monitor(&run.id, RunState::Running, 10, None, json!({}))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(running.state, RunState::Running);
    assert_eq!(running.token_count, 10);

    let succeeded = supervisor
        .monitor(&run.id, RunState::Succeeded, 50, None, json!({}))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(succeeded.state, RunState::Succeeded);
    assert!(succeeded.ended_at.is_some());

    let events = store.list_run_events(&run.id).await.unwrap();
    assert_eq!(events.len(), 3);
}

#[tokio::test]
async fn monitor_rejects_illegal_transitions() {
    let (store, supervisor) = setup().await;
    store.create_ticket(ticket("t1")).await.unwrap();
    let budget = RunBudget::new(45, 120_000).unwrap();
    let run = supervisor
        .dispatch("t1", "worker-a", "codex", budget)
        .await
        .unwrap()
        .unwrap();

    // Claimed -> Succeeded is not in the transition table.
    let result = supervisor.monitor(&run.id, RunState::Succeeded, 0, None, json!({})).await.unwrap();
    assert!(result.is_none());

    let unchanged = store.get_run(&run.id).await.unwrap().unwrap();
    assert_eq!(unchanged.state, RunState::Claimed);
}

#[tokio::test]
async fn successful_run_marks_ticket_completed_without_incrementing_attempts() {
    let (store, supervisor) = setup().await;
    store.create_ticket(ticket("t1")).await.unwrap();
    let budget = RunBudget::new(45, 120_000).unwrap();
    let run = supervisor
        .dispatch("t1", "worker-a", "codex", budget)
        .await
        .unwrap()
        .unwrap();
    supervisor.monitor(&run.id, RunState::Running, 0, None, json!({})).await.unwrap();
    supervisor
        .monitor(&run.id, RunState::Succeeded, 0, None, json!({}))
        .await
        .unwrap();

    let ready = store.fetch_ready_tickets(10).await.unwrap();
    assert!(ready.is_empty());
}

#[tokio::test]
async fn enforce_limits_times_out_runs_over_token_budget() {
    let (store, supervisor) = setup().await;
    store.create_ticket(ticket("t1")).await.unwrap();
    let budget = RunBudget::new(45, 100).unwrap();
    let run = supervisor
        .dispatch("t1", "worker-a", "codex", budget)
        .await
        .unwrap()
        .unwrap();
    supervisor.monitor(&run.id, RunState::Running, 0, None, json!({})).await.unwrap();

    let result = supervisor.enforce_limits(&run.id, Some(150)).await.unwrap().unwrap();
    assert_eq!(result.state, RunState::TimedOut);
    assert!(result.error_message.unwrap().contains("max_tokens"));
}

#[tokio::test]
async fn enforce_limits_just_records_when_within_budget() {
    let (store, supervisor) = setup().await;
    store.create_ticket(ticket("t1")).await.unwrap();
    let budget = RunBudget::new(45, 100_000).unwrap();
    let run = supervisor
        .dispatch("t1", "worker-a", "codex", budget)
        .await
        .unwrap()
        .unwrap();
    supervisor.monitor(&run.id, RunState::Running, 0, None, json!({})).await.unwrap();

    let result = supervisor.enforce_limits(&run.id, Some(500)).await.unwrap().unwrap();
    assert_eq!(result.state, RunState::Running);
    assert_eq!(result.token_count, 500);
}

#[tokio::test]
async fn recover_stale_times_out_runs_past_heartbeat_timeout() {
    let store = Arc::new(MemoryStore::new());
    let backlog = Arc::new(Backlog::new(store.clone(), 900));
    let supervisor = RunSupervisor::new(store.clone(), backlog, -1);
    store.create_ticket(ticket("t1")).await.unwrap();
    let budget = RunBudget::new(45, 120_000).unwrap();
    let run = supervisor
        .dispatch("t1", "worker-a", "codex", budget)
        .await
        .unwrap()
        .unwrap();
    supervisor.monitor(&run.id, RunState::Running, 0, None, json!({})).await.unwrap();

    let recovered = supervisor.recover_stale().await.unwrap();
    assert_eq!(recovered.len(), 1);
    assert_eq!(recovered[0].state, RunState::TimedOut);

    let ticket_state = store.fetch_ready_tickets(10).await.unwrap();
    assert!(ticket_state.is_empty());
}
