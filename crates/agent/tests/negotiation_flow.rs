use std::sync::Arc;

use rust_decimal::Decimal;

use negotiator_agent::guardrails::{HANDOFF_REPLY, HANDOFF_SUFFIX, SENSITIVE_DATA_REPLY};
use negotiator_agent::llm::{LlmClient, ScriptedClient};
use negotiator_agent::offline::OfflineClient;
use negotiator_agent::runtime::{AgentRuntime, Session};
use negotiator_core::audit::InMemoryAuditSink;
use negotiator_core::config::AppConfig;
use negotiator_core::domain::approval::ApprovalDecision;
use negotiator_core::domain::conversation::{MessageRole, Owner};
use negotiator_core::errors::{ApplicationError, DomainError, GENERIC_FAILURE_REPLY};
use negotiator_core::flows::{CheckpointStore, FlowError, Stage};
use negotiator_db::repositories::{SqlCheckpointStore, SqlMessageRepository, SqlOfferRepository};
use negotiator_db::{connect_with_settings, migrations, DbPool, DealSeedDataset};

const PHONE: &str = "+5511987654321";

async fn seeded_pool() -> DbPool {
    let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
    migrations::run_pending(&pool).await.expect("migrations");
    DealSeedDataset::load(&pool).await.expect("seed");
    pool
}

async fn runtime_with(
    client: Arc<dyn LlmClient>,
) -> (AgentRuntime, Session, DbPool, Arc<InMemoryAuditSink>) {
    let pool = seeded_pool().await;
    let audit = Arc::new(InMemoryAuditSink::default());
    let runtime = AgentRuntime::from_config(&AppConfig::default(), pool.clone(), client)
        .expect("runtime")
        .with_audit_sink(audit.clone());
    let session = runtime.start_or_resume("negotiator", PHONE, false).await.expect("session");
    (runtime, session, pool, audit)
}

fn is_flow_error(error: &ApplicationError, predicate: impl Fn(&FlowError) -> bool) -> bool {
    matches!(error, ApplicationError::Domain(DomainError::Flow(flow)) if predicate(flow))
}

#[tokio::test]
async fn offline_negotiation_runs_from_greeting_to_close() {
    let (runtime, session, pool, audit) = runtime_with(Arc::new(OfflineClient::new())).await;
    let thread = session.conversation.thread_id.clone();
    assert!(!session.resumed);

    let greeting = runtime.handle_thread_message(&thread, "Oi, tudo bem?").await.expect("greeting");
    assert!(greeting.reply.contains("plataforma"));
    assert!(greeting.reply.ends_with(HANDOFF_SUFFIX));
    assert_eq!(greeting.stage, Some(Stage::Qualify));

    let offer = runtime
        .handle_thread_message(
            &thread,
            "Faço 1 reel no Instagram, nicho fitness, média de 100k views. Prazo até 15/08.",
        )
        .await
        .expect("qualification");
    assert!(offer.reply.contains("podemos oferecer R$2800"));
    assert_eq!(offer.stage, Some(Stage::Negotiate));
    assert!(offer.approval.is_none());

    let high_ask =
        runtime.handle_thread_message(&thread, "Cobro R$ 8.000 pelo reel").await.expect("ask");
    let request = high_ask.approval.expect("approval requested");
    assert_eq!(request.proposed_price, Some(Decimal::from(8000)));
    assert_eq!(high_ask.stage, Some(Stage::Approval));
    assert!(audit.event_types().iter().any(|event| event == "approval.requested"));

    let pending = runtime.pending_approval(&thread).await.expect("pending");
    assert_eq!(pending.and_then(|request| request.proposed_price), Some(Decimal::from(8000)));

    let blocked = runtime
        .handle_thread_message(&thread, "E aí, fechado?")
        .await
        .expect_err("held for approval");
    assert!(is_flow_error(&blocked, |flow| matches!(flow, FlowError::AwaitingApproval { .. })));

    let resumed = runtime
        .handle_approval(&thread, ApprovalDecision::counter(Decimal::from(5000)))
        .await
        .expect("approval");
    assert!(resumed.reply.contains("Operador ajustou a proposta para R$5000.00"));
    assert!(resumed.reply.contains("podemos oferecer R$5000"));
    assert!(resumed.approval.is_none());
    assert!(runtime.pending_approval(&thread).await.expect("pending").is_none());

    let handoff =
        runtime.handle_thread_message(&thread, "Quero falar com um humano").await.expect("handoff");
    assert_eq!(handoff.reply, HANDOFF_REPLY);
    assert_eq!(handoff.owner, Owner::Human);

    let closing = runtime.handle_thread_message(&thread, "Ok, aguardo").await.expect("close");
    assert!(closing.closed);
    assert!(closing.reply.starts_with("Negociação finalizada!"));

    let after_close =
        runtime.handle_thread_message(&thread, "Oi de novo").await.expect_err("closed");
    assert!(is_flow_error(&after_close, |flow| matches!(flow, FlowError::ThreadClosed { .. })));

    let offers = SqlOfferRepository::new(pool.clone())
        .list_for_conversation(session.conversation.id)
        .await
        .expect("offers");
    assert!(offers
        .iter()
        .any(|stored| stored.offer.proposed == Some(Decimal::from(5000))
            && stored.offer.accepted == Some(true)));

    let listed = runtime.list_conversations(10).await.expect("list");
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].record.owner, Owner::Human);
}

#[tokio::test]
async fn rejected_ask_is_not_offered_and_escalates_when_repeated() {
    let (runtime, session, pool, _audit) = runtime_with(Arc::new(OfflineClient::new())).await;
    let thread = session.conversation.thread_id.clone();
    runtime
        .handle_thread_message(
            &thread,
            "Faço 1 reel no Instagram, nicho fitness, média de 100k views. Prazo até 15/08.",
        )
        .await
        .expect("qualification");
    let high_ask = runtime.handle_thread_message(&thread, "Cobro R$ 8.000").await.expect("ask");
    assert!(high_ask.approval.is_some());

    let rejected = runtime
        .handle_approval(&thread, ApprovalDecision::reject())
        .await
        .expect("reject");
    assert!(rejected.reply.starts_with("Proposta recusada pelo operador. Renegociando..."));
    assert!(rejected.reply.contains("podemos oferecer R$2800"));
    assert!(!rejected.reply.contains("R$8000"));
    assert_eq!(rejected.stage, Some(Stage::Negotiate));

    let repeated =
        runtime.handle_thread_message(&thread, "Cobro R$ 8.000 mesmo").await.expect("repeat");
    assert_eq!(repeated.stage, Some(Stage::Approval));
    assert_eq!(
        repeated.approval.and_then(|request| request.proposed_price),
        Some(Decimal::from(8000))
    );

    let offers = SqlOfferRepository::new(pool)
        .list_for_conversation(session.conversation.id)
        .await
        .expect("offers");
    assert!(offers
        .iter()
        .any(|stored| stored.offer.proposed == Some(Decimal::from(8000))
            && stored.offer.accepted == Some(false)));
}

#[tokio::test]
async fn resuming_picks_up_the_active_conversation() {
    let (runtime, session, _pool, _audit) = runtime_with(Arc::new(OfflineClient::new())).await;

    let again = runtime.start_or_resume("negotiator", PHONE, false).await.expect("resume");
    assert!(again.resumed);
    assert_eq!(again.conversation.thread_id, session.conversation.thread_id);

    let fresh = runtime.start_or_resume("negotiator", PHONE, true).await.expect("new");
    assert!(!fresh.resumed);
    assert_ne!(fresh.conversation.thread_id, session.conversation.thread_id);
}

#[tokio::test]
async fn unknown_agent_is_rejected() {
    let (runtime, _session, _pool, _audit) = runtime_with(Arc::new(OfflineClient::new())).await;
    assert!(runtime.start_or_resume("ghost", PHONE, false).await.is_err());
}

#[tokio::test]
async fn sensitive_data_is_refused_without_calling_the_model() {
    let client = Arc::new(ScriptedClient::default());
    let (runtime, session, pool, audit) = runtime_with(client.clone()).await;
    let thread = session.conversation.thread_id.clone();

    let reply = runtime
        .handle_thread_message(&thread, "Meu CPF é 123.456.789-09")
        .await
        .expect("refusal");

    assert_eq!(reply.reply, SENSITIVE_DATA_REPLY);
    assert!(client.requests().is_empty());
    assert!(audit.event_types().iter().any(|event| event == "guardrail.refused"));

    let stored = SqlMessageRepository::new(pool)
        .recent(session.conversation.id, 10)
        .await
        .expect("messages");
    assert_eq!(stored.len(), 2);
    assert_eq!(stored[0].role, MessageRole::User);
    assert!(!stored[0].content.contains("123.456.789-09"));
    assert!(stored[0].content.contains("[dado sensível removido]"));
}

#[tokio::test]
async fn backend_failure_persists_nothing() {
    let client = Arc::new(ScriptedClient::default());
    client.push_failure("connection refused");
    let (runtime, session, pool, _audit) = runtime_with(client).await;
    let thread = session.conversation.thread_id.clone();

    let error = runtime.handle_thread_message(&thread, "Oi").await.expect_err("failure");
    assert!(matches!(error, ApplicationError::Integration(_)));

    let stored = SqlMessageRepository::new(pool.clone())
        .recent(session.conversation.id, 10)
        .await
        .expect("messages");
    assert!(stored.is_empty());
    assert!(SqlCheckpointStore::new(pool).load(&thread).await.expect("load").is_none());
}

#[tokio::test]
async fn empty_generation_falls_back_to_the_generic_reply() {
    let (runtime, session, pool, _audit) = runtime_with(Arc::new(ScriptedClient::default())).await;
    let thread = session.conversation.thread_id.clone();

    let reply = runtime.handle_thread_message(&thread, "Oi").await.expect("turn");
    assert_eq!(reply.reply, GENERIC_FAILURE_REPLY);

    let stored = SqlMessageRepository::new(pool)
        .recent(session.conversation.id, 10)
        .await
        .expect("messages");
    assert_eq!(stored.len(), 2);
    assert_eq!(stored[1].content, GENERIC_FAILURE_REPLY);
}

#[tokio::test]
async fn approval_without_a_pending_request_is_rejected() {
    let (runtime, session, _pool, _audit) = runtime_with(Arc::new(OfflineClient::new())).await;
    let thread = session.conversation.thread_id.clone();

    let error = runtime
        .handle_approval(&thread, ApprovalDecision::approve())
        .await
        .expect_err("nothing pending");
    assert!(is_flow_error(&error, |flow| matches!(flow, FlowError::NoPendingApproval { .. })));
}

#[tokio::test]
async fn turns_on_one_thread_are_serialized() {
    let (runtime, session, pool, _audit) = runtime_with(Arc::new(OfflineClient::new())).await;
    let thread = session.conversation.thread_id.clone();

    let (first, second) = tokio::join!(
        runtime.handle_thread_message(&thread, "Faço reels no instagram"),
        runtime.handle_thread_message(&thread, "Minha média é 100k views"),
    );
    first.expect("first");
    second.expect("second");

    let stored = SqlMessageRepository::new(pool.clone())
        .recent(session.conversation.id, 20)
        .await
        .expect("messages");
    assert_eq!(stored.len(), 4);
    let checkpoint = SqlCheckpointStore::new(pool).load(&thread).await.expect("load").expect("saved");
    assert_eq!(checkpoint.state.messages().len(), 4);
    assert_eq!(checkpoint.state.qualification.avg_views, Some(100_000));
}
