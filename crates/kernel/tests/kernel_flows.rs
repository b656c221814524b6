//! End-to-end kernel flows: staging lifecycle, invariant stash, scope
//! masking, idempotent retries, handoff resume and ref-aware decay.

use std::sync::Arc;

use chrono::{Duration, Utc};
use engram_domain::config::Config;
use engram_domain::memory::MemoryRecord;
use engram_domain::staging::{CommitOutcome, CommitStatus, StashResolution};
use engram_index::flat::FlatIndex;
use engram_kernel::handoff::merge::CheckpointPayload;
use engram_kernel::handoff::{CheckpointArgs, ResumeArgs};
use engram_kernel::sleep::SleepOptions;
use engram_kernel::staging::{WriteMode, WriteRequest};
use engram_kernel::{Kernel, RequestContext, SessionCreateRequest};
use engram_providers::{MockLlm, SimpleEmbedder};
use engram_store::refcounts::RefType;
use engram_store::{MemoryQuery, Store};

fn kernel() -> Kernel {
    kernel_with_config(Config::default())
}

fn kernel_with_config(config: Config) -> Kernel {
    let config = Arc::new(config);
    Kernel::new(
        config.clone(),
        Arc::new(Store::open_in_memory().unwrap()),
        Arc::new(FlatIndex::in_memory(128)),
        Arc::new(MockLlm::new()),
        Arc::new(SimpleEmbedder::new(128)),
    )
}

fn local() -> RequestContext {
    RequestContext::unrestricted()
}

fn write(user: &str, content: &str) -> WriteRequest {
    WriteRequest {
        content: content.into(),
        user_id: user.into(),
        agent_id: None,
        categories: vec![],
        metadata: serde_json::Value::Object(Default::default()),
        scope: None,
        namespace: "default".into(),
        mode: WriteMode::Staging,
        infer: false,
        memory_type: None,
        importance: None,
        immutable: false,
        source_app: None,
        source_type: None,
        source_event_id: None,
        trusted_direct: false,
    }
}

fn direct(user: &str, content: &str) -> WriteRequest {
    WriteRequest {
        mode: WriteMode::Direct,
        trusted_direct: true,
        ..write(user, content)
    }
}

#[tokio::test]
async fn staging_lifecycle_propose_approve_search() {
    let kernel = kernel();
    let session = kernel
        .create_session(&SessionCreateRequest {
            user_id: "u1".into(),
            agent_id: None,
            allowed_confidentiality_scopes: None,
            capabilities: Some(vec![
                "propose_write".into(),
                "review_commits".into(),
                "search".into(),
            ]),
            namespaces: None,
            ttl_minutes: Some(30),
        })
        .unwrap();
    let ctx = kernel.authenticate(Some(&session.token), false).unwrap();

    let proposed = kernel
        .propose_write(&ctx, &write("u1", "Project codename is Atlas"))
        .await
        .unwrap();
    let commit_id = match &proposed.outcome {
        CommitOutcome::Pending { commit_id } => commit_id.clone(),
        other => panic!("expected PENDING, got {other:?}"),
    };
    assert!(!proposed.idempotent);

    let approved = kernel.approve_commit(&ctx, &commit_id).await.unwrap();
    let memory_ids = match approved {
        CommitOutcome::Approved {
            auto_merged,
            memory_ids,
            ..
        } => {
            assert!(!auto_merged);
            memory_ids
        }
        other => panic!("expected APPROVED, got {other:?}"),
    };
    assert_eq!(memory_ids.len(), 1);

    let response = kernel
        .search(&ctx, "Atlas codename", "u1", 10, None)
        .await
        .unwrap();
    assert!(response.count >= 1);
    let rendered = serde_json::to_string(&response.results).unwrap();
    assert!(rendered.contains("Atlas"));
    assert_eq!(
        response.retrieval_trace.strategy,
        "semantic_plus_episodic_intersection"
    );
}

#[tokio::test]
async fn approving_twice_is_idempotent() {
    let kernel = kernel();
    let ctx = local();
    let proposed = kernel
        .propose_write(&ctx, &write("u1", "the build uses cargo workspaces"))
        .await
        .unwrap();
    let commit_id = proposed.outcome.commit_id().to_string();

    let first = kernel.approve_commit(&ctx, &commit_id).await.unwrap();
    let second = kernel.approve_commit(&ctx, &commit_id).await.unwrap();
    let (CommitOutcome::Approved { memory_ids: a, .. }, CommitOutcome::Approved { memory_ids: b, .. }) =
        (first, second)
    else {
        panic!("both approvals must report APPROVED");
    };
    assert_eq!(a, b);

    // Exactly one memory row exists.
    let memories = kernel
        .store()
        .list_memories(&MemoryQuery {
            user_id: Some("u1".into()),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(memories.len(), 1);
}

#[tokio::test]
async fn invariant_contradiction_auto_stashes() {
    let kernel = kernel();
    let ctx = local();

    let first = kernel
        .propose_write(&ctx, &direct("u1", "my name is Alice"))
        .await
        .unwrap();
    assert!(matches!(first.outcome, CommitOutcome::Approved { .. }));

    let second = kernel
        .propose_write(&ctx, &write("u1", "my name is Bob"))
        .await
        .unwrap();
    let stash_id = match &second.outcome {
        CommitOutcome::AutoStashed { stash_id, .. } => stash_id.clone(),
        other => panic!("expected AUTO_STASHED, got {other:?}"),
    };

    let stashes = kernel
        .store()
        .list_conflict_stash(Some("u1"), Some(StashResolution::Unresolved), 10)
        .unwrap();
    assert_eq!(stashes.len(), 1);
    assert_eq!(stashes[0].id, stash_id);
    assert_eq!(stashes[0].conflict_key, "identity.name");

    // Accepting the proposal applies the stashed commit and moves the
    // invariant.
    let resolved = kernel
        .resolve_conflict(&ctx, &stash_id, StashResolution::AcceptProposed)
        .await
        .unwrap();
    assert_eq!(resolved["resolution"], "ACCEPT_PROPOSED");
    let invariant = kernel
        .store()
        .get_invariant("u1", "identity.name")
        .unwrap()
        .unwrap();
    assert_eq!(invariant.invariant_value, "Bob");

    // The stash is one-shot.
    assert!(kernel
        .resolve_conflict(&ctx, &stash_id, StashResolution::KeepExisting)
        .await
        .is_err());
}

#[tokio::test]
async fn scope_masking_redacts_restricted_results() {
    let kernel = kernel();
    let writer = local();

    let mut work = direct("u1", "Quarterly work update for the team");
    work.scope = Some("work".into());
    kernel.propose_write(&writer, &work).await.unwrap();

    let mut finance = direct("u1", "salary and finance update: new comp is 200k");
    finance.scope = Some("finance".into());
    kernel.propose_write(&writer, &finance).await.unwrap();

    let reader = kernel
        .create_session(&SessionCreateRequest {
            user_id: "u1".into(),
            agent_id: None,
            allowed_confidentiality_scopes: Some(vec!["work".into()]),
            capabilities: Some(vec!["search".into()]),
            namespaces: None,
            ttl_minutes: Some(30),
        })
        .unwrap();
    let ctx = kernel.authenticate(Some(&reader.token), false).unwrap();

    let response = kernel
        .search(&ctx, "salary and finance update", "u1", 10, None)
        .await
        .unwrap();
    assert!(response.retrieval_trace.masked_count >= 1);

    let rendered = serde_json::to_string(&response).unwrap();
    assert!(!rendered.contains("200k"), "masked content must never leak");
    let masked = response
        .results
        .iter()
        .find(|item| item.is_masked())
        .expect("finance hit should be present but masked");
    let masked_json = serde_json::to_value(masked).unwrap();
    assert_eq!(masked_json["masked"], true);
    assert_eq!(masked_json["details"], "[REDACTED]");
    assert_eq!(masked_json["type"], "finance_event");
}

#[tokio::test]
async fn source_event_id_makes_writes_idempotent() {
    let kernel = kernel();
    let ctx = local();

    let mut request = direct("u1", "deployed version 1.4.2 to production");
    request.source_event_id = Some("evt-42".into());

    let first = kernel.propose_write(&ctx, &request).await.unwrap();
    assert!(!first.idempotent);
    let second = kernel.propose_write(&ctx, &request).await.unwrap();
    assert!(second.idempotent);
    assert_eq!(first.outcome.commit_id(), second.outcome.commit_id());

    let memories = kernel
        .store()
        .list_memories(&MemoryQuery {
            user_id: Some("u1".into()),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(memories.len(), 1, "exactly one memory for the event");
}

#[tokio::test]
async fn rejected_commit_cannot_be_approved() {
    let kernel = kernel();
    let ctx = local();
    let proposed = kernel
        .propose_write(&ctx, &write("u1", "tentative note"))
        .await
        .unwrap();
    let commit_id = proposed.outcome.commit_id().to_string();

    let rejected = kernel.reject_commit(&ctx, &commit_id).unwrap();
    assert!(matches!(rejected, CommitOutcome::Rejected { .. }));
    assert!(kernel.approve_commit(&ctx, &commit_id).await.is_err());

    let commit = kernel.store().get_commit(&commit_id).unwrap().unwrap();
    assert_eq!(commit.status, CommitStatus::Rejected);
}

#[tokio::test]
async fn write_quota_blocks_past_the_limit() {
    let mut config = Config::default();
    config.policy.write_quota_per_user_per_hour = 2;
    let kernel = kernel_with_config(config);
    let ctx = local();

    kernel.propose_write(&ctx, &write("u1", "one")).await.unwrap();
    kernel.propose_write(&ctx, &write("u1", "two")).await.unwrap();
    let err = kernel
        .propose_write(&ctx, &write("u1", "three"))
        .await
        .unwrap_err();
    assert!(matches!(err, engram_domain::Error::QuotaExceeded(_)));
}

#[tokio::test]
async fn handoff_resume_and_checkpoint_round_trip() {
    let kernel = kernel();
    let ctx = local();
    let repo = std::env::temp_dir().display().to_string();

    let packet = kernel
        .handoff_resume(
            &ctx,
            &ResumeArgs {
                user_id: "u1".into(),
                agent_id: Some("claude-code".into()),
                repo_path: Some(repo.clone()),
                branch: None,
                lane_type: "general".into(),
                objective: Some("migrate the config loader".into()),
                agent_role: None,
                namespace: "default".into(),
                statuses: None,
                auto_create: true,
            },
        )
        .await
        .unwrap()
        .unwrap();
    assert!(packet.created_new_lane);
    assert_eq!(packet.lane_version, 0);

    let result = kernel
        .handoff_checkpoint(
            &ctx,
            &CheckpointArgs {
                user_id: "u1".into(),
                agent_id: "claude-code".into(),
                payload: CheckpointPayload {
                    task_summary: Some("migrate the config loader".into()),
                    todos_remaining: vec!["port env overrides".into()],
                    ..Default::default()
                },
                event_type: "tool_complete".into(),
                repo_path: Some(repo.clone()),
                branch: None,
                lane_id: Some(packet.lane_id.clone()),
                lane_type: "general".into(),
                objective: None,
                agent_role: None,
                namespace: "default".into(),
                confidentiality_scope: "work".into(),
                expected_version: None,
            },
        )
        .await
        .unwrap();
    assert_eq!(result.lane_id, packet.lane_id);
    assert_eq!(result.version, 1);

    // Another agent resumes the same repo and sees the latest state.
    let resumed = kernel
        .handoff_resume(
            &ctx,
            &ResumeArgs {
                user_id: "u1".into(),
                agent_id: Some("codex".into()),
                repo_path: Some(repo),
                branch: None,
                lane_type: "general".into(),
                objective: Some("migrate the config loader".into()),
                agent_role: None,
                namespace: "default".into(),
                statuses: None,
                auto_create: true,
            },
        )
        .await
        .unwrap()
        .unwrap();
    assert!(!resumed.created_new_lane);
    assert_eq!(resumed.lane_id, packet.lane_id);
    assert_eq!(resumed.task_summary, "migrate the config loader");
    assert_eq!(resumed.todos_remaining, vec!["port env overrides".to_string()]);
    assert_eq!(resumed.from_agent.as_deref(), Some("claude-code"));
}

#[tokio::test]
async fn ref_aware_sleep_protects_then_forgets() {
    let kernel = kernel();
    let ctx = local();

    let mut memory = MemoryRecord::new("ephemeral scratch note", "u1");
    memory.s_fast = 0.01;
    memory.s_mid = 0.01;
    memory.s_slow = 0.01;
    memory.strength = 0.01;
    memory.last_accessed = Utc::now() - Duration::days(90);
    kernel.store().add_memory(&memory).unwrap();
    kernel
        .store()
        .add_subscriber(&memory.id, "agent-a", RefType::Strong, None)
        .unwrap();

    let protected = kernel
        .run_sleep_cycle(&ctx, &SleepOptions::default())
        .await
        .unwrap();
    assert_eq!(protected.totals.forgotten, 0);
    assert!(kernel.store().get_memory(&memory.id, false).unwrap().is_some());

    kernel
        .store()
        .remove_subscriber(&memory.id, "agent-a", RefType::Strong)
        .unwrap();
    let unprotected = kernel
        .run_sleep_cycle(&ctx, &SleepOptions::default())
        .await
        .unwrap();
    assert_eq!(unprotected.totals.forgotten, 1);
    assert!(kernel.store().get_memory(&memory.id, false).unwrap().is_none());
}

#[tokio::test]
async fn empty_store_returns_empty_results() {
    let kernel = kernel();
    let ctx = local();
    let response = kernel.search(&ctx, "anything at all", "u1", 10, None).await.unwrap();
    assert_eq!(response.count, 0);
    assert!(response.results.is_empty());
    assert!(response.scene_hits.is_empty());
    assert!(response.context_packet.snippets.is_empty());
}

#[tokio::test]
async fn single_item_corpus_searches_without_boost() {
    let kernel = kernel();
    let ctx = local();
    kernel
        .propose_write(&ctx, &direct("u1", "the single fact in the corpus"))
        .await
        .unwrap();

    let response = kernel
        .search(&ctx, "single fact", "u1", 5, None)
        .await
        .unwrap();
    assert_eq!(response.count, 1);
}

#[tokio::test]
async fn capability_denied_without_grant() {
    let kernel = kernel();
    let session = kernel
        .create_session(&SessionCreateRequest {
            user_id: "u1".into(),
            agent_id: None,
            allowed_confidentiality_scopes: None,
            capabilities: Some(vec!["search".into()]),
            namespaces: None,
            ttl_minutes: Some(5),
        })
        .unwrap();
    let ctx = kernel.authenticate(Some(&session.token), false).unwrap();

    let err = kernel
        .propose_write(&ctx, &write("u1", "not allowed"))
        .await
        .unwrap_err();
    assert!(matches!(err, engram_domain::Error::CapabilityDenied(_)));
}
