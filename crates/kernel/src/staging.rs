//! The write pipeline: staged proposal commits, risk checks, conflict
//! stash, atomic apply with rollback, idempotent retries and trust-gated
//! auto-merge.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use engram_domain::capability::Capability;
use engram_domain::config::Config;
use engram_domain::error::{Error, Result};
use engram_domain::memory::{MemoryRecord, MemoryType};
use engram_domain::staging::{
    ChangeOp, CommitChecks, CommitOutcome, CommitStatus, ConflictNote, ConflictStash,
    InvariantRecord, ProposalChange, ProposalCommit, StashResolution,
};
use engram_index::{PointPayload, SearchFilters, VectorIndex};
use engram_providers::{Embedder, Llm};
use engram_store::{MemoryField, Store};

use crate::extract::{extract_facts, identity_facts, split_sentences};
use crate::policy::detect_scope;
use crate::quota::WriteQuota;
use crate::sessions::RequestContext;
use crate::{profile, scene};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum WriteMode {
    #[default]
    Staging,
    Direct,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WriteRequest {
    pub content: String,
    pub user_id: String,
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default = "empty_object")]
    pub metadata: serde_json::Value,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default)]
    pub mode: WriteMode,
    #[serde(default)]
    pub infer: bool,
    #[serde(default)]
    pub memory_type: Option<MemoryType>,
    #[serde(default)]
    pub importance: Option<f64>,
    #[serde(default)]
    pub immutable: bool,
    #[serde(default)]
    pub source_app: Option<String>,
    #[serde(default)]
    pub source_type: Option<String>,
    #[serde(default)]
    pub source_event_id: Option<String>,
    /// Set by the transport, never from the wire: direct mode is honored
    /// only for trusted local callers.
    #[serde(skip)]
    pub trusted_direct: bool,
}

fn empty_object() -> serde_json::Value {
    serde_json::Value::Object(Default::default())
}

fn default_namespace() -> String {
    "default".into()
}

#[derive(Debug, Clone, Serialize)]
pub struct WriteResponse {
    #[serde(flatten)]
    pub outcome: CommitOutcome,
    pub idempotent: bool,
}

/// The staging engine. One per kernel.
pub struct Staging {
    store: Arc<Store>,
    index: Arc<dyn VectorIndex>,
    embedder: Arc<dyn Embedder>,
    llm: Arc<dyn Llm>,
    config: Arc<Config>,
    quota: WriteQuota,
}

impl Staging {
    pub fn new(
        store: Arc<Store>,
        index: Arc<dyn VectorIndex>,
        embedder: Arc<dyn Embedder>,
        llm: Arc<dyn Llm>,
        config: Arc<Config>,
    ) -> Staging {
        let quota = WriteQuota::new(&config.policy);
        Staging {
            store,
            index,
            embedder,
            llm,
            config,
            quota,
        }
    }

    // ── Propose ──────────────────────────────────────────────────────

    pub async fn propose_write(
        &self,
        ctx: &RequestContext,
        request: &WriteRequest,
    ) -> Result<WriteResponse> {
        ctx.require_capability(Capability::ProposeWrite)?;
        let content = request.content.trim();
        if content.is_empty() {
            return Err(Error::BadRequest("content is required".into()));
        }
        let agent_id = ctx
            .agent_id()
            .map(String::from)
            .or_else(|| request.agent_id.clone());

        // Idempotency: a prior successful write with the same
        // (agent_id, source_event_id) replays its result untouched.
        if let Some(source_event_id) = request.source_event_id.as_deref() {
            if let Some(prior) = self.store.get_commit_by_source_event(
                &request.user_id,
                agent_id.as_deref(),
                source_event_id,
            )? {
                return Ok(WriteResponse {
                    outcome: outcome_for_commit(&prior),
                    idempotent: true,
                });
            }
        }

        self.quota
            .check_and_record(&request.user_id, agent_id.as_deref())?;

        let scope = detect_scope(
            request.scope.as_deref(),
            &request.metadata,
            &request.categories,
            content,
        );
        if let Some(allowed) = ctx.allowed_scopes() {
            if !allowed.contains(&scope) {
                return Err(Error::ScopeDenied(scope.to_string()));
            }
        }
        if let Some(allowed) = ctx.allowed_namespaces() {
            if !allowed.contains(&request.namespace) {
                return Err(Error::NamespaceDenied(request.namespace.clone()));
            }
        }

        let facts = if request.infer {
            let mut facts = extract_facts(self.llm.as_ref(), content).await;
            if facts.is_empty() {
                facts = split_sentences(content);
            }
            if facts.is_empty() {
                facts.push(content.to_string());
            }
            facts
        } else {
            vec![content.to_string()]
        };

        // Risk checks per fact: invariant contradictions first (regex,
        // deterministic), then semantic near-conflicts.
        let mut conflicts: Vec<ConflictNote> = Vec::new();
        let mut invariant_contradiction: Option<ConflictNote> = None;
        for fact in &facts {
            for identity in identity_facts(fact) {
                if let Some(existing) = self.store.get_invariant(&request.user_id, identity.key)? {
                    if !existing
                        .invariant_value
                        .eq_ignore_ascii_case(&identity.value)
                    {
                        let note = ConflictNote {
                            kind: "invariant".into(),
                            conflict_key: Some(identity.key.to_string()),
                            existing_memory_id: existing.source_memory_id.clone(),
                            similarity: None,
                            detail: format!(
                                "{} is {:?}, proposed {:?}",
                                identity.key, existing.invariant_value, identity.value
                            ),
                        };
                        conflicts.push(note.clone());
                        invariant_contradiction.get_or_insert(note);
                    }
                }
            }

            let embedding = self.embedder.embed(fact).await?;
            let neighbors = self
                .index
                .search(&embedding, 3, &SearchFilters::for_user(&request.user_id))
                .await?;
            for neighbor in neighbors {
                if neighbor.score >= self.config.decay.conflict_similarity_threshold {
                    conflicts.push(ConflictNote {
                        kind: "semantic".into(),
                        conflict_key: None,
                        existing_memory_id: Some(neighbor.id.clone()),
                        similarity: Some(neighbor.score),
                        detail: format!(
                            "near-duplicate of existing memory (cosine {:.3})",
                            neighbor.score
                        ),
                    });
                }
            }
        }

        let risk_score = if invariant_contradiction.is_some() {
            0.9
        } else {
            conflicts
                .iter()
                .filter_map(|c| c.similarity)
                .fold(0.0f64, f64::max)
                * 0.5
        };
        let checks = CommitChecks {
            invariants_ok: invariant_contradiction.is_none(),
            conflicts: conflicts.clone(),
            risk_score,
            apply_error: None,
        };

        let status = if invariant_contradiction.is_some() {
            CommitStatus::AutoStashed
        } else {
            CommitStatus::Pending
        };
        let now = Utc::now();
        let commit = ProposalCommit {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: request.user_id.clone(),
            agent_id: agent_id.clone(),
            scope: Some(scope.as_str().to_string()),
            status,
            checks,
            preview: serde_json::json!({ "facts": facts }),
            provenance: serde_json::json!({
                "source_app": request.source_app,
                "source_type": request.source_type,
            }),
            created_at: now,
            updated_at: now,
        };

        let changes: Vec<ProposalChange> = facts
            .iter()
            .map(|fact| ProposalChange {
                id: uuid::Uuid::new_v4().to_string(),
                commit_id: commit.id.clone(),
                op: ChangeOp::Add,
                target: "memory".into(),
                target_id: None,
                patch: serde_json::json!({
                    "content": fact,
                    "user_id": request.user_id,
                    "agent_id": agent_id,
                    "namespace": request.namespace,
                    "confidentiality_scope": scope,
                    "memory_type": request.memory_type.unwrap_or_default(),
                    "importance": request.importance.unwrap_or(0.5).clamp(0.0, 1.0),
                    "immutable": request.immutable,
                    "categories": request.categories,
                    "metadata": request.metadata,
                    "source_app": request.source_app,
                    "source_type": request.source_type,
                    "source_event_id": request.source_event_id,
                }),
                created_at: now,
            })
            .collect();

        self.store.add_commit(&commit, &changes)?;
        self.store
            .record_agent_proposal(&request.user_id, agent_id.as_deref(), status)?;

        if let Some(note) = invariant_contradiction {
            let stash = ConflictStash {
                id: uuid::Uuid::new_v4().to_string(),
                user_id: request.user_id.clone(),
                conflict_key: note.conflict_key.clone().unwrap_or_default(),
                existing: serde_json::json!({
                    "invariant_key": note.conflict_key,
                    "detail": note.detail,
                    "source_memory_id": note.existing_memory_id,
                }),
                proposed: serde_json::json!({ "content": content }),
                resolution: StashResolution::Unresolved,
                source_commit_id: Some(commit.id.clone()),
                created_at: now,
                resolved_at: None,
            };
            self.store.add_conflict_stash(&stash)?;
            tracing::info!(
                commit_id = %commit.id,
                stash_id = %stash.id,
                conflict_key = %stash.conflict_key,
                "proposal auto-stashed on invariant contradiction"
            );
            return Ok(WriteResponse {
                outcome: CommitOutcome::AutoStashed {
                    commit_id: commit.id,
                    stash_id: stash.id,
                },
                idempotent: false,
            });
        }

        // Trusted direct writes apply immediately.
        if request.mode == WriteMode::Direct && request.trusted_direct {
            let outcome = self.approve_internal(&commit.id, false).await?;
            return Ok(WriteResponse {
                outcome,
                idempotent: false,
            });
        }

        // Trust-gated auto-merge.
        if self.automerge_eligible(&request.user_id, agent_id.as_deref())? {
            let outcome = self.approve_internal(&commit.id, true).await?;
            return Ok(WriteResponse {
                outcome,
                idempotent: false,
            });
        }

        Ok(WriteResponse {
            outcome: CommitOutcome::Pending {
                commit_id: commit.id,
            },
            idempotent: false,
        })
    }

    fn automerge_eligible(&self, user_id: &str, agent_id: Option<&str>) -> Result<bool> {
        let automerge = &self.config.automerge;
        if !automerge.enabled {
            return Ok(false);
        }
        let Some(agent_id) = agent_id else {
            return Ok(false);
        };
        let trust = self.store.get_agent_trust(user_id, agent_id)?;
        Ok(trust.trust_score >= automerge.trust_threshold
            && trust.total_proposals >= automerge.min_total
            && trust.approved_proposals >= automerge.min_approved
            && trust.reject_rate() <= automerge.max_reject_rate)
    }

    // ── Approve / reject ─────────────────────────────────────────────

    pub async fn approve_commit(
        &self,
        ctx: &RequestContext,
        commit_id: &str,
    ) -> Result<CommitOutcome> {
        ctx.require_capability(Capability::ReviewCommits)?;
        self.approve_internal(commit_id, false).await
    }

    async fn approve_internal(&self, commit_id: &str, auto_merged: bool) -> Result<CommitOutcome> {
        let commit = self
            .store
            .get_commit(commit_id)?
            .ok_or_else(|| Error::NotFound(format!("commit {commit_id}")))?;

        // Re-approval is idempotent: return the recorded result, no
        // re-apply.
        if commit.status == CommitStatus::Approved {
            let memory_ids = commit
                .provenance
                .get("applied_memory_ids")
                .and_then(|v| v.as_array())
                .map(|ids| {
                    ids.iter()
                        .filter_map(|v| v.as_str())
                        .map(String::from)
                        .collect()
                })
                .unwrap_or_default();
            return Ok(CommitOutcome::Approved {
                commit_id: commit.id,
                auto_merged: false,
                memory_ids,
            });
        }
        if commit.status == CommitStatus::Rejected {
            return Err(Error::BadRequest(format!(
                "commit {commit_id} was already rejected"
            )));
        }

        let moved = self.store.transition_commit_status(
            commit_id,
            &[CommitStatus::Pending, CommitStatus::AutoStashed],
            CommitStatus::Approved,
            None,
        )?;
        if !moved {
            // Lost the CAS race; re-read and report the settled state.
            return self.approve_internal_settled(commit_id).await;
        }

        match self.apply_changes(&commit).await {
            Ok(memory_ids) => {
                let mut provenance = commit.provenance.clone();
                provenance["applied_memory_ids"] = serde_json::json!(memory_ids);
                self.store.set_commit_provenance(commit_id, &provenance)?;

                // Record the idempotency key only after a successful apply.
                if let Some(source_event_id) = first_source_event(&commit, &self.store)? {
                    self.store
                        .set_commit_source_event(commit_id, &source_event_id)?;
                }
                self.store.record_agent_outcome(
                    &commit.user_id,
                    commit.agent_id.as_deref(),
                    CommitStatus::Approved,
                )?;
                Ok(CommitOutcome::Approved {
                    commit_id: commit.id,
                    auto_merged,
                    memory_ids,
                })
            }
            Err((rolled_back, error)) => {
                let checks = CommitChecks {
                    apply_error: Some(error.to_string()),
                    ..commit.checks.clone()
                };
                self.store.transition_commit_status(
                    commit_id,
                    &[CommitStatus::Approved],
                    CommitStatus::Pending,
                    Some(&checks),
                )?;
                tracing::warn!(
                    commit_id,
                    rolled_back,
                    error = %error,
                    "commit apply failed; all changes rolled back"
                );
                Ok(CommitOutcome::ApplyFailed {
                    commit_id: commit.id,
                    rolled_back,
                    error: "Commit apply failed".into(),
                })
            }
        }
    }

    async fn approve_internal_settled(&self, commit_id: &str) -> Result<CommitOutcome> {
        let commit = self
            .store
            .get_commit(commit_id)?
            .ok_or_else(|| Error::NotFound(format!("commit {commit_id}")))?;
        match commit.status {
            CommitStatus::Approved => Ok(CommitOutcome::Approved {
                commit_id: commit.id,
                auto_merged: false,
                memory_ids: Vec::new(),
            }),
            CommitStatus::Rejected => Ok(CommitOutcome::Rejected {
                commit_id: commit.id,
            }),
            _ => Ok(CommitOutcome::Pending {
                commit_id: commit.id,
            }),
        }
    }

    pub fn reject_commit(&self, ctx: &RequestContext, commit_id: &str) -> Result<CommitOutcome> {
        ctx.require_capability(Capability::ReviewCommits)?;
        let commit = self
            .store
            .get_commit(commit_id)?
            .ok_or_else(|| Error::NotFound(format!("commit {commit_id}")))?;
        if commit.status == CommitStatus::Rejected {
            return Ok(CommitOutcome::Rejected {
                commit_id: commit.id,
            });
        }
        let moved = self.store.transition_commit_status(
            commit_id,
            &[CommitStatus::Pending, CommitStatus::AutoStashed],
            CommitStatus::Rejected,
            None,
        )?;
        if !moved {
            return Err(Error::BadRequest(format!(
                "commit {commit_id} is not pending"
            )));
        }
        self.store.record_agent_outcome(
            &commit.user_id,
            commit.agent_id.as_deref(),
            CommitStatus::Rejected,
        )?;
        Ok(CommitOutcome::Rejected {
            commit_id: commit.id,
        })
    }

    // ── Conflict resolution ──────────────────────────────────────────

    pub async fn resolve_conflict(
        &self,
        ctx: &RequestContext,
        stash_id: &str,
        resolution: StashResolution,
    ) -> Result<serde_json::Value> {
        ctx.require_capability(Capability::ResolveConflicts)?;
        if resolution == StashResolution::Unresolved {
            return Err(Error::BadRequest(
                "resolution must be KEEP_EXISTING, ACCEPT_PROPOSED or KEEP_BOTH".into(),
            ));
        }
        let stash = self
            .store
            .get_conflict_stash(stash_id)?
            .ok_or_else(|| Error::NotFound(format!("conflict stash {stash_id}")))?;
        if !self.store.resolve_conflict_stash(stash_id, resolution)? {
            return Err(Error::BadRequest(format!(
                "conflict {stash_id} is already resolved"
            )));
        }

        let mut commit_outcome = None;
        if let Some(commit_id) = stash.source_commit_id.as_deref() {
            let outcome = match resolution {
                StashResolution::AcceptProposed | StashResolution::KeepBoth => {
                    let outcome = self.approve_internal(commit_id, false).await?;
                    // Accepting the proposal also moves the invariant.
                    if resolution == StashResolution::AcceptProposed {
                        self.update_invariant_from_stash(&stash)?;
                    }
                    Some(outcome)
                }
                StashResolution::KeepExisting => {
                    let moved = self.store.transition_commit_status(
                        commit_id,
                        &[CommitStatus::Pending, CommitStatus::AutoStashed],
                        CommitStatus::Rejected,
                        None,
                    )?;
                    if moved {
                        self.store.record_agent_outcome(
                            &stash.user_id,
                            self.store
                                .get_commit(commit_id)?
                                .and_then(|c| c.agent_id)
                                .as_deref(),
                            CommitStatus::Rejected,
                        )?;
                    }
                    Some(CommitOutcome::Rejected {
                        commit_id: commit_id.to_string(),
                    })
                }
                StashResolution::Unresolved => None,
            };
            commit_outcome = outcome;
        }

        Ok(serde_json::json!({
            "stash_id": stash_id,
            "resolution": resolution,
            "commit_outcome": commit_outcome,
        }))
    }

    fn update_invariant_from_stash(&self, stash: &ConflictStash) -> Result<()> {
        let proposed_content = stash
            .proposed
            .get("content")
            .and_then(|c| c.as_str())
            .unwrap_or_default();
        for identity in identity_facts(proposed_content) {
            if identity.key == stash.conflict_key {
                let now = Utc::now();
                self.store.upsert_invariant(&InvariantRecord {
                    id: uuid::Uuid::new_v4().to_string(),
                    user_id: stash.user_id.clone(),
                    invariant_key: identity.key.to_string(),
                    invariant_value: identity.value,
                    category: "identity".into(),
                    confidence: 0.9,
                    source_memory_id: None,
                    created_at: now,
                    updated_at: now,
                })?;
            }
        }
        Ok(())
    }

    // ── Apply ────────────────────────────────────────────────────────

    /// Apply all changes of an approved commit in order. On any failure,
    /// undo everything applied so far and report how many changes were
    /// rolled back. This is the kernel's only multi-memory atomicity
    /// guarantee.
    async fn apply_changes(
        &self,
        commit: &ProposalCommit,
    ) -> std::result::Result<Vec<String>, (usize, Error)> {
        let changes = self
            .store
            .get_commit_changes(&commit.id)
            .map_err(|e| (0, Error::from(e)))?;

        let mut applied: Vec<AppliedChange> = Vec::new();
        let mut memory_ids: Vec<String> = Vec::new();

        for change in &changes {
            let result = match change.op {
                ChangeOp::Add => self.apply_add(commit, change).await,
                ChangeOp::Update => self.apply_update(change).await,
                ChangeOp::Delete => self.apply_delete(change).await,
            };
            match result {
                Ok(outcome) => {
                    if let AppliedChange::Added(id) = &outcome {
                        memory_ids.push(id.clone());
                    }
                    applied.push(outcome);
                }
                Err(error) => {
                    let rolled_back = applied.len();
                    self.rollback(&applied).await;
                    return Err((rolled_back, error));
                }
            }
        }

        // Post-apply bookkeeping outside the atomicity contract: scene
        // routing, profile tracking and invariant upserts are best-effort.
        for memory_id in &memory_ids {
            if let Ok(Some(memory)) = self.store.get_memory(memory_id, false) {
                if let Err(e) =
                    scene::track_memory(&self.store, self.llm.as_ref(), &self.config.scene, &memory)
                        .await
                {
                    tracing::warn!(error = %e, "scene tracking failed");
                }
                if let Err(e) = profile::track_memory(&self.store, &self.config.profile, &memory) {
                    tracing::warn!(error = %e, "profile tracking failed");
                }
                for identity in identity_facts(&memory.content) {
                    let existing = self
                        .store
                        .get_invariant(&memory.user_id, identity.key)
                        .ok()
                        .flatten();
                    if existing.is_none() {
                        let now = Utc::now();
                        let _ = self.store.upsert_invariant(&InvariantRecord {
                            id: uuid::Uuid::new_v4().to_string(),
                            user_id: memory.user_id.clone(),
                            invariant_key: identity.key.to_string(),
                            invariant_value: identity.value,
                            category: "identity".into(),
                            confidence: 0.8,
                            source_memory_id: Some(memory.id.clone()),
                            created_at: now,
                            updated_at: now,
                        });
                    }
                }
            }
        }

        Ok(memory_ids)
    }

    async fn apply_add(
        &self,
        commit: &ProposalCommit,
        change: &ProposalChange,
    ) -> Result<AppliedChange> {
        let patch = &change.patch;
        let content = patch
            .get("content")
            .and_then(|c| c.as_str())
            .ok_or_else(|| Error::BadRequest("ADD change missing content".into()))?;

        let mut memory = MemoryRecord::new(content, &commit.user_id);
        memory.agent_id = commit.agent_id.clone();
        if let Some(namespace) = patch.get("namespace").and_then(|v| v.as_str()) {
            memory.namespace = namespace.to_string();
        }
        if let Some(scope) = patch.get("confidentiality_scope").and_then(|v| v.as_str()) {
            memory.confidentiality_scope =
                engram_domain::memory::ConfidentialityScope::parse_lenient(scope);
        }
        if let Some(kind) = patch.get("memory_type") {
            memory.memory_type = serde_json::from_value(kind.clone()).unwrap_or_default();
        }
        if let Some(importance) = patch.get("importance").and_then(|v| v.as_f64()) {
            memory.importance = importance.clamp(0.0, 1.0);
        }
        memory.immutable = patch
            .get("immutable")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        if let Some(categories) = patch.get("categories") {
            memory.categories = serde_json::from_value(categories.clone()).unwrap_or_default();
        }
        if let Some(metadata) = patch.get("metadata") {
            memory.metadata = metadata.clone();
        }
        for (field, target) in [
            ("source_app", &mut memory.source_app),
            ("source_type", &mut memory.source_type),
            ("source_event_id", &mut memory.source_event_id),
        ] {
            *target = patch.get(field).and_then(|v| v.as_str()).map(String::from);
        }

        memory.embedding = Some(self.embedder.embed(&memory.content).await?);
        self.store.add_memory(&memory)?;
        self.index
            .insert(
                &memory.id,
                memory.embedding.clone().unwrap_or_default(),
                PointPayload {
                    user_id: memory.user_id.clone(),
                    agent_id: memory.agent_id.clone(),
                    namespace: Some(memory.namespace.clone()),
                    memory_type: Some(memory.memory_type),
                },
            )
            .await?;
        self.store.log_event(
            &memory.id,
            "ADD",
            serde_json::json!({"commit_id": change.commit_id}),
        )?;
        Ok(AppliedChange::Added(memory.id))
    }

    async fn apply_update(&self, change: &ProposalChange) -> Result<AppliedChange> {
        let target_id = change
            .target_id
            .as_deref()
            .ok_or_else(|| Error::BadRequest("UPDATE change missing target_id".into()))?;
        let prior = self
            .store
            .get_memory(target_id, false)?
            .ok_or_else(|| Error::NotFound(format!("memory {target_id}")))?;

        let mut fields: Vec<MemoryField> = Vec::new();
        let mut new_embedding: Option<Vec<f32>> = None;
        if let Some(content) = change.patch.get("content").and_then(|v| v.as_str()) {
            fields.push(MemoryField::Content(content.to_string()));
            let embedding = self.embedder.embed(content).await?;
            fields.push(MemoryField::Embedding(Some(embedding.clone())));
            new_embedding = Some(embedding);
        }
        if let Some(importance) = change.patch.get("importance").and_then(|v| v.as_f64()) {
            fields.push(MemoryField::Importance(importance.clamp(0.0, 1.0)));
        }
        if let Some(categories) = change.patch.get("categories") {
            fields.push(MemoryField::Categories(
                serde_json::from_value(categories.clone()).unwrap_or_default(),
            ));
        }
        if fields.is_empty() {
            return Err(Error::BadRequest("UPDATE change with no fields".into()));
        }
        self.store.update_memory(target_id, &fields)?;
        if let Some(embedding) = new_embedding {
            self.index
                .insert(
                    target_id,
                    embedding,
                    PointPayload {
                        user_id: prior.user_id.clone(),
                        agent_id: prior.agent_id.clone(),
                        namespace: Some(prior.namespace.clone()),
                        memory_type: Some(prior.memory_type),
                    },
                )
                .await?;
        }
        self.store.log_event(
            target_id,
            "UPDATE",
            serde_json::json!({"commit_id": change.commit_id}),
        )?;
        Ok(AppliedChange::Updated(Box::new(prior)))
    }

    async fn apply_delete(&self, change: &ProposalChange) -> Result<AppliedChange> {
        let target_id = change
            .target_id
            .as_deref()
            .ok_or_else(|| Error::BadRequest("DELETE change missing target_id".into()))?;
        let prior = self
            .store
            .get_memory(target_id, false)?
            .ok_or_else(|| Error::NotFound(format!("memory {target_id}")))?;
        self.store.delete_memory(target_id, true)?;
        self.index.delete(&[target_id.to_string()]).await?;
        self.store.log_event(
            target_id,
            "DELETE",
            serde_json::json!({"commit_id": change.commit_id}),
        )?;
        Ok(AppliedChange::Deleted(Box::new(prior)))
    }

    /// Undo applied changes in reverse order: delete added rows and their
    /// vectors, restore updated rows, clear tombstones.
    async fn rollback(&self, applied: &[AppliedChange]) {
        for change in applied.iter().rev() {
            let result: Result<()> = match change {
                AppliedChange::Added(id) => {
                    let _ = self.store.delete_memory(id, false);
                    self.index.delete(&[id.clone()]).await
                }
                AppliedChange::Updated(prior) => {
                    let _ = self.store.update_memory(
                        &prior.id,
                        &[
                            MemoryField::Content(prior.content.clone()),
                            MemoryField::Importance(prior.importance),
                            MemoryField::Categories(prior.categories.clone()),
                            MemoryField::Embedding(prior.embedding.clone()),
                        ],
                    );
                    match &prior.embedding {
                        Some(embedding) => {
                            self.index
                                .insert(
                                    &prior.id,
                                    embedding.clone(),
                                    PointPayload {
                                        user_id: prior.user_id.clone(),
                                        agent_id: prior.agent_id.clone(),
                                        namespace: Some(prior.namespace.clone()),
                                        memory_type: Some(prior.memory_type),
                                    },
                                )
                                .await
                        }
                        None => Ok(()),
                    }
                }
                AppliedChange::Deleted(prior) => {
                    let _ = self.store.restore_memory(&prior.id);
                    match &prior.embedding {
                        Some(embedding) => {
                            self.index
                                .insert(
                                    &prior.id,
                                    embedding.clone(),
                                    PointPayload {
                                        user_id: prior.user_id.clone(),
                                        agent_id: prior.agent_id.clone(),
                                        namespace: Some(prior.namespace.clone()),
                                        memory_type: Some(prior.memory_type),
                                    },
                                )
                                .await
                        }
                        None => Ok(()),
                    }
                }
            };
            if let Err(e) = result {
                tracing::error!(error = %e, "rollback step failed");
            }
        }
    }

    pub fn list_commits(
        &self,
        ctx: &RequestContext,
        user_id: Option<&str>,
        agent_id: Option<&str>,
        status: Option<&str>,
        limit: usize,
    ) -> Result<Vec<ProposalCommit>> {
        ctx.require_capability(Capability::ReviewCommits)?;
        let status = match status {
            Some(raw) => Some(
                CommitStatus::parse(raw)
                    .ok_or_else(|| Error::InvalidStatus(raw.to_string()))?,
            ),
            None => None,
        };
        Ok(self.store.list_commits(user_id, agent_id, status, limit)?)
    }
}

enum AppliedChange {
    Added(String),
    Updated(Box<MemoryRecord>),
    Deleted(Box<MemoryRecord>),
}

fn outcome_for_commit(commit: &ProposalCommit) -> CommitOutcome {
    match commit.status {
        CommitStatus::Pending => CommitOutcome::Pending {
            commit_id: commit.id.clone(),
        },
        CommitStatus::AutoStashed => CommitOutcome::AutoStashed {
            commit_id: commit.id.clone(),
            stash_id: String::new(),
        },
        CommitStatus::Approved => CommitOutcome::Approved {
            commit_id: commit.id.clone(),
            auto_merged: false,
            memory_ids: commit
                .provenance
                .get("applied_memory_ids")
                .and_then(|v| v.as_array())
                .map(|ids| {
                    ids.iter()
                        .filter_map(|v| v.as_str())
                        .map(String::from)
                        .collect()
                })
                .unwrap_or_default(),
        },
        CommitStatus::Rejected => CommitOutcome::Rejected {
            commit_id: commit.id.clone(),
        },
    }
}

fn first_source_event(
    commit: &ProposalCommit,
    store: &Store,
) -> Result<Option<String>> {
    for change in store.get_commit_changes(&commit.id)? {
        if let Some(source_event_id) = change
            .patch
            .get("source_event_id")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
        {
            return Ok(Some(source_event_id.to_string()));
        }
    }
    Ok(None)
}
