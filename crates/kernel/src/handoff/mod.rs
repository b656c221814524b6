//! Cross-agent session bus: handoff lanes, automatic checkpoints with
//! optimistic concurrency, resume packets and the legacy session-digest
//! surface.

pub mod merge;
pub mod repo;

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use engram_domain::capability::Capability;
use engram_domain::config::HandoffConfig;
use engram_domain::error::{Error, Result};
use engram_domain::handoff::{
    normalize_status_list, HandoffCheckpoint, HandoffLane, HandoffSession, LaneConflictRecord,
    LaneState, LaneStatus, MergeConflict, RepoIdentity,
};
use engram_domain::memory::ConfidentialityScope;
use engram_domain::session::AgentPolicy;
use engram_index::{SearchFilters, VectorIndex};
use engram_providers::Embedder;
use engram_store::handoff::LaneUpdate;
use engram_store::{MemoryQuery, Store};

use merge::{dedupe_conflicts, merge_state, CheckpointPayload};

/// Minimum lane score required to reuse an existing lane instead of
/// creating a new one.
const LANE_REUSE_THRESHOLD: f64 = 0.45;

#[derive(Debug, Clone, Deserialize)]
pub struct ResumeArgs {
    pub user_id: String,
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub repo_path: Option<String>,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default = "default_lane_type")]
    pub lane_type: String,
    #[serde(default)]
    pub objective: Option<String>,
    #[serde(default)]
    pub agent_role: Option<String>,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default)]
    pub statuses: Option<Vec<String>>,
    #[serde(default = "default_true")]
    pub auto_create: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CheckpointArgs {
    pub user_id: String,
    pub agent_id: String,
    #[serde(default)]
    pub payload: CheckpointPayload,
    #[serde(default = "default_event_type")]
    pub event_type: String,
    #[serde(default)]
    pub repo_path: Option<String>,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub lane_id: Option<String>,
    #[serde(default = "default_lane_type")]
    pub lane_type: String,
    #[serde(default)]
    pub objective: Option<String>,
    #[serde(default)]
    pub agent_role: Option<String>,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default = "default_scope")]
    pub confidentiality_scope: String,
    #[serde(default)]
    pub expected_version: Option<i64>,
}

fn default_lane_type() -> String {
    "general".into()
}

fn default_namespace() -> String {
    "default".into()
}

fn default_scope() -> String {
    "work".into()
}

fn default_event_type() -> String {
    "tool_complete".into()
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize)]
pub struct RelatedMemory {
    pub id: String,
    pub memory: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RelatedScene {
    pub id: String,
    pub summary: Option<String>,
    pub topic: Option<String>,
    pub start_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct WarmContext {
    pub related_memories: Vec<RelatedMemory>,
    pub related_scenes: Vec<RelatedScene>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResumePacket {
    pub lane_id: String,
    pub repo_id: Option<String>,
    pub repo_path: Option<String>,
    pub branch: Option<String>,
    pub lane_type: String,
    pub status: LaneStatus,
    pub objective: Option<String>,
    pub lane_version: i64,
    pub from_agent: Option<String>,
    pub agent_role: Option<String>,
    pub task_summary: String,
    pub decisions_made: Vec<String>,
    pub files_touched: Vec<String>,
    pub todos_remaining: Vec<String>,
    pub blockers: Vec<String>,
    pub key_commands: Vec<String>,
    pub test_results: Vec<String>,
    pub context_snapshot: Option<String>,
    pub last_checkpoint_at: DateTime<Utc>,
    pub next_actions: Vec<String>,
    pub related_memories: Vec<RelatedMemory>,
    pub related_scenes: Vec<RelatedScene>,
    pub created_new_lane: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warm_context: Option<WarmContext>,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct Enrichment {
    pub linked_memories: usize,
    pub linked_scenes: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckpointResult {
    pub lane_id: String,
    pub checkpoint_id: String,
    pub status: LaneStatus,
    pub version: i64,
    pub conflicts: Vec<MergeConflict>,
    pub enrichment: Enrichment,
}

/// The session bus. One instance per kernel, shared across requests.
pub struct HandoffBus {
    store: Arc<Store>,
    index: Arc<dyn VectorIndex>,
    embedder: Arc<dyn Embedder>,
    config: HandoffConfig,
    bootstrapped: parking_lot::Mutex<HashSet<String>>,
}

impl HandoffBus {
    pub fn new(
        store: Arc<Store>,
        index: Arc<dyn VectorIndex>,
        embedder: Arc<dyn Embedder>,
        config: HandoffConfig,
    ) -> HandoffBus {
        HandoffBus {
            store,
            index,
            embedder,
            config,
            bootstrapped: parking_lot::Mutex::new(HashSet::new()),
        }
    }

    // ── Resume ───────────────────────────────────────────────────────

    pub async fn auto_resume(&self, args: &ResumeArgs) -> Result<Option<ResumePacket>> {
        self.bootstrap_auto_trusted_policy(&args.user_id, args.agent_id.as_deref(), &args.namespace)?;
        let identity = repo::canonicalize_repo_identity(
            args.repo_path.as_deref(),
            args.branch.as_deref(),
        );
        let statuses =
            normalize_status_list(args.statuses.as_deref(), &self.config.resume_statuses)?;

        let Some((lane, created)) = self.select_or_create_lane(
            &args.user_id,
            &identity,
            &args.lane_type,
            args.objective.as_deref(),
            &args.namespace,
            &statuses,
            args.auto_create,
        )? else {
            return Ok(None);
        };

        let checkpoint = self.store.get_latest_checkpoint(&lane.id)?;
        let mut packet = self.build_resume_packet(&lane, checkpoint.as_ref())?;
        packet.created_new_lane = created;
        if created {
            packet.warm_context = Some(
                self.warm_context(&args.user_id, &identity, args.objective.as_deref())
                    .await?,
            );
        }
        Ok(Some(packet))
    }

    // ── Checkpoint ───────────────────────────────────────────────────

    pub async fn auto_checkpoint(&self, args: &CheckpointArgs) -> Result<CheckpointResult> {
        self.bootstrap_auto_trusted_policy(&args.user_id, Some(&args.agent_id), &args.namespace)?;
        let identity = repo::canonicalize_repo_identity(
            args.repo_path.as_deref(),
            args.branch.as_deref(),
        );

        // Resolve lane: explicit id when it belongs to this user, else
        // re-select or create.
        let lane = match &args.lane_id {
            Some(lane_id) => self
                .store
                .get_lane(lane_id)?
                .filter(|lane| lane.user_id == args.user_id),
            None => None,
        };
        let lane = match lane {
            Some(lane) => lane,
            None => self
                .select_or_create_lane(
                    &args.user_id,
                    &identity,
                    &args.lane_type,
                    args.objective.as_deref(),
                    &args.namespace,
                    &self.config.resume_statuses.clone(),
                    true,
                )?
                .map(|(lane, _)| lane)
                .ok_or_else(|| Error::Other("unable to resolve or create handoff lane".into()))?,
        };

        let now = Utc::now();
        let mut payload = args.payload.normalized();
        if payload.task_summary.is_none() {
            payload.task_summary = args.objective.clone().filter(|o| !o.trim().is_empty());
        }

        let previous_state = lane.current_state.clone();
        let (mut merged_state, mut conflicts) = merge_state(&previous_state, &payload);

        let checkpoint = HandoffCheckpoint {
            id: uuid::Uuid::new_v4().to_string(),
            lane_id: lane.id.clone(),
            user_id: args.user_id.clone(),
            agent_id: args.agent_id.clone(),
            agent_role: args.agent_role.clone(),
            event_type: args.event_type.clone(),
            task_summary: Some(merged_state.task_summary.clone()).filter(|s| !s.is_empty()),
            state: merged_state.clone(),
            merge_conflicts: conflicts.clone(),
            created_at: now,
        };
        self.store.add_checkpoint(&checkpoint)?;

        let mut enrichment = Enrichment::default();
        if self.config.auto_enrich {
            enrichment = self
                .enrich_checkpoint(&checkpoint.id, &args.user_id, &identity, &merged_state.task_summary, now)
                .await?;
        }

        let lane_status = payload
            .status
            .as_deref()
            .map(|s| LaneStatus::parse_or(s, lane.status))
            .unwrap_or(lane.status);
        let update = LaneUpdate {
            status: Some(lane_status),
            objective: Some(
                Some(merged_state.task_summary.clone())
                    .filter(|s| !s.is_empty())
                    .or_else(|| lane.objective.clone())
                    .unwrap_or_default(),
            ),
            current_state: Some(merged_state.clone()),
            last_checkpoint_at: Some(now),
            namespace: Some(args.namespace.clone()),
            confidentiality_scope: Some(args.confidentiality_scope.clone()),
            repo_id: identity.repo_id.clone(),
            repo_path: identity.repo_path.clone(),
            branch: identity.branch.clone().or_else(|| lane.branch.clone()),
            bump_version: true,
        };

        let expected = args.expected_version.or(Some(lane.version));
        let updated = self.store.update_lane(&lane.id, &update, expected)?;
        if !updated {
            // Optimistic conflict: refresh, re-merge against the fresh
            // state, accumulate conflicts, write unconditionally.
            let fresh = self.store.get_lane(&lane.id)?.unwrap_or(lane.clone());
            let (resolved_state, merge_conflicts) = merge_state(&fresh.current_state, &payload);
            conflicts = dedupe_conflicts(
                conflicts.into_iter().chain(merge_conflicts).collect(),
            );
            merged_state = resolved_state;
            let retry = LaneUpdate {
                current_state: Some(merged_state.clone()),
                status: Some(lane_status),
                last_checkpoint_at: Some(now),
                bump_version: true,
                ..Default::default()
            };
            self.store.update_lane(&lane.id, &retry, None)?;
        }
        let persisted_version = self
            .store
            .get_lane(&lane.id)?
            .map(|lane| lane.version)
            .unwrap_or(lane.version + 1);

        if !conflicts.is_empty() {
            self.store.add_lane_conflict(&LaneConflictRecord {
                id: uuid::Uuid::new_v4().to_string(),
                lane_id: lane.id.clone(),
                checkpoint_id: Some(checkpoint.id.clone()),
                user_id: args.user_id.clone(),
                conflict_fields: conflicts.iter().map(|c| c.field.clone()).collect(),
                previous_state: serde_json::to_value(&previous_state)?,
                incoming_state: serde_json::to_value(&checkpoint.state)?,
                resolved_state: serde_json::to_value(&merged_state)?,
                created_at: now,
            })?;
        }

        self.store
            .prune_checkpoints(&lane.id, self.config.max_checkpoints_per_lane)?;
        self.store
            .prune_lanes(&args.user_id, self.config.max_lanes_per_user)?;

        Ok(CheckpointResult {
            lane_id: lane.id,
            checkpoint_id: checkpoint.id,
            status: lane_status,
            version: persisted_version,
            conflicts,
            enrichment,
        })
    }

    // ── Lane listing ─────────────────────────────────────────────────

    pub fn list_lanes(
        &self,
        user_id: &str,
        repo_path: Option<&str>,
        statuses: Option<&[String]>,
        limit: usize,
    ) -> Result<Vec<HandoffLane>> {
        let repo_id = repo_path.map(|path| {
            repo::canonicalize_repo_identity(Some(path), None)
                .repo_id
                .unwrap_or_default()
        });
        let statuses = match statuses {
            Some(raw) => Some(normalize_status_list(Some(raw), &[])?),
            None => None,
        };
        Ok(self.store.list_lanes(
            user_id,
            repo_id.as_deref(),
            statuses.as_deref(),
            limit,
        )?)
    }

    // ── Legacy session digests ───────────────────────────────────────

    pub async fn save_session_digest(
        &self,
        user_id: &str,
        agent_id: &str,
        digest: &SessionDigest,
    ) -> Result<HandoffSession> {
        let status = digest
            .status
            .as_deref()
            .map(|s| LaneStatus::parse_or(s, LaneStatus::Paused))
            .unwrap_or(LaneStatus::Paused);
        let event_type = if matches!(status, LaneStatus::Paused | LaneStatus::Active) {
            "agent_pause"
        } else {
            "agent_end"
        };

        // The digest's status rides along on the checkpoint payload so
        // the lane lands in the same state.
        let mut checkpoint_payload = digest.payload.clone();
        if checkpoint_payload.status.is_none() {
            checkpoint_payload.status = Some(status.as_str().to_string());
        }

        let checkpoint = self
            .auto_checkpoint(&CheckpointArgs {
                user_id: user_id.to_string(),
                agent_id: agent_id.to_string(),
                payload: checkpoint_payload,
                event_type: event_type.to_string(),
                repo_path: digest.repo.clone(),
                branch: digest.branch.clone(),
                lane_id: digest.lane_id.clone(),
                lane_type: digest.lane_type.clone().unwrap_or_else(default_lane_type),
                objective: digest.payload.task_summary.clone(),
                agent_role: digest.agent_role.clone(),
                namespace: digest.namespace.clone().unwrap_or_else(default_namespace),
                confidentiality_scope: digest
                    .confidentiality_scope
                    .clone()
                    .unwrap_or_else(default_scope),
                expected_version: None,
            })
            .await?;

        let identity =
            repo::canonicalize_repo_identity(digest.repo.as_deref(), digest.branch.as_deref());
        let now = Utc::now();
        let payload = digest.payload.normalized();
        let session = HandoffSession {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            agent_id: agent_id.to_string(),
            repo: identity.repo_path.clone(),
            repo_id: identity.repo_id.clone(),
            status,
            task_summary: payload.task_summary.clone().unwrap_or_default(),
            decisions_made: payload.decisions_made.clone(),
            files_touched: payload.files_touched.clone(),
            todos_remaining: payload.todos_remaining.clone(),
            blockers: payload.blockers.clone(),
            key_commands: payload.key_commands.clone(),
            test_results: payload.test_results.clone(),
            context_snapshot: payload.context_snapshot.clone(),
            linked_memory_ids: self.store.get_checkpoint_memory_ids(&checkpoint.checkpoint_id)?,
            linked_scene_ids: self.store.get_checkpoint_scene_ids(&checkpoint.checkpoint_id)?,
            lane_id: Some(checkpoint.lane_id.clone()),
            started_at: digest.started_at.unwrap_or(now),
            ended_at: digest.ended_at,
            last_checkpoint_at: now,
            namespace: digest.namespace.clone().unwrap_or_else(default_namespace),
            confidentiality_scope: digest
                .confidentiality_scope
                .clone()
                .unwrap_or_else(default_scope),
        };
        self.store.add_handoff_session(&session)?;
        self.store
            .prune_handoff_sessions(user_id, self.config.max_sessions_per_user)?;
        Ok(session)
    }

    pub fn list_sessions(
        &self,
        user_id: &str,
        agent_id: Option<&str>,
        repo: Option<&str>,
        statuses: Option<&[String]>,
        limit: usize,
    ) -> Result<Vec<HandoffSession>> {
        let repo_id = repo.map(|path| {
            repo::canonicalize_repo_identity(Some(path), None)
                .repo_id
                .unwrap_or_default()
        });
        let statuses = match statuses {
            Some(raw) => Some(normalize_status_list(Some(raw), &[])?),
            None => None,
        };
        Ok(self.store.list_handoff_sessions(
            user_id,
            agent_id,
            repo_id.as_deref(),
            statuses.as_deref(),
            limit,
        )?)
    }

    /// Latest session context for cross-agent resume. Tries the legacy
    /// session rows first (repo-scoped, then any repo), then falls back
    /// to lane state. Explicit status filters are respected strictly.
    pub fn get_last_session(
        &self,
        user_id: &str,
        agent_id: Option<&str>,
        repo: Option<&str>,
        statuses: Option<&[String]>,
    ) -> Result<Option<SessionContext>> {
        let repo_id = repo.map(|path| {
            repo::canonicalize_repo_identity(Some(path), None)
                .repo_id
                .unwrap_or_default()
        });
        let preferred = normalize_status_list(statuses, &self.config.resume_statuses)?;

        let mut repo_candidates: Vec<Option<&str>> = vec![repo_id.as_deref()];
        if repo_id.is_some() {
            repo_candidates.push(None);
        }

        for candidate in &repo_candidates {
            if let Some(session) = self.store.get_last_handoff_session(
                user_id,
                agent_id,
                *candidate,
                Some(&preferred),
            )? {
                return Ok(Some(self.session_context(session)?));
            }
        }

        // Lane fallback before broadening status.
        for candidate in &repo_candidates {
            if let Some(context) =
                self.lane_session_fallback(user_id, agent_id, *candidate, Some(&preferred))?
            {
                return Ok(Some(context));
            }
        }

        // Historical fallback only applies to the default status filter.
        if statuses.is_some() {
            return Ok(None);
        }
        for candidate in &repo_candidates {
            if let Some(session) =
                self.store
                    .get_last_handoff_session(user_id, agent_id, *candidate, None)?
            {
                return Ok(Some(self.session_context(session)?));
            }
        }
        for candidate in &repo_candidates {
            if let Some(context) = self.lane_session_fallback(user_id, agent_id, *candidate, None)? {
                return Ok(Some(context));
            }
        }
        Ok(None)
    }

    // ── Internal ─────────────────────────────────────────────────────

    fn bootstrap_auto_trusted_policy(
        &self,
        user_id: &str,
        agent_id: Option<&str>,
        namespace: &str,
    ) -> Result<()> {
        if !self.config.allow_auto_trusted_bootstrap {
            return Ok(());
        }
        let Some(agent_id) = agent_id.filter(|a| !a.trim().is_empty()) else {
            return Ok(());
        };
        let normalized = agent_id.trim().to_lowercase();
        if !self
            .config
            .auto_trusted_agents
            .iter()
            .any(|a| a.to_lowercase() == normalized)
        {
            return Ok(());
        }
        let cache_key = format!("{user_id}::{normalized}");
        {
            let mut seen = self.bootstrapped.lock();
            if seen.contains(&cache_key) {
                return Ok(());
            }
            seen.insert(cache_key);
        }
        if self.store.get_agent_policy(user_id, agent_id, false)?.is_some() {
            return Ok(());
        }

        let mut capabilities = Capability::default_set();
        capabilities.extend(Capability::handoff_set());
        capabilities.sort();
        let mut namespaces = vec!["default".to_string()];
        let ns = namespace.trim();
        if !ns.is_empty() && !namespaces.iter().any(|n| n == ns) {
            namespaces.push(ns.to_string());
        }
        let now = Utc::now();
        self.store.upsert_agent_policy(&AgentPolicy {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            agent_id: agent_id.to_string(),
            allowed_confidentiality_scopes: ConfidentialityScope::all(),
            allowed_capabilities: capabilities,
            allowed_namespaces: namespaces,
            created_at: now,
            updated_at: now,
        })?;
        tracing::info!(user_id, agent_id, "bootstrapped auto-trusted handoff policy");
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn select_or_create_lane(
        &self,
        user_id: &str,
        identity: &RepoIdentity,
        lane_type: &str,
        objective: Option<&str>,
        namespace: &str,
        statuses: &[LaneStatus],
        auto_create: bool,
    ) -> Result<Option<(HandoffLane, bool)>> {
        let mut candidates =
            self.store
                .list_lanes(user_id, identity.repo_id.as_deref(), Some(statuses), 50)?;
        if candidates.is_empty() {
            candidates = self.store.list_lanes(user_id, None, Some(statuses), 50)?;
        }

        let objective_terms = tokenize(objective);
        let now = Utc::now();
        let best = candidates
            .into_iter()
            .map(|lane| {
                let score = self.score_lane(&lane, identity, &objective_terms, now);
                (lane, score)
            })
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));

        if let Some((lane, score)) = best {
            if score >= LANE_REUSE_THRESHOLD {
                return Ok(Some((lane, false)));
            }
        }
        if !auto_create {
            return Ok(None);
        }

        let lane = HandoffLane {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            repo_id: identity.repo_id.clone(),
            repo_path: identity.repo_path.clone(),
            branch: identity.branch.clone(),
            lane_type: if lane_type.is_empty() {
                default_lane_type()
            } else {
                lane_type.to_string()
            },
            status: LaneStatus::Active,
            objective: objective.map(String::from),
            current_state: LaneState {
                task_summary: objective.unwrap_or_default().to_string(),
                ..Default::default()
            },
            namespace: if namespace.is_empty() {
                default_namespace()
            } else {
                namespace.to_string()
            },
            confidentiality_scope: default_scope(),
            last_checkpoint_at: now,
            version: 0,
            created_at: now,
            updated_at: now,
        };
        self.store.add_lane(&lane)?;
        Ok(Some((lane, true)))
    }

    /// Lane affinity: repo match (+0.55), branch match (+0.15), objective
    /// token overlap (≤ +0.20), small recency bonus, staleness penalty
    /// past the inactivity window.
    fn score_lane(
        &self,
        lane: &HandoffLane,
        identity: &RepoIdentity,
        objective_terms: &HashSet<String>,
        now: DateTime<Utc>,
    ) -> f64 {
        let mut score = 0.0;
        if let (Some(repo_id), Some(lane_repo)) = (&identity.repo_id, &lane.repo_id) {
            if repo_id == lane_repo {
                score += 0.55;
            }
        }
        if let (Some(branch), Some(lane_branch)) = (&identity.branch, &lane.branch) {
            if branch == lane_branch {
                score += 0.15;
            }
        }

        let lane_terms = tokenize(lane.objective.as_deref());
        if !objective_terms.is_empty() && !lane_terms.is_empty() {
            let intersection = objective_terms.intersection(&lane_terms).count() as f64;
            let union = objective_terms.union(&lane_terms).count().max(1) as f64;
            score += (intersection / union) * 0.2;
        }

        let age_minutes = (now - lane.last_checkpoint_at).num_seconds().max(0) as f64 / 60.0;
        score += (0.1 - age_minutes.min(24.0 * 60.0) / (24.0 * 60.0 * 10.0)).max(0.0);
        if age_minutes > self.config.lane_inactivity_minutes as f64
            && lane.status == LaneStatus::Active
        {
            score -= 0.2;
        }
        score
    }

    fn build_resume_packet(
        &self,
        lane: &HandoffLane,
        checkpoint: Option<&HandoffCheckpoint>,
    ) -> Result<ResumePacket> {
        let state = checkpoint
            .map(|cp| cp.state.clone())
            .unwrap_or_else(|| lane.current_state.clone());
        let (related_memories, related_scenes) = match checkpoint {
            Some(checkpoint) => (
                self.related_memories(&self.store.get_checkpoint_memory_ids(&checkpoint.id)?)?,
                self.related_scenes(&self.store.get_checkpoint_scene_ids(&checkpoint.id)?)?,
            ),
            None => (Vec::new(), Vec::new()),
        };

        Ok(ResumePacket {
            lane_id: lane.id.clone(),
            repo_id: lane.repo_id.clone(),
            repo_path: lane.repo_path.clone(),
            branch: lane.branch.clone(),
            lane_type: lane.lane_type.clone(),
            status: lane.status,
            objective: lane.objective.clone(),
            lane_version: lane.version,
            from_agent: checkpoint.map(|cp| cp.agent_id.clone()),
            agent_role: checkpoint.and_then(|cp| cp.agent_role.clone()),
            task_summary: if state.task_summary.is_empty() {
                lane.objective.clone().unwrap_or_default()
            } else {
                state.task_summary.clone()
            },
            decisions_made: state.decisions_made.clone(),
            files_touched: state.files_touched.clone(),
            todos_remaining: state.todos_remaining.clone(),
            blockers: state.blockers.clone(),
            key_commands: state.key_commands.clone(),
            test_results: state.test_results.clone(),
            context_snapshot: state.context_snapshot.clone(),
            last_checkpoint_at: lane.last_checkpoint_at,
            next_actions: state.todos_remaining,
            related_memories,
            related_scenes,
            created_new_lane: false,
            warm_context: None,
        })
    }

    async fn warm_context(
        &self,
        user_id: &str,
        identity: &RepoIdentity,
        objective: Option<&str>,
    ) -> Result<WarmContext> {
        let mut memories: Vec<RelatedMemory> = Vec::new();
        if let Some(objective) = objective.filter(|o| !o.trim().is_empty()) {
            let embedding = self.embedder.embed(objective).await?;
            let hits = self
                .index
                .search(&embedding, 6, &SearchFilters::for_user(user_id))
                .await?;
            let ids: Vec<String> = hits.into_iter().map(|hit| hit.id).collect();
            memories = self.related_memories(&ids)?;
        }
        if memories.is_empty() {
            let recent = self.store.list_memories(&MemoryQuery {
                user_id: Some(user_id.to_string()),
                limit: Some(6),
                ..Default::default()
            })?;
            memories = recent
                .into_iter()
                .map(|m| RelatedMemory {
                    id: m.id,
                    memory: m.content,
                })
                .collect();
        }

        let mut scenes = self.store.list_scenes(Some(user_id), None, 5)?;
        if let Some(repo_path) = identity.repo_path.as_deref() {
            let needle = repo_path.to_lowercase();
            let scoped: Vec<_> = scenes
                .iter()
                .filter(|scene| {
                    scene
                        .location
                        .as_deref()
                        .map(|l| l.to_lowercase().contains(&needle))
                        .unwrap_or(false)
                })
                .cloned()
                .collect();
            if !scoped.is_empty() {
                scenes = scoped;
            }
        }

        Ok(WarmContext {
            related_memories: memories,
            related_scenes: scenes
                .into_iter()
                .take(5)
                .map(|scene| RelatedScene {
                    id: scene.id,
                    summary: scene.summary,
                    topic: scene.topic,
                    start_time: scene.start_time,
                })
                .collect(),
        })
    }

    /// Link up to 10 memories (by embedding over the task summary, with a
    /// keyword fallback) and up to 6 recent scenes (repo-scoped when
    /// possible) onto the checkpoint.
    async fn enrich_checkpoint(
        &self,
        checkpoint_id: &str,
        user_id: &str,
        identity: &RepoIdentity,
        task_summary: &str,
        created_at: DateTime<Utc>,
    ) -> Result<Enrichment> {
        let query = task_summary.trim();
        let mut memory_ids: Vec<String> = Vec::new();

        if !query.is_empty() {
            match self.embedder.embed(query).await {
                Ok(embedding) => {
                    let hits = self
                        .index
                        .search(&embedding, 12, &SearchFilters::for_user(user_id))
                        .await?;
                    for hit in hits {
                        if !memory_ids.contains(&hit.id) {
                            memory_ids.push(hit.id);
                        }
                    }
                }
                Err(e) => tracing::warn!(error = %e, "handoff vector enrichment failed"),
            }
        }
        if memory_ids.is_empty() && !query.is_empty() {
            let terms = tokenize(Some(query));
            let all = self.store.list_memories(&MemoryQuery {
                user_id: Some(user_id.to_string()),
                ..Default::default()
            })?;
            let mut scored: Vec<(usize, String)> = all
                .iter()
                .map(|memory| {
                    let text = memory.content.to_lowercase();
                    let overlap = terms.iter().filter(|t| text.contains(t.as_str())).count();
                    (overlap, memory.id.clone())
                })
                .filter(|(overlap, _)| *overlap > 0)
                .collect();
            scored.sort_by(|a, b| b.0.cmp(&a.0));
            memory_ids = scored.into_iter().map(|(_, id)| id).collect();
        }

        let mut scenes = self.store.list_scenes(Some(user_id), Some(created_at), 10)?;
        if let Some(repo_path) = identity.repo_path.as_deref() {
            let needle = repo_path.to_lowercase();
            let scoped: Vec<_> = scenes
                .iter()
                .filter(|scene| {
                    scene
                        .location
                        .as_deref()
                        .map(|l| l.to_lowercase().contains(&needle))
                        .unwrap_or(false)
                })
                .cloned()
                .collect();
            if !scoped.is_empty() {
                scenes = scoped;
            }
        }

        for (i, memory_id) in memory_ids.iter().take(10).enumerate() {
            self.store.add_checkpoint_memory(
                checkpoint_id,
                memory_id,
                (1.0 - i as f64 * 0.05).max(0.1),
            )?;
        }
        for (i, scene) in scenes.iter().take(6).enumerate() {
            self.store.add_checkpoint_scene(
                checkpoint_id,
                &scene.id,
                (1.0 - i as f64 * 0.05).max(0.1),
            )?;
        }

        Ok(Enrichment {
            linked_memories: memory_ids.len().min(10),
            linked_scenes: scenes.len().min(6),
        })
    }

    fn related_memories(&self, ids: &[String]) -> Result<Vec<RelatedMemory>> {
        Ok(self
            .store
            .get_memories_bulk(ids)?
            .into_iter()
            .map(|memory| RelatedMemory {
                id: memory.id,
                memory: memory.content,
            })
            .collect())
    }

    fn related_scenes(&self, ids: &[String]) -> Result<Vec<RelatedScene>> {
        let mut out = Vec::new();
        for id in ids {
            if let Some(scene) = self.store.get_scene(id)? {
                out.push(RelatedScene {
                    id: scene.id,
                    summary: scene.summary,
                    topic: scene.topic,
                    start_time: scene.start_time,
                });
            }
        }
        Ok(out)
    }

    fn session_context(&self, session: HandoffSession) -> Result<SessionContext> {
        let lane = match &session.lane_id {
            Some(lane_id) => self.store.get_lane(lane_id)?,
            None => None,
        };
        let checkpoint = match &session.lane_id {
            Some(lane_id) => self.store.get_latest_checkpoint(lane_id)?,
            None => None,
        };
        let mut related_memories = self.related_memories(&session.linked_memory_ids)?;
        if related_memories.is_empty() {
            if let Some(checkpoint) = &checkpoint {
                related_memories =
                    self.related_memories(&self.store.get_checkpoint_memory_ids(&checkpoint.id)?)?;
            }
        }
        let related_scenes = match &checkpoint {
            Some(checkpoint) => {
                self.related_scenes(&self.store.get_checkpoint_scene_ids(&checkpoint.id)?)?
            }
            None => Vec::new(),
        };

        Ok(SessionContext {
            session_id: session.id.clone(),
            lane_id: session.lane_id.clone(),
            status: session.status,
            repo: session.repo.clone(),
            repo_id: session.repo_id.clone(),
            from_agent: Some(session.agent_id.clone()),
            task_summary: session.task_summary.clone(),
            decisions_made: session.decisions_made.clone(),
            files_touched: session.files_touched.clone(),
            todos_remaining: session.todos_remaining.clone(),
            blockers: session.blockers.clone(),
            key_commands: session.key_commands.clone(),
            test_results: session.test_results.clone(),
            context_snapshot: session.context_snapshot.clone(),
            started_at: session.started_at,
            ended_at: session.ended_at,
            last_checkpoint_at: session.last_checkpoint_at,
            lane_status: lane.as_ref().map(|l| l.status),
            lane_version: lane.as_ref().map(|l| l.version),
            related_memories,
            related_scenes,
        })
    }

    fn lane_session_fallback(
        &self,
        user_id: &str,
        agent_id: Option<&str>,
        repo_id: Option<&str>,
        statuses: Option<&[LaneStatus]>,
    ) -> Result<Option<SessionContext>> {
        let lanes = self.store.list_lanes(user_id, repo_id, statuses, 50)?;
        for lane in lanes {
            let checkpoint = self.store.get_latest_checkpoint(&lane.id)?;
            let source_agent = checkpoint.as_ref().map(|cp| cp.agent_id.clone());
            if let Some(agent_id) = agent_id {
                if source_agent.as_deref() != Some(agent_id) {
                    continue;
                }
            }
            let state = checkpoint
                .as_ref()
                .map(|cp| cp.state.clone())
                .unwrap_or_else(|| lane.current_state.clone());
            return Ok(Some(SessionContext {
                session_id: lane.id.clone(),
                lane_id: Some(lane.id.clone()),
                status: lane.status,
                repo: lane.repo_path.clone(),
                repo_id: lane.repo_id.clone(),
                from_agent: source_agent,
                task_summary: if state.task_summary.is_empty() {
                    lane.objective.clone().unwrap_or_default()
                } else {
                    state.task_summary.clone()
                },
                decisions_made: state.decisions_made,
                files_touched: state.files_touched,
                todos_remaining: state.todos_remaining,
                blockers: state.blockers,
                key_commands: state.key_commands,
                test_results: state.test_results,
                context_snapshot: state.context_snapshot,
                started_at: lane.created_at,
                ended_at: None,
                last_checkpoint_at: lane.last_checkpoint_at,
                lane_status: Some(lane.status),
                lane_version: Some(lane.version),
                related_memories: Vec::new(),
                related_scenes: Vec::new(),
            }));
        }
        Ok(None)
    }
}

/// Legacy digest input for `save_session_digest`.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct SessionDigest {
    #[serde(default)]
    pub repo: Option<String>,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub lane_id: Option<String>,
    #[serde(default)]
    pub lane_type: Option<String>,
    #[serde(default)]
    pub agent_role: Option<String>,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub confidentiality_scope: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(flatten)]
    pub payload: CheckpointPayload,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
}

/// Full context for a resumed legacy session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionContext {
    pub session_id: String,
    pub lane_id: Option<String>,
    pub status: LaneStatus,
    pub repo: Option<String>,
    pub repo_id: Option<String>,
    pub from_agent: Option<String>,
    pub task_summary: String,
    pub decisions_made: Vec<String>,
    pub files_touched: Vec<String>,
    pub todos_remaining: Vec<String>,
    pub blockers: Vec<String>,
    pub key_commands: Vec<String>,
    pub test_results: Vec<String>,
    pub context_snapshot: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub last_checkpoint_at: DateTime<Utc>,
    pub lane_status: Option<LaneStatus>,
    pub lane_version: Option<i64>,
    pub related_memories: Vec<RelatedMemory>,
    pub related_scenes: Vec<RelatedScene>,
}

fn tokenize(text: Option<&str>) -> HashSet<String> {
    text.map(|t| {
        t.to_lowercase()
            .replace(['/', '_'], " ")
            .split_whitespace()
            .map(String::from)
            .collect()
    })
    .unwrap_or_default()
}
