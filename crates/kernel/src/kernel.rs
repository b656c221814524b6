//! The kernel facade: owns every subsystem and exposes the full
//! capability-gated operation surface the transports call.

use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;

use engram_domain::capability::Capability;
use engram_domain::config::Config;
use engram_domain::digest::DailyDigest;
use engram_domain::error::{Error, Result};
use engram_domain::memory::{MemoryLayer, MemoryRecord};
use engram_domain::scene::{Profile, Scene, SceneHit};
use engram_domain::session::{AgentPolicy, AgentTrust, Namespace, NamespacePermission};
use engram_domain::staging::{CommitOutcome, ProposalCommit, StashResolution};
use engram_index::{flat::FlatIndex, remote::RemoteIndex, PointPayload, VectorIndex};
use engram_providers::{create_embedder, create_llm, Embedder, Llm};
use engram_store::history::HistoryEvent;
use engram_store::{MemoryField, MemoryQuery, Store};

use crate::handoff::{
    CheckpointArgs, CheckpointResult, HandoffBus, ResumeArgs, ResumePacket, SessionContext,
    SessionDigest,
};
use crate::retrieval::{dual_search, SearchResponse};
use crate::sessions::{self, RequestContext, SessionCreateRequest, SessionCreated};
use crate::sleep::{run_sleep_cycle, SleepOptions, SleepReport};
use crate::staging::{Staging, WriteRequest, WriteResponse};
use crate::{decay, scene as scene_tracker};

/// The one kernel value, constructed at startup and threaded through
/// every handler.
pub struct Kernel {
    config: Arc<Config>,
    store: Arc<Store>,
    index: Arc<dyn VectorIndex>,
    llm: Arc<dyn Llm>,
    embedder: Arc<dyn Embedder>,
    staging: Staging,
    handoff: HandoffBus,
}

impl Kernel {
    /// Wire a kernel from explicit parts (used directly by tests).
    pub fn new(
        config: Arc<Config>,
        store: Arc<Store>,
        index: Arc<dyn VectorIndex>,
        llm: Arc<dyn Llm>,
        embedder: Arc<dyn Embedder>,
    ) -> Kernel {
        let staging = Staging::new(
            store.clone(),
            index.clone(),
            embedder.clone(),
            llm.clone(),
            config.clone(),
        );
        let handoff = HandoffBus::new(
            store.clone(),
            index.clone(),
            embedder.clone(),
            config.handoff.clone(),
        );
        Kernel {
            config,
            store,
            index,
            llm,
            embedder,
            staging,
            handoff,
        }
    }

    /// Build every subsystem from config: open the store under the data
    /// dir, the configured vector index and providers.
    pub fn from_config(config: Arc<Config>) -> Result<Kernel> {
        let store = Arc::new(Store::open(&config.db_path()).map_err(Error::from)?);
        tracing::info!(path = %config.db_path().display(), "store ready");

        let embedder = create_embedder(&config.embedder)?;
        let llm = create_llm(&config.llm)?;
        tracing::info!(
            llm = %config.llm.provider,
            embedder = %config.embedder.provider,
            dimensions = embedder.dimensions(),
            "providers ready"
        );

        let index: Arc<dyn VectorIndex> =
            match config.vector.provider.trim().to_ascii_lowercase().as_str() {
                "remote" => Arc::new(RemoteIndex::new(
                    &config.vector.url,
                    &config.vector.collection_name,
                    embedder.dimensions(),
                )?),
                _ => Arc::new(FlatIndex::open(
                    &config.vector_index_dir(),
                    &config.vector.collection_name,
                    embedder.dimensions(),
                )?),
            };

        Ok(Kernel::new(config, store, index, llm, embedder))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    // ── Sessions & auth ──────────────────────────────────────────────

    pub fn create_session(&self, request: &SessionCreateRequest) -> Result<SessionCreated> {
        sessions::create_session(&self.store, &self.config, request)
    }

    pub fn authenticate(
        &self,
        token: Option<&str>,
        trusted_local: bool,
    ) -> Result<RequestContext> {
        sessions::authenticate(&self.store, &self.config, token, trusted_local)
    }

    // ── Writes (staging) ─────────────────────────────────────────────

    pub async fn propose_write(
        &self,
        ctx: &RequestContext,
        request: &WriteRequest,
    ) -> Result<WriteResponse> {
        self.staging.propose_write(ctx, request).await
    }

    pub async fn approve_commit(
        &self,
        ctx: &RequestContext,
        commit_id: &str,
    ) -> Result<CommitOutcome> {
        self.staging.approve_commit(ctx, commit_id).await
    }

    pub fn reject_commit(&self, ctx: &RequestContext, commit_id: &str) -> Result<CommitOutcome> {
        self.staging.reject_commit(ctx, commit_id)
    }

    pub async fn resolve_conflict(
        &self,
        ctx: &RequestContext,
        stash_id: &str,
        resolution: StashResolution,
    ) -> Result<serde_json::Value> {
        self.staging.resolve_conflict(ctx, stash_id, resolution).await
    }

    pub fn list_commits(
        &self,
        ctx: &RequestContext,
        user_id: Option<&str>,
        agent_id: Option<&str>,
        status: Option<&str>,
        limit: usize,
    ) -> Result<Vec<ProposalCommit>> {
        self.staging.list_commits(ctx, user_id, agent_id, status, limit)
    }

    pub fn list_conflicts(
        &self,
        ctx: &RequestContext,
        user_id: Option<&str>,
        resolution: Option<&str>,
        limit: usize,
    ) -> Result<Vec<engram_domain::staging::ConflictStash>> {
        ctx.require_capability(Capability::ResolveConflicts)?;
        let resolution = match resolution {
            Some(raw) => Some(
                StashResolution::parse(raw).ok_or_else(|| Error::InvalidStatus(raw.to_string()))?,
            ),
            None => None,
        };
        Ok(self.store.list_conflict_stash(user_id, resolution, limit)?)
    }

    // ── Retrieval ────────────────────────────────────────────────────

    pub async fn search(
        &self,
        ctx: &RequestContext,
        query: &str,
        user_id: &str,
        limit: usize,
        categories: Option<&[String]>,
    ) -> Result<SearchResponse> {
        ctx.require_capability(Capability::Search)?;
        dual_search(
            &self.store,
            self.index.as_ref(),
            self.embedder.as_ref(),
            &self.config,
            ctx,
            query,
            user_id,
            limit,
            categories,
        )
        .await
    }

    // ── Memory CRUD ──────────────────────────────────────────────────

    pub fn get_memory(&self, ctx: &RequestContext, memory_id: &str) -> Result<MemoryRecord> {
        ctx.require_capability(Capability::Search)?;
        let memory = self
            .store
            .get_memory(memory_id, false)?
            .ok_or_else(|| Error::NotFound(format!("memory {memory_id}")))?;
        if let Some(allowed) = ctx.allowed_scopes() {
            if !allowed.contains(&memory.confidentiality_scope) {
                return Err(Error::ScopeDenied(
                    memory.confidentiality_scope.to_string(),
                ));
            }
        }
        Ok(memory)
    }

    pub fn list_memories(
        &self,
        ctx: &RequestContext,
        query: &MemoryQuery,
    ) -> Result<Vec<MemoryRecord>> {
        ctx.require_capability(Capability::Search)?;
        let allowed = ctx.allowed_scopes();
        let mut memories = self.store.list_memories(query)?;
        if let Some(allowed) = allowed {
            memories.retain(|m| allowed.contains(&m.confidentiality_scope));
        }
        Ok(memories)
    }

    pub async fn update_memory(
        &self,
        ctx: &RequestContext,
        memory_id: &str,
        update: &UpdateMemoryRequest,
    ) -> Result<MemoryRecord> {
        ctx.require_capability(Capability::ProposeWrite)?;
        let prior = self
            .store
            .get_memory(memory_id, false)?
            .ok_or_else(|| Error::NotFound(format!("memory {memory_id}")))?;
        if prior.immutable {
            return Err(Error::BadRequest("memory is immutable".into()));
        }

        let mut fields: Vec<MemoryField> = Vec::new();
        if let Some(content) = update.content.as_deref().filter(|c| !c.trim().is_empty()) {
            fields.push(MemoryField::Content(content.to_string()));
            let embedding = self.embedder.embed(content).await?;
            fields.push(MemoryField::Embedding(Some(embedding.clone())));
            self.index
                .insert(
                    memory_id,
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
        if let Some(importance) = update.importance {
            fields.push(MemoryField::Importance(importance.clamp(0.0, 1.0)));
        }
        if let Some(categories) = &update.categories {
            fields.push(MemoryField::Categories(categories.clone()));
        }
        if fields.is_empty() {
            return Err(Error::BadRequest("no updatable fields provided".into()));
        }
        self.store.update_memory(memory_id, &fields)?;
        self.store.log_event(
            memory_id,
            "UPDATE",
            serde_json::json!({"by": "direct_update"}),
        )?;
        self.store
            .get_memory(memory_id, false)?
            .ok_or_else(|| Error::NotFound(format!("memory {memory_id}")))
    }

    pub async fn delete_memory(&self, ctx: &RequestContext, memory_id: &str) -> Result<bool> {
        ctx.require_capability(Capability::ProposeWrite)?;
        let deleted = self
            .store
            .delete_memory(memory_id, self.config.decay.use_tombstone_deletion)?;
        if deleted {
            self.index.delete(&[memory_id.to_string()]).await?;
            self.store.log_event(
                memory_id,
                "DELETE",
                serde_json::json!({"by": "direct_delete"}),
            )?;
        }
        Ok(deleted)
    }

    /// Manually move a memory between layers.
    pub fn set_memory_layer(
        &self,
        ctx: &RequestContext,
        memory_id: &str,
        layer: MemoryLayer,
    ) -> Result<MemoryRecord> {
        ctx.require_capability(Capability::ProposeWrite)?;
        let memory = self
            .store
            .get_memory(memory_id, false)?
            .ok_or_else(|| Error::NotFound(format!("memory {memory_id}")))?;
        if memory.layer != layer {
            self.store
                .update_memory(memory_id, &[MemoryField::Layer(layer)])?;
            let (event, from, to) = match layer {
                MemoryLayer::Lml => ("PROMOTED", "sml", "lml"),
                MemoryLayer::Sml => ("DEMOTED", "lml", "sml"),
            };
            self.store.log_event(
                memory_id,
                event,
                serde_json::json!({"from": from, "to": to, "by": "manual"}),
            )?;
        }
        self.store
            .get_memory(memory_id, false)?
            .ok_or_else(|| Error::NotFound(format!("memory {memory_id}")))
    }

    pub fn get_memory_history(
        &self,
        ctx: &RequestContext,
        memory_id: &str,
    ) -> Result<Vec<HistoryEvent>> {
        ctx.require_capability(Capability::Search)?;
        Ok(self.store.get_history(memory_id)?)
    }

    /// Manual decay tick over one user (or everyone).
    pub async fn apply_decay(
        &self,
        ctx: &RequestContext,
        user_id: Option<&str>,
    ) -> Result<decay::DecayReport> {
        ctx.require_capability(Capability::RunSleepCycle)?;
        let users = match user_id {
            Some(user_id) => vec![user_id.to_string()],
            None => self.store.list_user_ids()?,
        };
        let now = Utc::now();
        let mut total = decay::DecayReport::default();
        for user in users {
            let report =
                decay::run_decay(&self.store, self.index.as_ref(), &self.config.decay, &user, now)
                    .await?;
            total.decayed += report.decayed;
            total.forgotten += report.forgotten;
            total.promoted += report.promoted;
        }
        self.store
            .log_decay_run(total.decayed, total.forgotten, total.promoted)?;
        Ok(total)
    }

    // ── Scenes ───────────────────────────────────────────────────────

    pub fn list_scenes(
        &self,
        ctx: &RequestContext,
        user_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Scene>> {
        ctx.require_capability(Capability::ReadScene)?;
        let allowed = ctx.allowed_namespaces();
        let mut scenes = self.store.list_scenes(user_id, None, limit)?;
        if let Some(allowed) = allowed {
            scenes.retain(|scene| allowed.contains(&scene.namespace));
        }
        Ok(scenes)
    }

    pub fn get_scene(&self, ctx: &RequestContext, scene_id: &str) -> Result<Scene> {
        ctx.require_capability(Capability::ReadScene)?;
        let scene = self
            .store
            .get_scene(scene_id)?
            .ok_or_else(|| Error::NotFound(format!("scene {scene_id}")))?;
        if let Some(allowed) = ctx.allowed_namespaces() {
            if !allowed.contains(&scene.namespace) {
                return Err(Error::NamespaceDenied(scene.namespace));
            }
        }
        Ok(scene)
    }

    pub async fn search_scenes(
        &self,
        ctx: &RequestContext,
        user_id: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<SceneHit>> {
        ctx.require_capability(Capability::ReadScene)?;
        let mut hits = scene_tracker::search_scenes(
            &self.store,
            self.embedder.as_ref(),
            user_id,
            query,
            limit,
        )
        .await?;
        if let Some(allowed) = ctx.allowed_namespaces() {
            hits.retain(|hit| allowed.contains(&hit.scene.namespace));
        }
        Ok(hits)
    }

    pub fn list_profiles(&self, ctx: &RequestContext, user_id: Option<&str>) -> Result<Vec<Profile>> {
        ctx.require_capability(Capability::ReadScene)?;
        Ok(self.store.list_profiles(user_id)?)
    }

    // ── Digest & trust ───────────────────────────────────────────────

    pub fn get_daily_digest(
        &self,
        ctx: &RequestContext,
        user_id: &str,
        date: &str,
    ) -> Result<DailyDigest> {
        ctx.require_capability(Capability::ReadDigest)?;
        match self.store.get_daily_digest(user_id, date)? {
            Some(digest) => Ok(digest),
            None => {
                // Build on demand so a fresh install still answers.
                let payload = crate::digest::build_daily_digest(&self.store, user_id, date)?;
                Ok(DailyDigest {
                    id: String::new(),
                    user_id: user_id.to_string(),
                    digest_date: date.to_string(),
                    payload,
                    generated_at: Utc::now(),
                })
            }
        }
    }

    pub fn get_agent_trust(
        &self,
        ctx: &RequestContext,
        user_id: &str,
        agent_id: &str,
    ) -> Result<AgentTrust> {
        ctx.require_capability(Capability::ReadTrust)?;
        Ok(self.store.get_agent_trust(user_id, agent_id)?)
    }

    // ── Namespaces & policies ────────────────────────────────────────

    pub fn list_namespaces(
        &self,
        ctx: &RequestContext,
        user_id: Option<&str>,
    ) -> Result<Vec<Namespace>> {
        ctx.require_capability(Capability::ManageNamespaces)?;
        Ok(self.store.list_namespaces(user_id)?)
    }

    pub fn declare_namespace(
        &self,
        ctx: &RequestContext,
        user_id: &str,
        name: &str,
        description: Option<&str>,
    ) -> Result<String> {
        ctx.require_capability(Capability::ManageNamespaces)?;
        if name.trim().is_empty() {
            return Err(Error::BadRequest("namespace name is required".into()));
        }
        Ok(self.store.ensure_namespace(user_id, name.trim(), description)?)
    }

    pub fn grant_namespace_permission(
        &self,
        ctx: &RequestContext,
        user_id: &str,
        namespace: &str,
        agent_id: &str,
        capability: &str,
        expires_at: Option<chrono::DateTime<Utc>>,
    ) -> Result<NamespacePermission> {
        ctx.require_capability(Capability::ManageNamespaces)?;
        Ok(self.store.grant_namespace_permission(
            user_id,
            namespace,
            agent_id,
            capability,
            expires_at,
        )?)
    }

    pub fn upsert_agent_policy(
        &self,
        ctx: &RequestContext,
        policy: &AgentPolicy,
    ) -> Result<()> {
        ctx.require_capability(Capability::ManageNamespaces)?;
        Ok(self.store.upsert_agent_policy(policy)?)
    }

    pub fn list_agent_policies(
        &self,
        ctx: &RequestContext,
        user_id: Option<&str>,
    ) -> Result<Vec<AgentPolicy>> {
        ctx.require_capability(Capability::ManageNamespaces)?;
        Ok(self.store.list_agent_policies(user_id)?)
    }

    pub fn delete_agent_policy(
        &self,
        ctx: &RequestContext,
        user_id: &str,
        agent_id: &str,
    ) -> Result<bool> {
        ctx.require_capability(Capability::ManageNamespaces)?;
        Ok(self.store.delete_agent_policy(user_id, agent_id)?)
    }

    // ── Sleep ────────────────────────────────────────────────────────

    pub async fn run_sleep_cycle(
        &self,
        ctx: &RequestContext,
        options: &SleepOptions,
    ) -> Result<SleepReport> {
        ctx.require_capability(Capability::RunSleepCycle)?;
        run_sleep_cycle(
            &self.store,
            self.index.as_ref(),
            self.llm.as_ref(),
            self.embedder.as_ref(),
            &self.config,
            options,
        )
        .await
    }

    /// Background-worker entry: unrestricted context, errors logged by
    /// the caller.
    pub async fn run_sleep_cycle_internal(&self, options: &SleepOptions) -> Result<SleepReport> {
        run_sleep_cycle(
            &self.store,
            self.index.as_ref(),
            self.llm.as_ref(),
            self.embedder.as_ref(),
            &self.config,
            options,
        )
        .await
    }

    // ── Handoff ──────────────────────────────────────────────────────

    pub async fn handoff_resume(
        &self,
        ctx: &RequestContext,
        args: &ResumeArgs,
    ) -> Result<Option<ResumePacket>> {
        ctx.require_capability(Capability::ReadHandoff)?;
        self.handoff.auto_resume(args).await
    }

    pub async fn handoff_checkpoint(
        &self,
        ctx: &RequestContext,
        args: &CheckpointArgs,
    ) -> Result<CheckpointResult> {
        ctx.require_capability(Capability::WriteHandoff)?;
        self.handoff.auto_checkpoint(args).await
    }

    pub fn list_handoff_lanes(
        &self,
        ctx: &RequestContext,
        user_id: &str,
        repo_path: Option<&str>,
        statuses: Option<&[String]>,
        limit: usize,
    ) -> Result<Vec<engram_domain::handoff::HandoffLane>> {
        ctx.require_capability(Capability::ReadHandoff)?;
        self.handoff.list_lanes(user_id, repo_path, statuses, limit)
    }

    pub async fn save_session_digest(
        &self,
        ctx: &RequestContext,
        user_id: &str,
        agent_id: &str,
        digest: &SessionDigest,
    ) -> Result<engram_domain::handoff::HandoffSession> {
        ctx.require_capability(Capability::WriteHandoff)?;
        self.handoff.save_session_digest(user_id, agent_id, digest).await
    }

    pub fn list_handoff_sessions(
        &self,
        ctx: &RequestContext,
        user_id: &str,
        agent_id: Option<&str>,
        repo: Option<&str>,
        statuses: Option<&[String]>,
        limit: usize,
    ) -> Result<Vec<engram_domain::handoff::HandoffSession>> {
        ctx.require_capability(Capability::ReadHandoff)?;
        self.handoff.list_sessions(user_id, agent_id, repo, statuses, limit)
    }

    pub fn get_last_handoff_session(
        &self,
        ctx: &RequestContext,
        user_id: &str,
        agent_id: Option<&str>,
        repo: Option<&str>,
        statuses: Option<&[String]>,
    ) -> Result<Option<SessionContext>> {
        ctx.require_capability(Capability::ReadHandoff)?;
        self.handoff.get_last_session(user_id, agent_id, repo, statuses)
    }
}

/// Direct memory update (PUT /memories/{id}).
#[derive(Debug, Clone, Deserialize, Default)]
pub struct UpdateMemoryRequest {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub importance: Option<f64>,
    #[serde(default)]
    pub categories: Option<Vec<String>>,
}
