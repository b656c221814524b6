//! Blocking facade over the async kernel.
//!
//! Callers that prefer synchronous integration get the same semantics:
//! every method awaits the async surface on a dedicated runtime, so the
//! two surfaces are interchangeable for tests.

use std::sync::Arc;

use engram_domain::error::{Error, Result};
use engram_domain::staging::{CommitOutcome, StashResolution};

use crate::retrieval::SearchResponse;
use crate::sessions::{RequestContext, SessionCreateRequest, SessionCreated};
use crate::sleep::{SleepOptions, SleepReport};
use crate::staging::{WriteRequest, WriteResponse};
use crate::Kernel;

pub struct BlockingKernel {
    kernel: Arc<Kernel>,
    runtime: tokio::runtime::Runtime,
}

impl BlockingKernel {
    pub fn new(kernel: Arc<Kernel>) -> Result<BlockingKernel> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .map_err(|e| Error::Other(format!("building blocking runtime: {e}")))?;
        Ok(BlockingKernel { kernel, runtime })
    }

    pub fn create_session(&self, request: &SessionCreateRequest) -> Result<SessionCreated> {
        self.kernel.create_session(request)
    }

    pub fn authenticate(&self, token: Option<&str>, trusted_local: bool) -> Result<RequestContext> {
        self.kernel.authenticate(token, trusted_local)
    }

    pub fn propose_write(
        &self,
        ctx: &RequestContext,
        request: &WriteRequest,
    ) -> Result<WriteResponse> {
        self.runtime.block_on(self.kernel.propose_write(ctx, request))
    }

    pub fn approve_commit(&self, ctx: &RequestContext, commit_id: &str) -> Result<CommitOutcome> {
        self.runtime
            .block_on(self.kernel.approve_commit(ctx, commit_id))
    }

    pub fn reject_commit(&self, ctx: &RequestContext, commit_id: &str) -> Result<CommitOutcome> {
        self.kernel.reject_commit(ctx, commit_id)
    }

    pub fn resolve_conflict(
        &self,
        ctx: &RequestContext,
        stash_id: &str,
        resolution: StashResolution,
    ) -> Result<serde_json::Value> {
        self.runtime
            .block_on(self.kernel.resolve_conflict(ctx, stash_id, resolution))
    }

    pub fn search(
        &self,
        ctx: &RequestContext,
        query: &str,
        user_id: &str,
        limit: usize,
    ) -> Result<SearchResponse> {
        self.runtime
            .block_on(self.kernel.search(ctx, query, user_id, limit, None))
    }

    pub fn run_sleep_cycle(
        &self,
        ctx: &RequestContext,
        options: &SleepOptions,
    ) -> Result<SleepReport> {
        self.runtime
            .block_on(self.kernel.run_sleep_cycle(ctx, options))
    }
}
