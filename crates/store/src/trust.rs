//! Agent trust accounting.

use chrono::{DateTime, Utc};
use rusqlite::params;

use engram_domain::session::AgentTrust;
use engram_domain::staging::CommitStatus;

use crate::error::Result;
use crate::{dt_to_text, opt_dt_to_text, text_to_opt_dt, Store};

/// `0.7·approval_rate + 0.3·recency`, recency decaying linearly to zero
/// over 30 days since the last approval. Rounded to 4 decimals.
pub fn compute_trust_score(
    total_proposals: i64,
    approved_proposals: i64,
    last_approved_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> f64 {
    let approval_rate = if total_proposals > 0 {
        approved_proposals as f64 / total_proposals as f64
    } else {
        0.0
    };
    let recency = match last_approved_at {
        Some(approved) => {
            let days_since = (now - approved).num_seconds().max(0) as f64 / 86_400.0;
            (1.0 - days_since.min(30.0) / 30.0).max(0.0)
        }
        None => 0.0,
    };
    ((approval_rate * 0.7 + recency * 0.3) * 10_000.0).round() / 10_000.0
}

impl Store {
    pub fn get_agent_trust(&self, user_id: &str, agent_id: &str) -> Result<AgentTrust> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT total_proposals, approved_proposals, rejected_proposals,
                            auto_stashed_proposals, last_proposed_at, last_approved_at, trust_score
                     FROM agent_trust WHERE user_id = ?1 AND agent_id = ?2",
                    params![user_id, agent_id],
                    |row| {
                        Ok(AgentTrust {
                            user_id: user_id.to_string(),
                            agent_id: agent_id.to_string(),
                            total_proposals: row.get(0)?,
                            approved_proposals: row.get(1)?,
                            rejected_proposals: row.get(2)?,
                            auto_stashed_proposals: row.get(3)?,
                            last_proposed_at: text_to_opt_dt(row.get(4)?),
                            last_approved_at: text_to_opt_dt(row.get(5)?),
                            trust_score: row.get(6)?,
                        })
                    },
                )
                .unwrap_or_else(|_| AgentTrust::empty(user_id, agent_id));
            Ok(row)
        })
    }

    /// Count a new proposal (optionally already auto-stashed).
    pub fn record_agent_proposal(
        &self,
        user_id: &str,
        agent_id: Option<&str>,
        status: CommitStatus,
    ) -> Result<Option<AgentTrust>> {
        let Some(agent_id) = agent_id.filter(|a| !a.is_empty()) else {
            return Ok(None);
        };
        let mut trust = self.get_agent_trust(user_id, agent_id)?;
        trust.total_proposals += 1;
        if status == CommitStatus::AutoStashed {
            trust.auto_stashed_proposals += 1;
        }
        trust.last_proposed_at = Some(Utc::now());
        self.upsert_trust(&trust)?;
        Ok(Some(trust))
    }

    /// Count a commit outcome (approve/reject/stash-after-the-fact).
    pub fn record_agent_outcome(
        &self,
        user_id: &str,
        agent_id: Option<&str>,
        outcome: CommitStatus,
    ) -> Result<Option<AgentTrust>> {
        let Some(agent_id) = agent_id.filter(|a| !a.is_empty()) else {
            return Ok(None);
        };
        let mut trust = self.get_agent_trust(user_id, agent_id)?;
        match outcome {
            CommitStatus::Approved => {
                trust.approved_proposals += 1;
                trust.last_approved_at = Some(Utc::now());
            }
            CommitStatus::Rejected => trust.rejected_proposals += 1,
            CommitStatus::AutoStashed => trust.auto_stashed_proposals += 1,
            CommitStatus::Pending => {}
        }
        self.upsert_trust(&trust)?;
        Ok(Some(trust))
    }

    fn upsert_trust(&self, trust: &AgentTrust) -> Result<()> {
        let score = compute_trust_score(
            trust.total_proposals,
            trust.approved_proposals,
            trust.last_approved_at,
            Utc::now(),
        );
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO agent_trust
                     (user_id, agent_id, total_proposals, approved_proposals, rejected_proposals,
                      auto_stashed_proposals, last_proposed_at, last_approved_at, trust_score, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                 ON CONFLICT(user_id, agent_id) DO UPDATE SET
                     total_proposals = excluded.total_proposals,
                     approved_proposals = excluded.approved_proposals,
                     rejected_proposals = excluded.rejected_proposals,
                     auto_stashed_proposals = excluded.auto_stashed_proposals,
                     last_proposed_at = excluded.last_proposed_at,
                     last_approved_at = excluded.last_approved_at,
                     trust_score = excluded.trust_score,
                     updated_at = excluded.updated_at",
                params![
                    trust.user_id,
                    trust.agent_id,
                    trust.total_proposals,
                    trust.approved_proposals,
                    trust.rejected_proposals,
                    trust.auto_stashed_proposals,
                    opt_dt_to_text(trust.last_proposed_at),
                    opt_dt_to_text(trust.last_approved_at),
                    score,
                    dt_to_text(Utc::now()),
                ],
            )?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn score_blends_approval_and_recency() {
        let now = Utc::now();
        // All approved, approved just now: 0.7 + 0.3 = 1.0.
        assert_eq!(compute_trust_score(4, 4, Some(now), now), 1.0);
        // All approved, approval 30+ days old: recency is zero.
        let old = now - Duration::days(45);
        assert_eq!(compute_trust_score(4, 4, Some(old), now), 0.7);
        // No proposals at all.
        assert_eq!(compute_trust_score(0, 0, None, now), 0.0);
    }

    #[test]
    fn recency_is_linear_over_30_days() {
        let now = Utc::now();
        let half = now - Duration::days(15);
        let score = compute_trust_score(2, 2, Some(half), now);
        assert!((score - 0.85).abs() < 0.01, "got {score}");
    }

    #[test]
    fn proposal_and_outcome_accounting() {
        let store = Store::open_in_memory().unwrap();
        store
            .record_agent_proposal("u1", Some("agent-a"), CommitStatus::Pending)
            .unwrap();
        store
            .record_agent_outcome("u1", Some("agent-a"), CommitStatus::Approved)
            .unwrap();

        let trust = store.get_agent_trust("u1", "agent-a").unwrap();
        assert_eq!(trust.total_proposals, 1);
        assert_eq!(trust.approved_proposals, 1);
        assert!(trust.trust_score > 0.9);

        store
            .record_agent_proposal("u1", Some("agent-a"), CommitStatus::AutoStashed)
            .unwrap();
        let trust = store.get_agent_trust("u1", "agent-a").unwrap();
        assert_eq!(trust.auto_stashed_proposals, 1);
        assert_eq!(trust.total_proposals, 2);
    }

    #[test]
    fn anonymous_writes_do_not_track_trust() {
        let store = Store::open_in_memory().unwrap();
        assert!(store
            .record_agent_proposal("u1", None, CommitStatus::Pending)
            .unwrap()
            .is_none());
    }
}
