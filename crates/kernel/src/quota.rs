//! Rolling-hour write quotas per agent and per user.
//!
//! In-memory, lock-protected. Timestamps older than one hour age out on
//! every check, so the window rolls continuously rather than resetting on
//! the hour.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;

use engram_domain::config::PolicyConfig;
use engram_domain::error::{Error, Result};

pub struct WriteQuota {
    per_agent: Option<u32>,
    per_user: Option<u32>,
    agent_writes: RwLock<HashMap<String, Vec<DateTime<Utc>>>>,
    user_writes: RwLock<HashMap<String, Vec<DateTime<Utc>>>>,
}

impl WriteQuota {
    pub fn new(config: &PolicyConfig) -> WriteQuota {
        WriteQuota {
            per_agent: config.agent_quota(),
            per_user: config.user_quota(),
            agent_writes: RwLock::new(HashMap::new()),
            user_writes: RwLock::new(HashMap::new()),
        }
    }

    /// Check both limits for this proposal; on success the write is
    /// recorded immediately so racing writers cannot overshoot.
    pub fn check_and_record(&self, user_id: &str, agent_id: Option<&str>) -> Result<()> {
        let now = Utc::now();
        if let (Some(limit), Some(agent_id)) = (self.per_agent, agent_id) {
            Self::check_one(
                &self.agent_writes,
                &format!("{user_id}::{agent_id}"),
                limit,
                now,
                "agent",
            )?;
        }
        if let Some(limit) = self.per_user {
            Self::check_one(&self.user_writes, user_id, limit, now, "user")?;
        }
        Ok(())
    }

    fn check_one(
        map: &RwLock<HashMap<String, Vec<DateTime<Utc>>>>,
        key: &str,
        limit: u32,
        now: DateTime<Utc>,
        kind: &str,
    ) -> Result<()> {
        let cutoff = now - Duration::hours(1);
        let mut writes = map.write();
        let entry = writes.entry(key.to_string()).or_default();
        entry.retain(|ts| *ts > cutoff);
        if entry.len() >= limit as usize {
            return Err(Error::QuotaExceeded(format!(
                "{kind} write quota of {limit}/hour reached"
            )));
        }
        entry.push(now);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(agent: u32, user: u32) -> PolicyConfig {
        PolicyConfig {
            write_quota_per_agent_per_hour: agent,
            write_quota_per_user_per_hour: user,
            ..Default::default()
        }
    }

    #[test]
    fn zero_limits_mean_unlimited() {
        let quota = WriteQuota::new(&config(0, 0));
        for _ in 0..100 {
            quota.check_and_record("u1", Some("a1")).unwrap();
        }
    }

    #[test]
    fn agent_limit_blocks_further_writes() {
        let quota = WriteQuota::new(&config(2, 0));
        quota.check_and_record("u1", Some("a1")).unwrap();
        quota.check_and_record("u1", Some("a1")).unwrap();
        let err = quota.check_and_record("u1", Some("a1")).unwrap_err();
        assert!(matches!(err, Error::QuotaExceeded(_)));
        // A different agent is unaffected.
        quota.check_and_record("u1", Some("a2")).unwrap();
        // Writes without agent context skip the per-agent limit.
        quota.check_and_record("u1", None).unwrap();
    }

    #[test]
    fn user_limit_spans_agents() {
        let quota = WriteQuota::new(&config(0, 2));
        quota.check_and_record("u1", Some("a1")).unwrap();
        quota.check_and_record("u1", Some("a2")).unwrap();
        assert!(quota.check_and_record("u1", Some("a3")).is_err());
        quota.check_and_record("u2", None).unwrap();
    }
}
