//! Namespaces, namespace permissions and agent policies.

use chrono::Utc;
use rusqlite::{params, Row};

use engram_domain::session::{AgentPolicy, Namespace, NamespacePermission};

use crate::error::Result;
use crate::{dt_to_text, from_json_text, opt_dt_to_text, text_to_dt, text_to_opt_dt, to_json_text, Store};

impl Store {
    /// Create the namespace if it does not exist; returns its id either way.
    pub fn ensure_namespace(
        &self,
        user_id: &str,
        name: &str,
        description: Option<&str>,
    ) -> Result<String> {
        self.with_conn(|conn| {
            if let Ok(id) = conn.query_row(
                "SELECT id FROM namespaces WHERE user_id = ?1 AND name = ?2",
                params![user_id, name],
                |row| row.get::<_, String>(0),
            ) {
                return Ok(id);
            }
            let id = uuid::Uuid::new_v4().to_string();
            conn.execute(
                "INSERT INTO namespaces (id, user_id, name, description) VALUES (?1, ?2, ?3, ?4)",
                params![id, user_id, name, description],
            )?;
            Ok(id)
        })
    }

    pub fn list_namespaces(&self, user_id: Option<&str>) -> Result<Vec<Namespace>> {
        self.with_conn(|conn| {
            let map = |row: &Row<'_>| -> rusqlite::Result<Namespace> {
                Ok(Namespace {
                    id: row.get(0)?,
                    user_id: row.get(1)?,
                    name: row.get(2)?,
                    description: row.get(3)?,
                    created_at: text_to_dt(row.get(4)?),
                    updated_at: text_to_dt(row.get(5)?),
                })
            };
            match user_id {
                Some(user_id) => {
                    let mut stmt = conn.prepare(
                        "SELECT id, user_id, name, description, created_at, updated_at
                         FROM namespaces WHERE user_id = ?1 ORDER BY name",
                    )?;
                    let rows = stmt.query_map(params![user_id], map)?;
                    Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
                }
                None => {
                    let mut stmt = conn.prepare(
                        "SELECT id, user_id, name, description, created_at, updated_at
                         FROM namespaces ORDER BY user_id, name",
                    )?;
                    let rows = stmt.query_map([], map)?;
                    Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
                }
            }
        })
    }

    pub fn grant_namespace_permission(
        &self,
        user_id: &str,
        namespace: &str,
        agent_id: &str,
        capability: &str,
        expires_at: Option<chrono::DateTime<Utc>>,
    ) -> Result<NamespacePermission> {
        let namespace_id = self.ensure_namespace(user_id, namespace, None)?;
        let permission = NamespacePermission {
            id: uuid::Uuid::new_v4().to_string(),
            namespace_id: namespace_id.clone(),
            user_id: user_id.to_string(),
            agent_id: agent_id.to_string(),
            capability: capability.to_string(),
            granted_at: Utc::now(),
            expires_at,
        };
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO namespace_permissions
                     (id, namespace_id, user_id, agent_id, capability, granted_at, expires_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(namespace_id, user_id, agent_id, capability) DO UPDATE SET
                     granted_at = excluded.granted_at,
                     expires_at = excluded.expires_at",
                params![
                    permission.id,
                    permission.namespace_id,
                    permission.user_id,
                    permission.agent_id,
                    permission.capability,
                    dt_to_text(permission.granted_at),
                    opt_dt_to_text(permission.expires_at),
                ],
            )?;
            Ok(())
        })?;
        Ok(permission)
    }

    /// Namespaces the agent may use for `capability`, ignoring expired
    /// grants. The `default` namespace is always included.
    pub fn agent_allowed_namespaces(
        &self,
        user_id: &str,
        agent_id: Option<&str>,
        capability: &str,
    ) -> Result<Vec<String>> {
        let mut allowed = vec!["default".to_string()];
        let Some(agent_id) = agent_id else {
            return Ok(allowed);
        };
        let now = dt_to_text(Utc::now());
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT n.name FROM namespace_permissions p
                 JOIN namespaces n ON n.id = p.namespace_id
                 WHERE p.user_id = ?1 AND p.agent_id = ?2 AND p.capability = ?3
                   AND (p.expires_at IS NULL OR p.expires_at > ?4)",
            )?;
            let rows = stmt.query_map(params![user_id, agent_id, capability, now], |row| {
                row.get::<_, String>(0)
            })?;
            for name in rows {
                let name = name?;
                if !allowed.contains(&name) {
                    allowed.push(name);
                }
            }
            Ok(allowed)
        })
    }

    // ── Agent policies ───────────────────────────────────────────────

    pub fn upsert_agent_policy(&self, policy: &AgentPolicy) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO agent_policies
                     (id, user_id, agent_id, allowed_confidentiality_scopes,
                      allowed_capabilities, allowed_namespaces, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT(user_id, agent_id) DO UPDATE SET
                     allowed_confidentiality_scopes = excluded.allowed_confidentiality_scopes,
                     allowed_capabilities = excluded.allowed_capabilities,
                     allowed_namespaces = excluded.allowed_namespaces,
                     updated_at = excluded.updated_at",
                params![
                    policy.id,
                    policy.user_id,
                    policy.agent_id,
                    to_json_text(&policy.allowed_confidentiality_scopes),
                    to_json_text(&policy.allowed_capabilities),
                    to_json_text(&policy.allowed_namespaces),
                    dt_to_text(policy.created_at),
                    dt_to_text(policy.updated_at),
                ],
            )?;
            Ok(())
        })
    }

    /// Exact policy, falling back to the `*` wildcard when requested.
    pub fn get_agent_policy(
        &self,
        user_id: &str,
        agent_id: &str,
        include_wildcard: bool,
    ) -> Result<Option<AgentPolicy>> {
        if let Some(policy) = self.get_agent_policy_exact(user_id, agent_id)? {
            return Ok(Some(policy));
        }
        if include_wildcard && agent_id != "*" {
            return self.get_agent_policy_exact(user_id, "*");
        }
        Ok(None)
    }

    fn get_agent_policy_exact(&self, user_id: &str, agent_id: &str) -> Result<Option<AgentPolicy>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, user_id, agent_id, allowed_confidentiality_scopes,
                        allowed_capabilities, allowed_namespaces, created_at, updated_at
                 FROM agent_policies WHERE user_id = ?1 AND agent_id = ?2",
            )?;
            let mut rows = stmt.query(params![user_id, agent_id])?;
            match rows.next()? {
                Some(row) => Ok(Some(row_to_policy(row)?)),
                None => Ok(None),
            }
        })
    }

    pub fn list_agent_policies(&self, user_id: Option<&str>) -> Result<Vec<AgentPolicy>> {
        self.with_conn(|conn| {
            match user_id {
                Some(user_id) => {
                    let mut stmt = conn.prepare(
                        "SELECT id, user_id, agent_id, allowed_confidentiality_scopes,
                                allowed_capabilities, allowed_namespaces, created_at, updated_at
                         FROM agent_policies WHERE user_id = ?1 ORDER BY agent_id",
                    )?;
                    let rows = stmt.query_map(params![user_id], row_to_policy)?;
                    Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
                }
                None => {
                    let mut stmt = conn.prepare(
                        "SELECT id, user_id, agent_id, allowed_confidentiality_scopes,
                                allowed_capabilities, allowed_namespaces, created_at, updated_at
                         FROM agent_policies ORDER BY user_id, agent_id",
                    )?;
                    let rows = stmt.query_map([], row_to_policy)?;
                    Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
                }
            }
        })
    }

    pub fn delete_agent_policy(&self, user_id: &str, agent_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "DELETE FROM agent_policies WHERE user_id = ?1 AND agent_id = ?2",
                params![user_id, agent_id],
            )?;
            Ok(changed > 0)
        })
    }
}

fn row_to_policy(row: &Row<'_>) -> rusqlite::Result<AgentPolicy> {
    Ok(AgentPolicy {
        id: row.get(0)?,
        user_id: row.get(1)?,
        agent_id: row.get(2)?,
        allowed_confidentiality_scopes: from_json_text(row.get(3)?),
        allowed_capabilities: from_json_text(row.get(4)?),
        allowed_namespaces: from_json_text(row.get(5)?),
        created_at: text_to_dt(row.get(6)?),
        updated_at: text_to_dt(row.get(7)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use engram_domain::capability::Capability;
    use engram_domain::memory::ConfidentialityScope;

    fn policy(user: &str, agent: &str) -> AgentPolicy {
        let now = Utc::now();
        AgentPolicy {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user.into(),
            agent_id: agent.into(),
            allowed_confidentiality_scopes: vec![ConfidentialityScope::Work],
            allowed_capabilities: vec![Capability::Search],
            allowed_namespaces: vec!["default".into()],
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn ensure_namespace_is_idempotent() {
        let store = Store::open_in_memory().unwrap();
        let a = store.ensure_namespace("u1", "projects", None).unwrap();
        let b = store.ensure_namespace("u1", "projects", Some("desc")).unwrap();
        assert_eq!(a, b);
        assert_eq!(store.list_namespaces(Some("u1")).unwrap().len(), 1);
    }

    #[test]
    fn wildcard_policy_fallback() {
        let store = Store::open_in_memory().unwrap();
        store.upsert_agent_policy(&policy("u1", "*")).unwrap();

        let hit = store.get_agent_policy("u1", "agent-x", true).unwrap();
        assert!(hit.is_some());
        assert_eq!(hit.unwrap().agent_id, "*");

        let strict = store.get_agent_policy("u1", "agent-x", false).unwrap();
        assert!(strict.is_none());
    }

    #[test]
    fn exact_policy_wins_over_wildcard() {
        let store = Store::open_in_memory().unwrap();
        store.upsert_agent_policy(&policy("u1", "*")).unwrap();
        let mut exact = policy("u1", "agent-x");
        exact.allowed_capabilities = vec![Capability::Search, Capability::ProposeWrite];
        store.upsert_agent_policy(&exact).unwrap();

        let hit = store.get_agent_policy("u1", "agent-x", true).unwrap().unwrap();
        assert_eq!(hit.agent_id, "agent-x");
        assert_eq!(hit.allowed_capabilities.len(), 2);
    }

    #[test]
    fn expired_grants_are_ignored() {
        let store = Store::open_in_memory().unwrap();
        store
            .grant_namespace_permission("u1", "projects", "agent-a", "read", Some(Utc::now() - Duration::hours(1)))
            .unwrap();
        store
            .grant_namespace_permission("u1", "notes", "agent-a", "read", None)
            .unwrap();

        let allowed = store
            .agent_allowed_namespaces("u1", Some("agent-a"), "read")
            .unwrap();
        assert!(allowed.contains(&"default".to_string()));
        assert!(allowed.contains(&"notes".to_string()));
        assert!(!allowed.contains(&"projects".to_string()));
    }
}
