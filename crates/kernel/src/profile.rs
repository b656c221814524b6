//! Persona profile tracking.
//!
//! First-person statements update (or create) the user's single `self`
//! profile; proper-name mentions create or update `contact` profiles.
//! Merging is case-insensitive and alias-aware, capped at the configured
//! fact count.

use regex::Regex;
use std::sync::OnceLock;

use engram_domain::config::ProfileConfig;
use engram_domain::error::Result;
use engram_domain::memory::MemoryRecord;
use engram_domain::scene::{Profile, ProfileType};
use engram_store::Store;

use crate::extract::identity_facts;

fn preference_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\bI (?:really )?(like|love|prefer|enjoy|hate|dislike)\s+([^.!?\n]{2,80})")
            .expect("static regex")
    })
}

fn mention_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // "with Alice", "met Bob", "talked to Carol Smith"
    RE.get_or_init(|| {
        Regex::new(r"(?:with|met|saw|talked to|spoke with|called)\s+([A-Z][a-z]+(?:\s+[A-Z][a-z]+)?)")
            .expect("static regex")
    })
}

/// Words the mention pattern can false-positive on at sentence starts.
const MENTION_STOPLIST: &[&str] = &[
    "I", "Monday", "Tuesday", "Wednesday", "Thursday", "Friday", "Saturday", "Sunday", "January",
    "February", "March", "April", "May", "June", "July", "August", "September", "October",
    "November", "December",
];

/// Extract first-person preference statements.
pub fn extract_preferences(content: &str) -> Vec<String> {
    preference_regex()
        .captures_iter(content)
        .map(|caps| format!("{} {}", caps[1].to_lowercase(), caps[2].trim()))
        .collect()
}

/// Extract proper-name mentions of other people.
pub fn extract_mentions(content: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for caps in mention_regex().captures_iter(content) {
        let name = caps[1].trim().to_string();
        if MENTION_STOPLIST.contains(&name.as_str()) {
            continue;
        }
        if !names.iter().any(|n| n.eq_ignore_ascii_case(&name)) {
            names.push(name);
        }
    }
    names
}

fn push_fact(facts: &mut Vec<String>, fact: &str, cap: usize) -> bool {
    let fact = fact.trim();
    if fact.is_empty() || facts.len() >= cap {
        return false;
    }
    if facts.iter().any(|f| f.eq_ignore_ascii_case(fact)) {
        return false;
    }
    facts.push(fact.to_string());
    true
}

/// Update profiles from a freshly added memory. Returns the ids of every
/// profile touched.
pub fn track_memory(
    store: &Store,
    config: &ProfileConfig,
    memory: &MemoryRecord,
) -> Result<Vec<String>> {
    if !config.enable_profiles || !config.auto_detect_profiles {
        return Ok(Vec::new());
    }

    let mut touched = Vec::new();
    let identity = identity_facts(&memory.content);
    let preferences = extract_preferences(&memory.content);

    // Self profile: name facts and preferences.
    if !identity.is_empty() || !preferences.is_empty() {
        let mut profile = match store.get_self_profile(&memory.user_id)? {
            Some(existing) => existing,
            None if config.self_profile_auto_create => {
                let name = identity
                    .iter()
                    .find(|fact| fact.key == "identity.name")
                    .map(|fact| fact.value.clone())
                    .unwrap_or_else(|| memory.user_id.clone());
                let fresh = Profile::new(&memory.user_id, name, ProfileType::SelfProfile);
                store.add_profile(&fresh)?;
                fresh
            }
            None => return Ok(touched),
        };

        let mut changed = false;
        for fact in &identity {
            if fact.key == "identity.name" && !profile.answers_to(&fact.value) {
                if !profile.name.is_empty()
                    && !profile
                        .aliases
                        .iter()
                        .any(|a| a.eq_ignore_ascii_case(&profile.name))
                {
                    profile.aliases.push(profile.name.clone());
                }
                profile.name = fact.value.clone();
                changed = true;
            }
            changed |= push_fact(
                &mut profile.facts,
                &format!("{} = {}", fact.key, fact.value),
                config.max_facts_per_profile,
            );
        }
        for preference in &preferences {
            changed |= push_fact(
                &mut profile.preferences,
                preference,
                config.max_facts_per_profile,
            );
        }
        if changed {
            store.save_profile(&profile)?;
        }
        store.add_profile_memory(&profile.id, &memory.id, "subject")?;
        touched.push(profile.id);
    }

    // Contact profiles from proper-name mentions.
    for name in extract_mentions(&memory.content) {
        let profile = match store.get_profile_by_name(&memory.user_id, &name)? {
            Some(existing) => existing,
            None => {
                let fresh = Profile::new(&memory.user_id, &name, ProfileType::Contact);
                store.add_profile(&fresh)?;
                fresh
            }
        };
        store.add_profile_memory(&profile.id, &memory.id, "mentioned")?;
        touched.push(profile.id);
    }

    Ok(touched)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ProfileConfig {
        ProfileConfig::default()
    }

    #[test]
    fn preference_extraction() {
        let prefs = extract_preferences("I really love hiking. I prefer tea over coffee.");
        assert_eq!(prefs, vec!["love hiking".to_string(), "prefer tea over coffee".to_string()]);
        assert!(extract_preferences("the weather is nice").is_empty());
    }

    #[test]
    fn mention_extraction_skips_stoplist() {
        let names = extract_mentions("had lunch with Alice, then talked to Bob Smith on Friday");
        assert_eq!(names, vec!["Alice".to_string(), "Bob Smith".to_string()]);
        assert!(extract_mentions("meeting on Friday with Monday").len() <= 1);
    }

    #[test]
    fn self_profile_created_and_updated() {
        let store = Store::open_in_memory().unwrap();
        let m = MemoryRecord::new("my name is Ada and I love chess", "u1");
        store.add_memory(&m).unwrap();

        let touched = track_memory(&store, &config(), &m).unwrap();
        assert_eq!(touched.len(), 1);

        let profile = store.get_self_profile("u1").unwrap().unwrap();
        assert_eq!(profile.name, "Ada");
        assert_eq!(profile.preferences, vec!["love chess".to_string()]);
        assert!(profile.facts.iter().any(|f| f == "identity.name = Ada"));
    }

    #[test]
    fn renaming_keeps_old_name_as_alias() {
        let store = Store::open_in_memory().unwrap();
        let first = MemoryRecord::new("my name is Ada", "u1");
        store.add_memory(&first).unwrap();
        track_memory(&store, &config(), &first).unwrap();

        let second = MemoryRecord::new("my name is Adelaide", "u1");
        store.add_memory(&second).unwrap();
        track_memory(&store, &config(), &second).unwrap();

        let profile = store.get_self_profile("u1").unwrap().unwrap();
        assert_eq!(profile.name, "Adelaide");
        assert!(profile.aliases.contains(&"Ada".to_string()));
        // Exactly one self profile exists.
        let all = store.list_profiles(Some("u1")).unwrap();
        assert_eq!(
            all.iter()
                .filter(|p| p.profile_type == ProfileType::SelfProfile)
                .count(),
            1
        );
    }

    #[test]
    fn duplicate_preferences_dedupe_case_insensitively() {
        let store = Store::open_in_memory().unwrap();
        let a = MemoryRecord::new("I love Chess", "u1");
        let b = MemoryRecord::new("I love chess", "u1");
        store.add_memory(&a).unwrap();
        store.add_memory(&b).unwrap();
        track_memory(&store, &config(), &a).unwrap();
        track_memory(&store, &config(), &b).unwrap();

        let profile = store.get_self_profile("u1").unwrap().unwrap();
        assert_eq!(profile.preferences.len(), 1);
    }

    #[test]
    fn contact_profiles_from_mentions() {
        let store = Store::open_in_memory().unwrap();
        let m = MemoryRecord::new("paired with Marcus on the migration", "u1");
        store.add_memory(&m).unwrap();
        track_memory(&store, &config(), &m).unwrap();

        let contact = store.get_profile_by_name("u1", "marcus").unwrap().unwrap();
        assert_eq!(contact.profile_type, ProfileType::Contact);

        // A second mention reuses the same profile.
        let again = MemoryRecord::new("met Marcus for coffee", "u1");
        store.add_memory(&again).unwrap();
        track_memory(&store, &config(), &again).unwrap();
        let all = store.list_profiles(Some("u1")).unwrap();
        assert_eq!(all.len(), 1);
    }
}
