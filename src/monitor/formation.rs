// src/monitor/formation.rs

//! C2: the formation registry. Groupings of nodes; a formation is a
//! logical cluster, holding `number_sync_standbys` and the
//! secondary-enabled flag.

use crate::error::{PgAutoFailoverError, Result};
use crate::monitor::registry::NodeRegistry;
use crate::monitor::state::{Formation, FormationKind};
use parking_lot::Mutex;
use std::collections::HashMap;

pub struct FormationRegistry {
    formations: Mutex<HashMap<String, Formation>>,
}

impl FormationRegistry {
    pub fn new() -> Self {
        Self {
            formations: Mutex::new(HashMap::new()),
        }
    }

    pub fn create(
        &self,
        formation_id: &str,
        kind: FormationKind,
        dbname: &str,
        opt_secondary: bool,
    ) -> Result<Formation> {
        let mut formations = self.formations.lock();
        if formations.contains_key(formation_id) {
            return Err(PgAutoFailoverError::Conflict(format!(
                "formation '{formation_id}' already exists"
            )));
        }
        let formation = Formation {
            formation_id: formation_id.to_string(),
            kind,
            dbname: dbname.to_string(),
            opt_secondary,
            number_sync_standbys: 0,
        };
        formations.insert(formation_id.to_string(), formation.clone());
        Ok(formation)
    }

    pub fn get(&self, formation_id: &str) -> Result<Formation> {
        self.formations
            .lock()
            .get(formation_id)
            .cloned()
            .ok_or_else(|| PgAutoFailoverError::FormationNotFound(formation_id.to_string()))
    }

    pub fn get_or_default(&self, formation_id: &str) -> Formation {
        self.formations
            .lock()
            .entry(formation_id.to_string())
            .or_insert_with(|| Formation::new(formation_id))
            .clone()
    }

    /// Dropping a formation fails if any node references it.
    pub fn drop_formation(&self, formation_id: &str, registry: &NodeRegistry) -> Result<()> {
        if !registry.list_formation(formation_id).is_empty() {
            return Err(PgAutoFailoverError::InvariantViolation(format!(
                "cannot drop formation '{formation_id}': nodes still reference it"
            )));
        }
        self.formations
            .lock()
            .remove(formation_id)
            .ok_or_else(|| PgAutoFailoverError::FormationNotFound(formation_id.to_string()))?;
        Ok(())
    }

    /// Disabling secondary fails if any node in the formation is in a
    /// secondary state.
    pub fn set_secondary_enabled(
        &self,
        formation_id: &str,
        enabled: bool,
        registry: &NodeRegistry,
    ) -> Result<()> {
        if !enabled {
            let has_secondary = registry
                .list_formation(formation_id)
                .iter()
                .any(|n| n.reported_state == crate::monitor::state::ReplicationState::Secondary);
            if has_secondary {
                return Err(PgAutoFailoverError::InvariantViolation(format!(
                    "cannot disable secondary on '{formation_id}': a node is currently secondary"
                )));
            }
        }
        let mut formations = self.formations.lock();
        let formation = formations
            .get_mut(formation_id)
            .ok_or_else(|| PgAutoFailoverError::FormationNotFound(formation_id.to_string()))?;
        formation.opt_secondary = enabled;
        Ok(())
    }

    pub fn set_number_sync_standbys(&self, formation_id: &str, n: u32) -> Result<()> {
        let mut formations = self.formations.lock();
        let formation = formations
            .get_mut(formation_id)
            .ok_or_else(|| PgAutoFailoverError::FormationNotFound(formation_id.to_string()))?;
        formation.number_sync_standbys = n;
        Ok(())
    }
}

impl Default for FormationRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drop_fails_with_referencing_nodes() {
        let formations = FormationRegistry::new();
        let registry = NodeRegistry::new();
        formations
            .create("f", FormationKind::Pgsql, "postgres", true)
            .unwrap();
        registry
            .insert_node("f", "a", "h1", 5432, None, FormationKind::Pgsql, 100, true, 0)
            .unwrap();
        let err = formations.drop_formation("f", &registry).unwrap_err();
        assert!(matches!(err, PgAutoFailoverError::InvariantViolation(_)));
    }

    #[test]
    fn disable_secondary_fails_with_secondary_node() {
        let formations = FormationRegistry::new();
        let registry = NodeRegistry::new();
        formations
            .create("f", FormationKind::Pgsql, "postgres", true)
            .unwrap();
        let (id, _, _) = registry
            .insert_node("f", "a", "h1", 5432, None, FormationKind::Pgsql, 100, true, 0)
            .unwrap();
        registry
            .set_reported_state(
                id,
                crate::monitor::state::ReplicationState::Secondary,
                true,
                crate::monitor::state::SyncState::Async,
                1,
                0,
            )
            .unwrap();
        let err = formations
            .set_secondary_enabled("f", false, &registry)
            .unwrap_err();
        assert!(matches!(err, PgAutoFailoverError::InvariantViolation(_)));
    }
}
