//! Filters and the store that keeps them consistent.
//!
//! [`FilterStore`] is an arena of filters keyed by id. Every mutation is
//! validated as a whole before anything is written: condition lists are
//! replaced atomically, sub-filter references are checked for cycles and
//! for private-ownership compatibility, and visibility changes are checked
//! against every filter depending on the edited one.

use crate::condition::{BuildContext, Condition, EvalEnv, StoredCondition};
use crate::config::EngineConfig;
use crate::error::{ConflictError, FilterError, Result, ValidationError};
use crate::operands::EvalContext;
use crate::operators::OperatorRegistry;
use crate::record::{Record, RecordSource};
use crate::schema::Schema;
use crate::users::{Directory, UserId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct EntityFilter {
    pub id: String,
    pub name: String,
    pub record_type: String,
    /// Created by a user: deletable, and its name can change
    pub is_custom: bool,
    pub is_private: bool,
    /// User or team; required when private
    pub owner: Option<UserId>,
    pub use_or: bool,
    pub conditions: Vec<Condition>,
}

impl EntityFilter {
    /// Public custom filter without conditions yet.
    pub fn new(id: &str, name: &str, record_type: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            record_type: record_type.to_string(),
            is_custom: true,
            is_private: false,
            owner: None,
            use_or: false,
            conditions: Vec::new(),
        }
    }

    /// Ids of the filters referenced by the conditions.
    pub fn subfilter_ids(&self) -> impl Iterator<Item = &str> {
        self.conditions.iter().filter_map(Condition::subfilter_id)
    }

    pub fn to_payload(&self) -> FilterPayload {
        FilterPayload {
            id: self.id.clone(),
            name: self.name.clone(),
            record_type: self.record_type.clone(),
            is_custom: self.is_custom,
            is_private: self.is_private,
            owner: self.owner,
            use_or: self.use_or,
            conditions: self.conditions.iter().map(Condition::to_stored).collect(),
        }
    }
}

/// Filter as submitted by the configuration layer, and as persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterPayload {
    pub id: String,
    pub name: String,
    pub record_type: String,
    #[serde(default = "default_true")]
    pub is_custom: bool,
    #[serde(default)]
    pub is_private: bool,
    #[serde(default)]
    pub owner: Option<UserId>,
    #[serde(default)]
    pub use_or: bool,
    #[serde(default)]
    pub conditions: Vec<StoredCondition>,
}

fn default_true() -> bool {
    true
}

/// Answer of the permission checks, with the reason of a refusal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Permission {
    pub allowed: bool,
    pub reason: String,
}

impl Permission {
    fn allow() -> Self {
        Self {
            allowed: true,
            reason: String::new(),
        }
    }

    fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: reason.into(),
        }
    }
}

pub struct FilterStore<'a> {
    schema: &'a Schema,
    directory: &'a Directory,
    registry: OperatorRegistry,
    max_field_depth: usize,
    filters: BTreeMap<String, EntityFilter>,
}

impl<'a> FilterStore<'a> {
    pub fn new(schema: &'a Schema, directory: &'a Directory, config: &EngineConfig) -> Self {
        Self {
            schema,
            directory,
            registry: OperatorRegistry::new(config.case_sensitivity),
            max_field_depth: config.max_field_depth,
            filters: BTreeMap::new(),
        }
    }

    pub fn schema(&self) -> &'a Schema {
        self.schema
    }

    pub fn directory(&self) -> &'a Directory {
        self.directory
    }

    pub fn registry(&self) -> &OperatorRegistry {
        &self.registry
    }

    pub fn get(&self, id: &str) -> Result<&EntityFilter> {
        self.filters
            .get(id)
            .ok_or_else(|| FilterError::not_found("filter", id))
    }

    pub fn filters(&self) -> impl Iterator<Item = &EntityFilter> {
        self.filters.values()
    }

    pub fn build_context<'s>(&'s self, record_type: &'s str) -> BuildContext<'s> {
        BuildContext {
            schema: self.schema,
            registry: &self.registry,
            filters: &self.filters,
            record_type,
            max_depth: self.max_field_depth,
        }
    }

    /// Validate a payload and build the filter, without storing it.
    pub fn validate_and_build(&self, payload: &FilterPayload) -> Result<EntityFilter> {
        self.schema.record_type(&payload.record_type)?;
        self.check_owner(payload.is_private, payload.owner)?;

        let mut filter = EntityFilter {
            id: payload.id.clone(),
            name: payload.name.clone(),
            record_type: payload.record_type.clone(),
            is_custom: payload.is_custom,
            is_private: payload.is_private,
            owner: payload.owner,
            use_or: payload.use_or,
            conditions: Vec::new(),
        };
        filter.conditions = self.build_conditions(&filter, &payload.conditions)?;
        Ok(filter)
    }

    pub fn create(&mut self, payload: &FilterPayload) -> Result<&EntityFilter> {
        if self.filters.contains_key(&payload.id) {
            return Err(ConflictError::AlreadyExists(payload.id.clone()).into());
        }
        let filter = self.validate_and_build(payload)?;
        debug!(filter = %filter.id, conditions = filter.conditions.len(), "filter created");

        let id = filter.id.clone();
        self.filters.insert(id.clone(), filter);
        self.get(&id)
    }

    /// Replace the whole condition list of a filter; nothing changes if any
    /// check fails.
    pub fn set_conditions(&mut self, id: &str, conditions: &[StoredCondition]) -> Result<()> {
        let filter = self.get(id)?;
        let built = self.build_conditions(filter, conditions)?;

        if let Some(filter) = self.filters.get_mut(id) {
            debug!(filter = %id, conditions = built.len(), "conditions replaced");
            filter.conditions = built;
        }
        Ok(())
    }

    /// Change the visibility of a filter. The filter's own sub-filters and
    /// every filter using it must stay compatible, or nothing changes.
    pub fn update_visibility(
        &mut self,
        id: &str,
        is_private: bool,
        owner: Option<UserId>,
    ) -> Result<()> {
        self.check_owner(is_private, owner)?;

        let current = self.get(id)?;
        let mut candidate = current.clone();
        candidate.is_private = is_private;
        candidate.owner = owner;

        for sub_id in candidate.subfilter_ids() {
            let sub = self.get(sub_id)?;
            if let Err(reason) = self.check_subfilter_privacy(&candidate, sub) {
                return Err(ValidationError::PrivateSubfilter {
                    subfilter: sub.id.clone(),
                    reason,
                }
                .into());
            }
        }

        for dependent in self.dependents_of(id) {
            if let Err(reason) = self.check_subfilter_privacy(dependent, &candidate) {
                return Err(ConflictError::VisibilityBreaksDependent {
                    filter: id.to_string(),
                    dependent: dependent.id.clone(),
                    reason,
                }
                .into());
            }
        }

        debug!(filter = %id, is_private, ?owner, "visibility updated");
        self.filters.insert(id.to_string(), candidate);
        Ok(())
    }

    pub fn delete(&mut self, id: &str) -> Result<EntityFilter> {
        let filter = self.get(id)?;
        if !filter.is_custom {
            return Err(ConflictError::NotDeletable(id.to_string()).into());
        }

        let dependents: Vec<String> = self.dependents_of(id).iter().map(|f| f.id.clone()).collect();
        if !dependents.is_empty() {
            return Err(ConflictError::ReferencedBy {
                filter: id.to_string(),
                dependents,
            }
            .into());
        }

        debug!(filter = %id, "filter deleted");
        self.filters
            .remove(id)
            .ok_or_else(|| FilterError::not_found("filter", id))
    }

    /// Filters directly referencing `id` as a sub-filter.
    pub fn dependents_of(&self, id: &str) -> Vec<&EntityFilter> {
        self.filters
            .values()
            .filter(|f| f.subfilter_ids().any(|sub| sub == id))
            .collect()
    }

    pub fn can_view(&self, filter: &EntityFilter, viewer: UserId) -> Permission {
        let Ok(user) = self.directory.get(viewer) else {
            return Permission::deny(format!("unknown user {}", viewer));
        };
        if user.is_superuser {
            return Permission::allow();
        }
        if !user.can_read(&filter.record_type) {
            return Permission::deny(format!(
                "you are not allowed to read \"{}\"",
                filter.record_type
            ));
        }
        if !filter.is_private {
            return Permission::allow();
        }
        match filter.owner {
            Some(owner) if self.directory.is_owned_by(viewer, owner) => Permission::allow(),
            _ => Permission::deny("you are not allowed to view this private filter"),
        }
    }

    pub fn can_edit(&self, filter: &EntityFilter, editor: UserId) -> Permission {
        let view = self.can_view(filter, editor);
        if !view.allowed {
            return view;
        }
        let is_superuser = self.directory.get(editor).map_or(false, |u| u.is_superuser);
        match filter.owner {
            Some(owner) if !is_superuser && !self.directory.is_owned_by(editor, owner) => {
                Permission::deny("you are not allowed to edit a filter belonging to another user")
            }
            _ => Permission::allow(),
        }
    }

    pub fn can_delete(&self, filter: &EntityFilter, user: UserId) -> Permission {
        if !filter.is_custom {
            return Permission::deny("this filter cannot be deleted");
        }
        self.can_edit(filter, user)
    }

    /// Filters of a record type visible by a user, in id order.
    pub fn visible_filters(&self, record_type: &str, viewer: UserId) -> Vec<&EntityFilter> {
        self.filters
            .values()
            .filter(|f| f.record_type == record_type && self.can_view(f, viewer).allowed)
            .collect()
    }

    /// Evaluate a filter on an in-memory record.
    pub fn evaluate_in_memory(
        &self,
        filter: &EntityFilter,
        record: &Record,
        source: &dyn RecordSource,
        ctx: &EvalContext,
    ) -> Result<bool> {
        let env = EvalEnv {
            schema: self.schema,
            registry: &self.registry,
            filters: &self.filters,
            source,
            ctx,
        };
        accept_filter(filter, record, &env, &mut Vec::new())
    }

    fn check_owner(&self, is_private: bool, owner: Option<UserId>) -> Result<()> {
        if let Some(owner) = owner {
            self.directory.get(owner)?;
        }
        if is_private && owner.is_none() {
            return Err(ValidationError::MissingOwner.into());
        }
        Ok(())
    }

    /// Full validation of a condition list for `filter`: every condition,
    /// then uniqueness, cycles and sub-filter privacy.
    fn build_conditions(
        &self,
        filter: &EntityFilter,
        stored: &[StoredCondition],
    ) -> Result<Vec<Condition>> {
        if stored.is_empty() {
            return Err(ValidationError::EmptyConditions.into());
        }

        let ctx = self.build_context(&filter.record_type);
        let conditions = stored
            .iter()
            .map(|s| Condition::from_stored(&ctx, s))
            .collect::<Result<Vec<_>>>()?;

        let mut keys = HashSet::new();
        for condition in &conditions {
            let (kind, target) = condition.key();
            if !keys.insert((kind, target.clone())) {
                return Err(ValidationError::DuplicateCondition {
                    kind: kind.as_u8(),
                    target,
                }
                .into());
            }
        }

        let references: Vec<&str> = conditions.iter().filter_map(Condition::subfilter_id).collect();
        self.check_cycles(&filter.id, &references)?;

        for sub_id in references {
            let sub = self.get(sub_id)?;
            if let Err(reason) = self.check_subfilter_privacy(filter, sub) {
                return Err(ValidationError::PrivateSubfilter {
                    subfilter: sub.id.clone(),
                    reason,
                }
                .into());
            }
        }

        Ok(conditions)
    }

    /// Would `filter_id`, once referencing `references`, reach itself?
    /// Iterative depth-first walk over the arena, stopping at the first
    /// path back.
    fn check_cycles(&self, filter_id: &str, references: &[&str]) -> Result<()> {
        for &start in references {
            let mut stack = vec![start];
            let mut visited = BTreeSet::new();

            while let Some(current) = stack.pop() {
                if current == filter_id {
                    return Err(ValidationError::Cycle {
                        filter: filter_id.to_string(),
                        via: start.to_string(),
                    }
                    .into());
                }
                if !visited.insert(current) {
                    continue;
                }
                if let Some(f) = self.filters.get(current) {
                    stack.extend(f.subfilter_ids());
                }
            }
        }
        Ok(())
    }

    /// Can `filter` reference `sub`, given their visibilities?
    fn check_subfilter_privacy(
        &self,
        filter: &EntityFilter,
        sub: &EntityFilter,
    ) -> std::result::Result<(), String> {
        if !sub.is_private {
            return Ok(());
        }
        if !filter.is_private {
            return Err(format!("a public filter cannot use the private filter \"{}\"", sub.name));
        }

        let (Some(owner), Some(sub_owner)) = (filter.owner, sub.owner) else {
            return Err(format!("the private filter \"{}\" has no owner", sub.name));
        };
        if owner == sub_owner {
            return Ok(());
        }

        let owner_is_team = self.directory.get(owner).map_or(false, |u| u.is_team);
        let sub_owner_is_team = self.directory.get(sub_owner).map_or(false, |u| u.is_team);
        if !owner_is_team && sub_owner_is_team && self.directory.is_owned_by(owner, sub_owner) {
            return Ok(());
        }

        Err(if sub_owner_is_team {
            format!(
                "the private filter \"{}\" belongs to a team the owner is not a member of",
                sub.name
            )
        } else {
            format!("the private filter \"{}\" belongs to another user", sub.name)
        })
    }
}

/// In-memory evaluation of `filter`; `visiting` holds the filters being
/// evaluated up the call chain.
pub(crate) fn accept_filter(
    filter: &EntityFilter,
    record: &Record,
    env: &EvalEnv<'_>,
    visiting: &mut Vec<String>,
) -> Result<bool> {
    if visiting.iter().any(|id| id == &filter.id) {
        return Err(ValidationError::Cycle {
            filter: filter.id.clone(),
            via: visiting.last().cloned().unwrap_or_default(),
        }
        .into());
    }
    visiting.push(filter.id.clone());

    let mut results = Vec::with_capacity(filter.conditions.len());
    for condition in &filter.conditions {
        match condition.accept(&filter.record_type, record, env, visiting)? {
            Some(accepted) => results.push(accepted),
            None => warn!(
                filter = %filter.id,
                kind = %condition.kind(),
                name = %condition.name(),
                "condition refers to something that no longer exists; ignored"
            ),
        }
    }
    visiting.pop();

    if results.is_empty() {
        return Err(ValidationError::NoEffectiveCondition(filter.id.clone()).into());
    }
    Ok(if filter.use_or {
        results.iter().any(|r| *r)
    } else {
        results.iter().all(|r| *r)
    })
}
