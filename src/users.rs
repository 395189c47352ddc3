//! Users and teams, as far as filter ownership and visibility need them.

use crate::error::{FilterError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

pub type UserId = u32;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    #[serde(default)]
    pub is_team: bool,
    #[serde(default)]
    pub is_superuser: bool,
    /// Members, for teams
    #[serde(default)]
    pub teammates: BTreeSet<UserId>,
    /// Record types the user may read; `None` means all of them
    #[serde(default)]
    pub readable_types: Option<BTreeSet<String>>,
}

impl User {
    pub fn new(id: UserId, username: &str) -> Self {
        Self {
            id,
            username: username.to_string(),
            is_team: false,
            is_superuser: false,
            teammates: BTreeSet::new(),
            readable_types: None,
        }
    }

    pub fn team(id: UserId, name: &str, members: &[UserId]) -> Self {
        Self {
            is_team: true,
            teammates: members.iter().copied().collect(),
            ..Self::new(id, name)
        }
    }

    pub fn superuser(mut self) -> Self {
        self.is_superuser = true;
        self
    }

    pub fn can_read(&self, record_type: &str) -> bool {
        self.is_superuser
            || self
                .readable_types
                .as_ref()
                .map_or(true, |types| types.contains(record_type))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Directory {
    users: BTreeMap<UserId, User>,
}

impl Directory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, user: User) -> &mut Self {
        self.users.insert(user.id, user);
        self
    }

    pub fn get(&self, id: UserId) -> Result<&User> {
        self.users
            .get(&id)
            .ok_or_else(|| FilterError::not_found("user", id))
    }

    /// Teams `user` is a member of.
    pub fn teams_of(&self, user: UserId) -> impl Iterator<Item = &User> {
        self.users
            .values()
            .filter(move |u| u.is_team && u.teammates.contains(&user))
    }

    /// Is `user` the same as `owner`, or a member of the team `owner`?
    pub fn is_owned_by(&self, user: UserId, owner: UserId) -> bool {
        user == owner
            || self
                .users
                .get(&owner)
                .map_or(false, |o| o.is_team && o.teammates.contains(&user))
    }
}
