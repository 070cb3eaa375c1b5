//! Authorization
//!
//! Commands carry a named strategy; a requester is allowed to run a command when the
//! strategy accepts the groups they belong to.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

/// Group whose members pass the `admins` strategy
pub const ADMIN_GROUP: &str = "admin";

/// Authorization requirement of a command
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum AuthStrategy {
    /// Everybody may run the command
    Any,
    /// Nobody may run the command
    #[default]
    None,
    /// Members of the admin group only
    Admins,
    /// Members of at least one of the listed groups
    Group { groups: Vec<String> },
}

impl std::fmt::Display for AuthStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthStrategy::Any => write!(f, "any"),
            AuthStrategy::None => write!(f, "none"),
            AuthStrategy::Admins => write!(f, "admins"),
            AuthStrategy::Group { groups } => write!(f, "group({})", groups.join(", ")),
        }
    }
}

/// Decides whether a strategy accepts a set of groups
pub trait Authorizer: Send + Sync {
    fn evaluate(&self, strategy: &AuthStrategy, requester_groups: &[String]) -> bool;
}

/// Default authorizer implementing every strategy as documented on AuthStrategy
#[derive(Debug, Default, Clone, Copy)]
pub struct StrategyAuthorizer;

impl Authorizer for StrategyAuthorizer {
    fn evaluate(&self, strategy: &AuthStrategy, requester_groups: &[String]) -> bool {
        match strategy {
            AuthStrategy::Any => true,
            AuthStrategy::None => false,
            AuthStrategy::Admins => requester_groups.iter().any(|g| g == ADMIN_GROUP),
            AuthStrategy::Group { groups } => {
                let allowed: HashSet<&str> = groups.iter().map(String::as_str).collect();
                requester_groups.iter().any(|g| allowed.contains(g.as_str()))
            }
        }
    }
}

/// Group membership: group name to member usernames
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Groups {
    members: BTreeMap<String, Vec<String>>,
}

impl Groups {
    pub fn new(members: BTreeMap<String, Vec<String>>) -> Self {
        Self { members }
    }

    /// Names of the groups `username` belongs to, in name order
    pub fn groups_of(&self, username: &str) -> Vec<String> {
        self.members
            .iter()
            .filter(|(_, users)| users.iter().any(|u| u == username))
            .map(|(group, _)| group.clone())
            .collect()
    }

    /// Whether `username` is a member of the admin group
    pub fn is_admin(&self, username: &str) -> bool {
        self.groups_of(username).iter().any(|g| g == ADMIN_GROUP)
    }

    /// Every group with its members, in name order
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Vec<String>)> {
        self.members.iter()
    }
}
