//! Account directory.
//!
//! Resolves an account id to the teams, environments and tenants that own
//! it, from the static account mappings loaded at startup. Multiple
//! mapping rows may reference the same account (multi-team ownership).

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// A logical grouping of services independent from one another.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Tenant {
    #[serde(rename = "Id")]
    pub id: String,
    #[serde(rename = "Name", default)]
    pub name: String,
    #[serde(rename = "Description", default)]
    pub description: String,
}

/// One static configuration row associating an account with a team.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountMapping {
    #[serde(rename = "AccountId")]
    pub account_id: String,
    #[serde(rename = "Team")]
    pub team: String,
    #[serde(rename = "Environments", default)]
    pub environments: Vec<String>,
    #[serde(rename = "Tenant", default)]
    pub tenant: Option<Tenant>,
}

/// Ownership details for one account.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct AccountDetails {
    pub teams: Vec<String>,
    pub environments: Vec<String>,
    pub tenants: Vec<Tenant>,
}

/// Distinct entity counts over the mapping table, for the overview page.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct DirectoryCounts {
    pub accounts: usize,
    pub teams: usize,
    pub tenants: usize,
}

#[derive(Clone)]
pub struct AccountDirectory {
    mappings: Arc<Vec<AccountMapping>>,
}

impl AccountDirectory {
    pub fn new(mappings: Vec<AccountMapping>) -> Self {
        Self {
            mappings: Arc::new(mappings),
        }
    }

    /// Scans all mappings for an exact account-id match, de-duplicating
    /// teams by value and tenants by id while preserving encounter order.
    ///
    /// Unknown ids resolve to `teams: ["Unknown"]` rather than an error;
    /// grouping code downstream relies on `teams` never being empty.
    pub fn resolve(&self, account_id: &str) -> AccountDetails {
        let mut teams = Vec::new();
        let mut environments = Vec::new();
        let mut tenants: Vec<Tenant> = Vec::new();
        let mut seen_tenants = HashSet::new();

        for mapping in self.mappings.iter() {
            if mapping.account_id != account_id {
                continue;
            }
            if !teams.contains(&mapping.team) {
                teams.push(mapping.team.clone());
            }
            for env in &mapping.environments {
                if !environments.contains(env) {
                    environments.push(env.clone());
                }
            }
            if let Some(tenant) = &mapping.tenant {
                if seen_tenants.insert(tenant.id.clone()) {
                    tenants.push(tenant.clone());
                }
            }
        }

        if teams.is_empty() {
            teams.push("Unknown".to_string());
        }
        AccountDetails {
            teams,
            environments,
            tenants,
        }
    }

    pub fn counts(&self) -> DirectoryCounts {
        let mut accounts = HashSet::new();
        let mut teams = HashSet::new();
        let mut tenants = HashSet::new();
        for mapping in self.mappings.iter() {
            accounts.insert(mapping.account_id.as_str());
            teams.insert(mapping.team.as_str());
            if let Some(tenant) = &mapping.tenant {
                tenants.insert(tenant.id.as_str());
            }
        }
        DirectoryCounts {
            accounts: accounts.len(),
            teams: teams.len(),
            tenants: tenants.len(),
        }
    }

    pub fn mappings(&self) -> &[AccountMapping] {
        &self.mappings
    }

    /// Per-request memoizing wrapper. Thousands of snapshot documents
    /// usually share a handful of distinct account ids.
    pub fn cached(&self) -> CachedDirectory {
        CachedDirectory {
            directory: self.clone(),
            cache: HashMap::new(),
        }
    }
}

pub struct CachedDirectory {
    directory: AccountDirectory,
    cache: HashMap<String, AccountDetails>,
}

impl CachedDirectory {
    pub fn resolve(&mut self, account_id: &str) -> &AccountDetails {
        self.cache
            .entry(account_id.to_string())
            .or_insert_with(|| self.directory.resolve(account_id))
    }
}
