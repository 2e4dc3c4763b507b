//! # Access Control
//!
//! An administrator plus a set of authorized agents. The vault owns one of
//! these and consults it on every release; the administrator is fixed at
//! construction and is the only identity allowed to change the set.
//!
//! This type holds no lock and does no persistence; the owning component
//! does both around it.

use pfta_protocol::Principal;
use std::collections::BTreeMap;

use crate::error::{KernelError, KernelResult};

/// Administrator-maintained authorization set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessControl {
    admin: Principal,
    grants: BTreeMap<Principal, bool>,
}

impl AccessControl {
    /// Creates an empty set administered by `admin`.
    pub fn new(admin: Principal) -> Self {
        Self {
            admin,
            grants: BTreeMap::new(),
        }
    }

    /// Rebuilds a set from persisted `(agent, enabled)` rows.
    pub fn with_grants(admin: Principal, grants: impl IntoIterator<Item = (Principal, bool)>) -> Self {
        Self {
            admin,
            grants: grants.into_iter().collect(),
        }
    }

    pub fn admin(&self) -> &Principal {
        &self.admin
    }

    /// Fails with `Unauthorized` unless `caller` is the administrator.
    pub fn ensure_admin(&self, caller: &Principal, action: &'static str) -> KernelResult<()> {
        if caller == &self.admin {
            Ok(())
        } else {
            Err(KernelError::Unauthorized {
                caller: caller.clone(),
                action,
            })
        }
    }

    fn set(&mut self, agent: Principal, enabled: bool) -> bool {
        self.grants.insert(agent, enabled).unwrap_or(false)
    }

    /// Enables `agent`. Returns whether it was already enabled.
    pub fn grant(&mut self, agent: Principal) -> bool {
        self.set(agent, true)
    }

    /// Disables `agent`, keeping its row. Returns whether it was enabled.
    pub fn revoke(&mut self, agent: Principal) -> bool {
        self.set(agent, false)
    }

    /// `true` only for agents whose flag is explicitly set to `true`.
    pub fn is_authorized(&self, agent: &Principal) -> bool {
        self.grants.get(agent).copied().unwrap_or(false)
    }

    /// Agents currently authorized, in lexicographic order.
    pub fn authorized_agents(&self) -> Vec<Principal> {
        self.grants
            .iter()
            .filter(|(_, enabled)| **enabled)
            .map(|(agent, _)| agent.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn unknown_agents_are_not_authorized() {
        let acl = AccessControl::new(Principal::new("admin"));
        assert!(!acl.is_authorized(&Principal::new("anyone")));
        assert!(!acl.is_authorized(&Principal::new("admin")));
    }

    #[test]
    fn grant_and_revoke() {
        let mut acl = AccessControl::new(Principal::new("admin"));
        let agent = Principal::new("scheduler");

        assert!(!acl.grant(agent.clone()));
        assert!(acl.is_authorized(&agent));
        assert_eq!(acl.authorized_agents(), vec![agent.clone()]);

        assert!(acl.revoke(agent.clone()));
        assert!(!acl.is_authorized(&agent));
        assert!(acl.authorized_agents().is_empty());
    }

    #[test]
    fn only_admin_passes_ensure_admin() {
        let acl = AccessControl::new(Principal::new("admin"));
        assert!(acl.ensure_admin(&Principal::new("admin"), "authorize").is_ok());

        let err = acl
            .ensure_admin(&Principal::new("mallory"), "authorize")
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authorization);
    }

    #[test]
    fn restored_grants_keep_disabled_rows() {
        let acl = AccessControl::with_grants(
            Principal::new("admin"),
            vec![(Principal::new("a"), true), (Principal::new("b"), false)],
        );
        assert!(acl.is_authorized(&Principal::new("a")));
        assert!(!acl.is_authorized(&Principal::new("b")));
        assert_eq!(acl.authorized_agents(), vec![Principal::new("a")]);
    }
}
