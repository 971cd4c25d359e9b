use super::resource::{AclResource, RoleProvider};
use crate::config::AclConfig;
use crate::core::{Result, UmiError};
use log::{debug, trace};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

/// Matches every resource or every operation in a rule.
pub const WILDCARD: &str = "*";

/// Outcome of resolving one role against one resource and operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Permission {
    Allowed,
    Denied,
    /// Allowed if the resource accepts these assertions.
    NeedsAssertion(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Rule {
    Allow,
    Deny,
    Assert(Vec<String>),
}

impl From<&Rule> for Permission {
    fn from(rule: &Rule) -> Self {
        match rule {
            Rule::Allow => Permission::Allowed,
            Rule::Deny => Permission::Denied,
            Rule::Assert(assertions) => Permission::NeedsAssertion(assertions.clone()),
        }
    }
}

/// Role/resource/operation permission graph.
///
/// Roles inherit from parents declared before them, so the role graph can
/// never contain a cycle.
#[derive(Debug, Clone, Default)]
pub struct AclManager {
    roles: BTreeMap<String, Vec<String>>,
    resources: BTreeSet<String>,
    rules: HashMap<String, HashMap<String, HashMap<String, Rule>>>,
}

impl AclManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a manager from configuration. Roles may be listed in any order;
    /// they are added parents first.
    pub fn from_config(config: &AclConfig) -> Result<Self> {
        let mut acl = Self::new();

        let mut pending: Vec<(&String, &Vec<String>)> = config.roles.iter().collect();
        while !pending.is_empty() {
            let before = pending.len();
            let mut blocked = Vec::new();
            for (role, parents) in pending {
                if parents.iter().all(|p| acl.has_role(p)) {
                    let parents: Vec<&str> = parents.iter().map(String::as_str).collect();
                    acl.add_role(role, &parents)?;
                } else {
                    blocked.push((role, parents));
                }
            }
            if blocked.len() == before {
                let (role, parents) = blocked[0];
                return Err(match parents.iter().find(|p| !config.roles.contains_key(*p)) {
                    Some(parent) => UmiError::UnexpectedValue(format!(
                        "Role '{}' inherits from unknown role '{}'",
                        role, parent
                    )),
                    None => UmiError::UnexpectedValue(format!(
                        "Role '{}' takes part in an inheritance cycle",
                        role
                    )),
                });
            }
            pending = blocked;
        }

        for resource in &config.resources {
            acl.add_resource(resource)?;
        }

        for (role, resources) in &config.rules {
            if resources.is_empty() {
                acl.allow(role, WILDCARD, WILDCARD, &[])?;
            }
            for (resource, operations) in resources {
                if operations.is_empty() {
                    acl.allow(role, resource, WILDCARD, &[])?;
                }
                for (operation, assertions) in operations {
                    let assertions: Vec<&str> = assertions.iter().map(String::as_str).collect();
                    acl.allow(role, resource, operation, &assertions)?;
                }
            }
        }

        debug!(
            "ACL loaded: {} roles, {} resources",
            acl.roles.len(),
            acl.resources.len()
        );
        Ok(acl)
    }

    /// Adds a role. Every parent must already exist.
    pub fn add_role(&mut self, name: &str, parents: &[&str]) -> Result<()> {
        if self.has_role(name) {
            return Err(UmiError::AlreadyExistentEntity(format!(
                "Role '{}' already exists",
                name
            )));
        }
        if let Some(parent) = parents.iter().find(|p| !self.has_role(p)) {
            return Err(UmiError::NonexistentEntity(format!(
                "Cannot add role '{}': parent role '{}' does not exist",
                name, parent
            )));
        }
        self.roles
            .insert(name.to_string(), parents.iter().map(|p| p.to_string()).collect());
        Ok(())
    }

    pub fn add_resource(&mut self, name: &str) -> Result<()> {
        if name == WILDCARD {
            return Err(UmiError::UnexpectedValue(format!(
                "'{}' is reserved and cannot name a resource",
                WILDCARD
            )));
        }
        if !self.resources.insert(name.to_string()) {
            return Err(UmiError::AlreadyExistentEntity(format!(
                "Resource '{}' already exists",
                name
            )));
        }
        Ok(())
    }

    /// Grants `operation` on `resource`. With assertions the grant is
    /// conditional and the resource decides.
    pub fn allow(&mut self, role: &str, resource: &str, operation: &str, assertions: &[&str]) -> Result<()> {
        let rule = if assertions.is_empty() {
            Rule::Allow
        } else {
            Rule::Assert(assertions.iter().map(|a| a.to_string()).collect())
        };
        self.set_rule(role, resource, operation, rule)
    }

    /// Explicitly refuses `operation` on `resource`; stops inheritance.
    pub fn deny(&mut self, role: &str, resource: &str, operation: &str) -> Result<()> {
        self.set_rule(role, resource, operation, Rule::Deny)
    }

    fn set_rule(&mut self, role: &str, resource: &str, operation: &str, rule: Rule) -> Result<()> {
        self.check_role(role)?;
        if resource != WILDCARD {
            self.check_resource(resource)?;
        }
        self.rules
            .entry(role.to_string())
            .or_default()
            .entry(resource.to_string())
            .or_default()
            .insert(operation.to_string(), rule);
        Ok(())
    }

    pub fn has_role(&self, name: &str) -> bool {
        self.roles.contains_key(name)
    }

    pub fn has_resource(&self, name: &str) -> bool {
        self.resources.contains(name)
    }

    pub fn roles(&self) -> impl Iterator<Item = &str> {
        self.roles.keys().map(String::as_str)
    }

    pub fn resources(&self) -> impl Iterator<Item = &str> {
        self.resources.iter().map(String::as_str)
    }

    /// Parents of a role, in declaration order.
    pub fn parents(&self, role: &str) -> Result<&[String]> {
        self.check_role(role)?;
        Ok(self.roles.get(role).map(Vec::as_slice).unwrap_or_default())
    }

    /// Resolves the nearest rule for one role: its own rules first (exact
    /// resource before the wildcard resource, exact operation before the
    /// wildcard operation), then each parent in order, depth first.
    pub fn permission(&self, role: &str, resource: &str, operation: &str) -> Result<Permission> {
        self.check_role(role)?;
        self.check_resource(resource)?;
        let mut visited = HashSet::new();
        Ok(self
            .resolve(role, resource, operation, &mut visited)
            .map(Permission::from)
            .unwrap_or(Permission::Denied))
    }

    fn resolve<'a>(
        &'a self,
        role: &'a str,
        resource: &str,
        operation: &str,
        visited: &mut HashSet<&'a str>,
    ) -> Option<&'a Rule> {
        if !visited.insert(role) {
            return None;
        }
        if let Some(resources) = self.rules.get(role) {
            for candidate in [resource, WILDCARD] {
                let Some(operations) = resources.get(candidate) else {
                    continue;
                };
                if let Some(rule) = operations.get(operation).or_else(|| operations.get(WILDCARD)) {
                    trace!("ACL rule for {}/{}/{} found at {}/{}", role, resource, operation, role, candidate);
                    return Some(rule);
                }
            }
        }
        self.roles
            .get(role)?
            .iter()
            .find_map(|parent| self.resolve(parent, resource, operation, visited))
    }

    /// Whether any role of `subject` may perform `operation` on `resource`.
    /// Roles the ACL does not know are denied.
    pub fn is_allowed<R, S>(&self, subject: &R, resource: &S, operation: &str) -> Result<bool>
    where
        R: RoleProvider + ?Sized,
        S: AclResource + ?Sized,
    {
        let resource_name = resource.resource_name();
        self.check_resource(&resource_name)?;
        for role in subject.role_names() {
            if !self.has_role(&role) {
                debug!("Role '{}' is unknown, denied '{}' on '{}'", role, operation, resource_name);
                continue;
            }
            match self.permission(&role, &resource_name, operation)? {
                Permission::Allowed => return Ok(true),
                Permission::Denied => {}
                Permission::NeedsAssertion(assertions) => {
                    let assertion = resource.as_assertion().ok_or_else(|| {
                        UmiError::Runtime(format!(
                            "Resource '{}' has conditional rules {:?} but cannot check assertions",
                            resource_name, assertions
                        ))
                    })?;
                    if assertion.is_allowed(&role, operation, &assertions)? {
                        return Ok(true);
                    }
                }
            }
        }
        Ok(false)
    }

    fn check_role(&self, role: &str) -> Result<()> {
        if !self.has_role(role) {
            return Err(UmiError::NonexistentEntity(format!("Role '{}' does not exist", role)));
        }
        Ok(())
    }

    fn check_resource(&self, resource: &str) -> Result<()> {
        if !self.has_resource(resource) {
            return Err(UmiError::NonexistentEntity(format!(
                "Resource '{}' does not exist",
                resource
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acl::AclAssertion;

    fn editorial() -> AclManager {
        let mut acl = AclManager::new();
        acl.add_role("guest", &[]).unwrap();
        acl.add_role("author", &["guest"]).unwrap();
        acl.add_role("editor", &["author"]).unwrap();
        acl.add_resource("article").unwrap();
        acl.add_resource("comment").unwrap();
        acl.allow("guest", "article", "view", &[]).unwrap();
        acl.allow("author", "article", "edit", &["own"]).unwrap();
        acl.allow("editor", "article", "*", &[]).unwrap();
        acl
    }

    #[test]
    fn test_allow_then_is_allowed() {
        let mut acl = AclManager::new();
        acl.add_role("editor", &[]).unwrap();
        acl.add_resource("article").unwrap();
        acl.allow("editor", "article", "edit", &[]).unwrap();
        assert!(acl.is_allowed("editor", "article", "edit").unwrap());
        assert!(!acl.is_allowed("editor", "article", "delete").unwrap());
    }

    #[test]
    fn test_parents_are_walked_in_order() {
        let acl = editorial();
        assert_eq!(acl.permission("editor", "article", "view").unwrap(), Permission::Allowed);
        assert_eq!(
            acl.permission("author", "article", "edit").unwrap(),
            Permission::NeedsAssertion(vec!["own".into()])
        );
        assert_eq!(acl.permission("guest", "comment", "view").unwrap(), Permission::Denied);
    }

    #[test]
    fn test_specific_resource_beats_wildcard_for_same_role() {
        let mut acl = editorial();
        acl.allow("guest", "*", "*", &[]).unwrap();
        acl.deny("guest", "comment", "post").unwrap();
        assert!(acl.is_allowed("guest", "comment", "view").unwrap());
        assert!(!acl.is_allowed("guest", "comment", "post").unwrap());
    }

    #[test]
    fn test_wildcard_resource_with_specific_operation() {
        let mut acl = editorial();
        acl.allow("guest", "*", "list", &[]).unwrap();
        assert!(acl.is_allowed("guest", "comment", "list").unwrap());
        assert!(!acl.is_allowed("guest", "comment", "edit").unwrap());
    }

    #[test]
    fn test_role_errors() {
        let mut acl = editorial();
        assert!(matches!(
            acl.add_role("editor", &[]),
            Err(UmiError::AlreadyExistentEntity(_))
        ));
        assert!(matches!(
            acl.add_role("admin", &["root"]),
            Err(UmiError::NonexistentEntity(_))
        ));
        assert!(matches!(
            acl.allow("nobody", "article", "view", &[]),
            Err(UmiError::NonexistentEntity(_))
        ));
        assert!(matches!(
            acl.add_resource("article"),
            Err(UmiError::AlreadyExistentEntity(_))
        ));
    }

    struct OwnArticle {
        owner: &'static str,
    }

    impl AclResource for OwnArticle {
        fn resource_name(&self) -> String {
            "article".to_string()
        }

        fn as_assertion(&self) -> Option<&dyn AclAssertion> {
            Some(self)
        }
    }

    impl AclAssertion for OwnArticle {
        fn is_allowed(&self, role: &str, _operation: &str, assertions: &[String]) -> Result<bool> {
            Ok(assertions.iter().any(|a| a == "own") && self.owner == role)
        }
    }

    #[test]
    fn test_assertions_are_delegated_to_the_resource() {
        let acl = editorial();
        assert!(acl.is_allowed("author", &OwnArticle { owner: "author" }, "edit").unwrap());
        assert!(!acl.is_allowed("author", &OwnArticle { owner: "someone" }, "edit").unwrap());
        assert!(matches!(
            acl.is_allowed("author", "article", "edit"),
            Err(UmiError::Runtime(_))
        ));
    }

    #[test]
    fn test_multiple_roles_first_allowed_wins() {
        let acl = editorial();
        let roles = vec!["guest".to_string(), "editor".to_string()];
        assert!(acl.is_allowed(&roles, "article", "delete").unwrap());
    }

    #[test]
    fn test_from_config_orders_roles_and_expands_shorthand() {
        let config: AclConfig = serde_json::from_value(serde_json::json!({
            "roles": {"admin": ["editor"], "editor": ["viewer"], "viewer": []},
            "resources": ["article"],
            "rules": {
                "viewer": {"article": {"view": []}},
                "admin": {}
            }
        }))
        .unwrap();
        let acl = AclManager::from_config(&config).unwrap();
        assert!(acl.is_allowed("editor", "article", "view").unwrap());
        assert!(!acl.is_allowed("editor", "article", "edit").unwrap());
        assert!(acl.is_allowed("admin", "article", "purge").unwrap());
    }

    #[test]
    fn test_from_config_rejects_cycles_and_unknown_parents() {
        let cyclic: AclConfig = serde_json::from_value(serde_json::json!({
            "roles": {"a": ["b"], "b": ["a"]}
        }))
        .unwrap();
        assert!(matches!(
            AclManager::from_config(&cyclic),
            Err(UmiError::UnexpectedValue(_))
        ));

        let orphan: AclConfig = serde_json::from_value(serde_json::json!({
            "roles": {"a": ["ghost"]}
        }))
        .unwrap();
        assert!(matches!(
            AclManager::from_config(&orphan),
            Err(UmiError::UnexpectedValue(_))
        ));
    }
}
