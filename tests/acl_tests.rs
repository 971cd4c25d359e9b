/// Access control tests
///
/// Role inheritance, wildcard rules and configuration loading.
/// Run with: cargo test --test acl_tests

use umi::acl::{AclAssertion, AclManager, AclResource, Permission, WILDCARD};
use umi::config::AclConfig;
use umi::{Result, UmiError};

#[test]
fn test_editor_may_edit_but_not_delete_articles() {
    let mut acl = AclManager::new();
    acl.add_role("editor", &[]).unwrap();
    acl.add_resource("article").unwrap();
    acl.allow("editor", "article", "edit", &[]).unwrap();

    assert!(acl.is_allowed("editor", "article", "edit").unwrap());
    assert!(!acl.is_allowed("editor", "article", "delete").unwrap());
}

#[test]
fn test_child_role_inherits_and_overrides() {
    let mut acl = AclManager::new();
    acl.add_role("visitor", &[]).unwrap();
    acl.add_role("moderator", &["visitor"]).unwrap();
    acl.add_resource("forum").unwrap();
    acl.allow("visitor", "forum", WILDCARD, &[]).unwrap();
    acl.deny("moderator", "forum", "post").unwrap();

    assert!(acl.is_allowed("moderator", "forum", "read").unwrap());
    assert!(!acl.is_allowed("moderator", "forum", "post").unwrap());
    assert!(acl.is_allowed("visitor", "forum", "post").unwrap());
}

#[test]
fn test_first_parent_decides() {
    let mut acl = AclManager::new();
    acl.add_role("reader", &[]).unwrap();
    acl.add_role("banned", &[]).unwrap();
    acl.add_role("member", &["banned", "reader"]).unwrap();
    acl.add_resource("wiki").unwrap();
    acl.allow("reader", "wiki", "read", &[]).unwrap();
    acl.deny("banned", "wiki", "read").unwrap();

    assert_eq!(acl.permission("member", "wiki", "read").unwrap(), Permission::Denied);
}

#[test]
fn test_unknown_entities_are_reported() {
    let mut acl = AclManager::new();
    acl.add_role("editor", &[]).unwrap();
    assert!(matches!(
        acl.is_allowed("editor", "article", "edit"),
        Err(UmiError::NonexistentEntity(_))
    ));
    assert!(matches!(
        acl.permission("editor", "article", "edit"),
        Err(UmiError::NonexistentEntity(_))
    ));
    assert!(matches!(
        acl.add_resource(WILDCARD),
        Err(UmiError::UnexpectedValue(_))
    ));
}

#[test]
fn test_unknown_roles_are_denied() {
    let mut acl = AclManager::new();
    acl.add_role("editor", &[]).unwrap();
    acl.add_resource("article").unwrap();
    acl.allow("editor", "article", "edit", &[]).unwrap();

    assert!(!acl.is_allowed("ghost", "article", "edit").unwrap());
    let claimed = vec!["ghost".to_string(), "editor".to_string()];
    assert!(acl.is_allowed(&claimed, "article", "edit").unwrap());
    assert!(matches!(
        acl.permission("ghost", "article", "edit"),
        Err(UmiError::NonexistentEntity(_))
    ));
}

struct Article {
    author: String,
    published: bool,
}

impl AclResource for Article {
    fn resource_name(&self) -> String {
        "article".to_string()
    }

    fn as_assertion(&self) -> Option<&dyn AclAssertion> {
        Some(self)
    }
}

impl AclAssertion for Article {
    fn is_allowed(&self, role: &str, _operation: &str, assertions: &[String]) -> Result<bool> {
        for assertion in assertions {
            let passed = match assertion.as_str() {
                "isOwner" => self.author == role,
                "isDraft" => !self.published,
                other => {
                    return Err(UmiError::UnexpectedValue(format!("Unknown assertion '{}'", other)));
                }
            };
            if !passed {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

#[test]
fn test_acl_from_config_with_assertions() {
    let config: AclConfig = serde_json::from_value(serde_json::json!({
        "roles": {"editor": ["visitor"], "visitor": [], "admin": []},
        "resources": ["article", "controller:index"],
        "rules": {
            "visitor": {"controller:index": {}},
            "editor": {"article": {"edit": ["isOwner", "isDraft"], "view": []}},
            "admin": {}
        }
    }))
    .unwrap();
    let acl = AclManager::from_config(&config).unwrap();

    assert!(acl.is_allowed("editor", "controller:index", "execute").unwrap());
    assert!(acl.is_allowed("admin", "article", "delete").unwrap());

    let draft = Article {
        author: "editor".to_string(),
        published: false,
    };
    let published = Article {
        author: "editor".to_string(),
        published: true,
    };
    assert!(acl.is_allowed("editor", &draft, "edit").unwrap());
    assert!(!acl.is_allowed("editor", &published, "edit").unwrap());
    assert!(acl.is_allowed("editor", &published, "view").unwrap());

    let roles = vec!["visitor".to_string(), "admin".to_string()];
    assert!(acl.is_allowed(&roles, &published, "delete").unwrap());
}
