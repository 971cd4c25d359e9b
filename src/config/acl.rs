use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// ACL configuration.
///
/// ```json
/// {
///   "roles": {"visitor": [], "editor": ["visitor"]},
///   "resources": ["article", "controller:index"],
///   "rules": {
///     "visitor": {"controller:index": {}},
///     "editor": {"article": {"edit": [], "publish": ["isOwner"]}},
///     "admin": {}
///   }
/// }
/// ```
///
/// An empty resource map grants every resource; an empty operation map grants
/// every operation of that resource. A non-empty assertion list turns the rule
/// into one the resource must confirm.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AclConfig {
    #[serde(default)]
    pub roles: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub resources: Vec<String>,
    #[serde(default)]
    pub rules: BTreeMap<String, BTreeMap<String, BTreeMap<String, Vec<String>>>>,
}
