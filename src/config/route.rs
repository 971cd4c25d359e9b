use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteKind {
    /// Literal prefix.
    Fixed,
    /// Pattern with `{name}` / `{name:integer}` placeholders.
    Simple,
    /// Regular expression with named groups.
    Regexp,
}

/// One route as written in component configuration.
///
/// ```json
/// {"name": "item", "type": "simple", "route": "/{slug}", "priority": 10,
///  "defaults": {"controller": "item"},
///  "subroutes": [{"name": "edit", "type": "fixed", "route": "/edit"}]}
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: RouteKind,
    pub route: String,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub defaults: BTreeMap<String, String>,
    #[serde(default)]
    pub subroutes: Vec<RouteConfig>,
}
