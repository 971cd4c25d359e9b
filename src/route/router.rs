use super::rule::Route;
use crate::config::RouteConfig;
use crate::core::{Result, UmiError};
use std::cmp::Reverse;
use std::collections::BTreeMap;

/// Separates rule names in a nested route path, e.g. `item/edit`.
pub const ROUTE_PATH_SEPARATOR: char = '/';

/// What a router made of a URL.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RouteResult {
    /// Captured and default parameters, innermost rule winning.
    pub matches: BTreeMap<String, String>,
    pub matched_url: String,
    pub unmatched_url: String,
    /// Names of the matched rules, outermost first.
    pub route: Vec<String>,
}

impl RouteResult {
    fn unmatched(url: &str) -> Self {
        Self {
            unmatched_url: url.to_string(),
            ..Self::default()
        }
    }

    pub fn is_matched(&self) -> bool {
        !self.route.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.matches.get(name).map(String::as_str)
    }

    pub fn consumed(&self) -> usize {
        self.matched_url.len()
    }

    /// True when nothing but an optional trailing slash is left over.
    pub fn is_fully_matched(&self) -> bool {
        self.unmatched_url.is_empty() || self.unmatched_url == "/"
    }

    /// Route path usable with [`Router::assemble`].
    pub fn route_path(&self) -> String {
        self.route.join(&ROUTE_PATH_SEPARATOR.to_string())
    }
}

/// Ordered rule set of one component.
#[derive(Debug, Clone, Default)]
pub struct Router {
    routes: Vec<Route>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(configs: &[RouteConfig]) -> Result<Self> {
        let mut router = Self::new();
        for config in configs {
            router = router.route(Route::from_config(config)?);
        }
        Ok(router)
    }

    /// Adds a rule. Higher priority rules are tried first; equal priorities
    /// keep insertion order.
    pub fn route(mut self, route: Route) -> Self {
        self.routes.push(route);
        self.routes.sort_by_key(|r| Reverse(r.get_priority()));
        self
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn match_url(&self, url: &str) -> RouteResult {
        match_rules(&self.routes, url).unwrap_or_else(|| RouteResult::unmatched(url))
    }

    /// Builds a URL for the rule at `path` (`parent/child` for sub-rules).
    pub fn assemble(&self, path: &str, params: &BTreeMap<String, String>) -> Result<String> {
        let mut rules = self.routes.as_slice();
        let mut url = String::new();
        for name in path.split(ROUTE_PATH_SEPARATOR) {
            let rule = rules.iter().find(|r| r.name() == name).ok_or_else(|| {
                UmiError::NonexistentEntity(format!("Route '{}' does not exist", path))
            })?;
            url.push_str(&rule.assemble(params)?);
            rules = rule.get_subroutes();
        }
        Ok(url)
    }
}

fn match_rules(rules: &[Route], url: &str) -> Option<RouteResult> {
    let mut ordered: Vec<&Route> = rules.iter().collect();
    ordered.sort_by_key(|r| Reverse(r.get_priority()));

    ordered.into_iter().find_map(|rule| {
        let head = rule.match_head(url)?;
        let (matched, rest) = url.split_at(head.consumed);
        let mut result = RouteResult {
            matches: head.params,
            matched_url: matched.to_string(),
            unmatched_url: rest.to_string(),
            route: vec![rule.name().to_string()],
        };
        if let Some(inner) = match_rules(rule.get_subroutes(), rest) {
            result.matches.extend(inner.matches);
            result.matched_url.push_str(&inner.matched_url);
            result.unmatched_url = inner.unmatched_url;
            result.route.extend(inner.route);
        }
        Some(result)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blog_router() -> Router {
        Router::new()
            .route(
                Route::fixed("home", "/")
                    .default_param("controller", "index")
                    .priority(-20),
            )
            .route(
                Route::simple("post", "/post/{slug}")
                    .unwrap()
                    .default_param("controller", "post")
                    .subroute(Route::fixed("edit", "/edit").default_param("controller", "edit")),
            )
            .route(
                Route::simple("section", "/{component}")
                    .unwrap()
                    .priority(-10),
            )
    }

    #[test]
    fn test_nested_route_consumes_subroute() {
        let result = blog_router().match_url("/post/hello/edit");
        assert!(result.is_matched());
        assert_eq!(result.get("slug"), Some("hello"));
        assert_eq!(result.get("controller"), Some("edit"));
        assert_eq!(result.matched_url, "/post/hello/edit");
        assert!(result.is_fully_matched());
        assert_eq!(result.route_path(), "post/edit");
    }

    #[test]
    fn test_priority_orders_rules() {
        let result = blog_router().match_url("/post/hello");
        assert_eq!(result.get("controller"), Some("post"));

        let result = blog_router().match_url("/about/team");
        assert_eq!(result.get("component"), Some("about"));
        assert_eq!(result.unmatched_url, "/team");
        assert_eq!(result.consumed(), "/about".len());
    }

    #[test]
    fn test_unmatched_url() {
        let router = Router::new().route(Route::fixed("news", "/news"));
        let result = router.match_url("/blog");
        assert!(!result.is_matched());
        assert_eq!(result.unmatched_url, "/blog");
    }

    #[test]
    fn test_assemble_nested_route() {
        let mut params = BTreeMap::new();
        params.insert("slug".to_string(), "hello".to_string());
        let router = blog_router();
        assert_eq!(router.assemble("post/edit", &params).unwrap(), "/post/hello/edit");
        assert!(matches!(
            router.assemble("post/missing", &params),
            Err(UmiError::NonexistentEntity(_))
        ));
    }

    #[test]
    fn test_router_from_config() {
        let configs: Vec<RouteConfig> = serde_json::from_value(serde_json::json!([
            {"name": "low", "type": "simple", "route": "/{controller}"},
            {"name": "high", "type": "fixed", "route": "/special", "priority": 5,
             "defaults": {"controller": "special"}}
        ]))
        .unwrap();
        let router = Router::from_config(&configs).unwrap();
        assert_eq!(router.routes()[0].name(), "high");
        assert_eq!(router.match_url("/special").get("controller"), Some("special"));
        assert_eq!(router.match_url("/other").get("controller"), Some("other"));
    }
}
