use crate::config::{RouteConfig, RouteKind};
use crate::core::{Result, UmiError};
use regex::Regex;
use std::collections::BTreeMap;

lazy_static::lazy_static! {
    static ref PLACEHOLDER: Regex = Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)(?::([a-z]+))?\}")
        .unwrap_or_else(|_| unreachable!());
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Placeholder {
    Segment,
    Integer,
}

impl Placeholder {
    fn parse(kind: Option<&str>, pattern: &str) -> Result<Self> {
        match kind {
            None | Some("string") => Ok(Self::Segment),
            Some("integer") => Ok(Self::Integer),
            Some(other) => Err(UmiError::UnexpectedValue(format!(
                "Unknown placeholder type '{}' in route '{}'",
                other, pattern
            ))),
        }
    }

    fn regex(self) -> &'static str {
        match self {
            Self::Segment => "[^/]+",
            Self::Integer => "[0-9]+",
        }
    }

    fn accepts(self, value: &str) -> bool {
        match self {
            Self::Segment => !value.is_empty() && !value.contains('/'),
            Self::Integer => !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit()),
        }
    }
}

#[derive(Debug, Clone)]
enum Matcher {
    Fixed(String),
    Simple {
        regex: Regex,
        params: Vec<(String, Placeholder)>,
    },
    Regexp(Regex),
}

/// Result of matching one rule against the head of a URL.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleMatch {
    pub params: BTreeMap<String, String>,
    pub consumed: usize,
}

/// One routing rule. Rules match a prefix of the URL; the rest is left for
/// sub-rules or child components.
#[derive(Debug, Clone)]
pub struct Route {
    name: String,
    pattern: String,
    matcher: Matcher,
    priority: i32,
    defaults: BTreeMap<String, String>,
    subroutes: Vec<Route>,
}

impl Route {
    pub fn fixed(name: &str, pattern: &str) -> Self {
        Self::with_matcher(name, pattern, Matcher::Fixed(pattern.to_string()))
    }

    /// Pattern with `{name}` or `{name:integer}` placeholders.
    pub fn simple(name: &str, pattern: &str) -> Result<Self> {
        let mut regex = String::from("^");
        let mut params = Vec::new();
        let mut last = 0;
        for caps in PLACEHOLDER.captures_iter(pattern) {
            let (Some(whole), Some(param)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            let placeholder = Placeholder::parse(caps.get(2).map(|m| m.as_str()), pattern)?;
            regex.push_str(&regex::escape(&pattern[last..whole.start()]));
            regex.push_str(&format!("(?P<{}>{})", param.as_str(), placeholder.regex()));
            params.push((param.as_str().to_string(), placeholder));
            last = whole.end();
        }
        regex.push_str(&regex::escape(&pattern[last..]));
        let regex = compile(&regex, pattern)?;
        Ok(Self::with_matcher(name, pattern, Matcher::Simple { regex, params }))
    }

    /// Regular expression; named groups become parameters.
    pub fn regexp(name: &str, pattern: &str) -> Result<Self> {
        let anchored = if pattern.starts_with('^') {
            pattern.to_string()
        } else {
            format!("^(?:{})", pattern)
        };
        let regex = compile(&anchored, pattern)?;
        Ok(Self::with_matcher(name, pattern, Matcher::Regexp(regex)))
    }

    pub fn from_config(config: &RouteConfig) -> Result<Self> {
        let route = match config.kind {
            RouteKind::Fixed => Self::fixed(&config.name, &config.route),
            RouteKind::Simple => Self::simple(&config.name, &config.route)?,
            RouteKind::Regexp => Self::regexp(&config.name, &config.route)?,
        };
        let subroutes = config
            .subroutes
            .iter()
            .map(Self::from_config)
            .collect::<Result<Vec<_>>>()?;
        Ok(route
            .priority(config.priority)
            .defaults(config.defaults.clone())
            .subroutes(subroutes))
    }

    fn with_matcher(name: &str, pattern: &str, matcher: Matcher) -> Self {
        Self {
            name: name.to_string(),
            pattern: pattern.to_string(),
            matcher,
            priority: 0,
            defaults: BTreeMap::new(),
            subroutes: Vec::new(),
        }
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn defaults(mut self, defaults: BTreeMap<String, String>) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn default_param(mut self, name: &str, value: &str) -> Self {
        self.defaults.insert(name.to_string(), value.to_string());
        self
    }

    pub fn subroute(mut self, route: Route) -> Self {
        self.subroutes.push(route);
        self
    }

    pub fn subroutes(mut self, routes: Vec<Route>) -> Self {
        self.subroutes.extend(routes);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn get_priority(&self) -> i32 {
        self.priority
    }

    pub fn get_defaults(&self) -> &BTreeMap<String, String> {
        &self.defaults
    }

    pub fn get_subroutes(&self) -> &[Route] {
        &self.subroutes
    }

    /// Matches the head of `url`. The match must end on a segment boundary.
    pub fn match_head(&self, url: &str) -> Option<RuleMatch> {
        let (params, consumed) = match &self.matcher {
            Matcher::Fixed(prefix) => {
                if !url.starts_with(prefix.as_str()) {
                    return None;
                }
                (BTreeMap::new(), prefix.len())
            }
            Matcher::Simple { regex, params } => {
                let caps = regex.captures(url)?;
                let consumed = caps.get(0)?.end();
                let values = params
                    .iter()
                    .filter_map(|(name, _)| {
                        caps.name(name).map(|m| (name.clone(), m.as_str().to_string()))
                    })
                    .collect();
                (values, consumed)
            }
            Matcher::Regexp(regex) => {
                let caps = regex.captures(url)?;
                let consumed = caps.get(0)?.end();
                let values = regex
                    .capture_names()
                    .flatten()
                    .filter_map(|name| caps.name(name).map(|m| (name.to_string(), m.as_str().to_string())))
                    .collect();
                (values, consumed)
            }
        };

        if !on_boundary(url, consumed) {
            return None;
        }

        let mut merged = self.defaults.clone();
        merged.extend(params);
        Some(RuleMatch { params: merged, consumed })
    }

    /// Builds the URL fragment of this rule alone.
    pub fn assemble(&self, params: &BTreeMap<String, String>) -> Result<String> {
        match &self.matcher {
            Matcher::Fixed(prefix) => Ok(prefix.clone()),
            Matcher::Simple { params: placeholders, .. } => {
                let mut missing = None;
                let mut invalid = None;
                let url = PLACEHOLDER.replace_all(&self.pattern, |caps: &regex::Captures<'_>| {
                    let name = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
                    let kind = placeholders
                        .iter()
                        .find(|(n, _)| n == name)
                        .map(|(_, kind)| *kind)
                        .unwrap_or(Placeholder::Segment);
                    match params.get(name).or_else(|| self.defaults.get(name)) {
                        Some(value) if kind.accepts(value) => value.clone(),
                        Some(value) => {
                            invalid.get_or_insert_with(|| (name.to_string(), value.clone()));
                            String::new()
                        }
                        None => {
                            missing.get_or_insert_with(|| name.to_string());
                            String::new()
                        }
                    }
                });
                if let Some(name) = missing {
                    return Err(UmiError::UnexpectedValue(format!(
                        "Cannot assemble route '{}': parameter '{}' is missing",
                        self.name, name
                    )));
                }
                if let Some((name, value)) = invalid {
                    return Err(UmiError::UnexpectedValue(format!(
                        "Cannot assemble route '{}': '{}' is not a valid value of '{}'",
                        self.name, value, name
                    )));
                }
                Ok(url.into_owned())
            }
            Matcher::Regexp(_) => Err(UmiError::NotAllowedOperation(format!(
                "Route '{}' is a regular expression and cannot be assembled",
                self.name
            ))),
        }
    }
}

fn compile(regex: &str, pattern: &str) -> Result<Regex> {
    Regex::new(regex)
        .map_err(|e| UmiError::UnexpectedValue(format!("Invalid route pattern '{}': {}", pattern, e)))
}

fn on_boundary(url: &str, consumed: usize) -> bool {
    let (head, rest) = url.split_at(consumed.min(url.len()));
    head.is_empty() || head.ends_with('/') || rest.is_empty() || rest.starts_with('/')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_route_respects_segment_boundary() {
        let route = Route::fixed("news", "/news");
        assert_eq!(route.match_head("/news/item").unwrap().consumed, 5);
        assert!(route.match_head("/newsletter").is_none());
        assert!(route.match_head("/blog").is_none());
    }

    #[test]
    fn test_simple_route_placeholders() {
        let route = Route::simple("item", "/item/{id:integer}").unwrap();
        let matched = route.match_head("/item/42/edit").unwrap();
        assert_eq!(matched.params["id"], "42");
        assert_eq!(matched.consumed, "/item/42".len());
        assert!(route.match_head("/item/abc").is_none());
    }

    #[test]
    fn test_captures_override_defaults() {
        let route = Route::simple("page", "/{controller}")
            .unwrap()
            .default_param("controller", "index")
            .default_param("layout", "main");
        let matched = route.match_head("/list").unwrap();
        assert_eq!(matched.params["controller"], "list");
        assert_eq!(matched.params["layout"], "main");
    }

    #[test]
    fn test_regexp_named_groups() {
        let route = Route::regexp("archive", r"/(?P<year>\d{4})/(?P<month>\d{2})").unwrap();
        let matched = route.match_head("/2024/05").unwrap();
        assert_eq!(matched.params["year"], "2024");
        assert_eq!(matched.params["month"], "05");
        assert!(route.assemble(&BTreeMap::new()).is_err());
    }

    #[test]
    fn test_assemble_simple_route() {
        let route = Route::simple("item", "/item/{id:integer}").unwrap();
        let mut params = BTreeMap::new();
        assert!(route.assemble(&params).is_err());
        params.insert("id".to_string(), "x".to_string());
        assert!(route.assemble(&params).is_err());
        params.insert("id".to_string(), "7".to_string());
        assert_eq!(route.assemble(&params).unwrap(), "/item/7");
    }

    #[test]
    fn test_unknown_placeholder_type_is_rejected() {
        assert!(matches!(
            Route::simple("bad", "/{id:float}"),
            Err(UmiError::UnexpectedValue(_))
        ));
    }
}
