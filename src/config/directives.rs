//! Configuration trees with inline directives.
//!
//! String leaves of the form `{#command:path}` are resolved while a tree is
//! loaded:
//!
//! - `{#partial:~/file.json}` splices the resolved contents of another file;
//! - `{#lazy:~/file.json}` leaves a [`LazyConfig`] placeholder loaded on demand;
//! - `{#localDir:~/dir}` / `{#masterDir:~/dir}` expand to directory paths.
//!
//! Paths start with a registered alias. Every alias points at a master and a
//! local directory; a file present in both is merged, local values winning.
//! An object with exactly the keys `master` and `local` is a value cell whose
//! effective value is `local` unless that is null.

use crate::core::{Result, UmiError, Value};
use regex::Regex;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

lazy_static::lazy_static! {
    static ref DIRECTIVE: Regex =
        Regex::new(r"^\{#(partial|lazy|localDir|masterDir):([^}]+)\}$").unwrap_or_else(|_| unreachable!());
}

const MAX_PARTIAL_DEPTH: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AliasDirs {
    pub master: PathBuf,
    pub local: PathBuf,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConfigEntry {
    Scalar(Value),
    List(Vec<ConfigEntry>),
    Map(BTreeMap<String, ConfigEntry>),
    Lazy(LazyConfig),
}

impl ConfigEntry {
    pub fn get(&self, key: &str) -> Option<&ConfigEntry> {
        match self {
            ConfigEntry::Map(map) => map.get(key),
            _ => None,
        }
    }

    pub fn as_value(&self) -> Option<&Value> {
        match self {
            ConfigEntry::Scalar(value) => Some(value),
            _ => None,
        }
    }

    /// Plain JSON for typed deserialization; lazy entries must be loaded first.
    pub fn to_json(&self) -> Result<serde_json::Value> {
        Ok(match self {
            ConfigEntry::Scalar(value) => serde_json::to_value(value)
                .map_err(|e| UmiError::UnexpectedValue(e.to_string()))?,
            ConfigEntry::List(items) => serde_json::Value::Array(
                items.iter().map(ConfigEntry::to_json).collect::<Result<_>>()?,
            ),
            ConfigEntry::Map(map) => serde_json::Value::Object(
                map.iter()
                    .map(|(k, v)| Ok((k.clone(), v.to_json()?)))
                    .collect::<Result<_>>()?,
            ),
            ConfigEntry::Lazy(lazy) => {
                return Err(UmiError::UnexpectedValue(format!(
                    "Lazy configuration '{}' must be loaded before use",
                    lazy.path
                )));
            }
        })
    }

    pub fn deserialize<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.to_json()?)
            .map_err(|e| UmiError::UnexpectedValue(format!("Invalid configuration: {}", e)))
    }
}

/// Placeholder for a `{#lazy:..}` directive.
#[derive(Debug, Clone, PartialEq)]
pub struct LazyConfig {
    pub path: String,
}

impl LazyConfig {
    pub fn load(&self, resolver: &ConfigResolver) -> Result<ConfigEntry> {
        resolver.load(&self.path)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConfigResolver {
    aliases: BTreeMap<String, AliasDirs>,
}

impl ConfigResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alias(
        mut self,
        alias: impl Into<String>,
        master: impl Into<PathBuf>,
        local: impl Into<PathBuf>,
    ) -> Self {
        self.aliases.insert(
            alias.into(),
            AliasDirs {
                master: master.into(),
                local: local.into(),
            },
        );
        self
    }

    /// Loads and resolves an aliased file.
    pub fn load(&self, path: &str) -> Result<ConfigEntry> {
        self.load_at_depth(path, 0)
    }

    /// Resolves directives in an already parsed tree.
    pub fn resolve(&self, tree: &serde_json::Value) -> Result<ConfigEntry> {
        self.resolve_at_depth(tree, 0)
    }

    fn load_at_depth(&self, path: &str, depth: usize) -> Result<ConfigEntry> {
        if depth > MAX_PARTIAL_DEPTH {
            return Err(UmiError::UnexpectedValue(format!(
                "Configuration partials nest deeper than {} levels at '{}'",
                MAX_PARTIAL_DEPTH, path
            )));
        }
        let (master, local) = self.paths(path)?;
        let master_tree = read_json(&master)?;
        let local_tree = read_json(&local)?;
        let tree = match (master_tree, local_tree) {
            (Some(master), Some(local)) => merge(master, local),
            (Some(tree), None) | (None, Some(tree)) => tree,
            (None, None) => {
                return Err(UmiError::NonexistentEntity(format!(
                    "Configuration file '{}' does not exist",
                    path
                )));
            }
        };
        log::debug!("Loaded configuration '{}' from {}", path, master.display());
        self.resolve_at_depth(&tree, depth)
    }

    fn resolve_at_depth(&self, tree: &serde_json::Value, depth: usize) -> Result<ConfigEntry> {
        match tree {
            serde_json::Value::String(text) => match DIRECTIVE.captures(text) {
                Some(captures) => {
                    let argument = captures[2].trim();
                    match &captures[1] {
                        "partial" => self.load_at_depth(argument, depth + 1),
                        "lazy" => Ok(ConfigEntry::Lazy(LazyConfig {
                            path: argument.to_string(),
                        })),
                        "localDir" => Ok(path_entry(self.paths(argument)?.1)),
                        "masterDir" => Ok(path_entry(self.paths(argument)?.0)),
                        other => Err(UmiError::UnexpectedValue(format!(
                            "Unknown configuration command '{}'",
                            other
                        ))),
                    }
                }
                None if text.starts_with("{#") => Err(UmiError::UnexpectedValue(format!(
                    "Malformed configuration command '{}'",
                    text
                ))),
                None => Ok(ConfigEntry::Scalar(Value::Text(text.clone()))),
            },
            serde_json::Value::Array(items) => Ok(ConfigEntry::List(
                items
                    .iter()
                    .map(|item| self.resolve_at_depth(item, depth))
                    .collect::<Result<_>>()?,
            )),
            serde_json::Value::Object(map) => {
                if let Some(effective) = cell_value(map) {
                    return self.resolve_at_depth(effective, depth);
                }
                Ok(ConfigEntry::Map(
                    map.iter()
                        .map(|(k, v)| Ok((k.clone(), self.resolve_at_depth(v, depth)?)))
                        .collect::<Result<_>>()?,
                ))
            }
            scalar => Ok(ConfigEntry::Scalar(Value::from_json(scalar)?)),
        }
    }

    /// Master and local locations of an aliased path (longest alias wins).
    pub fn paths(&self, path: &str) -> Result<(PathBuf, PathBuf)> {
        let (alias, dirs) = self
            .aliases
            .iter()
            .filter(|(alias, _)| {
                path == alias.as_str()
                    || path
                        .strip_prefix(alias.as_str())
                        .is_some_and(|rest| rest.starts_with('/'))
            })
            .max_by_key(|(alias, _)| alias.len())
            .ok_or_else(|| {
                UmiError::UnexpectedValue(format!("Path '{}' does not start with a known alias", path))
            })?;
        let relative = path[alias.len()..].trim_start_matches('/');
        Ok((dirs.master.join(relative), dirs.local.join(relative)))
    }
}

fn path_entry(path: PathBuf) -> ConfigEntry {
    ConfigEntry::Scalar(Value::Text(path.to_string_lossy().into_owned()))
}

fn cell_value(map: &serde_json::Map<String, serde_json::Value>) -> Option<&serde_json::Value> {
    if map.len() != 2 {
        return None;
    }
    let master = map.get("master")?;
    let local = map.get("local")?;
    Some(if local.is_null() { master } else { local })
}

fn read_json(path: &Path) -> Result<Option<serde_json::Value>> {
    if !path.exists() {
        return Ok(None);
    }
    let text = std::fs::read_to_string(path).map_err(|e| {
        UmiError::Runtime(format!("Cannot read configuration '{}': {}", path.display(), e))
    })?;
    serde_json::from_str(&text).map(Some).map_err(|e| {
        UmiError::UnexpectedValue(format!("Malformed configuration '{}': {}", path.display(), e))
    })
}

/// Deep merge; `local` wins on conflicting leaves.
fn merge(master: serde_json::Value, local: serde_json::Value) -> serde_json::Value {
    match (master, local) {
        (serde_json::Value::Object(mut master), serde_json::Value::Object(local)) => {
            for (key, value) in local {
                let merged = match master.remove(&key) {
                    Some(existing) => merge(existing, value),
                    None => value,
                };
                master.insert(key, merged);
            }
            serde_json::Value::Object(master)
        }
        (_, local) => local,
    }
}
