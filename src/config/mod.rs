//! Serde models for framework configuration and the directive resolver
//! that produces them from raw configuration trees.

pub mod acl;
pub mod collection;
pub mod directives;
pub mod route;
pub mod settings;

pub use acl::AclConfig;
pub use collection::{CollectionConfig, CollectionKind, FieldConfig, LocalizationConfig, TypeConfig};
pub use directives::{AliasDirs, ConfigEntry, ConfigResolver, LazyConfig};
pub use route::{RouteConfig, RouteKind};
pub use settings::FrameworkSettings;
