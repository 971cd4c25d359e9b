//! URL routing: rules match a prefix of the URL and may hand the rest to
//! their sub-rules.

pub mod router;
pub mod rule;

pub use router::{ROUTE_PATH_SEPARATOR, RouteResult, Router};
pub use rule::{Route, RuleMatch};
