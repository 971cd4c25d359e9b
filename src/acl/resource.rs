use crate::core::Result;

/// A subject that can claim one or more roles at once (e.g. a user who is
/// a member of several groups).
pub trait RoleProvider {
    fn role_names(&self) -> Vec<String>;
}

impl RoleProvider for str {
    fn role_names(&self) -> Vec<String> {
        vec![self.to_string()]
    }
}

impl RoleProvider for String {
    fn role_names(&self) -> Vec<String> {
        vec![self.clone()]
    }
}

impl RoleProvider for [String] {
    fn role_names(&self) -> Vec<String> {
        self.to_vec()
    }
}

impl RoleProvider for Vec<String> {
    fn role_names(&self) -> Vec<String> {
        self.clone()
    }
}

/// Something access can be granted to.
pub trait AclResource {
    fn resource_name(&self) -> String;

    /// Resources whose rules carry assertions must check them themselves.
    fn as_assertion(&self) -> Option<&dyn AclAssertion> {
        None
    }
}

impl AclResource for str {
    fn resource_name(&self) -> String {
        self.to_string()
    }
}

impl AclResource for String {
    fn resource_name(&self) -> String {
        self.clone()
    }
}

/// Decides rules that depend on the resource's own state.
pub trait AclAssertion {
    fn is_allowed(&self, role: &str, operation: &str, assertions: &[String]) -> Result<bool>;
}
