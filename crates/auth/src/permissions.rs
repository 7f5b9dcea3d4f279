use std::borrow::Cow;

use serde::{Deserialize, Serialize};

/// Permission key (e.g. `orders:approve`).
///
/// Keys are opaque strings; the segment before the first `:` is the
/// permission's category.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PermissionKey(Cow<'static, str>);

impl PermissionKey {
    pub fn new(key: impl Into<Cow<'static, str>>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Category derived from the key prefix (`orders:approve` → `orders`).
    pub fn category(&self) -> &str {
        self.as_str()
            .split_once(':')
            .map(|(category, _)| category)
            .unwrap_or(self.as_str())
    }
}

impl core::fmt::Display for PermissionKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&'static str> for PermissionKey {
    fn from(value: &'static str) -> Self {
        Self::new(value)
    }
}

/// Permission definition.
///
/// Definitions are never hard-deleted while referenced; `active = false`
/// hides the permission from future role resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionDefinition {
    pub key: PermissionKey,
    pub category: String,
    pub description: Option<String>,
    pub active: bool,
}

impl PermissionDefinition {
    pub fn new(key: impl Into<PermissionKey>) -> Self {
        let key = key.into();
        Self {
            category: key.category().to_string(),
            key,
            description: None,
            active: true,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_is_prefix_before_colon() {
        assert_eq!(PermissionKey::new("orders:approve").category(), "orders");
        assert_eq!(PermissionKey::new("qc:inspect:final").category(), "qc");
    }

    #[test]
    fn key_without_separator_is_its_own_category() {
        assert_eq!(PermissionKey::new("reports").category(), "reports");
    }

    #[test]
    fn definition_derives_category() {
        let def = PermissionDefinition::new("finance:view").with_description("View ledgers");
        assert_eq!(def.category, "finance");
        assert!(def.active);
        assert_eq!(def.description.as_deref(), Some("View ledgers"));
    }
}
