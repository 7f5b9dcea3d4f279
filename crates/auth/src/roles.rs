//! Role graph: which permissions a role grants.
//!
//! Roles carry an explicit permission set. `hierarchy_level` orders roles for
//! display only; a higher role never inherits a lower role's permissions.
//! Templates are copied into a role when applied, so later template edits
//! never reach roles that already applied them.

use std::borrow::Cow;
use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::permissions::{PermissionDefinition, PermissionKey};

/// Role identifier used for RBAC.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoleKey(Cow<'static, str>);

impl RoleKey {
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for RoleKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&'static str> for RoleKey {
    fn from(value: &'static str) -> Self {
        Self::new(value)
    }
}

/// A named bundle of permissions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleDefinition {
    pub key: RoleKey,
    pub name: String,
    pub description: Option<String>,
    /// Display/ordering only.
    pub hierarchy_level: i32,
    pub permissions: BTreeSet<PermissionKey>,
    pub active: bool,
}

impl RoleDefinition {
    pub fn new(key: impl Into<RoleKey>, hierarchy_level: i32) -> Self {
        let key = key.into();
        Self {
            name: key.as_str().to_string(),
            key,
            description: None,
            hierarchy_level,
            permissions: BTreeSet::new(),
            active: true,
        }
    }

    pub fn with_permission(mut self, permission: impl Into<PermissionKey>) -> Self {
        self.permissions.insert(permission.into());
        self
    }

    pub fn with_permissions<I, P>(mut self, permissions: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PermissionKey>,
    {
        self.permissions
            .extend(permissions.into_iter().map(Into::into));
        self
    }
}

/// Named, reusable permission bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionTemplate {
    pub name: String,
    pub description: Option<String>,
    pub permissions: BTreeSet<PermissionKey>,
}

impl PermissionTemplate {
    pub fn new<I, P>(name: impl Into<String>, permissions: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PermissionKey>,
    {
        Self {
            name: name.into(),
            description: None,
            permissions: permissions.into_iter().map(Into::into).collect(),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RoleGraphError {
    /// Unknown or deactivated role. Callers treat this as a zero contribution.
    #[error("unknown role '{0}'")]
    UnknownRole(RoleKey),

    #[error("unknown permission '{0}'")]
    UnknownPermission(PermissionKey),

    #[error("unknown permission template '{0}'")]
    UnknownTemplate(String),
}

/// Snapshot of permission, role and template definitions.
#[derive(Debug, Clone, Default)]
pub struct RoleGraph {
    permissions: HashMap<PermissionKey, PermissionDefinition>,
    roles: HashMap<RoleKey, RoleDefinition>,
    templates: HashMap<String, PermissionTemplate>,
}

impl RoleGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a permission definition.
    pub fn define_permission(&mut self, definition: PermissionDefinition) {
        self.permissions.insert(definition.key.clone(), definition);
    }

    pub fn permission(&self, key: &PermissionKey) -> Option<&PermissionDefinition> {
        self.permissions.get(key)
    }

    /// Hide a permission from future role resolution.
    pub fn deactivate_permission(&mut self, key: &PermissionKey) -> Result<(), RoleGraphError> {
        let def = self
            .permissions
            .get_mut(key)
            .ok_or_else(|| RoleGraphError::UnknownPermission(key.clone()))?;
        def.active = false;
        Ok(())
    }

    pub fn define_template(&mut self, template: PermissionTemplate) -> Result<(), RoleGraphError> {
        self.ensure_defined(&template.permissions)?;
        self.templates.insert(template.name.clone(), template);
        Ok(())
    }

    pub fn template(&self, name: &str) -> Option<&PermissionTemplate> {
        self.templates.get(name)
    }

    /// Insert or replace a role definition.
    pub fn define_role(&mut self, role: RoleDefinition) -> Result<(), RoleGraphError> {
        self.ensure_defined(&role.permissions)?;
        self.roles.insert(role.key.clone(), role);
        Ok(())
    }

    /// Define a role and expand the given templates into it at creation time.
    pub fn define_role_from_templates(
        &mut self,
        mut role: RoleDefinition,
        templates: &[&str],
    ) -> Result<(), RoleGraphError> {
        for name in templates {
            let template = self
                .templates
                .get(*name)
                .ok_or_else(|| RoleGraphError::UnknownTemplate((*name).to_string()))?;
            role.permissions.extend(template.permissions.iter().cloned());
        }
        self.define_role(role)
    }

    /// Copy a template's current permissions into an existing role.
    ///
    /// Returns how many permissions were newly added.
    pub fn apply_template(&mut self, role: &RoleKey, template: &str) -> Result<usize, RoleGraphError> {
        let permissions = self
            .templates
            .get(template)
            .ok_or_else(|| RoleGraphError::UnknownTemplate(template.to_string()))?
            .permissions
            .clone();
        let def = self
            .roles
            .get_mut(role)
            .ok_or_else(|| RoleGraphError::UnknownRole(role.clone()))?;

        let before = def.permissions.len();
        def.permissions.extend(permissions);
        Ok(def.permissions.len() - before)
    }

    pub fn deactivate_role(&mut self, role: &RoleKey) -> Result<(), RoleGraphError> {
        let def = self
            .roles
            .get_mut(role)
            .ok_or_else(|| RoleGraphError::UnknownRole(role.clone()))?;
        def.active = false;
        Ok(())
    }

    pub fn role(&self, key: &RoleKey) -> Option<&RoleDefinition> {
        self.roles.get(key)
    }

    /// Active roles ordered by `hierarchy_level` (highest first), then key.
    pub fn roles_by_hierarchy(&self) -> Vec<&RoleDefinition> {
        let mut roles: Vec<&RoleDefinition> = self.roles.values().filter(|r| r.active).collect();
        roles.sort_by(|a, b| {
            b.hierarchy_level
                .cmp(&a.hierarchy_level)
                .then_with(|| a.key.cmp(&b.key))
        });
        roles
    }

    /// Permissions explicitly attached to one role, minus deactivated ones.
    pub fn role_permissions(&self, role: &RoleKey) -> Result<Vec<PermissionKey>, RoleGraphError> {
        let def = self
            .roles
            .get(role)
            .filter(|r| r.active)
            .ok_or_else(|| RoleGraphError::UnknownRole(role.clone()))?;

        Ok(def
            .permissions
            .iter()
            .filter(|p| self.permissions.get(*p).is_some_and(|d| d.active))
            .cloned()
            .collect())
    }

    /// Union of the permissions of every known role in `roles`.
    ///
    /// Unknown or deactivated roles contribute nothing.
    pub fn permissions_for_roles(&self, roles: &[RoleKey]) -> BTreeSet<PermissionKey> {
        let mut out = BTreeSet::new();
        for role in roles {
            match self.role_permissions(role) {
                Ok(perms) => out.extend(perms),
                Err(err) => tracing::debug!(role = %role, error = %err, "role contributes no permissions"),
            }
        }
        out
    }

    fn ensure_defined(&self, permissions: &BTreeSet<PermissionKey>) -> Result<(), RoleGraphError> {
        match permissions.iter().find(|p| !self.permissions.contains_key(*p)) {
            Some(missing) => Err(RoleGraphError::UnknownPermission(missing.clone())),
            None => Ok(()),
        }
    }
}
