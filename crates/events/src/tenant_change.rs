//! Tenant change events published by the tenant-management write path.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use iotforge_core::TenantId;

use crate::tenant::TenantScoped;

/// Kind of tenant mutation.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TenantChangeType {
    Added,
    Updated,
    Deleted,
}

impl TenantChangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TenantChangeType::Added => "ADDED",
            TenantChangeType::Updated => "UPDATED",
            TenantChangeType::Deleted => "DELETED",
        }
    }
}

impl core::fmt::Display for TenantChangeType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read-only projection of a tenant at publish time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantSnapshot {
    id: TenantId,
    name: String,
    template_id: String,
    #[serde(default)]
    authentication_token: String,
    #[serde(default)]
    authorized_user_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    metadata: BTreeMap<String, String>,
}

impl TenantSnapshot {
    pub fn new(id: TenantId, name: impl Into<String>, template_id: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            template_id: template_id.into(),
            authentication_token: String::new(),
            authorized_user_ids: Vec::new(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_authentication_token(mut self, token: impl Into<String>) -> Self {
        self.authentication_token = token.into();
        self
    }

    pub fn with_authorized_user_ids(mut self, users: impl IntoIterator<Item = String>) -> Self {
        self.authorized_user_ids = users.into_iter().collect();
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn id(&self) -> &TenantId {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn template_id(&self) -> &str {
        &self.template_id
    }

    pub fn authentication_token(&self) -> &str {
        &self.authentication_token
    }

    pub fn authorized_user_ids(&self) -> &[String] {
        &self.authorized_user_ids
    }

    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }
}

/// A tenant mutation, as carried on the tenant change topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantChangeEvent {
    #[serde(rename = "type")]
    change_type: TenantChangeType,
    tenant: TenantSnapshot,
}

impl TenantChangeEvent {
    pub fn new(change_type: TenantChangeType, tenant: TenantSnapshot) -> Self {
        Self { change_type, tenant }
    }

    pub fn added(tenant: TenantSnapshot) -> Self {
        Self::new(TenantChangeType::Added, tenant)
    }

    pub fn updated(tenant: TenantSnapshot) -> Self {
        Self::new(TenantChangeType::Updated, tenant)
    }

    pub fn deleted(tenant: TenantSnapshot) -> Self {
        Self::new(TenantChangeType::Deleted, tenant)
    }

    pub fn change_type(&self) -> TenantChangeType {
        self.change_type
    }

    pub fn tenant(&self) -> &TenantSnapshot {
        &self.tenant
    }

    pub fn into_tenant(self) -> TenantSnapshot {
        self.tenant
    }

    /// Encode to the JSON wire form.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Decode from the JSON wire form.
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

impl TenantScoped for TenantChangeEvent {
    fn tenant_id(&self) -> &TenantId {
        self.tenant.id()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_form_matches_topic_contract() {
        let snapshot = TenantSnapshot::new(TenantId::new("acme").unwrap(), "Acme", "default")
            .with_authentication_token("tok")
            .with_authorized_user_ids(["admin".to_string()]);
        let json: serde_json::Value =
            serde_json::from_str(&TenantChangeEvent::added(snapshot).to_json().unwrap()).unwrap();

        assert_eq!(json["type"], "ADDED");
        assert_eq!(json["tenant"]["id"], "acme");
        assert_eq!(json["tenant"]["templateId"], "default");
        assert_eq!(json["tenant"]["authenticationToken"], "tok");
        assert_eq!(json["tenant"]["authorizedUserIds"][0], "admin");
    }

    #[test]
    fn decodes_payload_without_optional_fields() {
        let raw = r#"{"type":"DELETED","tenant":{"id":"acme","name":"Acme","templateId":"default"}}"#;
        let event = TenantChangeEvent::from_json(raw).unwrap();
        assert_eq!(event.change_type(), TenantChangeType::Deleted);
        assert!(event.tenant().authorized_user_ids().is_empty());
    }

    #[test]
    fn rejects_unknown_change_type_and_bad_tenant_id() {
        assert!(TenantChangeEvent::from_json(r#"{"type":"RENAMED","tenant":{"id":"a","name":"A","templateId":"d"}}"#).is_err());
        assert!(TenantChangeEvent::from_json(r#"{"type":"ADDED","tenant":{"id":"a/b","name":"A","templateId":"d"}}"#).is_err());
    }
}
