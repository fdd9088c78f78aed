use std::collections::BTreeMap;

use serde::Deserialize;

use iotforge_core::{DomainError, TenantId};
use iotforge_events::TenantSnapshot;
use iotforge_infra::templates::DEFAULT_TEMPLATE_ID;

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTenantRequest {
    pub id: String,
    pub name: String,
    pub template_id: Option<String>,
    #[serde(default)]
    pub authentication_token: String,
    #[serde(default)]
    pub authorized_user_ids: Vec<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

/// Partial update; absent fields keep their current value.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTenantRequest {
    pub name: Option<String>,
    pub template_id: Option<String>,
    pub authentication_token: Option<String>,
    pub authorized_user_ids: Option<Vec<String>>,
    pub metadata: Option<BTreeMap<String, String>>,
}

// -------------------------
// Mapping
// -------------------------

impl CreateTenantRequest {
    pub fn into_snapshot(self) -> Result<TenantSnapshot, DomainError> {
        let id = TenantId::new(self.id)?;
        if self.name.trim().is_empty() {
            return Err(DomainError::validation("name must not be empty"));
        }
        let template_id = self
            .template_id
            .unwrap_or_else(|| DEFAULT_TEMPLATE_ID.to_string());

        Ok(with_metadata(
            TenantSnapshot::new(id, self.name, template_id)
                .with_authentication_token(self.authentication_token)
                .with_authorized_user_ids(self.authorized_user_ids),
            self.metadata,
        ))
    }
}

impl UpdateTenantRequest {
    /// Apply this update on top of `current`.
    pub fn apply(self, current: &TenantSnapshot) -> Result<TenantSnapshot, DomainError> {
        let name = self.name.unwrap_or_else(|| current.name().to_string());
        if name.trim().is_empty() {
            return Err(DomainError::validation("name must not be empty"));
        }

        let updated = TenantSnapshot::new(
            current.id().clone(),
            name,
            self.template_id
                .unwrap_or_else(|| current.template_id().to_string()),
        )
        .with_authentication_token(
            self.authentication_token
                .unwrap_or_else(|| current.authentication_token().to_string()),
        )
        .with_authorized_user_ids(
            self.authorized_user_ids
                .unwrap_or_else(|| current.authorized_user_ids().to_vec()),
        );

        Ok(with_metadata(
            updated,
            self.metadata.unwrap_or_else(|| current.metadata().clone()),
        ))
    }
}

fn with_metadata(snapshot: TenantSnapshot, metadata: BTreeMap<String, String>) -> TenantSnapshot {
    metadata
        .into_iter()
        .fold(snapshot, |s, (k, v)| s.with_metadata(k, v))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_defaults_template() {
        let req: CreateTenantRequest =
            serde_json::from_str(r#"{"id":"acme","name":"Acme"}"#).unwrap();
        let snapshot = req.into_snapshot().unwrap();
        assert_eq!(snapshot.template_id(), DEFAULT_TEMPLATE_ID);
    }

    #[test]
    fn create_rejects_path_like_ids() {
        let req: CreateTenantRequest =
            serde_json::from_str(r#"{"id":"../acme","name":"Acme"}"#).unwrap();
        assert!(matches!(req.into_snapshot(), Err(DomainError::InvalidId(_))));
    }

    #[test]
    fn update_keeps_unset_fields() {
        let current = TenantSnapshot::new(TenantId::new("acme").unwrap(), "Acme", "default")
            .with_metadata("tier", "gold");
        let req: UpdateTenantRequest = serde_json::from_str(r#"{"name":"Acme Corp"}"#).unwrap();

        let updated = req.apply(&current).unwrap();

        assert_eq!(updated.name(), "Acme Corp");
        assert_eq!(updated.template_id(), "default");
        assert_eq!(updated.metadata().get("tier").map(String::as_str), Some("gold"));
    }
}
