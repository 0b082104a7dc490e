//! Taxonomy terms (categories, tags with parents)

use super::{EntityService, HierarchyEntity};
use crate::models::{NodeId, TreeNode};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Fields a taxonomy term carries besides its position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaxonomyFields {
    pub name: String,

    /// URL-safe key: lowercase ASCII letters, digits and hyphens
    pub slug: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl TaxonomyFields {
    pub fn new(name: impl Into<String>, slug: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            slug: slug.into(),
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// A taxonomy term with its nested-set position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Taxonomy {
    pub id: NodeId,
    pub parent_id: Option<NodeId>,
    pub name: String,
    pub slug: String,
    pub description: Option<String>,
    pub ordering: Option<i64>,
    pub record_left: u64,
    pub record_right: u64,
    pub record_depth: u32,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

impl Taxonomy {
    pub fn fields(&self) -> TaxonomyFields {
        TaxonomyFields {
            name: self.name.clone(),
            slug: self.slug.clone(),
            description: self.description.clone(),
        }
    }
}

impl HierarchyEntity for Taxonomy {
    const NAMESPACE: &'static str = "taxonomy";

    type Payload = TaxonomyFields;

    fn from_parts(node: TreeNode, payload: TaxonomyFields) -> Self {
        Self {
            id: node.id,
            parent_id: node.parent_id,
            name: payload.name,
            slug: payload.slug,
            description: payload.description,
            ordering: node.ordering,
            record_left: node.left,
            record_right: node.right,
            record_depth: node.depth,
            created_at: node.created_at,
            modified_at: node.modified_at,
        }
    }

    fn validate(payload: &TaxonomyFields) -> Result<(), String> {
        if payload.name.trim().is_empty() {
            return Err("taxonomy name cannot be empty".to_string());
        }

        let slug_ok = !payload.slug.is_empty()
            && payload
                .slug
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
        if !slug_ok {
            return Err(format!("invalid taxonomy slug '{}'", payload.slug));
        }

        Ok(())
    }
}

pub type TaxonomyService = EntityService<Taxonomy>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::EntityDraft;
    use crate::config::HierarchyConfig;
    use crate::db::MemoryTreeStore;
    use crate::services::HierarchyError;
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    fn create_test_service() -> TaxonomyService {
        TaxonomyService::new(Arc::new(MemoryTreeStore::new()), &HierarchyConfig::default())
            .unwrap()
    }

    fn term(name: &str, slug: &str) -> EntityDraft<TaxonomyFields> {
        EntityDraft::new(TaxonomyFields::new(name, slug)).with_id(slug)
    }

    #[tokio::test]
    async fn test_create_exposes_record_columns() {
        let service = create_test_service();
        let cancel = CancellationToken::new();

        let animals = service.create(None, term("Animals", "animals"), &cancel).await.unwrap();
        let mammals = service
            .create(Some("animals"), term("Mammals", "mammals"), &cancel)
            .await
            .unwrap();

        assert_eq!((mammals.record_left, mammals.record_right, mammals.record_depth), (2, 3, 1));
        assert_eq!(mammals.parent_id.as_deref(), Some("animals"));
        assert_eq!(animals.record_depth, 0);

        let animals = service.get("animals", &cancel).await.unwrap();
        assert_eq!((animals.record_left, animals.record_right), (1, 4));
        assert_eq!(animals.name, "Animals");
    }

    #[tokio::test]
    async fn test_rejects_invalid_slug() {
        let service = create_test_service();
        let cancel = CancellationToken::new();

        for slug in ["", "Big Cats", "cats!"] {
            let result = service.create(None, term("Cats", slug), &cancel).await;
            assert!(matches!(result, Err(HierarchyError::InvalidPayload(_))), "{slug:?}");
        }
        assert!(service.roots(&cancel).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_keeps_position() {
        let service = create_test_service();
        let cancel = CancellationToken::new();
        service.create(None, term("Animals", "animals"), &cancel).await.unwrap();
        service.create(Some("animals"), term("Birds", "birds"), &cancel).await.unwrap();

        let updated = service
            .update(
                "birds",
                TaxonomyFields::new("Birds", "birds").with_description("Feathered"),
                &cancel,
            )
            .await
            .unwrap();

        assert_eq!(updated.description.as_deref(), Some("Feathered"));
        assert_eq!((updated.record_left, updated.record_right), (2, 3));

        let result = service
            .update("ghost", TaxonomyFields::new("Ghost", "ghost"), &cancel)
            .await;
        assert!(matches!(result, Err(HierarchyError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_breadcrumbs_from_ancestors() {
        let service = create_test_service();
        let cancel = CancellationToken::new();
        service.create(None, term("Animals", "animals"), &cancel).await.unwrap();
        service.create(Some("animals"), term("Mammals", "mammals"), &cancel).await.unwrap();
        service.create(Some("mammals"), term("Cats", "cats"), &cancel).await.unwrap();

        let trail: Vec<String> = service
            .ancestors("cats", &cancel)
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.slug)
            .collect();
        assert_eq!(trail, vec!["animals", "mammals"]);
    }
}
