//! Entity Adapters
//!
//! Thin, stateless translation between entity-specific APIs and the generic
//! hierarchy services. Each entity type owns one numbering namespace and a
//! serde payload; the engine never sees the payload's structure.
//!
//! # Architecture
//!
//! - **One generic service**: `EntityService<E>` maps create/update/move/
//!   delete/query calls onto `NestedSetEngine` and `HierarchyQueryService`
//! - **Typed shapes**: `HierarchyEntity::from_parts` rebuilds the public
//!   shape (with `record_left`/`record_right`/`record_depth`) from a
//!   `TreeNode` and its decoded payload
//! - **Payload writes bypass the engine**: `update` goes straight to the
//!   `PayloadStore`; structure is untouched
//!
//! # Examples
//!
//! ```rust,no_run
//! use canopy_core::adapters::{EntityDraft, MenuFields, MenuService};
//! use canopy_core::config::HierarchyConfig;
//! use canopy_core::db::MemoryTreeStore;
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let menus = MenuService::new(Arc::new(MemoryTreeStore::new()), &HierarchyConfig::default())?;
//! let cancel = CancellationToken::new();
//!
//! let home = menus
//!     .create(None, EntityDraft::new(MenuFields::link("Home", "/")), &cancel)
//!     .await?;
//! assert_eq!(home.record_depth, 0);
//! # Ok(())
//! # }
//! ```

mod menu;
mod organization;
mod taxonomy;

pub use menu::{MenuFields, MenuItem, MenuService};
pub use organization::{Organization, OrganizationFields, OrganizationService};
pub use taxonomy::{Taxonomy, TaxonomyFields, TaxonomyService};

use crate::config::HierarchyConfig;
use crate::db::{HierarchyEvent, PayloadStore, TreeStore};
use crate::models::{HierarchyTree, NewTreeNode, NodeId, TreeNode};
use crate::services::{
    DeleteReport, HierarchyError, HierarchyQueryService, HierarchyResult, NestedSetEngine,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::marker::PhantomData;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

/// A tree-shaped entity type
pub trait HierarchyEntity: Sized + Send + Sync {
    /// Numbering namespace owned by this entity type
    const NAMESPACE: &'static str;

    /// Entity-specific fields stored as the node payload
    type Payload: Serialize + DeserializeOwned + Send + Sync;

    /// Build the public shape from a node and its decoded payload
    fn from_parts(node: TreeNode, payload: Self::Payload) -> Self;

    /// Reject payloads the entity cannot store
    fn validate(_payload: &Self::Payload) -> Result<(), String> {
        Ok(())
    }
}

/// Creation request for an entity
#[derive(Debug, Clone, PartialEq)]
pub struct EntityDraft<P> {
    pub id: Option<NodeId>,
    pub ordering: Option<i64>,
    pub fields: P,
}

impl<P> EntityDraft<P> {
    pub fn new(fields: P) -> Self {
        Self {
            id: None,
            ordering: None,
            fields,
        }
    }

    pub fn with_id(mut self, id: impl Into<NodeId>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_ordering(mut self, ordering: i64) -> Self {
        self.ordering = Some(ordering);
        self
    }
}

/// An entity together with its nested children
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityTree<E> {
    pub entity: E,
    pub children: Vec<EntityTree<E>>,
}

/// Generic adapter exposing the hierarchy operations under an entity's shape
pub struct EntityService<E: HierarchyEntity> {
    engine: NestedSetEngine,
    queries: HierarchyQueryService,
    payloads: Arc<dyn PayloadStore>,
    _entity: PhantomData<fn() -> E>,
}

impl<E: HierarchyEntity> Clone for EntityService<E> {
    fn clone(&self) -> Self {
        Self {
            engine: self.engine.clone(),
            queries: self.queries.clone(),
            payloads: self.payloads.clone(),
            _entity: PhantomData,
        }
    }
}

impl<E: HierarchyEntity> EntityService<E> {
    /// Create a service over `store` using the entity's own namespace
    pub fn new<S>(store: Arc<S>, config: &HierarchyConfig) -> HierarchyResult<Self>
    where
        S: TreeStore + PayloadStore + 'static,
    {
        let engine = NestedSetEngine::new(store.clone(), config.engine_config(E::NAMESPACE))?;
        let queries = HierarchyQueryService::for_engine(&engine);

        Ok(Self {
            engine,
            queries,
            payloads: store,
            _entity: PhantomData,
        })
    }

    pub fn engine(&self) -> &NestedSetEngine {
        &self.engine
    }

    pub fn queries(&self) -> &HierarchyQueryService {
        &self.queries
    }

    pub fn subscribe(&self) -> broadcast::Receiver<HierarchyEvent> {
        self.engine.subscribe()
    }

    fn encode(payload: &E::Payload) -> HierarchyResult<serde_json::Value> {
        E::validate(payload).map_err(HierarchyError::invalid_payload)?;
        Ok(serde_json::to_value(payload)?)
    }

    fn decode(node: TreeNode) -> HierarchyResult<E> {
        let payload = serde_json::from_value(node.payload.clone()).map_err(|e| {
            HierarchyError::invalid_payload(format!("{} '{}': {}", E::NAMESPACE, node.id, e))
        })?;
        Ok(E::from_parts(node, payload))
    }

    fn decode_all(nodes: Vec<TreeNode>) -> HierarchyResult<Vec<E>> {
        nodes.into_iter().map(Self::decode).collect()
    }

    fn decode_tree(tree: HierarchyTree) -> HierarchyResult<EntityTree<E>> {
        let children = tree
            .children
            .into_iter()
            .map(Self::decode_tree)
            .collect::<HierarchyResult<Vec<_>>>()?;

        Ok(EntityTree {
            entity: Self::decode(tree.node)?,
            children,
        })
    }

    pub async fn create(
        &self,
        parent_id: Option<&str>,
        draft: EntityDraft<E::Payload>,
        cancel: &CancellationToken,
    ) -> HierarchyResult<E> {
        let new_node = NewTreeNode {
            id: draft.id,
            ordering: draft.ordering,
            payload: Self::encode(&draft.fields)?,
        };

        let node = self.engine.create_node(parent_id, new_node, cancel).await?;
        Self::decode(node)
    }

    pub async fn get(&self, id: &str, cancel: &CancellationToken) -> HierarchyResult<E> {
        Self::decode(self.queries.get_node(id, cancel).await?)
    }

    /// Replace the entity's fields; structure is unchanged
    pub async fn update(
        &self,
        id: &str,
        fields: E::Payload,
        cancel: &CancellationToken,
    ) -> HierarchyResult<E> {
        let payload = Self::encode(&fields)?;
        if cancel.is_cancelled() {
            return Err(HierarchyError::Cancelled);
        }

        let updated = self
            .payloads
            .put_payload(E::NAMESPACE, id, payload)
            .await?;
        if !updated {
            return Err(HierarchyError::not_found(id));
        }

        self.get(id, cancel).await
    }

    pub async fn move_to(
        &self,
        id: &str,
        new_parent_id: Option<&str>,
        cancel: &CancellationToken,
    ) -> HierarchyResult<E> {
        let node = self.engine.move_subtree(id, new_parent_id, cancel).await?;
        Self::decode(node)
    }

    pub async fn delete(
        &self,
        id: &str,
        cascade: bool,
        cancel: &CancellationToken,
    ) -> HierarchyResult<DeleteReport> {
        self.engine.delete_subtree(id, cascade, cancel).await
    }

    pub async fn children(&self, id: &str, cancel: &CancellationToken) -> HierarchyResult<Vec<E>> {
        Self::decode_all(self.queries.children(id, cancel).await?)
    }

    pub async fn descendants(
        &self,
        id: &str,
        cancel: &CancellationToken,
    ) -> HierarchyResult<Vec<E>> {
        Self::decode_all(self.queries.descendants(id, cancel).await?)
    }

    pub async fn ancestors(&self, id: &str, cancel: &CancellationToken) -> HierarchyResult<Vec<E>> {
        Self::decode_all(self.queries.ancestors(id, cancel).await?)
    }

    pub async fn siblings(&self, id: &str, cancel: &CancellationToken) -> HierarchyResult<Vec<E>> {
        Self::decode_all(self.queries.siblings(id, cancel).await?)
    }

    pub async fn roots(&self, cancel: &CancellationToken) -> HierarchyResult<Vec<E>> {
        Self::decode_all(self.queries.roots(cancel).await?)
    }

    /// The whole forest of this entity type
    pub async fn tree(&self, cancel: &CancellationToken) -> HierarchyResult<Vec<EntityTree<E>>> {
        self.queries
            .hierarchy(cancel)
            .await?
            .into_iter()
            .map(Self::decode_tree)
            .collect()
    }

    /// One entity and everything below it
    pub async fn subtree(
        &self,
        id: &str,
        cancel: &CancellationToken,
    ) -> HierarchyResult<EntityTree<E>> {
        Self::decode_tree(self.queries.subtree(id, cancel).await?)
    }
}
