//! Navigation menu items

use super::{EntityService, EntityTree, HierarchyEntity};
use crate::models::{NodeId, TreeNode};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

fn default_visible() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MenuFields {
    pub title: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Link target, e.g. `_blank`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,

    #[serde(default = "default_visible")]
    pub visible: bool,
}

impl MenuFields {
    /// A visible item without a link (a heading or group)
    pub fn heading(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            url: None,
            target: None,
            icon: None,
            visible: true,
        }
    }

    pub fn link(title: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Self::heading(title)
        }
    }

    pub fn hidden(mut self) -> Self {
        self.visible = false;
        self
    }
}

/// A menu item with its nested-set position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MenuItem {
    pub id: NodeId,
    pub parent_id: Option<NodeId>,
    pub title: String,
    pub url: Option<String>,
    pub target: Option<String>,
    pub icon: Option<String>,
    pub visible: bool,
    pub ordering: Option<i64>,
    pub record_left: u64,
    pub record_right: u64,
    pub record_depth: u32,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

impl MenuItem {
    pub fn fields(&self) -> MenuFields {
        MenuFields {
            title: self.title.clone(),
            url: self.url.clone(),
            target: self.target.clone(),
            icon: self.icon.clone(),
            visible: self.visible,
        }
    }
}

impl HierarchyEntity for MenuItem {
    const NAMESPACE: &'static str = "menu";

    type Payload = MenuFields;

    fn from_parts(node: TreeNode, payload: MenuFields) -> Self {
        Self {
            id: node.id,
            parent_id: node.parent_id,
            title: payload.title,
            url: payload.url,
            target: payload.target,
            icon: payload.icon,
            visible: payload.visible,
            ordering: node.ordering,
            record_left: node.left,
            record_right: node.right,
            record_depth: node.depth,
            created_at: node.created_at,
            modified_at: node.modified_at,
        }
    }

    fn validate(payload: &MenuFields) -> Result<(), String> {
        if payload.title.trim().is_empty() {
            return Err("menu title cannot be empty".to_string());
        }
        Ok(())
    }
}

impl EntityTree<MenuItem> {
    /// Drop hidden items together with everything below them
    pub fn visible_only(self) -> Option<Self> {
        if !self.entity.visible {
            return None;
        }

        Some(Self {
            entity: self.entity,
            children: self
                .children
                .into_iter()
                .filter_map(EntityTree::visible_only)
                .collect(),
        })
    }
}

pub type MenuService = EntityService<MenuItem>;
