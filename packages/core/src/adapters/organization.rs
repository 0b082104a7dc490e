//! Organizational units (companies, departments, teams)

use super::{EntityService, HierarchyEntity};
use crate::models::{NodeId, TreeNode};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrganizationFields {
    pub name: String,

    /// Short internal code such as a cost center
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact_email: Option<String>,
}

impl OrganizationFields {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            code: None,
            contact_email: None,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_contact_email(mut self, email: impl Into<String>) -> Self {
        self.contact_email = Some(email.into());
        self
    }
}

/// An organizational unit with its nested-set position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Organization {
    pub id: NodeId,
    pub parent_id: Option<NodeId>,
    pub name: String,
    pub code: Option<String>,
    pub contact_email: Option<String>,
    pub ordering: Option<i64>,
    pub record_left: u64,
    pub record_right: u64,
    pub record_depth: u32,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

impl Organization {
    pub fn fields(&self) -> OrganizationFields {
        OrganizationFields {
            name: self.name.clone(),
            code: self.code.clone(),
            contact_email: self.contact_email.clone(),
        }
    }

    /// Units below this one, derived from the span alone
    pub fn unit_count(&self) -> u64 {
        (self.record_right - self.record_left - 1) / 2
    }
}

impl HierarchyEntity for Organization {
    const NAMESPACE: &'static str = "organization";

    type Payload = OrganizationFields;

    fn from_parts(node: TreeNode, payload: OrganizationFields) -> Self {
        Self {
            id: node.id,
            parent_id: node.parent_id,
            name: payload.name,
            code: payload.code,
            contact_email: payload.contact_email,
            ordering: node.ordering,
            record_left: node.left,
            record_right: node.right,
            record_depth: node.depth,
            created_at: node.created_at,
            modified_at: node.modified_at,
        }
    }

    fn validate(payload: &OrganizationFields) -> Result<(), String> {
        if payload.name.trim().is_empty() {
            return Err("organization name cannot be empty".to_string());
        }

        if let Some(email) = &payload.contact_email {
            if !email.contains('@') {
                return Err(format!("invalid contact email '{}'", email));
            }
        }

        Ok(())
    }
}

pub type OrganizationService = EntityService<Organization>;
