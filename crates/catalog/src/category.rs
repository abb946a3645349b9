use serde::{Deserialize, Serialize};

use mrp_core::CategoryId;

/// Category snapshot; categories form a tree through `parent_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Category {
    pub category_id: CategoryId,
    pub name: String,
    #[serde(default)]
    pub parent_id: Option<CategoryId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryDeleted {
    pub category_id: CategoryId,
}

event_family!(CategoryEvent, "Category", Category, CategoryDeleted, category_id);
