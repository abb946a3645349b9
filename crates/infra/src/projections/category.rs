use serde::{Deserialize, Serialize};

use mrp_catalog::Category;
use mrp_core::CategoryId;
use mrp_events::EventEnvelope;

use super::ProjectionMapping;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CategoryMapping;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryFields {
    pub name: String,
    pub parent_id: Option<CategoryId>,
}

impl ProjectionMapping for CategoryMapping {
    const ENTITY: &'static str = "Category";
    const TABLE: &'static str = "category_projection";
    const ID_COLUMN: &'static str = "category_id";
    const ID_FIELD: &'static str = "categoryId";

    type Id = CategoryId;
    type Fields = CategoryFields;

    fn fields_from(envelope: &EventEnvelope) -> Result<CategoryFields, serde_json::Error> {
        let c: Category = envelope.decode_payload()?;
        Ok(CategoryFields {
            name: c.name,
            parent_id: c.parent_id,
        })
    }
}
