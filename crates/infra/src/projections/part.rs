use serde::{Deserialize, Serialize};

use mrp_catalog::Part;
use mrp_core::{CategoryId, PartId};
use mrp_events::EventEnvelope;

use super::ProjectionMapping;

/// Part projection row, keyed by `part_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PartMapping;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartFields {
    pub code: String,
    pub name: String,
    pub category_id: Option<CategoryId>,
    pub unit_of_measure: String,
    pub lead_time_days: i32,
}

impl From<Part> for PartFields {
    fn from(p: Part) -> Self {
        Self {
            code: p.code,
            name: p.name,
            category_id: p.category_id,
            unit_of_measure: p.unit_of_measure,
            lead_time_days: p.lead_time_days,
        }
    }
}

impl ProjectionMapping for PartMapping {
    const ENTITY: &'static str = "Part";
    const TABLE: &'static str = "part_projection";
    const ID_COLUMN: &'static str = "part_id";
    const ID_FIELD: &'static str = "partId";

    type Id = PartId;
    type Fields = PartFields;

    fn fields_from(envelope: &EventEnvelope) -> Result<PartFields, serde_json::Error> {
        envelope.decode_payload::<Part>().map(PartFields::from)
    }
}
