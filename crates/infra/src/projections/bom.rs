use serde::{Deserialize, Serialize};

use mrp_catalog::{Bom, BomLine, BomStatus};
use mrp_core::{BomId, BomLineId, MaterialId, PartId};
use mrp_events::EventEnvelope;

use super::ProjectionMapping;

/// BOM header projection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BomMapping;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BomFields {
    pub part_id: PartId,
    pub revision: String,
    pub status: BomStatus,
}

impl ProjectionMapping for BomMapping {
    const ENTITY: &'static str = "Bom";
    const TABLE: &'static str = "bom_projection";
    const ID_COLUMN: &'static str = "bom_id";
    const ID_FIELD: &'static str = "bomId";

    type Id = BomId;
    type Fields = BomFields;

    fn fields_from(envelope: &EventEnvelope) -> Result<BomFields, serde_json::Error> {
        let b: Bom = envelope.decode_payload()?;
        Ok(BomFields {
            part_id: b.part_id,
            revision: b.revision,
            status: b.status,
        })
    }
}

/// BOM line projection. Lines reference their header by `bom_id` only; a line may be
/// projected before its header arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BomLineMapping;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BomLineFields {
    pub bom_id: BomId,
    pub material_id: MaterialId,
    pub quantity_per: f64,
    pub scrap_rate: f64,
}

impl ProjectionMapping for BomLineMapping {
    const ENTITY: &'static str = "BomLine";
    const TABLE: &'static str = "bom_line_projection";
    const ID_COLUMN: &'static str = "bom_line_id";
    const ID_FIELD: &'static str = "bomLineId";

    type Id = BomLineId;
    type Fields = BomLineFields;

    fn fields_from(envelope: &EventEnvelope) -> Result<BomLineFields, serde_json::Error> {
        let l: BomLine = envelope.decode_payload()?;
        Ok(BomLineFields {
            bom_id: l.bom_id,
            material_id: l.material_id,
            quantity_per: l.quantity_per,
            scrap_rate: l.scrap_rate,
        })
    }
}
