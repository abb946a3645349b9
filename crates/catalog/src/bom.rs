//! Bill of materials: a header per part revision plus one line per consumed material.
//!
//! Header and lines are separate aggregates with their own event streams, so a line
//! can be projected before or after its header.

use serde::{Deserialize, Serialize};

use mrp_core::{BomId, BomLineId, MaterialId, PartId};

/// BOM lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BomStatus {
    Draft,
    Active,
    Obsolete,
}

/// BOM header snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bom {
    pub bom_id: BomId,
    pub part_id: PartId,
    pub revision: String,
    pub status: BomStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BomDeleted {
    pub bom_id: BomId,
}

event_family!(BomEvent, "Bom", Bom, BomDeleted, bom_id);

/// BOM line snapshot: how much of a material one unit of the parent part consumes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BomLine {
    pub bom_line_id: BomLineId,
    pub bom_id: BomId,
    pub material_id: MaterialId,
    pub quantity_per: f64,
    /// Expected loss as a fraction (0.05 = 5%).
    #[serde(default)]
    pub scrap_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BomLineDeleted {
    pub bom_line_id: BomLineId,
}

event_family!(BomLineEvent, "BomLine", BomLine, BomLineDeleted, bom_line_id);

#[cfg(test)]
mod tests {
    use super::*;
    use mrp_events::{Event, EventKind};

    #[test]
    fn line_types_do_not_parse_as_header_types() {
        let line = BomLineEvent::Deleted(BomLineDeleted {
            bom_line_id: BomLineId::new(9),
        });
        assert_eq!(line.event_type(), "BomLineDeleted");
        assert_eq!(EventKind::parse(BomEvent::ENTITY, line.event_type()), None);
        assert_eq!(
            EventKind::parse(BomLineEvent::ENTITY, line.event_type()),
            Some(EventKind::Deleted)
        );
    }

    #[test]
    fn line_payload_is_plain_data() {
        let line: BomLine = serde_json::from_value(serde_json::json!({
            "bomLineId": 9,
            "bomId": 1,
            "materialId": 5,
            "quantityPer": 2.5,
        }))
        .unwrap();
        assert_eq!(line.scrap_rate, 0.0);
        assert_eq!(line.quantity_per, 2.5);

        let wire = serde_json::to_value(&line).unwrap();
        let keys: Vec<_> = wire.as_object().unwrap().keys().cloned().collect();
        assert_eq!(keys.len(), 5);
    }

    #[test]
    fn status_serializes_upper_case() {
        let bom = Bom {
            bom_id: BomId::new(1),
            part_id: PartId::new(42),
            revision: "B".into(),
            status: BomStatus::Active,
        };
        let v = serde_json::to_value(BomEvent::Updated(bom)).unwrap();
        assert_eq!(v["status"], "ACTIVE");
        assert_eq!(v["bomId"], 1);
    }
}
