use serde::{Deserialize, Serialize};

use mrp_core::MaterialId;

/// Material snapshot, as carried by `MaterialCreated` / `MaterialUpdated`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Material {
    pub material_id: MaterialId,
    pub code: String,
    pub name: String,
    pub unit_of_measure: String,
    #[serde(default)]
    pub safety_stock: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaterialDeleted {
    pub material_id: MaterialId,
}

event_family!(
    /// Changes of the raw-material master.
    MaterialEvent, "Material", Material, MaterialDeleted, material_id
);

#[cfg(test)]
mod tests {
    use super::*;
    use mrp_events::Event;

    #[test]
    fn event_types_are_qualified_with_the_entity() {
        let snapshot = Material {
            material_id: MaterialId::new(5),
            code: "M-5".into(),
            name: "Steel sheet".into(),
            unit_of_measure: "kg".into(),
            safety_stock: 12.5,
        };
        assert_eq!(MaterialEvent::Created(snapshot.clone()).event_type(), "MaterialCreated");
        assert_eq!(MaterialEvent::Updated(snapshot).event_type(), "MaterialUpdated");
        assert_eq!(MaterialEvent::ENTITY, "Material");
    }
}
