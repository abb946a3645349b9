use serde::{Deserialize, Serialize};

use mrp_catalog::Material;
use mrp_core::MaterialId;
use mrp_events::EventEnvelope;

use super::ProjectionMapping;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MaterialMapping;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaterialFields {
    pub code: String,
    pub name: String,
    pub unit_of_measure: String,
    pub safety_stock: f64,
}

impl From<Material> for MaterialFields {
    fn from(m: Material) -> Self {
        Self {
            code: m.code,
            name: m.name,
            unit_of_measure: m.unit_of_measure,
            safety_stock: m.safety_stock,
        }
    }
}

impl ProjectionMapping for MaterialMapping {
    const ENTITY: &'static str = "Material";
    const TABLE: &'static str = "material_projection";
    const ID_COLUMN: &'static str = "material_id";
    const ID_FIELD: &'static str = "materialId";

    type Id = MaterialId;
    type Fields = MaterialFields;

    fn fields_from(envelope: &EventEnvelope) -> Result<MaterialFields, serde_json::Error> {
        envelope.decode_payload::<Material>().map(MaterialFields::from)
    }
}
