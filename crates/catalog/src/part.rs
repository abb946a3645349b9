use serde::{Deserialize, Serialize};

use mrp_core::{CategoryId, PartId};

/// Part snapshot, as carried by `PartCreated` / `PartUpdated`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    pub part_id: PartId,
    pub code: String,
    pub name: String,
    #[serde(default)]
    pub category_id: Option<CategoryId>,
    pub unit_of_measure: String,
    /// Procurement/manufacturing lead time in days.
    #[serde(default)]
    pub lead_time_days: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartDeleted {
    pub part_id: PartId,
}

event_family!(
    /// Changes of the part master.
    PartEvent, "Part", Part, PartDeleted, part_id
);
