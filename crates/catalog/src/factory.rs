use serde::{Deserialize, Serialize};

use mrp_core::FactoryId;

/// Factory (production facility / branch) snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Factory {
    pub factory_id: FactoryId,
    pub code: String,
    pub name: String,
    #[serde(default)]
    pub location: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FactoryDeleted {
    pub factory_id: FactoryId,
}

event_family!(FactoryEvent, "Factory", Factory, FactoryDeleted, factory_id);
