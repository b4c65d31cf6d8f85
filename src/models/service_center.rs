use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceCenter {
    pub id: String,
    pub name: String,
    pub address: String,
    pub phone: String,
    pub available_services: Vec<String>,
}

