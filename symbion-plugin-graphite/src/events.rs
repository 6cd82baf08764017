use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Statut initial d'un hôte : customs, commande de check, adresse
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostStatusEvent {
    pub host_name: String,
    #[serde(default)]
    pub customs: HashMap<String, String>,
    #[serde(default)]
    pub check_command: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
}

/// Statut initial d'un service : customs uniquement
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceStatusEvent {
    pub host_name: String,
    pub service_description: String,
    #[serde(default)]
    pub customs: HashMap<String, String>,
}

/// Résultat de check d'un hôte
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostCheckResult {
    pub host_name: String,
    #[serde(default)]
    pub perf_data: String,
    /// Date du check (secondes Unix)
    pub last_chk: i64,
    /// Latence d'ordonnancement (secondes)
    #[serde(default)]
    pub latency: f64,
}

/// Résultat de check d'un service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceCheckResult {
    pub host_name: String,
    pub service_description: String,
    #[serde(default)]
    pub perf_data: String,
    pub last_chk: i64,
    #[serde(default)]
    pub latency: f64,
}

/// Brok reçu depuis le pipeline de supervision (symbion/monitoring/brok@v1)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BrokEvent {
    InitialHostStatus(HostStatusEvent),
    InitialServiceStatus(ServiceStatusEvent),
    HostCheckResult(HostCheckResult),
    ServiceCheckResult(ServiceCheckResult),
}

impl BrokEvent {
    /// Décode un payload MQTT JSON
    pub fn from_payload(payload: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(payload)
    }
}

/// Événement traité par le broker : brok ou tick périodique
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    Brok(BrokEvent),
    Tick,
}
