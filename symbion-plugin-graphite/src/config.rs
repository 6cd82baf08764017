use crate::error::ConfigError;
use crate::perfdata::sanitize;
use serde::{Deserialize, Deserializer, Serialize};
use std::{path::Path, time::Duration};
use tokio::fs;
use tracing::{info, warn};

pub const LINE_PORT: u16 = 2003;
pub const PICKLE_PORT: u16 = 2004;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct GraphiteConfig {
    /// Instance Carbon de destination
    pub host: String,
    /// Port Carbon ; par défaut 2003 (ligne) ou 2004 (pickle)
    pub port: Option<u16>,
    /// Protocole pickle bufferisé au lieu du protocole ligne
    #[serde(deserialize_with = "flag")]
    pub use_pickle: bool,
    /// Nombre de ticks en échec avant d'abandonner le buffer
    pub tick_limit: u32,
    /// Latence (s) en dessous de laquelle un check est daté à son heure planifiée
    pub ignore_latency_limit: i64,
    /// Sous-dossier Graphite optionnel
    pub graphite_data_source: String,
    /// Timeout des connexions et envois vers Carbon
    pub timeout_secs: u64,
    pub initial_chunk_size: usize,
    pub max_chunk_size: usize,
    pub tick_interval_ms: u64,
    pub mqtt: MqttConf,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct MqttConf {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub topic: String,
}

impl Default for GraphiteConfig {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: None,
            use_pickle: false,
            tick_limit: 300,
            ignore_latency_limit: 0,
            graphite_data_source: String::new(),
            timeout_secs: 5,
            initial_chunk_size: 200,
            max_chunk_size: 100_000,
            tick_interval_ms: 1000,
            mqtt: MqttConf::default(),
        }
    }
}

impl Default for MqttConf {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 1883,
            client_id: "symbion-plugin-graphite".into(),
            topic: "symbion/monitoring/brok@v1".into(),
        }
    }
}

/// Accepte `true`/`false`, `1`/`0` ou `"1"`/`"0"` comme dans les confs de modules
fn flag<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Int(i64),
        Text(String),
    }

    match Flag::deserialize(deserializer)? {
        Flag::Bool(b) => Ok(b),
        Flag::Int(i) => Ok(i == 1),
        Flag::Text(s) => Ok(matches!(s.trim(), "1" | "true" | "yes")),
    }
}

impl GraphiteConfig {
    pub fn from_yaml_str(txt: &str) -> Result<Self, ConfigError> {
        if txt.trim().is_empty() {
            return Ok(Self::default().normalize());
        }
        let cfg: GraphiteConfig = serde_yaml::from_str(txt)?;
        Ok(cfg.normalize())
    }

    /// Bornes et valeurs dérivées appliquées une fois au chargement
    pub fn normalize(mut self) -> Self {
        if self.ignore_latency_limit < 0 {
            self.ignore_latency_limit = 0;
        }
        self.graphite_data_source = sanitize(&self.graphite_data_source, '_');
        self.port.get_or_insert(if self.use_pickle { PICKLE_PORT } else { LINE_PORT });
        self.max_chunk_size = self.max_chunk_size.max(1);
        self.initial_chunk_size = self.initial_chunk_size.clamp(1, self.max_chunk_size);
        self.tick_interval_ms = self.tick_interval_ms.max(1);
        self
    }

    /// Surcharges passées par le kernel Symbion à ses plugins
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Ok(host) = std::env::var("SYMBION_MQTT_HOST") {
            self.mqtt.host = host;
        }
        if let Ok(port) = std::env::var("SYMBION_MQTT_PORT") {
            self.mqtt.port = port.trim().parse().map_err(|e| ConfigError::Invalid {
                key: "SYMBION_MQTT_PORT",
                reason: format!("{port:?}: {e}"),
            })?;
        }
        Ok(())
    }

    pub fn carbon_port(&self) -> u16 {
        self.port.unwrap_or(if self.use_pickle { PICKLE_PORT } else { LINE_PORT })
    }

    pub fn latency_limit(&self) -> u64 {
        self.ignore_latency_limit.max(0) as u64
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

pub async fn load_config() -> GraphiteConfig {
    let path = std::env::var("SYMBION_GRAPHITE_CONFIG").unwrap_or_else(|_| "graphite.yaml".into());
    let mut cfg = if Path::new(&path).exists() {
        let txt = fs::read_to_string(&path).await.unwrap_or_default();
        GraphiteConfig::from_yaml_str(&txt).unwrap_or_else(|e| {
            warn!("[graphite] config invalide ({path}): {e}");
            GraphiteConfig::default().normalize()
        })
    } else {
        info!("[graphite] pas de {path}, usage config par défaut");
        GraphiteConfig::default().normalize()
    };

    if let Err(e) = cfg.apply_env() {
        warn!("[graphite] {e}");
    }
    cfg
}
