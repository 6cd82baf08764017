//! Correction de la latence d'ordonnancement des checks
//!
//! Carbon n'aime pas les points décalés : un check exécuté avec une petite
//! latence est ramené à son heure planifiée pour éviter les trous dans les
//! graphes.

use crate::naming::CheckKind;
use tracing::info;

#[derive(Debug, Clone, Copy, Default)]
pub struct TimeCorrector {
    /// Latence maximale (secondes) ramenée à l'heure planifiée, 0 = désactivé
    ignore_latency_limit: u64,
}

impl TimeCorrector {
    pub fn new(ignore_latency_limit: u64) -> Self {
        Self { ignore_latency_limit }
    }

    /// Horodatage à attribuer aux points d'un check
    pub fn correct(&self, last_chk: i64, latency: f64, kind: CheckKind, check_name: &str) -> i64 {
        if latency > 0.0 && latency <= self.ignore_latency_limit as f64 {
            info!("[graphite] Ignoring latency for {} {}. Latency : {}", kind, check_name, latency);
            last_chk - latency.trunc() as i64
        } else {
            last_chk
        }
    }
}
