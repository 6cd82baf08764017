/*!
Constructeurs de broks JSON (symbion/monitoring/brok@v1)

Produisent les payloads tels que publiés par le pipeline de supervision,
pour alimenter un plugin en test sans scheduler réel.
*/

use serde_json::{json, Map, Value};

pub const BROK_TOPIC: &str = "symbion/monitoring/brok@v1";

pub struct BrokBuilder;

fn customs(pairs: &[(&str, &str)]) -> Value {
    let map: Map<String, Value> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), Value::String(v.to_string())))
        .collect();
    Value::Object(map)
}

impl BrokBuilder {
    pub fn host_status(host: &str, address: &str, check_command: &str, custom_vars: &[(&str, &str)]) -> Value {
        json!({
            "type": "initial_host_status",
            "host_name": host,
            "address": address,
            "check_command": check_command,
            "customs": customs(custom_vars)
        })
    }

    pub fn service_status(host: &str, service: &str, custom_vars: &[(&str, &str)]) -> Value {
        json!({
            "type": "initial_service_status",
            "host_name": host,
            "service_description": service,
            "customs": customs(custom_vars)
        })
    }

    pub fn host_check(host: &str, perf_data: &str, last_chk: i64, latency: f64) -> Value {
        json!({
            "type": "host_check_result",
            "host_name": host,
            "perf_data": perf_data,
            "last_chk": last_chk,
            "latency": latency
        })
    }

    pub fn service_check(host: &str, service: &str, perf_data: &str, last_chk: i64, latency: f64) -> Value {
        json!({
            "type": "service_check_result",
            "host_name": host,
            "service_description": service,
            "perf_data": perf_data,
            "last_chk": last_chk,
            "latency": latency
        })
    }

    /// Payload MQTT prêt à publier
    pub fn to_payload(brok: &Value) -> Vec<u8> {
        // un Value se sérialise toujours
        serde_json::to_vec(brok).unwrap_or_default()
    }
}
