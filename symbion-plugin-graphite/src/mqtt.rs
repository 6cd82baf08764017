/**
 * MQTT - Réception des broks de supervision
 *
 * Écoute: symbion/monitoring/brok@v1 (configurable)
 * Chaque payload JSON est décodé en `BrokEvent` ; un payload invalide est
 * journalisé puis ignoré, il ne doit jamais interrompre le pipeline.
 */

use crate::config::MqttConf;
use crate::events::BrokEvent;
use rumqttc::{AsyncClient, ClientError, Event, EventLoop, Incoming, MqttOptions, QoS};
use std::time::Duration;
use tracing::{info, warn};

pub fn connect(conf: &MqttConf) -> (AsyncClient, EventLoop) {
    let mut opts = MqttOptions::new(&conf.client_id, &conf.host, conf.port);
    opts.set_keep_alive(Duration::from_secs(30));
    // les broks de statut initial arrivent en rafale au démarrage
    opts.set_max_packet_size(1024 * 1024, 1024 * 1024);
    AsyncClient::new(opts, 100)
}

pub async fn subscribe(client: &AsyncClient, topic: &str) -> Result<(), ClientError> {
    client.subscribe(topic, QoS::AtLeastOnce).await?;
    info!("[graphite] MQTT subscriptions active: {}", topic);
    Ok(())
}

/// Extrait le brok d'un événement MQTT publié sur `topic`
pub fn decode_event(event: &Event, topic: &str) -> Option<BrokEvent> {
    let Event::Incoming(Incoming::Publish(publish)) = event else {
        return None;
    };
    if publish.topic != topic {
        return None;
    }

    match BrokEvent::from_payload(&publish.payload) {
        Ok(brok) => Some(brok),
        Err(e) => {
            warn!(
                "[graphite] invalid brok JSON on {}: {} ({})",
                publish.topic,
                e,
                String::from_utf8_lossy(&publish.payload)
            );
            None
        }
    }
}
