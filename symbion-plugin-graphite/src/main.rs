/**
 * SYMBION PLUGIN GRAPHITE - Export des perfdata vers Graphite
 *
 * RÔLE :
 * Plugin autonome qui écoute les broks de supervision sur MQTT et pousse
 * les métriques de performance vers une instance Carbon.
 *
 * FONCTIONNEMENT :
 * - Connexion Carbon au démarrage (échec = arrêt du plugin)
 * - Écoute MQTT : symbion/monitoring/brok@v1
 * - Tick périodique : vidage du buffer en mode pickle
 * - Ctrl-C : dernier vidage puis arrêt
 */

use anyhow::{Context, Result};
use symbion_plugin_graphite::{load_config, mqtt, GraphiteBroker, PipelineEvent};
use tokio::time::{interval, sleep, Duration, MissedTickBehavior};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("[graphite] Symbion Graphite plugin starting...");
    let cfg = load_config().await;

    let mut broker = GraphiteBroker::start(&cfg)
        .await
        .with_context(|| format!("Failed to connect to Carbon at {}:{}", cfg.host, cfg.carbon_port()))?;

    let (client, mut eventloop) = mqtt::connect(&cfg.mqtt);
    mqtt::subscribe(&client, &cfg.mqtt.topic)
        .await
        .context("Failed to subscribe to brok topic")?;

    let mut ticker = interval(cfg.tick_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    // listener unique, créé avant la boucle
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    info!("[graphite] Plugin ready, listening on {}", cfg.mqtt.topic);

    loop {
        tokio::select! {
            event = eventloop.poll() => match event {
                Ok(event) => {
                    if let Some(brok) = mqtt::decode_event(&event, &cfg.mqtt.topic) {
                        broker.handle(PipelineEvent::Brok(brok)).await;
                    }
                }
                Err(e) => {
                    error!("[graphite] MQTT error: {:?}", e);
                    sleep(Duration::from_secs(2)).await;
                }
            },
            _ = ticker.tick() => {
                broker.handle(PipelineEvent::Tick).await;
            }
            _ = &mut shutdown => {
                info!("[graphite] Shutdown requested");
                break;
            }
        }
    }

    if broker.buffered() > 0 {
        info!("[graphite] Flushing {} buffered points before exit", broker.buffered());
        if let Some(outcome) = broker.hook_tick().await {
            info!("[graphite] Final flush: {:?}", outcome);
        }
    }
    if let Err(e) = client.disconnect().await {
        warn!("[graphite] MQTT disconnect failed: {}", e);
    }

    info!("[graphite] Symbion Graphite plugin stopped");
    Ok(())
}
