/**
 * BROKER - Orchestration du pipeline perfdata → Carbon
 *
 * RÔLE :
 * Contexte unique du plugin : connexion Carbon, caches de nommage, buffer
 * pickle. Reçoit les événements un par un (broks de statut, résultats de
 * check, ticks) et les fait traverser extraction → nommage → horodatage →
 * envoi ligne ou mise en buffer.
 *
 * ERREURS :
 * Seul le démarrage peut échouer (première connexion Carbon). Ensuite tout
 * échec se traduit par un log et une perte de données bornée.
 */

use crate::buffer::{AdaptiveChunkState, DrainOutcome, TransmissionBuffer};
use crate::carbon::{CarbonConnection, CarbonLink};
use crate::codec::{line_packet, BatchSerializer, BufferedEntry, MetricPoint, PickleSerializer};
use crate::config::GraphiteConfig;
use crate::error::{CarbonError, NameError};
use crate::events::{BrokEvent, HostCheckResult, PipelineEvent, ServiceCheckResult};
use crate::naming::{CheckKind, NameResolver};
use crate::perfdata;
use crate::timing::TimeCorrector;
use tracing::{debug, error, info};

/// Mode d'envoi choisi par `use_pickle`
enum Delivery<S: BatchSerializer> {
    Line,
    Batched(TransmissionBuffer<S>),
}

/// Devenir d'un résultat de check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    /// Perfdata sans métrique exploitable
    NoMetrics,
    /// Hôte ou service sans customs connus
    Unresolved(NameError),
    /// Points envoyés (ligne) ou mis en buffer (pickle)
    Dispatched { points: usize },
    /// Envoi ligne impossible, points perdus
    Lost { points: usize },
}

pub struct GraphiteBroker<L: CarbonLink, S: BatchSerializer = PickleSerializer> {
    link: L,
    names: NameResolver,
    timing: TimeCorrector,
    delivery: Delivery<S>,
}

impl GraphiteBroker<CarbonConnection> {
    /// Démarre le broker sur une vraie connexion Carbon
    ///
    /// Un échec de la première connexion est fatal pour le plugin.
    pub async fn start(cfg: &GraphiteConfig) -> Result<Self, CarbonError> {
        info!(
            "[graphite] I init the graphite server connection to {}:{} ({} mode)",
            cfg.host,
            cfg.carbon_port(),
            if cfg.use_pickle { "pickle" } else { "line" }
        );
        let link = CarbonConnection::new(cfg.host.clone(), cfg.carbon_port(), cfg.timeout());
        Self::with_link(cfg, link, PickleSerializer).await
    }
}

impl<L: CarbonLink, S: BatchSerializer> GraphiteBroker<L, S> {
    pub async fn with_link(cfg: &GraphiteConfig, mut link: L, serializer: S) -> Result<Self, CarbonError> {
        link.connect().await?;

        let delivery = if cfg.use_pickle {
            let chunk = AdaptiveChunkState::new(cfg.initial_chunk_size, cfg.max_chunk_size);
            Delivery::Batched(TransmissionBuffer::new(serializer, cfg.tick_limit, chunk))
        } else {
            Delivery::Line
        };

        Ok(Self {
            link,
            names: NameResolver::new(cfg.graphite_data_source.clone()),
            timing: TimeCorrector::new(cfg.latency_limit()),
            delivery,
        })
    }

    /// Points en attente dans le buffer (toujours 0 en mode ligne)
    pub fn buffered(&self) -> usize {
        match &self.delivery {
            Delivery::Line => 0,
            Delivery::Batched(buffer) => buffer.len(),
        }
    }

    /// Point d'entrée unique des événements
    pub async fn handle(&mut self, event: PipelineEvent) {
        match event {
            PipelineEvent::Brok(brok) => self.handle_brok(brok).await,
            PipelineEvent::Tick => {
                self.hook_tick().await;
            }
        }
    }

    pub async fn handle_brok(&mut self, brok: BrokEvent) {
        match brok {
            BrokEvent::InitialHostStatus(status) => {
                debug!("[graphite] host status for {}", status.host_name);
                self.names.update_host(status);
            }
            BrokEvent::InitialServiceStatus(status) => {
                debug!("[graphite] service status for {}:{}", status.host_name, status.service_description);
                self.names.update_service(status);
            }
            BrokEvent::HostCheckResult(check) => {
                self.handle_host_check(check).await;
            }
            BrokEvent::ServiceCheckResult(check) => {
                self.handle_service_check(check).await;
            }
        }
    }

    pub async fn handle_service_check(&mut self, check: ServiceCheckResult) -> CheckOutcome {
        let samples = perfdata::extract(&check.perf_data);
        if samples.is_empty() {
            return CheckOutcome::NoMetrics;
        }

        let path = match self.names.resolve(&check.host_name, &check.service_description, CheckKind::Service) {
            Ok(path) => path,
            Err(e) => {
                error!("[graphite] {}. Could not build metrics name for {}:{}", e, check.host_name, check.service_description);
                return CheckOutcome::Unresolved(e);
            }
        };

        let timestamp = self.timing.correct(check.last_chk, check.latency, CheckKind::Service, &check.service_description);
        self.dispatch(MetricPoint::from_samples(&path, &samples, timestamp)).await
    }

    /// Check d'hôte : la commande de check tient lieu de description
    pub async fn handle_host_check(&mut self, check: HostCheckResult) -> CheckOutcome {
        let samples = perfdata::extract(&check.perf_data);
        if samples.is_empty() {
            return CheckOutcome::NoMetrics;
        }

        let description = self
            .names
            .host(&check.host_name)
            .and_then(|host| host.check_command.clone())
            .unwrap_or_default();

        let path = match self.names.resolve(&check.host_name, &description, CheckKind::Host) {
            Ok(path) => path,
            Err(e) => {
                error!("[graphite] {}. Could not build metrics name for {}:{}", e, check.host_name, description);
                return CheckOutcome::Unresolved(e);
            }
        };

        let timestamp = self.timing.correct(check.last_chk, check.latency, CheckKind::Host, &check.host_name);
        self.dispatch(MetricPoint::from_samples(&path, &samples, timestamp)).await
    }

    async fn dispatch(&mut self, points: Vec<MetricPoint>) -> CheckOutcome {
        let count = points.len();
        match &mut self.delivery {
            Delivery::Batched(buffer) => {
                buffer.extend(points.into_iter().map(BufferedEntry::from));
                CheckOutcome::Dispatched { points: count }
            }
            Delivery::Line => {
                let packet = line_packet(&points);
                match self.link.send(packet.as_bytes()).await {
                    Ok(()) => CheckOutcome::Dispatched { points: count },
                    Err(e) => {
                        error!("[graphite] Failed sending to the Graphite Carbon ({}). Data are lost", e);
                        CheckOutcome::Lost { points: count }
                    }
                }
            }
        }
    }

    /// Tick périodique : vidage du buffer pickle, rien en mode ligne
    pub async fn hook_tick(&mut self) -> Option<DrainOutcome> {
        match &mut self.delivery {
            Delivery::Line => None,
            Delivery::Batched(buffer) => Some(buffer.drain(&mut self.link).await),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{HostStatusEvent, ServiceStatusEvent};
    use std::collections::{HashMap, VecDeque};
    use std::time::Duration;
    use symbion_devkit::{BrokBuilder, FakeCarbon, TestHarness};

    fn line_config(port: u16) -> GraphiteConfig {
        GraphiteConfig {
            host: "127.0.0.1".into(),
            port: Some(port),
            timeout_secs: 2,
            ..Default::default()
        }
        .normalize()
    }

    fn brok(value: serde_json::Value) -> BrokEvent {
        BrokEvent::from_payload(&serde_json::to_vec(&value).unwrap()).unwrap()
    }

    async fn register_web1<L: CarbonLink, S: BatchSerializer>(broker: &mut GraphiteBroker<L, S>) {
        broker
            .handle_brok(brok(BrokBuilder::host_status("web1", "10.0.0.1", "check_host_alive", &[("_AWS_REGION", "us-east-1")])))
            .await;
        broker.handle_brok(brok(BrokBuilder::service_status("web1", "http", &[]))).await;
    }

    #[tokio::test]
    async fn test_line_mode_end_to_end() {
        let mut harness = TestHarness::new().await.unwrap();
        harness.expect_lines("host.10-0-0-1.", 3);

        let mut broker = GraphiteBroker::start(&line_config(harness.carbon.port())).await.unwrap();
        register_web1(&mut broker).await;

        let outcome = broker
            .handle_service_check(ServiceCheckResult {
                host_name: "web1".into(),
                service_description: "http".into(),
                perf_data: "time=120ms;500;1000;;".into(),
                last_chk: 1_700_000_000,
                latency: 0.0,
            })
            .await;
        assert_eq!(outcome, CheckOutcome::Dispatched { points: 3 });

        let prefix = "host.10-0-0-1.region=us-east-1.az=no-az-found.asg=no-asg-found.ami=no-ami-found.gauges.web1.http";
        let lines = harness.carbon.wait_for_lines(3, 2000).await.unwrap();
        assert_eq!(lines, vec![
            format!("{prefix}.time 120 1700000000"),
            format!("{prefix}.time_warn 500 1700000000"),
            format!("{prefix}.time_crit 1000 1700000000"),
        ]);
        harness.verify_expectations().await.unwrap();
        assert_eq!(broker.buffered(), 0);
        assert_eq!(broker.hook_tick().await, None);
    }

    #[tokio::test]
    async fn test_host_check_uses_check_command_and_latency() {
        let carbon = FakeCarbon::start().await.unwrap();
        let mut cfg = line_config(carbon.port());
        cfg.ignore_latency_limit = 5;
        let mut broker = GraphiteBroker::start(&cfg).await.unwrap();
        register_web1(&mut broker).await;

        let outcome = broker
            .handle_host_check(HostCheckResult {
                host_name: "web1".into(),
                perf_data: "rta=0.5ms pl=0%".into(),
                last_chk: 1000,
                latency: 2.0,
            })
            .await;
        assert_eq!(outcome, CheckOutcome::Dispatched { points: 2 });

        let lines = carbon.wait_for_lines(2, 2000).await.unwrap();
        assert!(lines[0].ends_with(".gauges.web1.check_host_alive.rta 0.5 998"), "{}", lines[0]);
        assert!(lines[1].ends_with(".check_host_alive.pl 0 998"), "{}", lines[1]);
    }

    #[tokio::test]
    async fn test_unknown_host_and_empty_perfdata_are_skipped() {
        let carbon = FakeCarbon::start().await.unwrap();
        let mut broker = GraphiteBroker::start(&line_config(carbon.port())).await.unwrap();

        let unknown = broker
            .handle_service_check(ServiceCheckResult {
                host_name: "ghost".into(),
                service_description: "http".into(),
                perf_data: "time=1".into(),
                last_chk: 1,
                latency: 0.0,
            })
            .await;
        assert_eq!(unknown, CheckOutcome::Unresolved(NameError::UnknownHost("ghost".into())));

        let host_unknown = broker
            .handle_host_check(HostCheckResult { host_name: "ghost".into(), perf_data: "rta=1".into(), last_chk: 1, latency: 0.0 })
            .await;
        assert!(matches!(host_unknown, CheckOutcome::Unresolved(_)));

        register_web1(&mut broker).await;
        let empty = broker
            .handle_service_check(ServiceCheckResult {
                host_name: "web1".into(),
                service_description: "http".into(),
                perf_data: "OK - no perfdata".into(),
                last_chk: 1,
                latency: 0.0,
            })
            .await;
        assert_eq!(empty, CheckOutcome::NoMetrics);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(carbon.received_lines().is_empty());
    }

    #[tokio::test]
    async fn test_host_status_without_address_sends_nothing() {
        let carbon = FakeCarbon::start().await.unwrap();
        let mut broker = GraphiteBroker::start(&line_config(carbon.port())).await.unwrap();
        broker.handle_brok(brok(serde_json::json!({"type": "initial_host_status", "host_name": "web1"}))).await;
        broker.handle_brok(brok(BrokBuilder::service_status("web1", "http", &[]))).await;

        let service = broker
            .handle_service_check(ServiceCheckResult {
                host_name: "web1".into(),
                service_description: "http".into(),
                perf_data: "time=1".into(),
                last_chk: 1,
                latency: 0.0,
            })
            .await;
        assert_eq!(
            service,
            CheckOutcome::Unresolved(NameError::MissingHostField { host: "web1".into(), field: "address" })
        );

        // adresse connue mais pas de commande de check
        broker.handle_brok(brok(serde_json::json!({
            "type": "initial_host_status",
            "host_name": "web1",
            "address": "10.0.0.1"
        }))).await;
        let host = broker
            .handle_host_check(HostCheckResult { host_name: "web1".into(), perf_data: "rta=1".into(), last_chk: 1, latency: 0.0 })
            .await;
        assert_eq!(
            host,
            CheckOutcome::Unresolved(NameError::MissingHostField { host: "web1".into(), field: "check_command" })
        );

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(carbon.received_lines().is_empty());
    }

    #[tokio::test]
    async fn test_startup_fails_without_carbon() {
        let port = {
            let carbon = FakeCarbon::start().await.unwrap();
            let port = carbon.port();
            carbon.stop().await;
            port
        };
        assert!(GraphiteBroker::start(&line_config(port)).await.is_err());
    }

    #[tokio::test]
    async fn test_line_mode_loses_points_when_backend_down() {
        let carbon = FakeCarbon::start().await.unwrap();
        let mut broker = GraphiteBroker::start(&line_config(carbon.port())).await.unwrap();
        register_web1(&mut broker).await;
        carbon.stop().await;

        // backend arrêté : l'envoi échoue, les points sont perdus sans panique
        let mut lost = false;
        for _ in 0..5 {
            let outcome = broker
                .handle_service_check(ServiceCheckResult {
                    host_name: "web1".into(),
                    service_description: "http".into(),
                    perf_data: "time=1".into(),
                    last_chk: 1,
                    latency: 0.0,
                })
                .await;
            if outcome == (CheckOutcome::Lost { points: 1 }) {
                lost = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert!(lost);
    }

    #[tokio::test]
    async fn test_pickle_mode_buffers_until_tick() {
        let carbon = FakeCarbon::start().await.unwrap();
        let mut cfg = line_config(carbon.port());
        cfg.use_pickle = true;
        let mut broker = GraphiteBroker::start(&cfg).await.unwrap();
        register_web1(&mut broker).await;

        for last_chk in [100, 160] {
            broker
                .handle_brok(brok(BrokBuilder::service_check("web1", "http", "time=120ms;500;1000;;", last_chk, 0.0)))
                .await;
        }
        assert_eq!(broker.buffered(), 6);
        assert!(carbon.received_bytes().is_empty());

        assert_eq!(broker.hook_tick().await, Some(DrainOutcome::Flushed { sent: 6 }));
        assert_eq!(broker.buffered(), 0);

        let points = carbon.wait_for_points(6, 2000).await.unwrap();
        assert_eq!(points.len(), 6);
        assert!(points[0].0.ends_with(".gauges.web1.http.time"));
        assert_eq!(points[0].1, ("100".to_string(), "120".to_string()));
        assert_eq!(points[5].1, ("160".to_string(), "1000".to_string()));
    }

    /// Connexion scriptée : Carbon injoignable après le démarrage
    struct DownAfterStart {
        connected_once: bool,
        writes: VecDeque<bool>,
    }

    impl CarbonLink for DownAfterStart {
        async fn connect(&mut self) -> Result<(), CarbonError> {
            if self.connected_once {
                return Err(CarbonError::NotConnected);
            }
            self.connected_once = true;
            Ok(())
        }

        async fn write_all(&mut self, _payload: &[u8]) -> Result<(), CarbonError> {
            if self.writes.pop_front().unwrap_or(false) { Ok(()) } else { Err(CarbonError::NotConnected) }
        }

        fn close(&mut self) {}
    }

    #[tokio::test]
    async fn test_pickle_outage_drops_buffer_after_tick_limit() {
        let cfg = GraphiteConfig { use_pickle: true, tick_limit: 2, ..Default::default() }.normalize();
        let link = DownAfterStart { connected_once: false, writes: VecDeque::new() };
        let mut broker = GraphiteBroker::with_link(&cfg, link, PickleSerializer).await.unwrap();

        broker.handle_brok(BrokEvent::InitialHostStatus(HostStatusEvent {
            host_name: "db1".into(),
            customs: HashMap::new(),
            check_command: Some("check_tcp".into()),
            address: Some("10.1.1.1".into()),
        })).await;
        broker.handle_brok(BrokEvent::InitialServiceStatus(ServiceStatusEvent {
            host_name: "db1".into(),
            service_description: "mysql".into(),
            customs: HashMap::new(),
        })).await;
        broker
            .handle(PipelineEvent::Brok(brok(BrokBuilder::service_check("db1", "mysql", "conn=12 qps=340", 50, 0.0))))
            .await;
        assert_eq!(broker.buffered(), 2);

        assert!(matches!(broker.hook_tick().await, Some(DrainOutcome::Deferred { failed_ticks: 1, .. })));
        assert_eq!(broker.buffered(), 2);
        assert_eq!(broker.hook_tick().await, Some(DrainOutcome::Discarded { dropped: 2 }));
        assert_eq!(broker.buffered(), 0);

        // le broker continue d'accepter des données après la perte
        broker.handle(PipelineEvent::Brok(brok(BrokBuilder::service_check("db1", "mysql", "conn=1", 51, 0.0)))).await;
        broker.handle(PipelineEvent::Tick).await;
        assert_eq!(broker.buffered(), 1);
    }
}
