/**
 * NAMING - Construction des chemins Graphite
 *
 * RÔLE :
 * Garde en cache les customs des hôtes et services (reçus via les broks de
 * statut initial) et construit le chemin hiérarchique de chaque check :
 *
 * `host.<ip>.region=<R>.az=<AZ>.asg=<ASG>.ami=<AMI>.<type>.<service>[.<source>].<description>`
 *
 * Les caches vivent aussi longtemps que le plugin (dernier écrit gagnant,
 * aucune éviction).
 */

use crate::error::NameError;
use crate::events::{HostStatusEvent, ServiceStatusEvent};
use crate::perfdata::sanitize;
use std::collections::HashMap;

const REGION_KEY: &str = "_AWS_REGION";
const AZ_KEY: &str = "_AWS_AZ";
const ASG_KEY: &str = "_AWS_ASG";
const AMI_KEY: &str = "_AWS_AMI_ID";
const SERVICE_KEY: &str = "_AWS_SERVICE";
const METRIC_TYPE_KEY: &str = "_METRIC_TYPE";

const DEFAULT_METRIC_TYPE: &str = "gauges";

/// Métadonnées d'un hôte
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HostStatus {
    pub customs: HashMap<String, String>,
    pub check_command: Option<String>,
    pub address: Option<String>,
}

/// Métadonnées d'un service
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServiceStatus {
    pub customs: HashMap<String, String>,
}

/// Type de check à nommer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckKind {
    Host,
    Service,
}

impl std::fmt::Display for CheckKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CheckKind::Host => write!(f, "host"),
            CheckKind::Service => write!(f, "service"),
        }
    }
}

/// Résolveur de noms avec ses caches hôtes/services
#[derive(Debug, Default)]
pub struct NameResolver {
    hosts: HashMap<String, HostStatus>,
    services: HashMap<(String, String), ServiceStatus>,
    /// Sous-dossier optionnel, déjà assaini
    data_source: String,
}

impl NameResolver {
    pub fn new(data_source: impl Into<String>) -> Self {
        Self {
            hosts: HashMap::new(),
            services: HashMap::new(),
            data_source: data_source.into(),
        }
    }

    /// Remplace entièrement l'entrée de l'hôte
    pub fn update_host(&mut self, event: HostStatusEvent) {
        self.hosts.insert(event.host_name, HostStatus {
            customs: event.customs,
            check_command: event.check_command.filter(|c| !c.trim().is_empty()),
            address: event.address.filter(|a| !a.trim().is_empty()),
        });
    }

    /// Remplace entièrement l'entrée du service
    pub fn update_service(&mut self, event: ServiceStatusEvent) {
        self.services.insert(
            (event.host_name, event.service_description),
            ServiceStatus { customs: event.customs },
        );
    }

    pub fn host(&self, host_name: &str) -> Option<&HostStatus> {
        self.hosts.get(host_name)
    }

    pub fn service(&self, host_name: &str, description: &str) -> Option<&ServiceStatus> {
        self.services.get(&(host_name.to_string(), description.to_string()))
    }

    /// Construit le chemin Graphite d'un check
    ///
    /// Pour un check d'hôte, `description` est la commande de check de l'hôte.
    pub fn resolve(&self, host_name: &str, description: &str, kind: CheckKind) -> Result<String, NameError> {
        let host = self
            .host(host_name)
            .ok_or_else(|| NameError::UnknownHost(host_name.to_string()))?;
        let missing = |field: &'static str| NameError::MissingHostField { host: host_name.to_string(), field };
        let address = host.address.as_deref().ok_or_else(|| missing("address"))?;
        if kind == CheckKind::Host && description.trim().is_empty() {
            return Err(missing("check_command"));
        }

        let service_customs = match kind {
            CheckKind::Host => None,
            CheckKind::Service => Some(&self
                .service(host_name, description)
                .ok_or_else(|| NameError::UnknownService {
                    host: host_name.to_string(),
                    service: description.to_string(),
                })?
                .customs),
        };

        let custom = |key: &str, default: &str| -> String {
            host.customs.get(key).cloned().unwrap_or_else(|| default.to_string())
        };

        let metric_type = service_customs
            .and_then(|customs| customs.get(METRIC_TYPE_KEY))
            .map(String::as_str)
            .unwrap_or(DEFAULT_METRIC_TYPE);

        let mut segments = vec![
            "host".to_string(),
            sanitize(address, '-'),
            format!("region={}", custom(REGION_KEY, "no-region-found")),
            format!("az={}", custom(AZ_KEY, "no-az-found")),
            format!("asg={}", custom(ASG_KEY, "no-asg-found")),
            format!("ami={}", custom(AMI_KEY, "no-ami-found")),
            metric_type.to_string(),
            custom(SERVICE_KEY, host_name),
        ];
        if !self.data_source.is_empty() {
            segments.push(self.data_source.clone());
        }
        segments.push(sanitize(description, '_'));

        Ok(segments.join("."))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn customs(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    fn resolver_with_web1(data_source: &str) -> NameResolver {
        let mut resolver = NameResolver::new(data_source);
        resolver.update_host(HostStatusEvent {
            host_name: "web1".into(),
            customs: customs(&[("_AWS_REGION", "us-east-1")]),
            check_command: Some("check_host_alive".into()),
            address: Some("10.0.0.1".into()),
        });
        resolver.update_service(ServiceStatusEvent {
            host_name: "web1".into(),
            service_description: "http".into(),
            customs: HashMap::new(),
        });
        resolver
    }

    #[test]
    fn test_resolve_service_path_with_defaults() {
        let resolver = resolver_with_web1("");
        let path = resolver.resolve("web1", "http", CheckKind::Service).unwrap();
        assert_eq!(
            path,
            "host.10-0-0-1.region=us-east-1.az=no-az-found.asg=no-asg-found.ami=no-ami-found.gauges.web1.http"
        );
    }

    #[test]
    fn test_resolve_uses_all_customs() {
        let mut resolver = NameResolver::new("collectd");
        resolver.update_host(HostStatusEvent {
            host_name: "api-3".into(),
            customs: customs(&[
                ("_AWS_REGION", "eu-west-1"),
                ("_AWS_AZ", "eu-west-1a"),
                ("_AWS_ASG", "api-asg"),
                ("_AWS_AMI_ID", "ami-123"),
                ("_AWS_SERVICE", "api"),
            ]),
            check_command: Some("check_ping!100,20%".into()),
            address: Some("api-3.internal".into()),
        });
        resolver.update_service(ServiceStatusEvent {
            host_name: "api-3".into(),
            service_description: "Disk /var".into(),
            customs: customs(&[("_METRIC_TYPE", "counters")]),
        });

        let path = resolver.resolve("api-3", "Disk /var", CheckKind::Service).unwrap();
        assert_eq!(
            path,
            "host.api-3-internal.region=eu-west-1.az=eu-west-1a.asg=api-asg.ami=ami-123.counters.api.collectd.Disk__var"
        );

        let host_path = resolver.resolve("api-3", "check_ping!100,20%", CheckKind::Host).unwrap();
        assert!(host_path.ends_with(".gauges.api.collectd.check_ping_100_20_"));
    }

    #[test]
    fn test_unknown_host_is_not_found() {
        let resolver = NameResolver::default();
        assert_eq!(
            resolver.resolve("ghost", "http", CheckKind::Service),
            Err(NameError::UnknownHost("ghost".into()))
        );
        assert!(resolver.resolve("ghost", "cmd", CheckKind::Host).is_err());
    }

    #[test]
    fn test_unknown_service_is_not_found() {
        let resolver = resolver_with_web1("");
        assert_eq!(
            resolver.resolve("web1", "ssh", CheckKind::Service),
            Err(NameError::UnknownService { host: "web1".into(), service: "ssh".into() })
        );
        // un check d'hôte n'a pas besoin de statut de service
        assert!(resolver.resolve("web1", "check_host_alive", CheckKind::Host).is_ok());
    }

    #[test]
    fn test_status_update_replaces_entry() {
        let mut resolver = resolver_with_web1("");
        resolver.update_host(HostStatusEvent {
            host_name: "web1".into(),
            customs: HashMap::new(),
            check_command: Some("check_tcp".into()),
            address: Some("10.0.0.2".into()),
        });

        let host = resolver.host("web1").unwrap();
        assert!(host.customs.is_empty());
        assert_eq!(host.check_command.as_deref(), Some("check_tcp"));

        let path = resolver.resolve("web1", "http", CheckKind::Service).unwrap();
        assert!(path.starts_with("host.10-0-0-2.region=no-region-found."));
    }

    #[test]
    fn test_host_without_address_or_command_is_not_found() {
        let mut resolver = NameResolver::default();
        resolver.update_host(HostStatusEvent {
            host_name: "bare".into(),
            customs: HashMap::new(),
            check_command: Some("  ".into()),
            address: None,
        });
        resolver.update_service(ServiceStatusEvent {
            host_name: "bare".into(),
            service_description: "http".into(),
            customs: HashMap::new(),
        });

        let missing_address = NameError::MissingHostField { host: "bare".into(), field: "address" };
        assert_eq!(resolver.resolve("bare", "http", CheckKind::Service), Err(missing_address));
        assert_eq!(resolver.host("bare").unwrap().check_command, None);

        resolver.update_host(HostStatusEvent {
            host_name: "bare".into(),
            customs: HashMap::new(),
            check_command: None,
            address: Some("10.0.0.9".into()),
        });
        assert_eq!(
            resolver.resolve("bare", "", CheckKind::Host),
            Err(NameError::MissingHostField { host: "bare".into(), field: "check_command" })
        );
        assert!(resolver.resolve("bare", "http", CheckKind::Service).is_ok());
    }
}
