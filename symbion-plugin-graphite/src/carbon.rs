/**
 * CARBON - Connexion TCP vers l'instance Carbon de Graphite
 *
 * RÔLE :
 * Seul propriétaire de la socket. Connexion, envoi, détection des pannes et
 * reconnexion. Toutes les opérations réseau sont bornées par un timeout pour
 * ne pas bloquer le traitement des ticks.
 *
 * `CarbonLink` abstrait la connexion pour que le buffer et le broker puissent
 * être pilotés par une connexion scriptée dans les tests.
 */

use crate::error::CarbonError;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{error, info};

/// Lien vers un backend Carbon
#[allow(async_fn_in_trait)]
pub trait CarbonLink {
    /// Ouvre une nouvelle connexion (remplace l'éventuelle précédente)
    async fn connect(&mut self) -> Result<(), CarbonError>;

    /// Une seule tentative d'écriture complète
    async fn write_all(&mut self, payload: &[u8]) -> Result<(), CarbonError>;

    /// Ferme la connexion courante
    fn close(&mut self);

    /// Envoie le paquet ; en cas d'échec, une reconnexion et un seul renvoi
    async fn send(&mut self, payload: &[u8]) -> Result<(), CarbonError> {
        if let Err(e) = self.write_all(payload).await {
            error!("[graphite] Failed sending data to the Graphite Carbon instance ({}). Trying to reconnect ...", e);
            self.connect().await?;
            self.write_all(payload).await?;
        }
        Ok(())
    }
}

/// État de la connexion
#[derive(Debug)]
enum ConnectionState {
    Disconnected,
    Connected(TcpStream),
}

/// Connexion réelle vers `host:port`
#[derive(Debug)]
pub struct CarbonConnection {
    host: String,
    port: u16,
    timeout: Duration,
    state: ConnectionState,
}

impl CarbonConnection {
    pub fn new(host: impl Into<String>, port: u16, timeout: Duration) -> Self {
        Self {
            host: host.into(),
            port,
            timeout,
            state: ConnectionState::Disconnected,
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.state, ConnectionState::Connected(_))
    }
}

impl CarbonLink for CarbonConnection {
    async fn connect(&mut self) -> Result<(), CarbonError> {
        self.close();
        let addr = self.addr();
        info!("[graphite] Connecting to Carbon at {}", addr);

        let stream = match timeout(self.timeout, TcpStream::connect(addr.as_str())).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => {
                error!("[graphite] Graphite Carbon instance network socket! IOError: {}", source);
                return Err(CarbonError::Connect { addr, source });
            }
            Err(_) => {
                error!("[graphite] Connection to {} timed out", addr);
                return Err(CarbonError::Timeout { operation: "connect", timeout: self.timeout });
            }
        };
        stream.set_nodelay(true).ok();

        self.state = ConnectionState::Connected(stream);
        info!("[graphite] Connection successful to {}", addr);
        Ok(())
    }

    async fn write_all(&mut self, payload: &[u8]) -> Result<(), CarbonError> {
        let ConnectionState::Connected(stream) = &mut self.state else {
            return Err(CarbonError::NotConnected);
        };

        let result = match timeout(self.timeout, stream.write_all(payload)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(CarbonError::Write(e)),
            Err(_) => Err(CarbonError::Timeout { operation: "send", timeout: self.timeout }),
        };

        // Socket dans un état inconnu après un échec partiel
        if result.is_err() {
            self.close();
        }
        result
    }

    fn close(&mut self) {
        self.state = ConnectionState::Disconnected;
    }
}
