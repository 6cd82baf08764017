/*!
Test Harness pour plugins Symbion → Graphite

Facilite l'écriture de tests avec:
- Démarrage automatique d'un faux Carbon
- Expectations sur les métriques reçues
*/

use crate::carbon_stub::FakeCarbon;
use anyhow::Result;
use std::collections::HashMap;

/// Harness de test : faux Carbon + expectations
pub struct TestHarness {
    pub carbon: FakeCarbon,
    expectations: Vec<Expectation>,
}

#[derive(Debug)]
struct Expectation {
    prefix: String,
    expected_count: usize,
    timeout_ms: u64,
}

impl TestHarness {
    pub async fn new() -> Result<Self> {
        env_logger::try_init().ok(); // Init logging pour tests

        Ok(Self {
            carbon: FakeCarbon::start().await?,
            expectations: Vec::new(),
        })
    }

    /// On s'attend à recevoir N lignes dont le chemin commence par `prefix`
    pub fn expect_lines(&mut self, prefix: &str, count: usize) -> &mut Self {
        self.expectations.push(Expectation {
            prefix: prefix.to_string(),
            expected_count: count,
            timeout_ms: 5000,
        });
        self
    }

    fn count_with_prefix(&self, prefix: &str) -> usize {
        self.carbon.received_lines().iter().filter(|l| l.starts_with(prefix)).count()
    }

    /// Vérifie toutes les expectations, en laissant le temps au réseau
    pub async fn verify_expectations(&self) -> Result<()> {
        log::info!("🔍 Verifying {} expectations...", self.expectations.len());

        for expectation in &self.expectations {
            let start = std::time::Instant::now();
            let mut actual = self.count_with_prefix(&expectation.prefix);
            while actual < expectation.expected_count
                && start.elapsed().as_millis() < u128::from(expectation.timeout_ms)
            {
                tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                actual = self.count_with_prefix(&expectation.prefix);
            }

            if actual != expectation.expected_count {
                anyhow::bail!(
                    "Expectation failed for prefix '{}': expected {} lines, got {}",
                    expectation.prefix, expectation.expected_count, actual
                );
            }
            log::info!("✅ Prefix '{}': {} lines as expected", expectation.prefix, actual);
        }
        Ok(())
    }

    /// Assert qu'une ligne exacte a été reçue
    pub fn assert_line_sent(&self, line: &str) -> Result<()> {
        if self.carbon.received_lines().iter().any(|l| l == line) {
            return Ok(());
        }
        anyhow::bail!("Expected line not received: {}", line);
    }

    /// Stats sur les lignes reçues, par chemin
    pub fn get_stats(&self) -> TestStats {
        let lines = self.carbon.received_lines();
        let mut path_counts = HashMap::new();
        for line in &lines {
            if let Some(path) = line.split(' ').next() {
                *path_counts.entry(path.to_string()).or_insert(0) += 1;
            }
        }
        TestStats {
            total_lines: lines.len(),
            connections: self.carbon.connections(),
            path_counts,
        }
    }
}

#[derive(Debug)]
pub struct TestStats {
    pub total_lines: usize,
    pub connections: usize,
    pub path_counts: HashMap<String, usize>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpStream;

    #[tokio::test]
    async fn test_harness_basic_functionality() {
        let mut harness = TestHarness::new().await.unwrap();
        harness.expect_lines("servers.", 2);

        let mut client = TcpStream::connect(("127.0.0.1", harness.carbon.port())).await.unwrap();
        client.write_all(b"servers.a.load 1 100\nservers.b.load 2 100\nother.x 3 100\n").await.unwrap();

        harness.verify_expectations().await.unwrap();
        harness.assert_line_sent("other.x 3 100").unwrap();
        assert!(harness.assert_line_sent("missing 0 0").is_err());

        let stats = harness.get_stats();
        assert_eq!(stats.total_lines, 3);
        assert_eq!(stats.connections, 1);
        assert_eq!(stats.path_counts.get("servers.a.load"), Some(&1));
    }
}
