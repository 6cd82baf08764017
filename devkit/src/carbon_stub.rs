/*!
Faux serveur Carbon pour tests sans Graphite

Écoute sur un port local éphémère, enregistre les octets reçus par
connexion et sait relire les deux protocoles :
- lignes plaintext `chemin valeur timestamp`
- trames pickle (en-tête 4 octets big-endian + liste de tuples)
*/

use anyhow::{bail, Result};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// Point décodé d'une trame pickle : `(chemin, (timestamp, valeur))`
pub type PicklePoint = (String, (String, String));

type Inbox = Arc<Mutex<Vec<Arc<Mutex<Vec<u8>>>>>>;

pub struct FakeCarbon {
    port: u16,
    inbox: Inbox,
    accept_task: JoinHandle<()>,
    readers: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl FakeCarbon {
    /// Démarre le serveur sur 127.0.0.1, port choisi par l'OS
    pub async fn start() -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let port = listener.local_addr()?.port();
        let inbox: Inbox = Arc::new(Mutex::new(Vec::new()));
        let readers = Arc::new(Mutex::new(Vec::new()));

        let accept_inbox = inbox.clone();
        let accept_readers = readers.clone();
        let accept_task = tokio::spawn(async move {
            while let Ok((mut socket, peer)) = listener.accept().await {
                log::info!("📡 [FAKE CARBON] connection from {}", peer);
                let buf = Arc::new(Mutex::new(Vec::new()));
                accept_inbox.lock().unwrap().push(buf.clone());

                let reader = tokio::spawn(async move {
                    let mut chunk = [0u8; 8192];
                    loop {
                        match socket.read(&mut chunk).await {
                            Ok(0) | Err(_) => break,
                            Ok(n) => buf.lock().unwrap().extend_from_slice(&chunk[..n]),
                        }
                    }
                });
                accept_readers.lock().unwrap().push(reader);
            }
        });

        log::info!("🚀 [FAKE CARBON] listening on 127.0.0.1:{}", port);
        Ok(Self { port, inbox, accept_task, readers })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Nombre de connexions acceptées depuis le démarrage
    pub fn connections(&self) -> usize {
        self.inbox.lock().unwrap().len()
    }

    /// Octets reçus, concaténés dans l'ordre des connexions
    pub fn received_bytes(&self) -> Vec<u8> {
        self.inbox
            .lock()
            .unwrap()
            .iter()
            .flat_map(|buf| buf.lock().unwrap().clone())
            .collect()
    }

    /// Lignes plaintext complètes reçues
    pub fn received_lines(&self) -> Vec<String> {
        let mut lines = Vec::new();
        for buf in self.inbox.lock().unwrap().iter() {
            let bytes = buf.lock().unwrap();
            let text = String::from_utf8_lossy(&bytes);
            // ligne partielle en fin de buffer ignorée
            let complete = match text.rfind('\n') {
                Some(idx) => &text[..idx],
                None => continue,
            };
            lines.extend(complete.split('\n').map(str::to_string));
        }
        lines
    }

    /// Points de toutes les trames pickle complètes reçues
    pub fn pickle_points(&self) -> Result<Vec<PicklePoint>> {
        let mut points = Vec::new();
        for buf in self.inbox.lock().unwrap().iter() {
            let bytes = buf.lock().unwrap();
            let mut offset = 0;
            while bytes.len() >= offset + 4 {
                let header: [u8; 4] = bytes[offset..offset + 4].try_into()?;
                let len = u32::from_be_bytes(header) as usize;
                if bytes.len() < offset + 4 + len {
                    break;
                }
                points.extend(decode_pickle_batch(&bytes[offset + 4..offset + 4 + len])?);
                offset += 4 + len;
            }
        }
        Ok(points)
    }

    /// Attend au moins `count` lignes
    pub async fn wait_for_lines(&self, count: usize, timeout_ms: u64) -> Result<Vec<String>> {
        let start = std::time::Instant::now();
        while start.elapsed() < Duration::from_millis(timeout_ms) {
            let lines = self.received_lines();
            if lines.len() >= count {
                return Ok(lines);
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        bail!("Timeout waiting for {} lines, got {}", count, self.received_lines().len());
    }

    /// Attend au moins `count` points pickle
    pub async fn wait_for_points(&self, count: usize, timeout_ms: u64) -> Result<Vec<PicklePoint>> {
        let start = std::time::Instant::now();
        while start.elapsed() < Duration::from_millis(timeout_ms) {
            let points = self.pickle_points()?;
            if points.len() >= count {
                return Ok(points);
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        bail!("Timeout waiting for {} pickle points, got {}", count, self.pickle_points()?.len());
    }

    /// Arrête d'écouter et coupe les connexions ouvertes
    pub async fn stop(self) {
        self.accept_task.abort();
        let _ = self.accept_task.await;
        let readers: Vec<JoinHandle<()>> = self.readers.lock().unwrap().drain(..).collect();
        for reader in readers {
            reader.abort();
            let _ = reader.await;
        }
        log::info!("🛑 [FAKE CARBON] stopped (port {})", self.port);
    }
}

#[derive(Debug)]
enum PickleValue {
    Str(String),
    Tuple(Vec<PickleValue>),
    List(Vec<PickleValue>),
    Mark,
}

/// Décodeur pickle minimal : le sous-ensemble produit pour Carbon
///
/// Opcodes gérés : PROTO, EMPTY_LIST, MARK, APPEND(S), BINUNICODE,
/// SHORT_BINUNICODE, TUPLE, TUPLE2, BINPUT/LONG_BINPUT (ignorés), STOP.
pub fn decode_pickle_batch(data: &[u8]) -> Result<Vec<PicklePoint>> {
    let mut stack: Vec<PickleValue> = Vec::new();
    let mut pos = 0;

    let result = loop {
        let op = take(data, &mut pos, 1)?[0];
        match op {
            0x80 => {
                take(data, &mut pos, 1)?;
            }
            b']' => stack.push(PickleValue::List(Vec::new())),
            b'(' => stack.push(PickleValue::Mark),
            b'X' => {
                let len = u32::from_le_bytes(take(data, &mut pos, 4)?.try_into()?) as usize;
                stack.push(PickleValue::Str(String::from_utf8(take(data, &mut pos, len)?.to_vec())?));
            }
            0x8c => {
                let len = take(data, &mut pos, 1)?[0] as usize;
                stack.push(PickleValue::Str(String::from_utf8(take(data, &mut pos, len)?.to_vec())?));
            }
            b'q' => {
                take(data, &mut pos, 1)?;
            }
            b'r' => {
                take(data, &mut pos, 4)?;
            }
            0x86 => {
                let (Some(b), Some(a)) = (stack.pop(), stack.pop()) else {
                    bail!("TUPLE2 on short stack");
                };
                stack.push(PickleValue::Tuple(vec![a, b]));
            }
            b't' => {
                let items = pop_to_mark(&mut stack)?;
                stack.push(PickleValue::Tuple(items));
            }
            b'a' => {
                let Some(item) = stack.pop() else { bail!("APPEND on empty stack") };
                match stack.last_mut() {
                    Some(PickleValue::List(list)) => list.push(item),
                    _ => bail!("APPEND without list"),
                }
            }
            b'e' => {
                let items = pop_to_mark(&mut stack)?;
                match stack.last_mut() {
                    Some(PickleValue::List(list)) => list.extend(items),
                    _ => bail!("APPENDS without list"),
                }
            }
            b'.' => break stack.pop(),
            other => bail!("unsupported pickle opcode 0x{:02x}", other),
        }
    };

    let Some(PickleValue::List(items)) = result else {
        bail!("pickle payload is not a list");
    };
    items.into_iter().map(into_point).collect()
}

fn take<'a>(data: &'a [u8], pos: &mut usize, n: usize) -> Result<&'a [u8]> {
    if data.len() < *pos + n {
        bail!("truncated pickle at offset {}", pos);
    }
    let slice = &data[*pos..*pos + n];
    *pos += n;
    Ok(slice)
}

fn pop_to_mark(stack: &mut Vec<PickleValue>) -> Result<Vec<PickleValue>> {
    let Some(mark) = stack.iter().rposition(|v| matches!(v, PickleValue::Mark)) else {
        bail!("missing MARK");
    };
    let items = stack.split_off(mark + 1);
    stack.pop();
    Ok(items)
}

fn into_point(value: PickleValue) -> Result<PicklePoint> {
    let PickleValue::Tuple(outer) = value else { bail!("expected (path, (ts, value))") };
    let [PickleValue::Str(path), PickleValue::Tuple(inner)] = <[PickleValue; 2]>::try_from(outer)
        .map_err(|_| anyhow::anyhow!("outer tuple must have 2 items"))?
    else {
        bail!("expected (str, tuple)");
    };
    let [PickleValue::Str(ts), PickleValue::Str(val)] = <[PickleValue; 2]>::try_from(inner)
        .map_err(|_| anyhow::anyhow!("inner tuple must have 2 items"))?
    else {
        bail!("expected (str, str)");
    };
    Ok((path, (ts, val)))
}
