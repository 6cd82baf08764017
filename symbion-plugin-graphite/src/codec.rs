/**
 * CODEC - Formats de fil vers Carbon
 *
 * - Protocole ligne : `<chemin> <valeur> <timestamp>\n`
 * - Protocole pickle : en-tête 4 octets big-endian (taille) + lot sérialisé
 *
 * La sérialisation des lots passe par `BatchSerializer` pour pouvoir cibler
 * un autre listener que le pickle receiver de Carbon ; le framing reste fixe.
 */

use crate::error::CodecError;
use crate::perfdata::MetricSample;

/// Point prêt à partir : chemin complet, valeur, horodatage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricPoint {
    pub path: String,
    pub value: String,
    pub timestamp: i64,
}

impl MetricPoint {
    /// Points d'un check : `<chemin>.<métrique>` pour chaque échantillon
    pub fn from_samples(path: &str, samples: &[MetricSample], timestamp: i64) -> Vec<Self> {
        samples
            .iter()
            .map(|sample| MetricPoint {
                path: format!("{}.{}", path, sample.name),
                value: sample.value.clone(),
                timestamp,
            })
            .collect()
    }

    /// Ligne du protocole plaintext, `\n` inclus
    pub fn to_line(&self) -> String {
        format!("{} {} {}\n", self.path, self.value, self.timestamp)
    }
}

/// Entrée du buffer pickle : `(chemin, (timestamp, valeur))`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferedEntry {
    pub path: String,
    pub timestamp: String,
    pub value: String,
}

impl From<MetricPoint> for BufferedEntry {
    fn from(point: MetricPoint) -> Self {
        Self {
            path: point.path,
            timestamp: point.timestamp.to_string(),
            value: point.value,
        }
    }
}

/// Paquet ligne : toutes les métriques d'un check en une seule écriture
pub fn line_packet(points: &[MetricPoint]) -> String {
    points.iter().map(MetricPoint::to_line).collect()
}

/// Sérialiseur d'un lot d'entrées bufferisées
pub trait BatchSerializer {
    fn serialize(&self, batch: &[BufferedEntry]) -> Result<Vec<u8>, CodecError>;
}

/// Lot encodé en pickle protocole 2 : liste de tuples `(str, (str, str))`
#[derive(Debug, Clone, Copy, Default)]
pub struct PickleSerializer;

mod opcodes {
    pub const PROTO: u8 = 0x80;
    pub const EMPTY_LIST: u8 = b']';
    pub const MARK: u8 = b'(';
    pub const APPENDS: u8 = b'e';
    pub const BINUNICODE: u8 = b'X';
    pub const TUPLE2: u8 = 0x86;
    pub const STOP: u8 = b'.';
}

fn write_unicode(out: &mut Vec<u8>, s: &str) -> Result<(), CodecError> {
    let len = u32::try_from(s.len()).map_err(|_| CodecError::StringTooLong(s.len()))?;
    out.push(opcodes::BINUNICODE);
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(s.as_bytes());
    Ok(())
}

impl BatchSerializer for PickleSerializer {
    fn serialize(&self, batch: &[BufferedEntry]) -> Result<Vec<u8>, CodecError> {
        let mut out = vec![opcodes::PROTO, 2, opcodes::EMPTY_LIST];
        if !batch.is_empty() {
            out.push(opcodes::MARK);
            for entry in batch {
                write_unicode(&mut out, &entry.path)?;
                write_unicode(&mut out, &entry.timestamp)?;
                write_unicode(&mut out, &entry.value)?;
                out.push(opcodes::TUPLE2);
                out.push(opcodes::TUPLE2);
            }
            out.push(opcodes::APPENDS);
        }
        out.push(opcodes::STOP);
        Ok(out)
    }
}

/// Préfixe le payload de sa taille sur 4 octets big-endian
pub fn frame(payload: &[u8]) -> Result<Vec<u8>, CodecError> {
    let len = u32::try_from(payload.len()).map_err(|_| CodecError::PayloadTooLarge(payload.len()))?;
    let mut packet = Vec::with_capacity(4 + payload.len());
    packet.extend_from_slice(&len.to_be_bytes());
    packet.extend_from_slice(payload);
    Ok(packet)
}
