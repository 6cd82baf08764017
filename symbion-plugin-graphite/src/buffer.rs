/**
 * BUFFER - Buffer de transmission du mode pickle
 *
 * RÔLE :
 * Accumule les points entre deux ticks et les vide par lots vers Carbon.
 *
 * FONCTIONNEMENT (à chaque tick) :
 * - Compteur de ticks en échec ≥ tick_limit → buffer vidé (perte assumée)
 * - Sinon envoi par lots de `chunk_size` points
 *   - succès : lot retiré, chunk_size × 1.5 (plafonné par max_chunk_size)
 *   - échec : max_chunk_size = chunk_size, chunk_size ÷ 1.5, reconnexion ;
 *     si la reconnexion échoue, tick compté en échec et arrêt jusqu'au
 *     prochain tick
 * - Buffer entièrement vidé → compteur remis à zéro
 *
 * La mémoire reste bornée : au pire `tick_limit` ticks de points.
 */

use crate::carbon::CarbonLink;
use crate::codec::{frame, BatchSerializer, BufferedEntry};
use crate::error::CarbonError;
use std::collections::VecDeque;
use tracing::{debug, error, warn};

const GROWTH_FACTOR: f64 = 1.5;

/// Taille de lot adaptative
///
/// Les tailles sont des flottants comme dans le calcul géométrique ; le
/// nombre de points envoyés est la partie entière, au moins 1.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdaptiveChunkState {
    chunk_size: f64,
    max_chunk_size: f64,
}

impl AdaptiveChunkState {
    pub fn new(chunk_size: usize, max_chunk_size: usize) -> Self {
        let max_chunk_size = max_chunk_size.max(1) as f64;
        Self {
            chunk_size: (chunk_size.max(1) as f64).min(max_chunk_size),
            max_chunk_size,
        }
    }

    pub fn chunk_size(&self) -> f64 {
        self.chunk_size
    }

    pub fn max_chunk_size(&self) -> f64 {
        self.max_chunk_size
    }

    /// Nombre de points du prochain lot
    pub fn chunk_len(&self) -> usize {
        (self.chunk_size.floor() as usize).max(1)
    }

    /// Lot envoyé : on regagne du débit
    pub fn grow(&mut self) {
        self.chunk_size = (self.chunk_size * GROWTH_FACTOR).min(self.max_chunk_size);
    }

    /// Lot en échec : plafond à la taille fautive, taille réduite
    pub fn shrink(&mut self) {
        self.max_chunk_size = self.chunk_size;
        self.chunk_size = (self.chunk_size / GROWTH_FACTOR).max(1.0);
    }
}

/// Issue d'un cycle de vidage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Buffer entièrement envoyé (ou déjà vide)
    Flushed { sent: usize },
    /// Reconnexion impossible, reprise au prochain tick
    Deferred { sent: usize, failed_ticks: u32 },
    /// Fenêtre de rétention dépassée, points abandonnés
    Discarded { dropped: usize },
}

/// Buffer des points en attente du mode pickle
pub struct TransmissionBuffer<S: BatchSerializer> {
    entries: VecDeque<BufferedEntry>,
    chunk: AdaptiveChunkState,
    failed_ticks: u32,
    tick_limit: u32,
    serializer: S,
}

impl<S: BatchSerializer> TransmissionBuffer<S> {
    pub fn new(serializer: S, tick_limit: u32, chunk: AdaptiveChunkState) -> Self {
        Self {
            entries: VecDeque::new(),
            chunk,
            failed_ticks: 0,
            tick_limit,
            serializer,
        }
    }

    pub fn extend(&mut self, entries: impl IntoIterator<Item = BufferedEntry>) {
        self.entries.extend(entries);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn failed_ticks(&self) -> u32 {
        self.failed_ticks
    }

    pub fn chunk(&self) -> &AdaptiveChunkState {
        &self.chunk
    }

    fn discard(&mut self) -> DrainOutcome {
        let dropped = self.entries.len();
        error!("[graphite] Buffering time exceeded. Freeing buffer ({} points lost)", dropped);
        self.entries.clear();
        self.failed_ticks = 0;
        DrainOutcome::Discarded { dropped }
    }

    fn encode_chunk(&self, len: usize) -> Result<Vec<u8>, CarbonError> {
        let (front, back) = self.entries.as_slices();
        let payload = if len <= front.len() {
            self.serializer.serialize(&front[..len])?
        } else {
            let batch: Vec<BufferedEntry> = front.iter().chain(&back[..len - front.len()]).cloned().collect();
            self.serializer.serialize(&batch)?
        };
        Ok(frame(&payload)?)
    }

    /// Vide le buffer vers Carbon, appelé une fois par tick
    pub async fn drain<L: CarbonLink>(&mut self, link: &mut L) -> DrainOutcome {
        if self.failed_ticks >= self.tick_limit {
            return self.discard();
        }

        let mut sent = 0;
        while !self.entries.is_empty() {
            let len = self.chunk.chunk_len().min(self.entries.len());
            let packet = match self.encode_chunk(len) {
                Ok(packet) => packet,
                Err(e) => {
                    // Lot inencodable : inutile de le renvoyer au prochain tick
                    error!("[graphite] Dropping {} points that cannot be encoded: {}", len, e);
                    self.entries.drain(..len);
                    continue;
                }
            };

            match link.write_all(&packet).await {
                Ok(()) => {
                    self.entries.drain(..len);
                    sent += len;
                    self.chunk.grow();
                    debug!("[graphite] Sent {} points, next chunk size {:.1}", len, self.chunk.chunk_size());
                }
                Err(e) => {
                    let at_floor = self.chunk.chunk_len() == 1;
                    self.chunk.shrink();
                    warn!(
                        "[graphite] Failed sending {} points ({}), chunk size now {:.1} (max {:.1})",
                        len, e, self.chunk.chunk_size(), self.chunk.max_chunk_size()
                    );
                    link.close();

                    let reconnected = link.connect().await.is_ok();
                    // Un envoi d'un seul point qui échoue sur une connexion neuve
                    // ne se débloquera pas dans ce tick
                    if !reconnected || at_floor {
                        self.failed_ticks += 1;
                        error!(
                            "[graphite] Sending data Failed. Buffering state : {} / {}",
                            self.failed_ticks, self.tick_limit
                        );
                        if self.failed_ticks >= self.tick_limit {
                            return self.discard();
                        }
                        return DrainOutcome::Deferred { sent, failed_ticks: self.failed_ticks };
                    }
                }
            }
        }

        self.failed_ticks = 0;
        DrainOutcome::Flushed { sent }
    }
}
