//! Ring of the most recent producer schedules, keyed by an increasing id.

use crate::codec::digest_of;
use crate::config::ScheduleHashMode;
use crate::error::ChainError;
use crate::types::chain::ProducerScheduleRecord;
use crate::types::header::ProducerSchedule;
use crate::types::primitives::{Digest, Name, PublicKey};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// Digest of a schedule as it enters block signing digests.
pub fn schedule_hash(schedule: &ProducerSchedule, mode: ScheduleHashMode) -> Digest {
    match mode {
        ScheduleHashMode::Legacy => digest_of(schedule),
        ScheduleHashMode::WeightedAuthority => digest_of(&schedule.to_authority_schedule()),
    }
}

/// Bounded history of registered producer schedules.
///
/// Ids start at 1 and are never reused while the store is alive. Once the
/// span between the newest and oldest id reaches `max_records`, each new
/// registration evicts the oldest schedule.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProducerScheduleStore {
    records: BTreeMap<u64, ProducerScheduleRecord>,
}

impl ProducerScheduleStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Register `schedule` and return its id.
    pub fn register(
        &mut self,
        schedule: ProducerSchedule,
        mode: ScheduleHashMode,
        max_records: u64,
    ) -> u64 {
        let id = self.records.keys().next_back().map_or(1, |last| last + 1);
        let schedule_hash = schedule_hash(&schedule, mode);
        debug!(schedule_id = id, version = schedule.version, producers = schedule.producers.len(), "registering producer schedule");
        self.records.insert(
            id,
            ProducerScheduleRecord {
                id,
                schedule,
                schedule_hash,
            },
        );

        if let Some(&first) = self.records.keys().next() {
            if id - first >= max_records {
                self.records.remove(&first);
                debug!(schedule_id = first, "evicted oldest producer schedule");
            }
        }
        id
    }

    pub fn get(&self, id: u64) -> Result<&ProducerScheduleRecord, ChainError> {
        self.records.get(&id).ok_or(ChainError::ScheduleNotFound { id })
    }

    pub fn schedule(&self, id: u64) -> Result<&ProducerSchedule, ChainError> {
        Ok(&self.get(id)?.schedule)
    }

    /// Signing key of `producer` in schedule `id`.
    pub fn resolve_key(&self, id: u64, producer: Name) -> Result<PublicKey, ChainError> {
        self.schedule(id)?
            .key_of(producer)
            .copied()
            .ok_or_else(|| ChainError::ProducerNotFound {
                producer: producer.to_string(),
                schedule_id: id,
            })
    }

    /// Producer that signs with `key` in schedule `id`, if any.
    pub fn resolve_producer(&self, id: u64, key: &PublicKey) -> Result<Option<Name>, ChainError> {
        Ok(self.schedule(id)?.producer_of(key))
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    pub fn ids(&self) -> impl Iterator<Item = u64> + '_ {
        self.records.keys().copied()
    }
}
