//! Rotation-window bookkeeping of a section.
//!
//! Producers sign `producer_repetitions` consecutive blocks each, in schedule
//! order. A section remembers who took over at which block for the last
//! `rotation_window` hand-offs and rejects any header that breaks the
//! round-robin: wrong producer for the slot, a producer coming back too soon,
//! or a jump over too many positions in the schedule.

use crate::config::ChainConfig;
use crate::error::ChainError;
use crate::types::chain::Section;
use crate::types::header::ProducerSchedule;
use crate::types::primitives::Name;

/// Producer whose turn it is at `slot`, or `None` for an empty schedule.
pub fn scheduled_producer(slot: u32, schedule: &ProducerSchedule, repetitions: u32) -> Option<Name> {
    let count = schedule.producers.len() as u64;
    if count == 0 || repetitions == 0 {
        return None;
    }
    let index = (u64::from(slot) % (count * u64::from(repetitions))) / u64::from(repetitions);
    schedule.producers.get(index as usize).map(|p| p.producer_name)
}

impl Section {
    /// A fresh section rooted at `block_num`.
    pub fn new(block_num: u32, valid: bool) -> Self {
        Self {
            first: block_num,
            last: block_num,
            newprod_block_num: 0,
            valid,
            producers: Vec::new(),
            block_nums: Vec::new(),
        }
    }

    /// Record that `producer` signed block `block_num` at `slot`, checking it
    /// against the rotation window.
    ///
    /// IMPORTANT: the window is only policed for real schedules. A single
    /// `eosio` producer or `few_producers_test` skips every check and records
    /// nothing.
    pub fn add(
        &mut self,
        producer: Name,
        block_num: u32,
        slot: u32,
        schedule: &ProducerSchedule,
        config: &ChainConfig,
    ) -> Result<(), ChainError> {
        if schedule.is_single_producer_test() || config.few_producers_test {
            return Ok(());
        }

        // Section root: nothing to compare against yet.
        let Some(&last_producer) = self.producers.last() else {
            self.producers.push(producer);
            self.block_nums.push(block_num);
            return Ok(());
        };

        if slot == 0 {
            return Err(ChainError::InvalidSlot);
        }
        let producer_count = schedule.producers.len();
        if producer_count < config.min_schedule_producers {
            return Err(ChainError::ScheduleTooSmall {
                producers: producer_count,
                required: config.min_schedule_producers,
            });
        }

        let expected = scheduled_producer(slot, schedule, config.producer_repetitions);
        if expected != Some(producer) {
            return Err(ChainError::ScheduledProducerMismatch {
                slot,
                expected: expected.map(|n| n.to_string()).unwrap_or_default(),
                got: producer.to_string(),
            });
        }

        // Still the same producer's turn.
        if producer == last_producer {
            return Ok(());
        }

        if self
            .producers
            .iter()
            .rev()
            .take(config.repeat_window)
            .any(|p| *p == producer)
        {
            return Err(ChainError::ProducerRepeated {
                producer: producer.to_string(),
                window: config.repeat_window,
            });
        }

        // A producer missing from the schedule (the window straddles a
        // rotation) has no position to measure the span from.
        if let (Some(index_last), Some(index_this)) =
            (schedule.position_of(last_producer), schedule.position_of(producer))
        {
            let within_span = if index_this > index_last {
                index_this - index_last <= config.max_span
            } else {
                index_last - index_this >= producer_count.saturating_sub(config.max_span)
            };
            if !within_span {
                return Err(ChainError::ExceedMaxSpan {
                    from: last_producer.to_string(),
                    to: producer.to_string(),
                    max_span: config.max_span,
                });
            }
        }

        self.producers.push(producer);
        self.block_nums.push(block_num);

        if self.producers.len() > config.rotation_window {
            let excess = self.producers.len() - config.rotation_window;
            self.producers.drain(..excess);
            self.block_nums.drain(..excess);
        }
        Ok(())
    }

    /// Forget every window entry at or after `block_num` ahead of a rewrite
    /// of the section's tail.
    pub fn clear_from(&mut self, block_num: u32) -> Result<(), ChainError> {
        if !(self.first < block_num && block_num <= self.last) {
            return Err(ChainError::Internal {
                reason: format!(
                    "clear_from({}) outside section ({}, {}]",
                    block_num, self.first, self.last
                ),
            });
        }
        while self.block_nums.last().is_some_and(|&num| num >= block_num) {
            self.block_nums.pop();
            self.producers.pop();
        }
        Ok(())
    }

    /// Drop the whole rotation window, after the active schedule changed.
    pub fn reset_window(&mut self) {
        self.producers.clear();
        self.block_nums.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::header::{ProducerKey, SINGLE_PRODUCER_NAME};
    use crate::types::primitives::PublicKey;

    const REPS: u32 = 12;

    fn name(i: usize) -> Name {
        format!("producer{}", (b'a' + i as u8) as char).parse().unwrap()
    }

    fn schedule(count: usize) -> ProducerSchedule {
        ProducerSchedule {
            version: 1,
            producers: (0..count)
                .map(|i| ProducerKey {
                    producer_name: name(i),
                    block_signing_key: PublicKey([i as u8; 33]),
                })
                .collect(),
        }
    }

    /// First slot of producer `index`'s turn in round `round`.
    fn slot_of(index: usize, round: u32, count: usize) -> u32 {
        (round * count as u32 + index as u32) * REPS
    }

    fn rooted(schedule: &ProducerSchedule, root_slot: u32, config: &ChainConfig) -> Section {
        let mut section = Section::new(1000, false);
        let producer = scheduled_producer(root_slot, schedule, REPS).unwrap();
        section.add(producer, 1000, root_slot, schedule, config).unwrap();
        section
    }

    #[test]
    fn test_scheduled_producer_turns() {
        let sched = schedule(21);
        assert_eq!(scheduled_producer(0, &sched, REPS), Some(name(0)));
        assert_eq!(scheduled_producer(11, &sched, REPS), Some(name(0)));
        assert_eq!(scheduled_producer(12, &sched, REPS), Some(name(1)));
        assert_eq!(scheduled_producer(21 * 12, &sched, REPS), Some(name(0)));
        assert_eq!(scheduled_producer(5, &ProducerSchedule::default(), REPS), None);
    }

    #[test]
    fn test_full_rotation_is_accepted_and_window_trimmed() {
        let config = ChainConfig::default();
        let sched = schedule(21);
        let mut section = rooted(&sched, slot_of(0, 1, 21), &config);

        let mut num = 1000;
        for round in 1..4 {
            for index in 0..21 {
                for rep in 0..REPS {
                    if round == 1 && index == 0 && rep == 0 {
                        continue;
                    }
                    num += 1;
                    let slot = slot_of(index, round, 21) + rep;
                    section.add(name(index), num, slot, &sched, &config).unwrap();
                }
            }
        }
        assert_eq!(section.producers.len(), 21);
        assert_eq!(section.block_nums.len(), 21);
        assert_eq!(*section.producers.last().unwrap(), name(20));
    }

    #[test]
    fn test_wrong_producer_for_slot() {
        let config = ChainConfig::default();
        let sched = schedule(21);
        let mut section = rooted(&sched, slot_of(0, 1, 21), &config);

        let err = section
            .add(name(2), 1001, slot_of(1, 1, 21), &sched, &config)
            .unwrap_err();
        assert!(matches!(err, ChainError::ScheduledProducerMismatch { .. }));
    }

    #[test]
    fn test_producer_repeat_within_window_rejected() {
        let config = ChainConfig::default();
        let sched = schedule(21);
        let mut section = rooted(&sched, slot_of(0, 1, 21), &config);
        section.add(name(1), 1001, slot_of(1, 1, 21), &sched, &config).unwrap();
        section.add(name(2), 1002, slot_of(2, 1, 21), &sched, &config).unwrap();

        // Producer 0's slot again, in the next round: its signature may be
        // valid but it took over only two hand-offs ago.
        let err = section
            .add(name(0), 1003, slot_of(0, 2, 21), &sched, &config)
            .unwrap_err();
        assert!(matches!(err, ChainError::ProducerRepeated { window: 15, .. }));
    }

    #[test]
    fn test_span_limits() {
        let config = ChainConfig::default();
        let sched = schedule(21);

        let mut section = rooted(&sched, slot_of(0, 1, 21), &config);
        section.add(name(4), 1001, slot_of(4, 1, 21), &sched, &config).unwrap();

        let mut section = rooted(&sched, slot_of(0, 1, 21), &config);
        let err = section
            .add(name(5), 1001, slot_of(5, 1, 21), &sched, &config)
            .unwrap_err();
        assert!(matches!(err, ChainError::ExceedMaxSpan { max_span: 4, .. }));

        // Wrapping from the end of the schedule to the start.
        let mut section = rooted(&sched, slot_of(19, 1, 21), &config);
        section.add(name(1), 1001, slot_of(1, 2, 21), &sched, &config).unwrap();
    }

    #[test]
    fn test_small_schedule_rejected_unless_test_mode() {
        let sched = schedule(15);
        let config = ChainConfig::default();
        let mut section = rooted(&sched, slot_of(0, 1, 15), &config);
        let err = section
            .add(name(1), 1001, slot_of(1, 1, 15), &sched, &config)
            .unwrap_err();
        assert_eq!(err, ChainError::ScheduleTooSmall { producers: 15, required: 16 });

        let relaxed = ChainConfig {
            few_producers_test: true,
            ..Default::default()
        };
        let mut section = Section::new(1000, false);
        section.add(name(3), 1000, 0, &sched, &relaxed).unwrap();
        assert!(section.producers.is_empty());
    }

    #[test]
    fn test_single_producer_schedule_bypasses_checks() {
        let sched = ProducerSchedule {
            version: 1,
            producers: vec![ProducerKey {
                producer_name: SINGLE_PRODUCER_NAME,
                block_signing_key: PublicKey([2; 33]),
            }],
        };
        let config = ChainConfig::default();
        let mut section = Section::new(10, true);
        for num in 10..40 {
            section.add(SINGLE_PRODUCER_NAME, num, 0, &sched, &config).unwrap();
        }
        assert!(section.producers.is_empty());
    }

    #[test]
    fn test_clear_from_truncates_window() {
        let config = ChainConfig::default();
        let sched = schedule(21);
        let mut section = rooted(&sched, slot_of(0, 1, 21), &config);
        section.add(name(1), 1012, slot_of(1, 1, 21), &sched, &config).unwrap();
        section.add(name(2), 1024, slot_of(2, 1, 21), &sched, &config).unwrap();
        section.last = 1030;

        section.clear_from(1012).unwrap();
        assert_eq!(section.block_nums, vec![1000]);
        assert_eq!(section.producers, vec![name(0)]);

        assert!(section.clear_from(1000).is_err());
        assert!(section.clear_from(1031).is_err());
    }
}
