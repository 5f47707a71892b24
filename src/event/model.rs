//! Merge-Level Model
//!
//! Required overlap for two events to merge, the can-merge predicate and the merge
//! denial timeout, all derived from `EventConfig`.

use super::event::Event;
use super::types::EventFlags;
use crate::config::EventConfig;

use rand::Rng;

#[derive(Debug, Clone)]
pub struct MergeModel {
    base: u32,
    min: u32,
    size_step: f64,
    time_step: f64,
    range_step: f64,
    strain_step: f64,
    pub min_rift_time: u64,
    pub max_strain: u32,
    pub max_time_range: u64,
    pub max_time_diff: u64,
    pub max_size: u32,
    deny_size_factor: u64,
    deny_max_time: u64,
}

impl MergeModel {
    pub fn new(config: &EventConfig) -> Self {
        Self {
            base: config.merge_level_base,
            min: config.effective_merge_level_min(),
            size_step: config.merge_level_size_based_decrement_step,
            time_step: config.time_step_per_second(),
            range_step: config.range_step_per_second(),
            strain_step: config.merge_level_strain_based_increment_step,
            min_rift_time: config.min_rift_time,
            max_strain: config.merge_max_strain,
            max_time_range: config.max_time_range,
            max_time_diff: config.merge_max_time_diff,
            max_size: config.max_size,
            deny_size_factor: config.merge_deny_size_factor,
            deny_max_time: config.merge_deny_max_time,
        }
    }

    pub fn merge_level_min(&self) -> u32 {
        self.min
    }

    /// Overlap threshold for an event of `size` members (0 for pair checks) with the
    /// given strain, gap between the operands and combined time range.
    pub fn merge_level(&self, size: usize, strain: u32, time_diff: u64, time_range: u64) -> u32 {
        let mut level = self.base as usize + (self.range_step * time_range as f64) as usize;

        if time_diff > self.min_rift_time {
            level += (self.time_step * (time_diff - self.min_rift_time) as f64) as usize;
        }

        level += (self.strain_step * strain as f64) as usize;

        let decrement = (self.size_step * size as f64) as usize;
        let level = level.saturating_sub(decrement);

        level.max(self.min as usize).min(100) as u32
    }

    /// Merge level two events must reach to be merged.
    pub fn pair_merge_level(&self, a: &Event, b: &Event, strain: u32) -> u32 {
        self.merge_level(0, strain, a.time_diff(b), a.time_range_with(b))
    }

    pub fn can_merge(&self, event: &Event) -> bool {
        !event.flags.contains(EventFlags::DISSENTERS_CLEANUP)
            && event.time_range() <= self.max_time_range
            && event.strain() <= self.max_strain
            && event.published_min != 0
            && event.size() <= self.max_size as usize
            && !event.flags.contains(EventFlags::PUSH_IN_PROGRESS)
    }

    /// Refreshes the CAN_MERGE flag, latching DISSENTERS_CLEANUP when the strain is over
    /// the cap. Returns the new eligibility.
    pub fn set_merge(&self, event: &mut Event) -> bool {
        if event.strain() > self.max_strain {
            event.flags.insert(EventFlags::DISSENTERS_CLEANUP);
        }

        let can_merge = self.can_merge(event);
        event.flags.set(EventFlags::CAN_MERGE, can_merge);
        can_merge
    }

    /// How long a merged or detached pair stays denied, growing with combined size and
    /// randomized so pairs denied together do not expire together.
    pub fn deny_timeout(&self, size1: usize, size2: usize) -> u64 {
        let timeout = ((size1 + size2) as u64 * self.deny_size_factor).min(self.deny_max_time / 2);

        if timeout == 0 {
            return 0;
        }

        timeout + rand::thread_rng().gen_range(0..timeout)
    }
}
