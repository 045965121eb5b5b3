// Copyright (c) Facebook, Inc. and its affiliates.
use log::{debug, info, warn};
use std::convert::TryFrom;

/// Debounces a sampled task count. A significant change arms the trigger
/// and it fires on the first sample after the count settles, so a burst of
/// changes leads to a single re-search with the final count.
#[derive(Debug, Clone)]
pub struct TaskTrigger {
    /// Changes of this much or less are noise.
    pub min_delta: u32,
    /// Added to the sampled count to get the count the model expects.
    pub offset: i64,
    /// Adjusted counts at or below this are too small to bother with.
    pub min_tasks: i64,
    last: u32,
    armed: bool,
}

impl Default for TaskTrigger {
    fn default() -> Self {
        Self {
            min_delta: 5,
            offset: -22,
            min_tasks: 10,
            last: 0,
            armed: false,
        }
    }
}

impl TaskTrigger {
    pub fn armed(&self) -> bool {
        self.armed
    }

    fn adjusted(&self, cur: u32) -> i64 {
        cur as i64 + self.offset
    }

    /// Feed a sample. Returns the adjusted task count to search with when
    /// the trigger fires.
    pub fn update(&mut self, cur: u32) -> Option<u32> {
        let last = self.last;
        self.last = cur;

        if cur != last {
            debug!("trigger: tasks {} -> {}", last, cur);
            if (cur as i64 - last as i64).abs() > self.min_delta as i64
                && self.adjusted(cur) > self.min_tasks
            {
                self.armed = true;
            }
            return None;
        }

        if !self.armed {
            return None;
        }
        self.armed = false;

        // Small drifts keep the trigger armed and may have carried the
        // count back under the threshold.
        let adjusted = self.adjusted(cur);
        if adjusted <= self.min_tasks {
            debug!("trigger: tasks settled at {} which is too few", cur);
            return None;
        }
        match u32::try_from(adjusted) {
            Ok(tasks) => {
                info!("trigger: tasks settled at {}", cur);
                Some(tasks)
            }
            Err(_) => {
                warn!("trigger: adjusted task count {} out of range", adjusted);
                None
            }
        }
    }
}
