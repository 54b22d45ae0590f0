//! Pager configuration
//!
//! Runtime knobs layered over the fixed constants in `paging::vm_param`.
//! The defaults reproduce the reference machine: 1024 managed frames,
//! tracing off.

use crate::error::{PagingError, Result};
use crate::paging::vm_param::{NFRAMES, RESERVED_FRAMES};

/// Extra steps a second-chance scan may take beyond two full laps
pub const DEFAULT_SCAN_SLACK: usize = 10;

/// Pager configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PagerConfig {
    /// Frames in the managed pool (reserved boot frames included)
    pub frames: usize,
    /// Log every replacement decision
    pub trace_replacement: bool,
    /// Second-chance scan bound is `2 * queue_len + scan_slack`
    pub scan_slack: usize,
}

impl PagerConfig {
    /// Configuration of the reference machine
    pub const fn new() -> Self {
        Self {
            frames: NFRAMES,
            trace_replacement: false,
            scan_slack: DEFAULT_SCAN_SLACK,
        }
    }

    /// Set the managed frame count
    pub const fn with_frames(mut self, frames: usize) -> Self {
        self.frames = frames;
        self
    }

    /// Enable or disable replacement tracing
    pub const fn with_trace(mut self, trace: bool) -> Self {
        self.trace_replacement = trace;
        self
    }

    /// Set the scan slack
    pub const fn with_scan_slack(mut self, slack: usize) -> Self {
        self.scan_slack = slack;
        self
    }

    /// Check the configuration against the architectural limits
    pub fn validate(&self) -> Result<()> {
        if self.frames > NFRAMES {
            return Err(PagingError::InvalidConfig("more frames than the pool holds"));
        }
        // Room for at least a directory, a table and one data page
        if self.frames < RESERVED_FRAMES + 3 {
            return Err(PagingError::InvalidConfig("too few frames beyond the reserved prefix"));
        }
        Ok(())
    }
}

impl Default for PagerConfig {
    fn default() -> Self {
        Self::new()
    }
}
