//! demand_pager - Demand paging for a small teaching kernel
//!
//! This crate provides the paging core of the kernel: backing stores,
//! an inverted frame table with second-chance replacement, page fault
//! resolution, shared xmmap regions and a virtual heap allocator, all
//! driven through a single `Pager` service object.

#![no_std]
// Hardware entry layouts are spelled out with explicit shifts
#![allow(clippy::identity_op)]
// Entry and frame arithmetic mixes u32 and usize
#![allow(clippy::unnecessary_cast)]
#![allow(clippy::manual_div_ceil)]

extern crate alloc;

// Core types
pub mod types;

pub mod config;
pub mod console;
pub mod error;
pub mod kern;
pub mod paging;

pub use config::PagerConfig;
pub use error::{DeviceError, ErrorKind, PagingError, Result};
pub use kern::sched::{ProcTable, Scheduler};
pub use paging::Pager;
pub use types::{FrameIndex, Pid, StoreId};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
