use std::time::Duration;

use super::types::{FrameId, PageId};

/// Size of a page in bytes (4 KB)
pub const PAGE_SIZE: usize = 4096;

/// Invalid page ID constant; serializes as 0xFFFFFFFF on disk
pub const INVALID_PAGE_ID: PageId = PageId(u32::MAX);

/// Invalid frame ID constant
pub const INVALID_FRAME_ID: FrameId = FrameId(u32::MAX);

/// Default buffer pool size (number of frames)
pub const DEFAULT_BUFFER_POOL_SIZE: usize = 10;

/// Number of entries an extendible-hash bucket holds before it splits
pub const BUCKET_SIZE: usize = 50;

/// How long the log flush thread waits before flushing on its own
pub const LOG_TIMEOUT: Duration = Duration::from_secs(1);

/// Offset of the LSN field shared by every loggable page layout.
/// Table pages and B+tree pages both keep their LSN at byte 4.
pub const PAGE_LSN_OFFSET: usize = 4;
