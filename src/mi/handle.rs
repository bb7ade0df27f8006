//! Frame handles
//!
//! A frame is addressed by `(thread, level, session)`. The host only has
//! room for one integer per frame, so the triple is packed into 32 bits:
//!
//! ```text
//! bits 0-15   thread id
//! bits 16-23  frame level
//! bits 24-31  session id
//! ```
//!
//! The field widths are a hard ceiling. Values that do not fit are an error,
//! never silently wrapped.

use serde::{Deserialize, Serialize};

use crate::common::{Error, Result};

pub const MAX_THREAD: u32 = 0xffff;
pub const MAX_LEVEL: u32 = 0xff;
pub const MAX_SESSION: u32 = 0xff;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrameRef {
    pub thread_id: u32,
    pub level: u32,
    pub session_id: u32,
}

impl FrameRef {
    pub fn new(thread_id: u32, level: u32, session_id: u32) -> Self {
        Self {
            thread_id,
            level,
            session_id,
        }
    }

    pub fn encode(&self) -> Result<u32> {
        encode(self.thread_id, self.level, self.session_id)
    }
}

/// Pack a frame triple into one handle
pub fn encode(thread_id: u32, level: u32, session_id: u32) -> Result<u32> {
    if thread_id > MAX_THREAD {
        return Err(Error::handle_overflow("thread id", thread_id, MAX_THREAD));
    }
    if level > MAX_LEVEL {
        return Err(Error::handle_overflow("frame level", level, MAX_LEVEL));
    }
    if session_id > MAX_SESSION {
        return Err(Error::handle_overflow("session id", session_id, MAX_SESSION));
    }
    Ok(thread_id | (level << 16) | (session_id << 24))
}

/// Unpack a handle produced by [`encode`]
pub fn decode(handle: u32) -> FrameRef {
    FrameRef {
        thread_id: handle & 0xffff,
        level: (handle >> 16) & 0xff,
        session_id: handle >> 24,
    }
}

/// Unpack a host-side frame id
///
/// Host ids travel as signed integers; anything outside `u32` cannot have
/// come from [`encode`].
pub fn decode_host(frame_id: i64) -> Result<FrameRef> {
    u32::try_from(frame_id)
        .map(decode)
        .map_err(|_| Error::InvalidReference(frame_id))
}
