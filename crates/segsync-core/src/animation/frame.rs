#![forbid(unsafe_code)]

//! Render-loop abstraction.
//!
//! The host owns the frame loop (a browser's `requestAnimationFrame`, a
//! native vsync callback, a test harness). The executor only asks for "one
//! more frame" and may later cancel that request. When the host's frame
//! fires it calls back into the executor with the handle it was given, so
//! a cancelled or superseded handle is simply ignored.

use std::collections::VecDeque;

/// Opaque identifier of a requested frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FrameHandle(pub u64);

/// Host frame loop.
pub trait FrameScheduler {
    /// Request a callback on the next frame.
    fn request_frame(&mut self) -> FrameHandle;

    /// Cancel a pending request. Unknown handles are ignored.
    fn cancel_frame(&mut self, handle: FrameHandle);
}

/// Headless scheduler: records requests so a driver can fire them in order.
#[derive(Debug, Default)]
pub struct ManualFrameScheduler {
    next_id: u64,
    pending: VecDeque<FrameHandle>,
    requested_total: u64,
    cancelled_total: u64,
}

impl ManualFrameScheduler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the oldest pending frame, if any.
    pub fn next_frame(&mut self) -> Option<FrameHandle> {
        self.pending.pop_front()
    }

    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    #[must_use]
    pub fn requested_total(&self) -> u64 {
        self.requested_total
    }

    #[must_use]
    pub fn cancelled_total(&self) -> u64 {
        self.cancelled_total
    }
}

impl FrameScheduler for ManualFrameScheduler {
    fn request_frame(&mut self) -> FrameHandle {
        self.next_id += 1;
        self.requested_total += 1;
        let handle = FrameHandle(self.next_id);
        self.pending.push_back(handle);
        handle
    }

    fn cancel_frame(&mut self, handle: FrameHandle) {
        let before = self.pending.len();
        self.pending.retain(|&h| h != handle);
        if self.pending.len() != before {
            self.cancelled_total += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_fire_in_request_order() {
        let mut s = ManualFrameScheduler::new();
        let a = s.request_frame();
        let b = s.request_frame();
        assert_ne!(a, b);
        assert_eq!(s.next_frame(), Some(a));
        assert_eq!(s.next_frame(), Some(b));
        assert_eq!(s.next_frame(), None);
    }

    #[test]
    fn cancel_removes_pending_frame() {
        let mut s = ManualFrameScheduler::new();
        let a = s.request_frame();
        s.cancel_frame(a);
        s.cancel_frame(FrameHandle(999));
        assert_eq!(s.pending_len(), 0);
        assert_eq!(s.cancelled_total(), 1);
        assert_eq!(s.requested_total(), 1);
    }
}
