// Deferred destruction keyed by frame counter rather than Vulkan timeline
// point.
//
// Grounded on `deletion_queue.rs::DeletionQueue`, which schedules drops
// against the device's graphics timeline semaphore. The resource manager's
// tombstoning ("deferred destruction keyed by a frame
// counter vs. the device's completed-frame counter") needs the same
// "queue per future point, release everything at or before the point"
// shape, but against the presenter's frame counter rather than a
// semaphore value, since a resource can be scheduled for deletion well
// before any Vulkan submission exists to attach a timeline wait to. Kept
// as its own small type (`ResourceGraveyard`) instead of reusing
// `DeletionQueue` directly, since the two differ in exactly that one
// dimension (see DESIGN.md).

use crate::id::Id;
use crate::resources::ResourceObject;

struct FramePointQueue {
    frame: u64,
    items: Vec<(Id, ResourceObject)>,
}

pub struct ResourceGraveyard {
    last_completed: u64,
    queues: Vec<FramePointQueue>,
}

impl ResourceGraveyard {
    pub fn new() -> Self {
        Self {
            last_completed: 0,
            queues: Vec::new(),
        }
    }

    /// Schedules `object` for destruction once `frame` is known complete.
    /// If `frame` has already completed, it is handed straight back so the
    /// caller can destroy it immediately instead of losing the handle.
    pub fn schedule_drop_at_frame(&mut self, id: Id, object: ResourceObject, frame: u64) -> Option<(Id, ResourceObject)> {
        if frame <= self.last_completed {
            return Some((id, object));
        }
        if let Some(q) = self.queues.iter_mut().find(|q| q.frame == frame) {
            q.items.push((id, object));
        } else {
            self.queues.push(FramePointQueue { frame, items: vec![(id, object)] });
        }
        None
    }

    /// Marks `frame` (and everything before it) complete, draining and
    /// returning every item now safe to destroy.
    pub fn drain_completed(&mut self, frame: u64) -> Vec<(Id, ResourceObject)> {
        self.last_completed = frame;
        let mut drained = Vec::new();
        self.queues.retain_mut(|q| {
            if q.frame <= frame {
                drained.append(&mut q.items);
                false
            } else {
                true
            }
        });
        drained
    }
}
