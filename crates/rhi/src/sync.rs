//! Semaphores, fences and the per-slot bundle the presentation surface cycles
//! through.
//!
//! A frame slot is reused every [`MAX_FRAMES_IN_FLIGHT`] frames. Before the
//! CPU touches anything owned by a slot (its command buffer, uniform buffers,
//! descriptor sets) it waits on that slot's in-flight fence:
//!
//! ```text
//! wait(in_flight) -> acquire(image_available) -> record
//!   -> reset(in_flight) -> submit(wait image_available, signal render_finished, in_flight)
//!   -> present(wait render_finished)
//! ```

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::device::Device;
use crate::error::RhiResult;

/// Number of frames the CPU may record ahead of the GPU.
pub const MAX_FRAMES_IN_FLIGHT: usize = 2;

/// Frame slot used for the `frame`-th frame since start.
#[inline]
pub fn slot_for_frame(frame: u64) -> usize {
    (frame % MAX_FRAMES_IN_FLIGHT as u64) as usize
}

/// Owned binary semaphore (GPU to GPU).
pub struct Semaphore {
    device: Arc<Device>,
    semaphore: vk::Semaphore,
}

impl Semaphore {
    pub fn new(device: Arc<Device>) -> RhiResult<Self> {
        let create_info = vk::SemaphoreCreateInfo::default();
        let semaphore = unsafe { device.handle().create_semaphore(&create_info, None)? };
        Ok(Self { device, semaphore })
    }

    #[inline]
    pub fn handle(&self) -> vk::Semaphore {
        self.semaphore
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_semaphore(self.semaphore, None);
        }
    }
}

/// Owned fence (GPU to CPU).
pub struct Fence {
    device: Arc<Device>,
    fence: vk::Fence,
}

impl Fence {
    /// `signaled` fences let the first wait on a fresh slot return at once.
    pub fn new(device: Arc<Device>, signaled: bool) -> RhiResult<Self> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let create_info = vk::FenceCreateInfo::default().flags(flags);
        let fence = unsafe { device.handle().create_fence(&create_info, None)? };
        Ok(Self { device, fence })
    }

    #[inline]
    pub fn handle(&self) -> vk::Fence {
        self.fence
    }

    /// Blocks until signaled. `timeout` is in nanoseconds.
    pub fn wait(&self, timeout: u64) -> RhiResult<()> {
        unsafe {
            self.device
                .handle()
                .wait_for_fences(std::slice::from_ref(&self.fence), true, timeout)?
        };
        Ok(())
    }

    /// Must not be called while a pending submission still references it.
    pub fn reset(&self) -> RhiResult<()> {
        unsafe {
            self.device
                .handle()
                .reset_fences(std::slice::from_ref(&self.fence))?
        };
        Ok(())
    }

    pub fn is_signaled(&self) -> bool {
        let result = unsafe { self.device.handle().get_fence_status(self.fence) };
        matches!(result, Ok(true))
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_fence(self.fence, None);
        }
    }
}

/// Synchronization objects of one frame slot.
pub struct FrameSync {
    image_available: Semaphore,
    render_finished: Semaphore,
    in_flight: Fence,
}

impl FrameSync {
    /// The in-flight fence starts signaled.
    pub fn new(device: Arc<Device>) -> RhiResult<Self> {
        let image_available = Semaphore::new(device.clone())?;
        let render_finished = Semaphore::new(device.clone())?;
        let in_flight = Fence::new(device, true)?;

        debug!("Created frame slot synchronization");

        Ok(Self {
            image_available,
            render_finished,
            in_flight,
        })
    }

    /// Signaled by image acquisition, waited on by the frame's submission.
    #[inline]
    pub fn image_available(&self) -> vk::Semaphore {
        self.image_available.handle()
    }

    /// Signaled by the frame's submission, waited on by presentation.
    #[inline]
    pub fn render_finished(&self) -> vk::Semaphore {
        self.render_finished.handle()
    }

    #[inline]
    pub fn in_flight(&self) -> &Fence {
        &self.in_flight
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slots_alternate() {
        let slots: Vec<usize> = (0..5).map(slot_for_frame).collect();
        assert_eq!(slots, vec![0, 1, 0, 1, 0]);
    }

    #[test]
    fn test_slot_is_always_in_range() {
        for frame in [0, 1, 7, u64::MAX] {
            assert!(slot_for_frame(frame) < MAX_FRAMES_IN_FLIGHT);
        }
    }

    #[test]
    fn test_sync_objects_are_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Semaphore>();
        assert_send_sync::<Fence>();
        assert_send_sync::<FrameSync>();
    }
}
