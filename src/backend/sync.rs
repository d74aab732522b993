// Synchronization primitives
//
// Fences and semaphores for CPU-GPU and GPU-GPU sync, one set per frame slot,
// plus the image ownership table that keeps two slots off the same image.

use ash::vk;
use std::sync::Arc;

use super::DeviceContext;
use crate::error::{RenderResult, ResultExt};

/// Number of frames the CPU may record ahead of the GPU
pub const MAX_FRAMES_IN_FLIGHT: usize = 3;

/// Frame synchronization - one per frame slot
pub struct FrameSync {
    /// Signaled by acquire, waited on by the submission
    pub image_available: vk::Semaphore,
    /// Signaled by the submission, waited on by present
    pub render_finished: vk::Semaphore,
    /// Signaled when the slot's submission completes
    pub in_flight: vk::Fence,
}

impl FrameSync {
    fn new(device: &ash::Device) -> RenderResult<Self> {
        let semaphore_info = vk::SemaphoreCreateInfo::default();
        // Start signaled so the first wait on a fresh slot returns at once
        let fence_info = vk::FenceCreateInfo::default().flags(vk::FenceCreateFlags::SIGNALED);

        unsafe {
            let image_available = device
                .create_semaphore(&semaphore_info, None)
                .initialization("Failed to create semaphore")?;
            let render_finished = match device.create_semaphore(&semaphore_info, None) {
                Ok(semaphore) => semaphore,
                Err(e) => {
                    device.destroy_semaphore(image_available, None);
                    return Err(e).initialization("Failed to create semaphore");
                }
            };
            let in_flight = match device.create_fence(&fence_info, None) {
                Ok(fence) => fence,
                Err(e) => {
                    device.destroy_semaphore(image_available, None);
                    device.destroy_semaphore(render_finished, None);
                    return Err(e).initialization("Failed to create fence");
                }
            };

            Ok(Self {
                image_available,
                render_finished,
                in_flight,
            })
        }
    }

    fn destroy(&self, device: &ash::Device) {
        unsafe {
            device.destroy_semaphore(self.image_available, None);
            device.destroy_semaphore(self.render_finished, None);
            device.destroy_fence(self.in_flight, None);
        }
    }
}

/// The fixed ring of frame slots
pub struct FrameSlots {
    slots: Vec<FrameSync>,
    context: Arc<DeviceContext>,
}

impl FrameSlots {
    pub fn new(context: Arc<DeviceContext>) -> RenderResult<Self> {
        let mut slots = Self {
            slots: Vec::with_capacity(MAX_FRAMES_IN_FLIGHT),
            context,
        };
        for _ in 0..MAX_FRAMES_IN_FLIGHT {
            let sync = FrameSync::new(&slots.context.device)?;
            slots.slots.push(sync);
        }
        log::debug!("Created {} frame slots", MAX_FRAMES_IN_FLIGHT);
        Ok(slots)
    }

    pub fn slot(&self, index: usize) -> &FrameSync {
        &self.slots[index]
    }

    /// Block until the slot's last submission has completed
    pub fn wait(&self, index: usize) -> RenderResult<()> {
        unsafe {
            self.context
                .device
                .wait_for_fences(&[self.slots[index].in_flight], true, u64::MAX)
        }
        .presentation("Failed to wait for frame fence")
    }

    /// Return the slot's fence to unsignaled ahead of a new submission
    pub fn reset(&self, index: usize) -> RenderResult<()> {
        unsafe {
            self.context
                .device
                .reset_fences(&[self.slots[index].in_flight])
        }
        .presentation("Failed to reset frame fence")
    }
}

impl Drop for FrameSlots {
    fn drop(&mut self) {
        for sync in &self.slots {
            sync.destroy(&self.context.device);
        }
    }
}

/// Which frame slot last submitted work that renders into each swapchain image
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageOwnership {
    owners: Vec<Option<usize>>,
}

impl ImageOwnership {
    pub fn new(image_count: usize) -> Self {
        Self {
            owners: vec![None; image_count],
        }
    }

    /// Record `slot` as the owner of `image`, returning the previous owner
    pub fn claim(&mut self, image: usize, slot: usize) -> Option<usize> {
        self.owners[image].replace(slot)
    }

    pub fn owner(&self, image: usize) -> Option<usize> {
        self.owners[image]
    }

    /// Forget every owner and resize to a rebuilt chain
    pub fn reset(&mut self, image_count: usize) {
        self.owners.clear();
        self.owners.resize(image_count, None);
    }

    pub fn len(&self) -> usize {
        self.owners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_table_has_no_owners() {
        let ownership = ImageOwnership::new(3);
        assert_eq!(ownership.len(), 3);
        assert!((0..3).all(|i| ownership.owner(i).is_none()));
    }

    #[test]
    fn claim_returns_previous_owner() {
        let mut ownership = ImageOwnership::new(2);
        assert_eq!(ownership.claim(1, 0), None);
        assert_eq!(ownership.claim(1, 2), Some(0));
        assert_eq!(ownership.owner(1), Some(2));
        assert_eq!(ownership.owner(0), None);
    }

    #[test]
    fn reset_clears_and_resizes() {
        let mut ownership = ImageOwnership::new(2);
        ownership.claim(0, 1);
        ownership.reset(4);
        assert_eq!(ownership.len(), 4);
        assert!((0..4).all(|i| ownership.owner(i).is_none()));

        ownership.reset(0);
        assert!(ownership.is_empty());
    }
}
