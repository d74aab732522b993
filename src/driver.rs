// Frame driver - acquire, record, submit, present, advance
//
// The driver owns the per-frame bookkeeping (ring index, image ownership,
// pending recreation) and drives any FrameGpu through one tick at a time. All
// GPU work goes through the trait, so the sequencing here runs the same against
// the Vulkan backend and against a scripted fake.

use crate::backend::sync::{ImageOwnership, MAX_FRAMES_IN_FLIGHT};
use crate::error::{RenderError, RenderResult};
use crate::overlay::OverlayProducer;

/// Result of asking the swapchain for an image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquire {
    /// Image ready to render into; a suboptimal image is still usable
    Image { index: usize, suboptimal: bool },
    /// The chain no longer matches the surface
    OutOfDate,
}

/// Result of handing an image to the presentation engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Present {
    Done,
    /// Out of date or suboptimal, the chain should be rebuilt
    Stale,
}

/// GPU operations the driver sequences
///
/// `slot` is always in `0..MAX_FRAMES_IN_FLIGHT`; `image` is always below the
/// image count reported by the last `recreate` (or at construction).
pub trait FrameGpu {
    /// Block until the slot's last submission has finished
    fn wait_for_slot(&mut self, slot: usize) -> RenderResult<()>;

    /// Acquire the next image, signaling the slot's "available" semaphore
    fn acquire_image(&mut self, slot: usize) -> RenderResult<Acquire>;

    /// Record the scene and overlay command buffers for `image`
    fn record(&mut self, image: usize, overlay: &mut dyn OverlayProducer) -> RenderResult<()>;

    /// Unsignal the slot's fence ahead of a submission
    fn reset_slot(&mut self, slot: usize) -> RenderResult<()>;

    /// Submit both of the image's command buffers in one batch fenced by `slot`
    fn submit(&mut self, slot: usize, image: usize) -> RenderResult<()>;

    fn wait_idle(&mut self) -> RenderResult<()>;

    /// Present `image` once the slot's "finished" semaphore signals
    fn present(&mut self, slot: usize, image: usize) -> RenderResult<Present>;

    /// Rebuild the chain and everything sized by it, returning the new image count
    fn recreate(&mut self) -> RenderResult<usize>;

    fn image_count(&self) -> usize;
}

/// Why a tick ended without presenting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    StaleOnAcquire,
    StaleOnPresent,
    /// A recreation failed and will be retried next tick
    RecreatePending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Presented { slot: usize, image: usize },
    Skipped(SkipReason),
}

/// Per-frame state owned by the driver
#[derive(Debug)]
struct FrameState {
    current_frame: usize,
    ownership: ImageOwnership,
    pending_recreate: bool,
    acquired_image: Option<usize>,
}

pub struct FrameDriver {
    state: FrameState,
}

impl FrameDriver {
    pub fn new(image_count: usize) -> Self {
        Self {
            state: FrameState {
                current_frame: 0,
                ownership: ImageOwnership::new(image_count),
                pending_recreate: false,
                acquired_image: None,
            },
        }
    }

    /// Slot the next tick will use
    pub fn current_frame(&self) -> usize {
        self.state.current_frame
    }

    /// Most recently acquired image, cleared when the chain is rebuilt
    pub fn acquired_image(&self) -> Option<usize> {
        self.state.acquired_image
    }

    pub fn image_count(&self) -> usize {
        self.state.ownership.len()
    }

    pub fn recreate_pending(&self) -> bool {
        self.state.pending_recreate
    }

    /// Rebuild the chain at the start of the next tick
    pub fn request_recreate(&mut self) {
        self.state.pending_recreate = true;
    }

    /// Run one frame.
    ///
    /// Stale chains and failed recreations skip the frame and leave the ring
    /// index where it was. Any other error is fatal to the frame loop.
    pub fn tick(
        &mut self,
        gpu: &mut dyn FrameGpu,
        overlay: &mut dyn OverlayProducer,
    ) -> RenderResult<TickOutcome> {
        if self.state.pending_recreate && !self.recreate(gpu)? {
            return Ok(TickOutcome::Skipped(SkipReason::RecreatePending));
        }

        let slot = self.state.current_frame;

        // Step 1: wait for this slot's previous submission
        gpu.wait_for_slot(slot)?;

        // Step 2: acquire
        let image = match gpu.acquire_image(slot)? {
            Acquire::Image { index, suboptimal } => {
                if suboptimal {
                    log::debug!("Acquired suboptimal image {}", index);
                }
                index
            }
            Acquire::OutOfDate => {
                log::info!("Swapchain out of date on acquire, recreating");
                self.recreate(gpu)?;
                return Ok(TickOutcome::Skipped(SkipReason::StaleOnAcquire));
            }
        };

        if image >= self.state.ownership.len() {
            return Err(RenderError::Presentation(format!(
                "Acquired image {} outside a chain of {}",
                image,
                self.state.ownership.len()
            )));
        }

        // Step 3: the image may still be in use by another slot's submission
        if let Some(owner) = self.state.ownership.owner(image) {
            if owner != slot {
                log::debug!("Image {} still owned by slot {}, waiting", image, owner);
                gpu.wait_for_slot(owner)?;
            }
        }
        self.state.ownership.claim(image, slot);
        self.state.acquired_image = Some(image);

        // Step 4: record scene + overlay
        gpu.record(image, overlay)?;

        // Step 5: submit
        gpu.reset_slot(slot)?;
        gpu.submit(slot, image)?;
        gpu.wait_idle()?;

        // Step 6: present
        if gpu.present(slot, image)? == Present::Stale {
            log::info!("Swapchain stale on present, recreating");
            self.recreate(gpu)?;
            return Ok(TickOutcome::Skipped(SkipReason::StaleOnPresent));
        }

        // Step 7: advance
        self.state.current_frame = (slot + 1) % MAX_FRAMES_IN_FLIGHT;

        log::trace!("Presented image {} from slot {}", image, slot);
        Ok(TickOutcome::Presented { slot, image })
    }

    /// Rebuild now. `Ok(false)` means a recoverable failure, retried next tick.
    pub fn recreate(&mut self, gpu: &mut dyn FrameGpu) -> RenderResult<bool> {
        match gpu.recreate() {
            Ok(image_count) => {
                // The device is idle, nothing owns any image any more
                self.state.ownership.reset(image_count);
                self.state.acquired_image = None;
                self.state.pending_recreate = false;
                Ok(true)
            }
            Err(e) if !e.is_fatal() => {
                log::warn!("{}; retrying next frame", e);
                self.state.pending_recreate = true;
                Ok(false)
            }
            Err(e) => {
                log::error!("{}", e);
                Err(e)
            }
        }
    }

    /// Drain all in-flight work before the backend is torn down
    pub fn shutdown(&mut self, gpu: &mut dyn FrameGpu) -> RenderResult<()> {
        log::info!("Waiting for in-flight frames before shutdown");
        gpu.wait_idle()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::overlay::NoOverlay;
    use std::collections::VecDeque;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Op {
        Wait(usize),
        Acquire(usize),
        Record(usize),
        Reset(usize),
        Submit(usize, usize),
        WaitIdle,
        Present(usize, usize),
        Recreate,
    }

    #[derive(Debug, Clone, Copy)]
    struct Fence {
        signaled: bool,
        observed: bool,
    }

    /// Scripted GPU: hands out images round-robin and models fence state
    struct FakeGpu {
        ops: Vec<Op>,
        image_count: usize,
        next_image: usize,
        acquire_calls: usize,
        present_calls: usize,
        stale_acquires: Vec<usize>,
        stale_presents: Vec<usize>,
        failing_acquire: Option<usize>,
        recreate_results: VecDeque<RenderResult<usize>>,
        fences: [Fence; MAX_FRAMES_IN_FLIGHT],
        fence_violations: usize,
    }

    impl FakeGpu {
        fn new(image_count: usize) -> Self {
            Self {
                ops: Vec::new(),
                image_count,
                next_image: 0,
                acquire_calls: 0,
                present_calls: 0,
                stale_acquires: Vec::new(),
                stale_presents: Vec::new(),
                failing_acquire: None,
                recreate_results: VecDeque::new(),
                fences: [Fence {
                    signaled: true,
                    observed: false,
                }; MAX_FRAMES_IN_FLIGHT],
                fence_violations: 0,
            }
        }

        fn count(&self, op: fn(&Op) -> bool) -> usize {
            self.ops.iter().filter(|o| op(o)).count()
        }

        fn presents(&self) -> usize {
            self.count(|o| matches!(o, Op::Present(..)))
        }

        fn recreates(&self) -> usize {
            self.count(|o| matches!(o, Op::Recreate))
        }
    }

    impl FrameGpu for FakeGpu {
        fn wait_for_slot(&mut self, slot: usize) -> RenderResult<()> {
            self.ops.push(Op::Wait(slot));
            // Blocking until the work completes
            self.fences[slot] = Fence {
                signaled: true,
                observed: true,
            };
            Ok(())
        }

        fn acquire_image(&mut self, slot: usize) -> RenderResult<Acquire> {
            self.ops.push(Op::Acquire(slot));
            let call = self.acquire_calls;
            self.acquire_calls += 1;

            if self.failing_acquire == Some(call) {
                return Err(RenderError::Presentation("device lost".into()));
            }
            if self.stale_acquires.contains(&call) {
                return Ok(Acquire::OutOfDate);
            }

            let index = self.next_image % self.image_count;
            self.next_image += 1;
            Ok(Acquire::Image {
                index,
                suboptimal: false,
            })
        }

        fn record(&mut self, image: usize, _overlay: &mut dyn OverlayProducer) -> RenderResult<()> {
            self.ops.push(Op::Record(image));
            Ok(())
        }

        fn reset_slot(&mut self, slot: usize) -> RenderResult<()> {
            self.ops.push(Op::Reset(slot));
            if !self.fences[slot].observed {
                self.fence_violations += 1;
            }
            self.fences[slot] = Fence {
                signaled: false,
                observed: false,
            };
            Ok(())
        }

        fn submit(&mut self, slot: usize, image: usize) -> RenderResult<()> {
            self.ops.push(Op::Submit(slot, image));
            if self.fences[slot].signaled {
                self.fence_violations += 1;
            }
            Ok(())
        }

        fn wait_idle(&mut self) -> RenderResult<()> {
            self.ops.push(Op::WaitIdle);
            for fence in &mut self.fences {
                fence.signaled = true;
            }
            Ok(())
        }

        fn present(&mut self, slot: usize, image: usize) -> RenderResult<Present> {
            self.ops.push(Op::Present(slot, image));
            let call = self.present_calls;
            self.present_calls += 1;
            if self.stale_presents.contains(&call) {
                Ok(Present::Stale)
            } else {
                Ok(Present::Done)
            }
        }

        fn recreate(&mut self) -> RenderResult<usize> {
            self.ops.push(Op::Recreate);
            let result = self
                .recreate_results
                .pop_front()
                .unwrap_or(Ok(self.image_count));
            if let Ok(count) = result {
                self.image_count = count;
                self.next_image = 0;
            }
            result
        }

        fn image_count(&self) -> usize {
            self.image_count
        }
    }

    fn setup(image_count: usize) -> (FrameDriver, FakeGpu) {
        (FrameDriver::new(image_count), FakeGpu::new(image_count))
    }

    #[test]
    fn five_ticks_cycle_slots_over_two_images() {
        let (mut driver, mut gpu) = setup(2);
        let mut slots = Vec::new();

        for tick in 0..5 {
            assert_eq!(driver.current_frame(), tick % MAX_FRAMES_IN_FLIGHT);
            slots.push(driver.current_frame());

            let outcome = driver.tick(&mut gpu, &mut NoOverlay).unwrap();
            assert_eq!(
                outcome,
                TickOutcome::Presented {
                    slot: tick % MAX_FRAMES_IN_FLIGHT,
                    image: tick % 2
                }
            );
        }

        assert_eq!(slots, vec![0, 1, 2, 0, 1]);
        assert_eq!(gpu.presents(), 5);
        assert_eq!(gpu.recreates(), 0);
        assert_eq!(gpu.fence_violations, 0);
    }

    #[test]
    fn tick_runs_steps_in_order() {
        let (mut driver, mut gpu) = setup(3);
        driver.tick(&mut gpu, &mut NoOverlay).unwrap();

        assert_eq!(
            gpu.ops,
            vec![
                Op::Wait(0),
                Op::Acquire(0),
                Op::Record(0),
                Op::Reset(0),
                Op::Submit(0, 0),
                Op::WaitIdle,
                Op::Present(0, 0),
            ]
        );
        assert_eq!(driver.acquired_image(), Some(0));
    }

    #[test]
    fn stale_acquire_recreates_once_and_skips_the_tick() {
        let (mut driver, mut gpu) = setup(2);
        gpu.stale_acquires.push(3);

        for _ in 0..3 {
            driver.tick(&mut gpu, &mut NoOverlay).unwrap();
        }
        assert_eq!(driver.current_frame(), 0);

        let before = gpu.ops.len();
        let outcome = driver.tick(&mut gpu, &mut NoOverlay).unwrap();
        assert_eq!(outcome, TickOutcome::Skipped(SkipReason::StaleOnAcquire));
        assert_eq!(gpu.ops[before..], [Op::Wait(0), Op::Acquire(0), Op::Recreate]);
        assert_eq!(gpu.recreates(), 1);
        assert_eq!(gpu.presents(), 3);
        assert_eq!(driver.current_frame(), 0);
        assert_eq!(driver.acquired_image(), None);

        // The next tick picks up where the skipped one left off
        let outcome = driver.tick(&mut gpu, &mut NoOverlay).unwrap();
        assert_eq!(outcome, TickOutcome::Presented { slot: 0, image: 0 });
        assert_eq!(driver.current_frame(), 1);
        assert_eq!(gpu.recreates(), 1);
        assert_eq!(gpu.fence_violations, 0);
    }

    #[test]
    fn image_owned_by_another_slot_is_waited_on_before_recording() {
        let (mut driver, mut gpu) = setup(2);

        // Slot 0 renders image 0, slot 1 renders image 1
        driver.tick(&mut gpu, &mut NoOverlay).unwrap();
        driver.tick(&mut gpu, &mut NoOverlay).unwrap();

        // Slot 2 gets image 0 back while slot 0 still owns it
        let before = gpu.ops.len();
        driver.tick(&mut gpu, &mut NoOverlay).unwrap();
        assert_eq!(
            gpu.ops[before..before + 4],
            [Op::Wait(2), Op::Acquire(2), Op::Wait(0), Op::Record(0)]
        );
    }

    #[test]
    fn image_owned_by_the_same_slot_needs_no_extra_wait() {
        let (mut driver, mut gpu) = setup(3);

        for _ in 0..3 {
            driver.tick(&mut gpu, &mut NoOverlay).unwrap();
        }

        // Slot 0 acquires image 0 again, which it already owns
        let before = gpu.ops.len();
        driver.tick(&mut gpu, &mut NoOverlay).unwrap();
        assert_eq!(
            gpu.ops[before..before + 3],
            [Op::Wait(0), Op::Acquire(0), Op::Record(0)]
        );
    }

    #[test]
    fn fences_are_never_reused_before_their_signal_is_seen() {
        let (mut driver, mut gpu) = setup(2);
        gpu.stale_acquires.extend([2, 7]);
        gpu.stale_presents.push(4);

        for _ in 0..20 {
            driver.tick(&mut gpu, &mut NoOverlay).unwrap();
        }

        assert_eq!(gpu.fence_violations, 0);
        assert_eq!(gpu.recreates(), 3);
    }

    #[test]
    fn recreate_resizes_ownership_and_keeps_the_index() {
        let (mut driver, mut gpu) = setup(2);
        driver.tick(&mut gpu, &mut NoOverlay).unwrap();
        driver.tick(&mut gpu, &mut NoOverlay).unwrap();
        assert_eq!(driver.current_frame(), 2);

        gpu.recreate_results.push_back(Ok(4));
        driver.request_recreate();
        assert!(driver.recreate_pending());

        let outcome = driver.tick(&mut gpu, &mut NoOverlay).unwrap();
        assert_eq!(outcome, TickOutcome::Presented { slot: 2, image: 0 });
        assert_eq!(driver.image_count(), 4);
        assert!(!driver.recreate_pending());
        assert_eq!(driver.current_frame(), 0);

        // Ownership starts empty on the new chain: no wait on another slot
        let tail = &gpu.ops[gpu.ops.len() - 7..];
        assert_eq!(tail[..3], [Op::Wait(2), Op::Acquire(2), Op::Record(0)]);
    }

    #[test]
    fn failed_recreation_is_retried_on_following_ticks() {
        let (mut driver, mut gpu) = setup(2);
        gpu.stale_acquires.push(0);
        gpu.recreate_results.extend([
            Err(RenderError::Swapchain("zero area".into())),
            Err(RenderError::Swapchain("zero area".into())),
            Ok(2),
        ]);

        let outcome = driver.tick(&mut gpu, &mut NoOverlay).unwrap();
        assert_eq!(outcome, TickOutcome::Skipped(SkipReason::StaleOnAcquire));
        assert!(driver.recreate_pending());

        let before = gpu.ops.len();
        let outcome = driver.tick(&mut gpu, &mut NoOverlay).unwrap();
        assert_eq!(outcome, TickOutcome::Skipped(SkipReason::RecreatePending));
        assert_eq!(gpu.ops[before..], [Op::Recreate]);

        let outcome = driver.tick(&mut gpu, &mut NoOverlay).unwrap();
        assert_eq!(outcome, TickOutcome::Presented { slot: 0, image: 0 });
        assert!(!driver.recreate_pending());
        assert_eq!(gpu.recreates(), 3);
    }

    #[test]
    fn stale_present_recreates_without_advancing() {
        let (mut driver, mut gpu) = setup(2);
        gpu.stale_presents.push(1);

        driver.tick(&mut gpu, &mut NoOverlay).unwrap();
        let outcome = driver.tick(&mut gpu, &mut NoOverlay).unwrap();

        assert_eq!(outcome, TickOutcome::Skipped(SkipReason::StaleOnPresent));
        assert_eq!(gpu.ops.last(), Some(&Op::Recreate));
        assert_eq!(driver.current_frame(), 1);

        let outcome = driver.tick(&mut gpu, &mut NoOverlay).unwrap();
        assert_eq!(outcome, TickOutcome::Presented { slot: 1, image: 0 });
    }

    #[test]
    fn fatal_acquire_error_ends_the_loop() {
        let (mut driver, mut gpu) = setup(2);
        gpu.failing_acquire = Some(1);

        driver.tick(&mut gpu, &mut NoOverlay).unwrap();
        let err = driver.tick(&mut gpu, &mut NoOverlay).unwrap_err();

        assert!(err.is_fatal());
        assert_eq!(gpu.count(|o| matches!(o, Op::Submit(..))), 1);
        assert_eq!(driver.current_frame(), 1);
    }

    #[test]
    fn fatal_recreation_error_propagates() {
        let (mut driver, mut gpu) = setup(2);
        gpu.stale_acquires.push(0);
        gpu.recreate_results
            .push_back(Err(RenderError::ResourceBuild("missing shader".into())));

        let err = driver.tick(&mut gpu, &mut NoOverlay).unwrap_err();
        assert!(matches!(err, RenderError::ResourceBuild(_)));
    }

    #[test]
    fn shutdown_drains_the_device() {
        let (mut driver, mut gpu) = setup(2);
        driver.tick(&mut gpu, &mut NoOverlay).unwrap();
        driver.shutdown(&mut gpu).unwrap();
        assert_eq!(gpu.ops.last(), Some(&Op::WaitIdle));
    }
}
