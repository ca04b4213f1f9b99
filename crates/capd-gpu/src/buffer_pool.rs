//! A ring of output buffers rotated per `acquire_frame()` invocation
//! (spec &3, &4.6).

use std::sync::atomic::{AtomicUsize, Ordering};

use ash::vk;

use crate::context::GpuContext;
use crate::error::{Error, Result};

/// One platform buffer of the configured output dimensions, allocated
/// with the GPU-writable + sampled-image usage. Owned exclusively by the
/// pool; never resized at runtime.
pub struct BufferSlot {
    pub image: vk::Image,
    allocation: vk_mem::Allocation,
    pub width: u32,
    pub height: u32,
}

impl BufferSlot {
    fn allocate(ctx: &GpuContext, width: u32, height: u32) -> Result<Self> {
        let create_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .format(vk::Format::R8G8B8A8_UNORM)
            .extent(vk::Extent3D { width, height, depth: 1 })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(vk::ImageUsageFlags::STORAGE | vk::ImageUsageFlags::SAMPLED)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let alloc_info =
            vk_mem::AllocationCreateInfo { usage: vk_mem::MemoryUsage::GpuOnly, ..Default::default() };

        let (image, allocation, _info) = ctx
            .allocator()
            .create_image(&create_info, &alloc_info)
            .map_err(|e| Error::ResourceExhausted(e.to_string()))?;

        Ok(Self { image, allocation, width, height })
    }

    fn destroy(&mut self, ctx: &GpuContext) {
        ctx.allocator().destroy_image(self.image, &mut self.allocation);
    }
}

/// Ring of `N` (`N >= 2`) output buffers. A monotonic counter selects
/// `slot = counter mod N`; the selected slot is exclusively writable for
/// the duration of one preprocess call, then treated read-only until
/// rotation selects it again (spec &5).
pub struct OutputBufferPool {
    slots: Vec<BufferSlot>,
    counter: AtomicUsize,
}

impl OutputBufferPool {
    /// Allocates `count` slots of `width` x `height`. `count` is clamped
    /// up to the spec-mandated minimum of 2 so a misconfigured caller
    /// cannot silently reintroduce the write-after-write hazard double
    /// buffering exists to avoid.
    pub fn new(ctx: &GpuContext, width: u32, height: u32, count: u32) -> Result<Self> {
        let count = count.max(2);
        let mut slots = Vec::with_capacity(count as usize);
        for _ in 0..count {
            slots.push(BufferSlot::allocate(ctx, width, height)?);
        }
        Ok(Self { slots, counter: AtomicUsize::new(0) })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Advances the rotation counter and returns the index of the slot
    /// the next preprocess call must write to, along with the frame
    /// number (the pre-increment counter value, per spec &4.6 step 8).
    pub fn next(&self) -> (usize, u64) {
        let frame_number = self.counter.fetch_add(1, Ordering::AcqRel) as u64;
        let slot = (frame_number as usize) % self.slots.len();
        (slot, frame_number)
    }

    #[must_use]
    pub fn slot(&self, index: usize) -> &BufferSlot {
        &self.slots[index]
    }

    pub fn destroy(&mut self, ctx: &GpuContext) {
        for slot in &mut self.slots {
            slot.destroy(ctx);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rotation_cycles_through_all_slots() {
        let counter = AtomicUsize::new(0);
        let n = 2usize;
        let mut seen = Vec::new();
        for _ in 0..6 {
            let v = counter.fetch_add(1, Ordering::AcqRel);
            seen.push(v % n);
        }
        assert_eq!(seen, vec![0, 1, 0, 1, 0, 1]);
    }
}
