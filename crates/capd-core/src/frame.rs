//! The single public acquire/release path (spec &4.6).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use capd_compositor::TextureConsumer;
use capd_config::PipelineConfig;
use capd_gpu::{Fence, GpuContext, GpuPreprocessor, OutputBufferPool, ResizeFactor};

use crate::error::{Error, Result};
use crate::stats::StatsRecorder;

/// The only output format this spec defines (spec &3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Rgba8,
}

/// A short-lived value owned by the caller until `release_frame()`
/// (spec &3). Either fully populated or an error; never partial.
#[derive(Debug)]
pub struct FrameResult {
    pub output: ash::vk::Image,
    pub fence: Fence,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub timestamp_ns: i64,
    pub frame_number: u64,
    pub buffer_id: u32,
    pub capture_ms: f64,
    pub preprocess_ms: f64,
    pub total_ms: f64,
    /// `Some(texture_id)` when `enable_gpu_preprocess` is off: `output`
    /// and `fence` are both empty and `width`/`height` are the raw
    /// capture dimensions rather than the resized preprocessor output
    /// (spec &6).
    pub raw_texture_id: Option<u32>,
}

fn resize_factor_for(cfg: &PipelineConfig) -> ResizeFactor {
    match cfg.resolution.divisor() {
        1 => ResizeFactor::Full,
        2 => ResizeFactor::Half,
        _ => ResizeFactor::Quarter,
    }
}

/// Applies the `custom_width`/`custom_height` override to the physical
/// capture size: either dimension left at zero means "use physical"
/// (spec &6). Both must be set to take effect.
#[must_use]
pub fn effective_capture_size(cfg: &PipelineConfig, physical: (u32, u32)) -> (u32, u32) {
    if cfg.custom_width != 0 && cfg.custom_height != 0 {
        (cfg.custom_width, cfg.custom_height)
    } else {
        physical
    }
}

/// Serializes acquire/release, multi-buffers outputs, and drives the
/// texture consumer and GPU preprocessor. The only path callers use to
/// obtain a frame (spec &2).
pub struct FrameController {
    consumer: TextureConsumer,
    gpu_ctx: GpuContext,
    preprocessor: GpuPreprocessor,
    pool: OutputBufferPool,
    stats: StatsRecorder,
    config: PipelineConfig,
    capture_size: (u32, u32),
    gpu_mutex: Mutex<()>,
    initialized: AtomicBool,
}

impl FrameController {
    /// `physical_size` is the raw capture dimensions the backend settled
    /// on; `config.custom_width`/`custom_height` may override it (spec
    /// &6) before it is used to size the preprocessor's output buffers.
    pub fn new(
        consumer: TextureConsumer,
        gpu_ctx: GpuContext,
        config: PipelineConfig,
        physical_size: (u32, u32),
    ) -> Result<Self> {
        let capture_size = effective_capture_size(&config, physical_size);
        let preprocessor = GpuPreprocessor::new(&gpu_ctx)?;
        let (out_w, out_h) = resize_factor_for(&config).output_dims(capture_size.0, capture_size.1);
        let pool = OutputBufferPool::new(&gpu_ctx, out_w, out_h, config.output_buffer_count)?;

        Ok(Self {
            consumer,
            gpu_ctx,
            preprocessor,
            pool,
            stats: StatsRecorder::new(),
            config,
            capture_size,
            gpu_mutex: Mutex::new(()),
            initialized: AtomicBool::new(true),
        })
    }

    #[must_use]
    pub fn stats(&self) -> &StatsRecorder {
        &self.stats
    }

    /// Serializes GPU-context binding, drives the texture consumer,
    /// selects the next output buffer, invokes the preprocessor, and
    /// returns a [`FrameResult`]. Steps follow spec &4.6 exactly.
    pub fn acquire_frame(&self) -> Result<FrameResult> {
        if !self.initialized.load(Ordering::Acquire) {
            return Err(Error::NotInitialized);
        }
        let _mutex_guard = self.gpu_mutex.lock().unwrap();
        let overall_start = Instant::now();

        if self.consumer.is_held() {
            self.consumer.release().ok();
            self.stats.record_dropped();
        }

        let capture_start = Instant::now();
        let timeout_ms = self.config.fence_timeout_ms;
        if !self.consumer.advance_with_timeout(timeout_ms) && !self.consumer.advance_with_timeout(timeout_ms * 2) {
            return Err(Error::Timeout);
        }
        let capture_ms = capture_start.elapsed().as_secs_f64() * 1000.0;

        let guard = match self.gpu_ctx.bind() {
            Ok(guard) => guard,
            Err(e) => {
                self.consumer.release().ok();
                return Err(e.into());
            }
        };

        let timestamp_ns = self.consumer.get_timestamp();
        let transform = self.consumer.get_transform();

        let (slot_index, frame_number) = self.pool.next();

        if !self.config.enable_gpu_preprocess {
            drop(guard);
            self.stats.record_frame(capture_ms, 0.0);
            return Ok(FrameResult {
                output: ash::vk::Image::null(),
                fence: Fence::empty(),
                width: self.capture_size.0,
                height: self.capture_size.1,
                format: PixelFormat::Rgba8,
                timestamp_ns,
                frame_number,
                buffer_id: frame_number as u32,
                capture_ms,
                preprocess_ms: 0.0,
                total_ms: overall_start.elapsed().as_secs_f64() * 1000.0,
                raw_texture_id: Some(self.consumer.texture_id()),
            });
        }

        let slot = self.pool.slot(slot_index);

        let preprocess_start = Instant::now();
        let resize_factor = resize_factor_for(&self.config);
        let fence = match self.preprocessor.process(
            guard.context(),
            self.capture_size,
            transform.0,
            slot,
            resize_factor,
        ) {
            Ok(fence) => fence,
            Err(e) => {
                self.consumer.release().ok();
                return Err(e.into());
            }
        };
        let preprocess_ms = preprocess_start.elapsed().as_secs_f64() * 1000.0;

        drop(guard);
        self.stats.record_frame(capture_ms, preprocess_ms);

        Ok(FrameResult {
            output: slot.image,
            fence,
            width: slot.width,
            height: slot.height,
            format: PixelFormat::Rgba8,
            timestamp_ns,
            frame_number,
            buffer_id: frame_number as u32,
            capture_ms,
            preprocess_ms,
            total_ms: overall_start.elapsed().as_secs_f64() * 1000.0,
            raw_texture_id: None,
        })
    }

    /// Returns the consumer side to the queue. Idempotent: unknown or
    /// already-released ids succeed without effect, since the underlying
    /// `held` flag is itself CAS-guarded (spec &6).
    pub fn release_frame(&self, _buffer_id: u32) -> Result<()> {
        self.consumer.release()?;
        Ok(())
    }

    pub fn shutdown(&mut self) {
        self.initialized.store(false, Ordering::Release);
        self.pool.destroy(&self.gpu_ctx);
        self.preprocessor.destroy(&self.gpu_ctx);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resize_factor_selection_matches_resolution() {
        let mut cfg = PipelineConfig::default();
        cfg.resolution = capd_config::Resolution::Half;
        assert_eq!(resize_factor_for(&cfg), ResizeFactor::Half);
    }

    #[test]
    fn effective_capture_size_uses_physical_when_custom_dims_are_zero() {
        let cfg = PipelineConfig::default();
        assert_eq!(effective_capture_size(&cfg, (1080, 2400)), (1080, 2400));
    }

    #[test]
    fn effective_capture_size_requires_both_custom_dims_set() {
        let cfg = PipelineConfig { custom_width: 720, ..PipelineConfig::default() };
        assert_eq!(effective_capture_size(&cfg, (1080, 2400)), (1080, 2400));
    }

    #[test]
    fn effective_capture_size_overrides_when_both_custom_dims_set() {
        let cfg = PipelineConfig { custom_width: 720, custom_height: 1600, ..PipelineConfig::default() };
        assert_eq!(effective_capture_size(&cfg, (1080, 2400)), (720, 1600));
    }
}
