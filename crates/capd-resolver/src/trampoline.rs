#![allow(unsafe_code)]

//! ABI variants for the display-creation and buffer-queue entry points,
//! and the platform-string/return-value plumbing they share.
//!
//! See spec &4.1. The four display-creation variants differ only in
//! argument layout and which platform string type the callee expects; the
//! resolver (`crate::catalog`) picks one based on the probed platform
//! version, never by probing the call itself.

use std::ffi::c_void;
use std::marker::PhantomData;

/// Fixed-capacity, stack-allocated, NUL-terminated string used by the
/// older display-creation variants (A, B, C). Mirrors the inline SSO layout
/// those callees expect; constructing this from a `&str` longer than the
/// capacity truncates, matching platform behavior rather than panicking.
#[repr(C)]
pub struct PlatformStringInline {
    data: [u8; 128],
    len: u32,
}

impl PlatformStringInline {
    #[must_use]
    pub fn new(s: &str) -> Self {
        let mut data = [0u8; 128];
        let n = s.len().min(127);
        data[..n].copy_from_slice(&s.as_bytes()[..n]);
        Self { data, len: n as u32 }
    }
}

/// Standard owning string used by the newest display-creation variant (D).
/// Unlike [`PlatformStringInline`] this heap-allocates, matching the
/// owning `std::string`-shaped argument those callees expect.
#[repr(C)]
pub struct PlatformStringStd {
    // Conservative placeholder for the platform C++ runtime's short-string
    // optimized layout: capacity/size/pointer-or-inline-buffer. Real size
    // is ABI- and toolchain-specific; 32 bytes covers the common cases.
    storage: [u8; 32],
    _owned: Vec<u8>,
}

impl PlatformStringStd {
    #[must_use]
    pub fn new(s: &str) -> Self {
        let owned = s.as_bytes().to_vec();
        Self {
            storage: [0u8; 32],
            _owned: owned,
        }
    }
}

/// Local representation of the platform's smart-pointer display token.
///
/// This type is deliberately non-trivial (it implements [`Drop`]) so that
/// Rust's `extern "C"` lowering never treats it as a plain-old-data value
/// the optimizer could pass or return by register. In practice correctness
/// does not rest on that alone: every trampoline additionally passes the
/// sret slot as an explicit hidden first argument, which is what actually
/// guarantees the callee and caller agree on where the value lands (spec
/// &4.1, &9). The `Drop` impl never decrements a real reference count —
/// this core does not own a reference to the platform object, it only
/// forwards the token's bit pattern to later calls.
#[repr(C)]
pub struct DisplayTokenRaw {
    ptr: *mut c_void,
    _non_trivial: PhantomData<()>,
}

impl Drop for DisplayTokenRaw {
    fn drop(&mut self) {}
}

impl DisplayTokenRaw {
    #[must_use]
    pub fn null() -> Self {
        Self {
            ptr: std::ptr::null_mut(),
            _non_trivial: PhantomData,
        }
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        self.ptr.is_null()
    }

    #[must_use]
    pub fn raw(&self) -> *mut c_void {
        self.ptr
    }
}

/// Variant A/B: `token = fn(name, secure)`. A and B share a signature and
/// are distinguished purely by the platform-version range they resolve in.
pub type CreateDisplayVariantAB =
    unsafe extern "C" fn(out: *mut DisplayTokenRaw, name: *const PlatformStringInline, secure: bool) -> *mut DisplayTokenRaw;

/// Variant C: adds an explicit display id.
pub type CreateDisplayVariantC = unsafe extern "C" fn(
    out: *mut DisplayTokenRaw,
    name: *const PlatformStringInline,
    secure: bool,
    display_id: u64,
) -> *mut DisplayTokenRaw;

/// Variant D: owning string, exclusivity and unique-id, refresh rate.
pub type CreateDisplayVariantD = unsafe extern "C" fn(
    out: *mut DisplayTokenRaw,
    name: *const PlatformStringStd,
    secure: bool,
    exclusive: bool,
    unique_id: *const PlatformStringStd,
    refresh_rate_hz: f32,
) -> *mut DisplayTokenRaw;

/// Parameters accepted by [`crate::catalog::ResolverCatalog::create_display`],
/// matching spec &4.2's `params` record. Fields unused by the variant that
/// ends up resolving are silently ignored, per spec.
#[derive(Debug, Clone)]
pub struct CreateDisplayParams {
    pub name: String,
    pub secure: bool,
    pub display_id: u64,
    pub receive_frame_used_exclusively: bool,
    pub unique_id: String,
    pub requested_refresh_rate_hz: f32,
}

impl Default for CreateDisplayParams {
    fn default() -> Self {
        Self {
            name: String::new(),
            secure: false,
            display_id: 0,
            receive_frame_used_exclusively: true,
            unique_id: String::new(),
            requested_refresh_rate_hz: 60.0,
        }
    }
}

/// Invokes the resolved entry point for one of the four display-creation
/// ABI variants, performing the argument marshalling appropriate to that
/// variant.
///
/// # Safety
/// `entry` must be a valid function pointer of the shape implied by
/// `variant`, resolved from a library that is still mapped.
pub unsafe fn call_create_display(
    entry: *const c_void,
    variant: CreateDisplayVariant,
    params: &CreateDisplayParams,
) -> DisplayTokenRaw {
    let mut out = DisplayTokenRaw::null();
    match variant {
        CreateDisplayVariant::A | CreateDisplayVariant::B => {
            let f: CreateDisplayVariantAB = std::mem::transmute(entry);
            let name = PlatformStringInline::new(&params.name);
            f(&mut out, &name, params.secure);
        }
        CreateDisplayVariant::C => {
            let f: CreateDisplayVariantC = std::mem::transmute(entry);
            let name = PlatformStringInline::new(&params.name);
            f(&mut out, &name, params.secure, params.display_id);
        }
        CreateDisplayVariant::D => {
            let f: CreateDisplayVariantD = std::mem::transmute(entry);
            let name = PlatformStringStd::new(&params.name);
            let unique_id = PlatformStringStd::new(&params.unique_id);
            f(
                &mut out,
                &name,
                params.secure,
                params.receive_frame_used_exclusively,
                &unique_id,
                params.requested_refresh_rate_hz,
            );
        }
    }
    out
}

/// Which ABI variant a resolved `create_display` entry point implements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateDisplayVariant {
    A,
    B,
    C,
    D,
}

/// `BufferQueue::create` has two variants distinguished by mangled suffix:
/// the older one takes no allocator argument, the newer one does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferQueueVariant {
    NoAllocator,
    WithAllocator,
}

pub type CreateBufferQueueNoAllocator =
    unsafe extern "C" fn(producer_out: *mut *mut c_void, consumer_out: *mut *mut c_void);

pub type CreateBufferQueueWithAllocator = unsafe extern "C" fn(
    producer_out: *mut *mut c_void,
    consumer_out: *mut *mut c_void,
    allocator: bool,
);

/// # Safety
/// `entry` must be a valid function pointer of the shape implied by
/// `variant`, resolved from a library that is still mapped.
pub unsafe fn call_create_buffer_queue(
    entry: *const c_void,
    variant: BufferQueueVariant,
) -> (*mut c_void, *mut c_void) {
    let mut producer = std::ptr::null_mut();
    let mut consumer = std::ptr::null_mut();
    match variant {
        BufferQueueVariant::NoAllocator => {
            let f: CreateBufferQueueNoAllocator = std::mem::transmute(entry);
            f(&mut producer, &mut consumer);
        }
        BufferQueueVariant::WithAllocator => {
            let f: CreateBufferQueueWithAllocator = std::mem::transmute(entry);
            f(&mut producer, &mut consumer, true);
        }
    }
    (producer, consumer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inline_string_truncates_rather_than_panics() {
        let long = "x".repeat(500);
        let s = PlatformStringInline::new(&long);
        assert_eq!(s.len, 127);
    }

    #[test]
    fn null_token_round_trips() {
        let t = DisplayTokenRaw::null();
        assert!(t.is_null());
    }
}
