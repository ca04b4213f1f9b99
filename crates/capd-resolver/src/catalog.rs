#![allow(unsafe_code)]

//! Process-wide, immutable-after-init table of resolved entry points.
//!
//! Populated on first use, never mutated afterward (spec &3, &9) — the
//! natural shape is `init_on_first_use -> live until process exit`, backed
//! here by [`once_cell::sync::OnceCell`] rather than a `lazy_static!`, since
//! initialization can fail and callers need the `Result`.

use std::collections::HashMap;
use std::ffi::c_void;

use once_cell::sync::OnceCell;
use regex::Regex;

use crate::error::{Error, Result};
use crate::image::{self, LibraryImage};
use crate::platform::PlatformVersion;
use crate::scanner::SymbolScanner;
use crate::trampoline::{
    self, BufferQueueVariant, CreateDisplayParams, CreateDisplayVariant, DisplayTokenRaw,
};

/// One entry point's resolved state: its address relative to the library
/// base, the ABI variant it implements, and the platform range it is valid
/// for. The range is carried for diagnostics only — selection already
/// happened by the time this is stored.
#[derive(Clone, Copy)]
struct ResolvedCreateDisplay {
    address: usize,
    variant: CreateDisplayVariant,
}

#[derive(Clone, Copy)]
struct ResolvedBufferQueue {
    address: usize,
    variant: BufferQueueVariant,
}

struct VariantSpec<T> {
    variant: T,
    min_platform: PlatformVersion,
    max_platform: PlatformVersion,
    pattern: &'static str,
}

fn create_display_variant_table() -> [VariantSpec<CreateDisplayVariant>; 4] {
    [
        VariantSpec {
            variant: CreateDisplayVariant::D,
            min_platform: PlatformVersion(33),
            max_platform: PlatformVersion(u32::MAX),
            pattern: r".*SurfaceComposerClient.*createVirtualDisplay.*",
        },
        VariantSpec {
            variant: CreateDisplayVariant::C,
            min_platform: PlatformVersion(31),
            max_platform: PlatformVersion(32),
            pattern: r".*SurfaceComposerClient.*createDisplay.*",
        },
        VariantSpec {
            variant: CreateDisplayVariant::B,
            min_platform: PlatformVersion(30),
            max_platform: PlatformVersion(30),
            pattern: r".*SurfaceComposerClient.*createDisplay.*",
        },
        VariantSpec {
            variant: CreateDisplayVariant::A,
            min_platform: PlatformVersion(0),
            max_platform: PlatformVersion(29),
            pattern: r".*SurfaceComposerClient.*createDisplay.*",
        },
    ]
}

fn buffer_queue_variant_table() -> [VariantSpec<BufferQueueVariant>; 2] {
    [
        VariantSpec {
            variant: BufferQueueVariant::WithAllocator,
            min_platform: PlatformVersion(29),
            max_platform: PlatformVersion(u32::MAX),
            pattern: r".*BufferQueue.*createBufferQueue.*allocator.*",
        },
        VariantSpec {
            variant: BufferQueueVariant::NoAllocator,
            min_platform: PlatformVersion(0),
            max_platform: PlatformVersion(28),
            pattern: r".*BufferQueue.*createBufferQueue.*",
        },
    ]
}

/// Process-wide singleton holding every resolved entry point this core
/// needs. See spec &3 (`ResolverCatalog`).
pub struct ResolverCatalog {
    image: LibraryImage,
    platform: PlatformVersion,
    create_display: ResolvedCreateDisplay,
    buffer_queue: ResolvedBufferQueue,
    // A regex/parameter-count cache keyed by operation name; populated
    // lazily and never removed, matching the "populated once" lifecycle.
    resolved_addresses: HashMap<&'static str, usize>,
}

static CATALOG: OnceCell<ResolverCatalog> = OnceCell::new();

impl ResolverCatalog {
    /// Resolves and caches every entry point this core needs against
    /// `library_name`, for `platform`. Idempotent: subsequent calls return
    /// the already-initialized catalog without rescanning.
    pub fn init(library_name: &str, platform: PlatformVersion) -> Result<&'static Self> {
        CATALOG.get_or_try_init(|| Self::build(library_name, platform))
    }

    /// Returns the already-initialized catalog, if any.
    pub fn get() -> Option<&'static Self> {
        CATALOG.get()
    }

    fn build(library_name: &str, platform: PlatformVersion) -> Result<Self> {
        let image = image::probe(library_name)?;

        let create_display = Self::resolve_create_display(&image, platform)?;
        let buffer_queue = Self::resolve_buffer_queue(&image, platform)?;

        let mut resolved_addresses = HashMap::new();
        resolved_addresses.insert("create_display", create_display.address);
        resolved_addresses.insert("create_buffer_queue", buffer_queue.address);

        Ok(Self {
            image,
            platform,
            create_display,
            buffer_queue,
            resolved_addresses,
        })
    }

    fn resolve_create_display(
        image: &LibraryImage,
        platform: PlatformVersion,
    ) -> Result<ResolvedCreateDisplay> {
        for spec in create_display_variant_table() {
            if platform < spec.min_platform || platform > spec.max_platform {
                continue;
            }
            let pattern = Regex::new(spec.pattern).unwrap();
            if let Ok(symbol) = SymbolScanner::find_create_display_matching(image, &pattern) {
                return Ok(ResolvedCreateDisplay {
                    address: image.base + symbol.offset,
                    variant: spec.variant,
                });
            }
        }
        Err(Error::PrivateApiUnavailable {
            operation: "create_display",
            platform: platform.0,
        })
    }

    fn resolve_buffer_queue(
        image: &LibraryImage,
        platform: PlatformVersion,
    ) -> Result<ResolvedBufferQueue> {
        for spec in buffer_queue_variant_table() {
            if platform < spec.min_platform || platform > spec.max_platform {
                continue;
            }
            let pattern = Regex::new(spec.pattern).unwrap();
            if let Ok(symbols) = SymbolScanner::scan(image, &pattern) {
                if let Some(symbol) = symbols.into_iter().max_by_key(|s| s.param_count) {
                    return Ok(ResolvedBufferQueue {
                        address: image.base + symbol.offset,
                        variant: spec.variant,
                    });
                }
            }
        }
        Err(Error::PrivateApiUnavailable {
            operation: "create_buffer_queue",
            platform: platform.0,
        })
    }

    /// Returns the address resolved for `operation`. Deterministic: the
    /// catalog is immutable after init, so repeated calls for the same
    /// operation always return the same address (spec &8).
    #[must_use]
    pub fn resolve(&self, operation: &str) -> Option<usize> {
        self.resolved_addresses.get(operation).copied()
    }

    #[must_use]
    pub fn platform(&self) -> PlatformVersion {
        self.platform
    }

    #[must_use]
    pub fn image(&self) -> &LibraryImage {
        &self.image
    }

    /// Invokes the resolved `create_display` entry point with `params`.
    pub fn create_display(&self, params: &CreateDisplayParams) -> Result<DisplayTokenRaw> {
        let entry = self.create_display.address as *const c_void;
        let token =
            unsafe { trampoline::call_create_display(entry, self.create_display.variant, params) };
        if token.is_null() {
            return Err(Error::InternalError {
                operation: "create_display",
            });
        }
        Ok(token)
    }

    /// Invokes the resolved `create_buffer_queue` entry point.
    pub fn create_buffer_queue(&self) -> Result<(*mut c_void, *mut c_void)> {
        let entry = self.buffer_queue.address as *const c_void;
        let (producer, consumer) =
            unsafe { trampoline::call_create_buffer_queue(entry, self.buffer_queue.variant) };
        if producer.is_null() || consumer.is_null() {
            return Err(Error::InternalError {
                operation: "create_buffer_queue",
            });
        }
        Ok((producer, consumer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variant_ranges_cover_every_supported_platform_without_overlap_ambiguity() {
        // Every platform from OLDEST_SUPPORTED..=NEWEST_SUPPORTED must match
        // exactly one create_display variant range, checked in preference
        // order (newest-first, matching spec &4.1's "first hit wins").
        for v in PlatformVersion::OLDEST_SUPPORTED.0..=PlatformVersion::NEWEST_SUPPORTED.0 {
            let pv = PlatformVersion(v);
            let matched = create_display_variant_table()
                .into_iter()
                .find(|spec| pv >= spec.min_platform && pv <= spec.max_platform);
            assert!(matched.is_some(), "platform {v} has no matching variant");
        }
    }
}
