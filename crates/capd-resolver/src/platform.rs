use std::fmt;

/// An ordinal platform version, oldest supported release first.
///
/// The core never needs to know the real marketing version; it only needs a
/// total order so that ABI variant ranges (`[min_platform, max_platform]`)
/// can be compared. `PlatformProbe` is responsible for mapping whatever the
/// host actually reports into one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PlatformVersion(pub u32);

impl PlatformVersion {
    /// Oldest platform release this core still supports (scenario 1).
    pub const OLDEST_SUPPORTED: Self = Self(29);
    /// Newest platform release this core has variants for (scenario 2).
    pub const NEWEST_SUPPORTED: Self = Self(34);
}

impl fmt::Display for PlatformVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

bitflags::bitflags! {
    /// Capability facts derived from the probed platform version.
    ///
    /// This is intentionally a closed, stable set: callers branch on
    /// capability, never on the raw version number, so that adding a new
    /// platform release only touches `PlatformProbe::probe`.
    #[derive(Default)]
    pub struct Capability: u32 {
        /// The texture-consumer constructor symbol (4.3) is expected to be
        /// resolvable; its absence still degrades gracefully at runtime.
        const FULL_TEXTURE_CONSUMER = 0b0000_0001;
        /// Native GPU fence-sync objects, exportable as an fd, are available.
        const NATIVE_FENCE_SYNC = 0b0000_0010;
        /// `BufferQueue::create` takes the extra allocator boolean.
        const BUFFER_QUEUE_ALLOCATOR_ARG = 0b0000_0100;
        /// Display creation variant D (named args + refresh rate) exists.
        const CREATE_DISPLAY_VARIANT_D = 0b0000_1000;
    }
}

/// Detects the running platform's version and derives its capability set.
///
/// In production this inspects whatever host-provided version property the
/// platform exposes (outside this core's contract, see spec &6); tests and
/// the simulated backend construct a `PlatformProbe` directly from a known
/// version instead.
pub struct PlatformProbe {
    version: PlatformVersion,
    capabilities: Capability,
}

impl PlatformProbe {
    #[must_use]
    pub fn from_version(version: PlatformVersion) -> Self {
        let mut capabilities = Capability::empty();
        if version >= PlatformVersion(30) {
            capabilities |= Capability::FULL_TEXTURE_CONSUMER;
        }
        if version >= PlatformVersion(31) {
            capabilities |= Capability::NATIVE_FENCE_SYNC;
        }
        if version >= PlatformVersion(29) {
            capabilities |= Capability::BUFFER_QUEUE_ALLOCATOR_ARG;
        }
        if version >= PlatformVersion(33) {
            capabilities |= Capability::CREATE_DISPLAY_VARIANT_D;
        }
        Self { version, capabilities }
    }

    #[must_use]
    pub fn version(&self) -> PlatformVersion {
        self.version
    }

    #[must_use]
    pub fn capabilities(&self) -> Capability {
        self.capabilities
    }

    #[must_use]
    pub fn has(&self, cap: Capability) -> bool {
        self.capabilities.contains(cap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oldest_supported_has_no_variant_d() {
        let probe = PlatformProbe::from_version(PlatformVersion::OLDEST_SUPPORTED);
        assert!(!probe.has(Capability::CREATE_DISPLAY_VARIANT_D));
        assert!(!probe.has(Capability::FULL_TEXTURE_CONSUMER));
    }

    #[test]
    fn newest_supported_has_everything() {
        let probe = PlatformProbe::from_version(PlatformVersion::NEWEST_SUPPORTED);
        assert!(probe.has(Capability::CREATE_DISPLAY_VARIANT_D));
        assert!(probe.has(Capability::FULL_TEXTURE_CONSUMER));
        assert!(probe.has(Capability::NATIVE_FENCE_SYNC));
    }

    #[test]
    fn ordering_is_total() {
        assert!(PlatformVersion(29) < PlatformVersion(30));
        assert!(PlatformVersion::OLDEST_SUPPORTED < PlatformVersion::NEWEST_SUPPORTED);
    }
}
