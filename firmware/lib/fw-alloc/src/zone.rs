//! Logical memory zones, request flags and backend capabilities.

/// Logical pool a request is made from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemZone {
    /// Firmware core structures. Exhaustion halts the core.
    System,
    SystemRuntime,
    Runtime,
    /// Data buffers.
    Buffer,
    RuntimeShared,
    SystemShared,
}

impl MemZone {
    /// Zones whose memory is used through the data cache.
    #[must_use]
    pub const fn is_cached(self) -> bool {
        matches!(
            self,
            Self::System | Self::SystemRuntime | Self::Runtime | Self::Buffer
        )
    }

    #[must_use]
    pub const fn as_set(self) -> ZoneSet {
        match self {
            Self::System => ZoneSet::SYSTEM,
            Self::SystemRuntime => ZoneSet::SYSTEM_RUNTIME,
            Self::Runtime => ZoneSet::RUNTIME,
            Self::Buffer => ZoneSet::BUFFER,
            Self::RuntimeShared => ZoneSet::RUNTIME_SHARED,
            Self::SystemShared => ZoneSet::SYSTEM_SHARED,
        }
    }
}

bitflags::bitflags! {
    /// Zones a backend serves.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ZoneSet: u8 {
        const SYSTEM = 1 << 0;
        const SYSTEM_RUNTIME = 1 << 1;
        const RUNTIME = 1 << 2;
        const BUFFER = 1 << 3;
        const RUNTIME_SHARED = 1 << 4;
        const SYSTEM_SHARED = 1 << 5;

        const CACHED = Self::SYSTEM.bits()
            | Self::SYSTEM_RUNTIME.bits()
            | Self::RUNTIME.bits()
            | Self::BUFFER.bits();
        const SHARED = Self::RUNTIME_SHARED.bits() | Self::SYSTEM_SHARED.bits();
    }
}

impl ZoneSet {
    #[must_use]
    pub const fn serves(self, zone: MemZone) -> bool {
        self.contains(zone.as_set())
    }
}

bitflags::bitflags! {
    /// Per-request modifiers.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct MemFlags: u32 {
        /// Return the uncached alias.
        const COHERENT = 1 << 0;
        /// Memory for user-mode threads.
        const USER = 1 << 1;
        /// Reallocation skips copying the old contents.
        const NO_COPY = 1 << 2;
    }
}

bitflags::bitflags! {
    /// Physical properties a backend provides.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct MemCaps: u32 {
        const RAM = 1 << 0;
        const L3 = 1 << 1;
        const DMA = 1 << 2;
        /// High-power SRAM.
        const HP = 1 << 3;
        /// Low-power SRAM.
        const LP = 1 << 4;
    }
}
