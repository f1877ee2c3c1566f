//! Bundle layouts for virtual and predefined heaps.

use alloc::vec::Vec;
use fw_platform::VirtualRegion;
use fw_platform::memory::{
    DCACHE_LINE_SIZE, DEFAULT_CONFIG_ALLOCATORS_COUNT, MAX_MEMORY_ALLOCATORS_COUNT, PAGE_SIZE,
    align_down, is_page_aligned,
};

/// `count` blocks of `block_size` bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BundleConfig {
    pub block_size: usize,
    pub count: usize,
}

impl BundleConfig {
    #[must_use]
    pub const fn new(block_size: usize, count: usize) -> Self {
        Self { block_size, count }
    }

    /// Bytes covered. Only meaningful for a validated layout.
    #[must_use]
    pub const fn size(&self) -> usize {
        self.block_size * self.count
    }

    /// [`size`](Self::size), or `None` if it does not fit a `usize`.
    #[must_use]
    pub const fn checked_size(&self) -> Option<usize> {
        self.block_size.checked_mul(self.count)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("no bundles configured")]
    Empty,
    #[error("{0} bundles exceed the bundle limit")]
    TooManyBundles(usize),
    #[error("block size {0} is not a power of two")]
    NotPowerOfTwo(usize),
    #[error("block size {0} is not a multiple of the cache line")]
    NotCacheAligned(usize),
    #[error("block size {0} does not grow over its predecessor")]
    NotIncreasing(usize),
    #[error("bundle of {0}-byte blocks has no blocks")]
    EmptyBundle(usize),
    #[error("bundles end at offset {0:#x}, which is not page aligned")]
    UnalignedBundle(usize),
    #[error("bundles need {required:#x} bytes, region holds {available:#x}")]
    TooLarge { required: usize, available: usize },
}

const KB: usize = 1024;

/// Per-core buffer layout of the virtual buffer heaps, 1 MiB in total.
pub const STATIC_CORE_BUFFERS: [BundleConfig; 9] = [
    BundleConfig::new(128, 32),
    BundleConfig::new(512, 8),
    BundleConfig::new(KB, 44),
    BundleConfig::new(2 * KB, 8),
    BundleConfig::new(4 * KB, 11),
    BundleConfig::new(8 * KB, 10),
    BundleConfig::new(64 * KB, 3),
    BundleConfig::new(128 * KB, 1),
    BundleConfig::new(512 * KB, 1),
];

/// Layout of one virtual heap: bundles in strictly increasing block size.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VmHeapConfig {
    bundles: Vec<BundleConfig>,
}

impl VmHeapConfig {
    #[must_use]
    pub fn new(bundles: &[BundleConfig]) -> Self {
        Self {
            bundles: bundles.to_vec(),
        }
    }

    /// Five bundles of 64..1024-byte blocks, each taking a page-aligned
    /// fifth of `region`.
    #[must_use]
    pub fn default_for(region: &VirtualRegion) -> Self {
        let bundle_bytes = align_down(region.size / DEFAULT_CONFIG_ALLOCATORS_COUNT, PAGE_SIZE);
        let bundles = (0..DEFAULT_CONFIG_ALLOCATORS_COUNT)
            .map(|i| {
                let block_size = DCACHE_LINE_SIZE << i;
                BundleConfig::new(block_size, bundle_bytes / block_size)
            })
            .collect();
        Self { bundles }
    }

    #[must_use]
    pub fn static_core_buffers() -> Self {
        Self::new(&STATIC_CORE_BUFFERS)
    }

    #[must_use]
    pub fn bundles(&self) -> &[BundleConfig] {
        &self.bundles
    }

    #[must_use]
    pub fn total_size(&self) -> usize {
        self.bundles.iter().map(BundleConfig::size).sum()
    }

    /// Check the layout against a region of `available` bytes.
    ///
    /// # Errors
    /// The first rule the layout breaks.
    pub fn validate(&self, available: usize) -> Result<(), ConfigError> {
        if self.bundles.is_empty() {
            return Err(ConfigError::Empty);
        }
        if self.bundles.len() > MAX_MEMORY_ALLOCATORS_COUNT {
            return Err(ConfigError::TooManyBundles(self.bundles.len()));
        }
        let mut offset = 0usize;
        let mut previous = 0usize;
        for b in &self.bundles {
            if !b.block_size.is_power_of_two() {
                return Err(ConfigError::NotPowerOfTwo(b.block_size));
            }
            if b.block_size <= previous {
                return Err(ConfigError::NotIncreasing(b.block_size));
            }
            if b.count == 0 {
                return Err(ConfigError::EmptyBundle(b.block_size));
            }
            offset = b
                .checked_size()
                .and_then(|s| offset.checked_add(s))
                .ok_or(ConfigError::TooLarge {
                    required: usize::MAX,
                    available,
                })?;
            if !is_page_aligned(offset) {
                return Err(ConfigError::UnalignedBundle(offset));
            }
            previous = b.block_size;
        }
        if offset > available {
            return Err(ConfigError::TooLarge {
                required: offset,
                available,
            });
        }
        Ok(())
    }
}

/// Bundle tables for the predefined-bundles heaps.
///
/// Block sizes are cache line multiples, not necessarily powers of two.
pub mod predefined {
    use super::{BundleConfig, ConfigError, KB};
    use fw_platform::memory::DCACHE_LINE_SIZE;

    const COUNT64: usize = 128;
    const COUNT128: usize = 128;
    const COUNT256: usize = 96;
    const COUNT512: usize = 8;
    const COUNT1024: usize = 4;
    const COUNT2048: usize = 2;
    const COUNT4096: usize = 1;

    /// Module pool multiplier.
    const RT_TIMES: usize = 5;
    /// Runtime shared pool multiplier.
    const RT_SHARED_TIMES: usize = 4;

    // system runtime pools, primary core (0) and secondary cores (x)
    const SYS_RT_0_COUNT64: usize = 128;
    const SYS_RT_0_COUNT512: usize = 16;
    const SYS_RT_0_COUNT1024: usize = 4;
    const SYS_RT_X_COUNT64: usize = 64;
    const SYS_RT_X_COUNT512: usize = 8;
    const SYS_RT_X_COUNT1024: usize = 4;

    const SUM64: usize =
        COUNT64 * RT_TIMES + COUNT64 * RT_SHARED_TIMES + SYS_RT_X_COUNT64 + SYS_RT_0_COUNT64;
    const SUM128: usize = COUNT128 * (RT_TIMES + RT_SHARED_TIMES);
    const SUM256: usize = COUNT256 * (RT_TIMES + RT_SHARED_TIMES);
    const SUM512: usize = SYS_RT_0_COUNT512 + SYS_RT_X_COUNT512 + COUNT512 * (RT_TIMES + RT_SHARED_TIMES);
    const SUM1024: usize =
        SYS_RT_0_COUNT1024 + SYS_RT_X_COUNT1024 + COUNT1024 * (RT_TIMES + RT_SHARED_TIMES);
    const SUM2048: usize = COUNT2048 * RT_TIMES;
    const SUM4096: usize = COUNT4096 * RT_TIMES;

    /// High-power memory buffers.
    pub const HP_BUFFERS: [BundleConfig; 9] = [
        BundleConfig::new(64, SUM64),
        BundleConfig::new(128, SUM128),
        BundleConfig::new(256, SUM256),
        BundleConfig::new(512, SUM512),
        BundleConfig::new(KB, SUM1024),
        BundleConfig::new(2 * KB, SUM2048),
        BundleConfig::new(4 * KB, SUM4096 + 32),
        BundleConfig::new(8 * KB, 4),
        BundleConfig::new(32 * KB, 3),
    ];

    /// Low-power memory buffers.
    pub const LP_BUFFERS: [BundleConfig; 5] = [
        BundleConfig::new(128, 8),
        BundleConfig::new(1536, 2),
        BundleConfig::new(3 * KB, 3),
        BundleConfig::new(5 * KB, 1),
        BundleConfig::new(38 * KB, 1),
    ];

    /// Total bytes of a table.
    #[must_use]
    pub fn total_size(table: &[BundleConfig]) -> usize {
        table.iter().map(BundleConfig::size).sum()
    }

    /// Cache-line multiples in strictly increasing order, fitting `available`.
    ///
    /// # Errors
    /// The first rule the table breaks.
    pub fn validate(table: &[BundleConfig], available: usize) -> Result<(), ConfigError> {
        if table.is_empty() {
            return Err(ConfigError::Empty);
        }
        let mut previous = 0;
        for b in table {
            if b.block_size == 0 || !b.block_size.is_multiple_of(DCACHE_LINE_SIZE) {
                return Err(ConfigError::NotCacheAligned(b.block_size));
            }
            if b.block_size <= previous {
                return Err(ConfigError::NotIncreasing(b.block_size));
            }
            if b.count == 0 {
                return Err(ConfigError::EmptyBundle(b.block_size));
            }
            previous = b.block_size;
        }
        let required = table
            .iter()
            .try_fold(0usize, |acc, b| acc.checked_add(b.checked_size()?))
            .unwrap_or(usize::MAX);
        if required > available {
            return Err(ConfigError::TooLarge {
                required,
                available,
            });
        }
        Ok(())
    }

    const _: () = {
        assert!(SUM64 == 1344);
        assert!(SUM128 == 1152);
        assert!(SUM256 == 864);
        assert!(SUM512 == 96);
        assert!(SUM1024 == 44);
    };
}
