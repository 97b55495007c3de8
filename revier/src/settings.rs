/// Tunables for the region runtime.
///
/// Most users keep the defaults; the benchmark harness and tests shrink the
/// slab size to force slab churn.
#[derive(Debug, Clone)]
pub struct RegionSettings {
    /// Size in bytes of one arena slab, including the slab header.
    pub arena_slab_size: usize,
    /// Initial number of slots reserved in a region's external-reference
    /// table.
    pub external_table_capacity: usize,
}

impl Default for RegionSettings {
    fn default() -> Self {
        Self {
            arena_slab_size: 64 * 1024,
            external_table_capacity: 16,
        }
    }
}

impl RegionSettings {
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.arena_slab_size < 256 {
            return Err("arena_slab_size must be at least 256 bytes");
        }
        if !self.arena_slab_size.is_multiple_of(16) {
            return Err("arena_slab_size must be a multiple of 16");
        }
        Ok(())
    }
}
