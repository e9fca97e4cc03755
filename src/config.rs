// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Construction-time configuration for a `DxMem` instance. A plain struct,
// not a `serde`-deserialized document: configuration here is passed as
// plain constructor arguments rather than parsed from a file, since DXMem
// is embedded directly into a host process rather than configured
// out-of-band.

/// Tuning knobs for a `DxMem` instance.
#[derive(Debug, Clone)]
pub struct DxMemConfig {
    /// Size, in bytes, of the address-space region reserved for the heap.
    /// Must not exceed 2^43 bytes (the entry word's 43-bit address field).
    pub heap_size_bytes: usize,
    /// Node id this instance issues local ids under. Distinguishes CIDs
    /// minted by different DXMem instances sharing an export/import
    /// boundary.
    pub node_id: u16,
    /// Default timeout, in milliseconds, applied to lock acquisitions that
    /// don't specify their own (`-1` = infinite, matching `Timeout::Millis`
    /// semantics inverted at the config boundary — 0 still means one-shot).
    pub default_lock_timeout_ms: i64,
    /// Fraction (0.0..=1.0) of free space below which `run_defrag_pass`
    /// considers compaction worthwhile; purely advisory, the caller decides
    /// when to actually invoke a pass.
    pub defrag_min_free_ratio: f32,
}

impl DxMemConfig {
    /// Validate the configuration, translating obviously-bad values into a
    /// construction error before a `Heap` reservation is even attempted.
    pub fn validate(&self) -> Result<(), crate::error::DxMemError> {
        if self.heap_size_bytes == 0 {
            return Err(crate::error::DxMemError::InvalidConfig(
                "heap_size_bytes must be non-zero".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.defrag_min_free_ratio) {
            return Err(crate::error::DxMemError::InvalidConfig(format!(
                "defrag_min_free_ratio {} out of range 0.0..=1.0",
                self.defrag_min_free_ratio
            )));
        }
        Ok(())
    }

    /// Convert the configured default timeout into a `lock::Timeout`.
    pub fn default_timeout(&self) -> crate::lock::Timeout {
        crate::lock::Timeout::from_millis(self.default_lock_timeout_ms)
    }
}

impl Default for DxMemConfig {
    fn default() -> Self {
        DxMemConfig {
            heap_size_bytes: 1 << 30, // 1 GiB
            node_id: 1,
            default_lock_timeout_ms: -1,
            defrag_min_free_ratio: 0.25,
        }
    }
}
