use serde::Serialize;

/// Effective per-core data-cache sizes in bytes
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct CacheInfo {
    /// L2 size; a shared L2 is divided by the physical cores sharing it
    pub l2: usize,
    /// L3 size; 0 when the part has no L3
    pub l3: usize,
}

/// Parse a sysfs cache `size` value ("1024K", "8M", plain bytes) into KB
pub fn parse_cache_size_kb(size_str: &str) -> u32 {
    let size_str = size_str.trim();
    if size_str.ends_with('K') {
        size_str.trim_end_matches('K').parse().unwrap_or(0)
    } else if size_str.ends_with('M') {
        size_str
            .trim_end_matches('M')
            .parse::<u32>()
            .unwrap_or(0)
            .saturating_mul(1024)
    } else {
        size_str.parse::<u32>().unwrap_or(0) / 1024
    }
}

pub fn round_up_4k(bytes: usize) -> usize {
    bytes.div_ceil(4096) * 4096
}

/// Per-core share of a cache serving `physical_sharers` physical cores,
/// rounded up to a 4 KB boundary so it stays a usable planning figure
pub fn per_core_share(total_bytes: usize, physical_sharers: usize) -> usize {
    round_up_4k(total_bytes / physical_sharers.max(1))
}

/// Architecture-keyed guess when no platform source answers.
///
/// Wider vector support correlates with larger typical cache configurations,
/// so the detected ISA tier scales the baseline.
pub fn fallback_l2_size(isa: &super::isa::IsaSupport) -> usize {
    if isa.x86_avx512 {
        1024 * 1024
    } else if isa.x86_avx {
        256 * 1024
    } else {
        64 * 1024
    }
}

#[cfg(any(target_os = "linux", target_os = "android"))]
pub mod sysfs {
    use std::fs;
    use std::path::Path;

    use super::super::topology::{Topology, parse_hex_cpu_mask};
    use super::*;

    /// Read L2/L3 sizes for a representative big core, normalized per-core
    pub fn read(topo: &Topology) -> CacheInfo {
        let core = topo.representative_big_core();
        let mut caches = CacheInfo {
            l2: read_level(core, 2, topo).unwrap_or(0),
            l3: read_level(core, 3, topo).unwrap_or(0),
        };

        if caches.l2 == 0 {
            caches.l2 = sysconf_cache_size(libc::_SC_LEVEL2_CACHE_SIZE);
        }
        if caches.l3 == 0 {
            caches.l3 = sysconf_cache_size(libc::_SC_LEVEL3_CACHE_SIZE);
        }
        caches
    }

    fn read_level(core: usize, wanted_level: u32, topo: &Topology) -> Option<usize> {
        let cache_dir = format!("/sys/devices/system/cpu/cpu{core}/cache");
        let cache_dir = Path::new(&cache_dir);
        if !cache_dir.exists() {
            return None;
        }

        for index in 0..10 {
            let index_path = cache_dir.join(format!("index{index}"));
            if !index_path.exists() {
                break;
            }

            let level = read_file_u32(&index_path.join("level")).unwrap_or(0);
            let cache_type = read_file_string(&index_path.join("type")).unwrap_or_default();
            if level != wanted_level || !matches!(cache_type.as_str(), "Data" | "Unified") {
                continue;
            }

            let size_str = read_file_string(&index_path.join("size")).unwrap_or_default();
            let size_bytes = parse_cache_size_kb(&size_str) as usize * 1024;
            if size_bytes == 0 {
                return None;
            }

            let sharers = read_file_string(&index_path.join("shared_cpu_map"))
                .and_then(|mask| parse_hex_cpu_mask(&mask))
                .map(|mask| topo.distinct_physical(&mask))
                .unwrap_or(1);
            return Some(per_core_share(size_bytes, sharers));
        }
        None
    }

    fn sysconf_cache_size(name: libc::c_int) -> usize {
        let size = unsafe { libc::sysconf(name) };
        if size > 0 { size as usize } else { 0 }
    }

    fn read_file_string(path: &Path) -> Option<String> {
        fs::read_to_string(path).ok().map(|s| s.trim().to_string())
    }

    fn read_file_u32(path: &Path) -> Option<u32> {
        read_file_string(path)?.parse().ok()
    }
}
