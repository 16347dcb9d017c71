//! AArch64 Main ID Register decoding.
//!
//! Used for one diagnostic only: is the calling thread currently scheduled on
//! a known efficiency core? Benchmark hosts use the answer to explain run-to-
//! run variance on big.LITTLE parts.

/// Implementer field, bits [31:24]
pub fn midr_implementer(midr: u64) -> u32 {
    ((midr >> 24) & 0xff) as u32
}

/// Part number field, bits [15:4]
pub fn midr_part(midr: u64) -> u32 {
    ((midr >> 4) & 0xfff) as u32
}

/// Lookup known low-efficiency core parts by implementer and part number
pub fn is_efficiency_part(implementer: u32, part: u32) -> bool {
    match implementer {
        // ARM Ltd: Cortex-A35, A53, A55
        0x41 => matches!(part, 0xd04 | 0xd03 | 0xd05),
        // Qualcomm: Kryo 2xx/3xx/4xx Silver (A53/A55 derivatives)
        0x51 => matches!(part, 0x801 | 0x803 | 0x805),
        _ => false,
    }
}

/// Parse a sysfs `midr_el1` value (hex, with or without 0x prefix)
pub fn parse_midr(text: &str) -> Option<u64> {
    let text = text.trim();
    let text = text.strip_prefix("0x").unwrap_or(text);
    u64::from_str_radix(text, 16).ok()
}

/// Reassemble a MIDR from the per-core `/proc/cpuinfo` block for `core`.
///
/// Blocks are keyed by `processor :` boundaries; only the implementer and
/// part fields matter here, the variant/revision fields are left zero.
pub fn midr_from_cpuinfo(cpuinfo: &str, core: usize) -> Option<u64> {
    let mut current: Option<usize> = None;
    let mut implementer: Option<u64> = None;
    let mut part: Option<u64> = None;

    for line in cpuinfo.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim();
        let value = value.trim();

        match key {
            "processor" => {
                if current == Some(core) {
                    break; // left the block of interest
                }
                current = value.parse().ok();
            }
            "CPU implementer" if current == Some(core) => {
                implementer = parse_hex_field(value);
            }
            "CPU part" if current == Some(core) => {
                part = parse_hex_field(value);
            }
            _ => {}
        }
    }

    match (implementer, part) {
        (Some(implementer), Some(part)) => Some((implementer << 24) | (part << 4)),
        _ => None,
    }
}

fn parse_hex_field(value: &str) -> Option<u64> {
    let value = value.strip_prefix("0x").unwrap_or(value);
    u64::from_str_radix(value, 16).ok()
}

/// Logical core the calling thread is currently scheduled on
#[cfg(any(target_os = "linux", target_os = "android"))]
pub fn current_core() -> Option<usize> {
    let cpu = unsafe { libc::sched_getcpu() };
    usize::try_from(cpu).ok()
}

/// MIDR of `core`, from sysfs (kernel >= 4.7) or /proc/cpuinfo
#[cfg(any(target_os = "linux", target_os = "android"))]
pub fn midr_of_core(core: usize) -> Option<u64> {
    let sysfs = format!("/sys/devices/system/cpu/cpu{core}/regs/identification/midr_el1");
    if let Ok(text) = std::fs::read_to_string(&sysfs)
        && let Some(midr) = parse_midr(&text)
    {
        return Some(midr);
    }

    let cpuinfo = std::fs::read_to_string("/proc/cpuinfo").ok()?;
    midr_from_cpuinfo(&cpuinfo, core)
}
