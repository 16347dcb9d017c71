pub mod cache;
pub mod hwcap;
pub mod identity;
pub mod isa;
pub mod midr;
pub mod opcode;
pub mod topology;

#[cfg(any(target_os = "linux", target_os = "android"))]
mod linux;
#[cfg(any(target_os = "macos", target_os = "ios"))]
pub mod apple;
#[cfg(windows)]
mod windows;
#[cfg(not(any(
    target_os = "linux",
    target_os = "android",
    target_os = "macos",
    target_os = "ios",
    windows
)))]
mod generic;

pub use cache::CacheInfo;
pub use identity::CpuIdentity;
pub use isa::IsaSupport;
pub use topology::Topology;

use std::sync::OnceLock;

use crate::cpuset::CpuSet;
use crate::error::Result;

/// Per-platform probing strategy.
///
/// One implementation exists per OS family; `platform()` selects it at build
/// time. Everything except the two affinity operations is free of side
/// effects beyond file and API reads.
pub trait SystemProbe: Send + Sync {
    fn topology(&self) -> Topology;
    fn isa(&self, topo: &Topology) -> IsaSupport;
    fn caches(&self, topo: &Topology, isa: &IsaSupport) -> CacheInfo;
    fn identity(&self) -> CpuIdentity;
    fn set_thread_affinity(&self, set: &CpuSet) -> Result<()>;
    fn thread_affinity(&self) -> Option<CpuSet>;
}

/// The probe for the build target
pub fn platform() -> &'static dyn SystemProbe {
    #[cfg(any(target_os = "linux", target_os = "android"))]
    {
        static PROBE: linux::LinuxProbe = linux::LinuxProbe;
        &PROBE
    }
    #[cfg(any(target_os = "macos", target_os = "ios"))]
    {
        static PROBE: apple::AppleProbe = apple::AppleProbe;
        &PROBE
    }
    #[cfg(windows)]
    {
        static PROBE: windows::WindowsProbe = windows::WindowsProbe;
        &PROBE
    }
    #[cfg(not(any(
        target_os = "linux",
        target_os = "android",
        target_os = "macos",
        target_os = "ios",
        windows
    )))]
    {
        static PROBE: generic::GenericProbe = generic::GenericProbe;
        &PROBE
    }
}

/// Everything discovered at initialization, immutable afterwards
#[derive(Debug, Clone)]
pub struct CpuInfo {
    pub topology: Topology,
    pub isa: IsaSupport,
    pub caches: CacheInfo,
    pub identity: CpuIdentity,
}

static CPU_INFO: OnceLock<CpuInfo> = OnceLock::new();

/// Get the cached probe results (detection runs once per process).
///
/// Cache discovery consumes the topology to map shared caches onto physical
/// cores, so the probers run in a fixed order.
pub fn cpu_info() -> &'static CpuInfo {
    CPU_INFO.get_or_init(|| {
        let probe = platform();
        let topology = probe.topology();
        let isa = probe.isa(&topology);
        let caches = probe.caches(&topology, &isa);
        let identity = probe.identity();
        log::debug!(
            "detected {} logical / {} physical cores, {} little / {} big",
            topology.logical,
            topology.physical,
            topology.little.num_enabled(),
            topology.big.num_enabled()
        );
        CpuInfo {
            topology,
            isa,
            caches,
            identity,
        }
    })
}

/// Logical core count, never less than 1
pub fn cpu_count() -> usize {
    cpu_info().topology.logical
}

/// Physical core count, never more than `cpu_count()`
pub fn physical_cpu_count() -> usize {
    cpu_info().topology.physical
}

/// Logical cores in the efficiency tier (0 on symmetric hardware)
pub fn little_cpu_count() -> usize {
    cpu_info().topology.little.num_enabled()
}

/// Logical cores in the performance tier
pub fn big_cpu_count() -> usize {
    cpu_info().topology.big.num_enabled()
}

/// Physical cores behind the efficiency tier
pub fn physical_little_cpu_count() -> usize {
    let topo = &cpu_info().topology;
    topo.distinct_physical(&topo.little)
}

/// Physical cores behind the performance tier
pub fn physical_big_cpu_count() -> usize {
    let topo = &cpu_info().topology;
    topo.distinct_physical(&topo.big)
}

/// Effective per-core L2 data-cache size in bytes
pub fn cpu_level2_cache_size() -> usize {
    cpu_info().caches.l2
}

/// L3 cache size in bytes; 0 when the part has no L3
pub fn cpu_level3_cache_size() -> usize {
    cpu_info().caches.l3
}

/// Instruction-set extension flags
pub fn isa() -> &'static IsaSupport {
    &cpu_info().isa
}

/// Vendor and model strings for display
pub fn identity() -> &'static CpuIdentity {
    &cpu_info().identity
}

/// Is the calling thread currently scheduled on a known efficiency core?
///
/// AArch64 Linux/Android diagnostic; everywhere else the answer is false.
/// Useful for explaining performance variance on big.LITTLE parts.
#[cfg(all(any(target_os = "linux", target_os = "android"), target_arch = "aarch64"))]
pub fn is_current_thread_running_on_efficiency_core() -> bool {
    let Some(core) = midr::current_core() else {
        return false;
    };
    if let Some(value) = midr::midr_of_core(core) {
        return midr::is_efficiency_part(midr::midr_implementer(value), midr::midr_part(value));
    }
    // no MIDR source at all: assume the little tier shares one micro-arch
    cpu_info().topology.little.is_enabled(core)
}

#[cfg(not(all(any(target_os = "linux", target_os = "android"), target_arch = "aarch64")))]
pub fn is_current_thread_running_on_efficiency_core() -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_are_consistent() {
        assert!(cpu_count() >= 1);
        assert!(physical_cpu_count() >= 1);
        assert!(physical_cpu_count() <= cpu_count());
        assert!(little_cpu_count() + big_cpu_count() <= cpu_count());
        assert!(physical_little_cpu_count() <= little_cpu_count().max(1));
        assert!(physical_big_cpu_count() <= big_cpu_count());
    }

    #[test]
    fn symmetric_hardware_has_full_big_tier() {
        if little_cpu_count() == 0 {
            assert_eq!(big_cpu_count(), cpu_count());
        }
    }

    #[test]
    fn queries_are_idempotent() {
        assert_eq!(cpu_count(), cpu_count());
        assert_eq!(little_cpu_count(), little_cpu_count());
        assert_eq!(cpu_level2_cache_size(), cpu_level2_cache_size());
        assert_eq!(isa().x86_avx2, isa().x86_avx2);
        assert_eq!(
            is_current_thread_running_on_efficiency_core(),
            is_current_thread_running_on_efficiency_core()
        );
    }

    #[test]
    fn cache_sizes_are_usable() {
        // L2 always resolves, through sysfs, sysconf or the arch default
        assert!(cpu_level2_cache_size() > 0);
        // L3 may legitimately be absent
        let _ = cpu_level3_cache_size();
    }
}
