use crate::cpuset::CpuSet;
use crate::error::{CorescanError, Result};

use super::cache::{self, CacheInfo};
use super::identity::CpuIdentity;
use super::isa::IsaSupport;
use super::topology::{self, Topology};
use super::SystemProbe;

/// Probe backed by /proc, sysfs and the sched_*affinity syscalls
pub struct LinuxProbe;

impl SystemProbe for LinuxProbe {
    fn topology(&self) -> Topology {
        topology::sysfs::detect()
    }

    fn isa(&self, _topo: &Topology) -> IsaSupport {
        #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
        {
            super::isa::detect_x86()
        }
        #[cfg(target_arch = "aarch64")]
        {
            super::isa::detect_aarch64_linux()
        }
        #[cfg(target_arch = "arm")]
        {
            super::isa::detect_arm_linux()
        }
        #[cfg(any(target_arch = "mips", target_arch = "mips64"))]
        {
            super::isa::detect_mips_linux()
        }
        #[cfg(target_arch = "loongarch64")]
        {
            super::isa::detect_loongarch_linux()
        }
        #[cfg(target_arch = "riscv64")]
        {
            super::isa::detect_riscv_linux()
        }
        #[cfg(not(any(
            target_arch = "x86",
            target_arch = "x86_64",
            target_arch = "aarch64",
            target_arch = "arm",
            target_arch = "mips",
            target_arch = "mips64",
            target_arch = "loongarch64",
            target_arch = "riscv64"
        )))]
        {
            IsaSupport::default()
        }
    }

    fn caches(&self, topo: &Topology, isa: &IsaSupport) -> CacheInfo {
        let mut caches = cache::sysfs::read(topo);
        if caches.l2 == 0 {
            log::debug!("no sysfs or sysconf cache size, using architecture default");
            caches.l2 = cache::fallback_l2_size(isa);
        }
        caches
    }

    fn identity(&self) -> CpuIdentity {
        CpuIdentity::read()
    }

    fn set_thread_affinity(&self, set: &CpuSet) -> Result<()> {
        let native = to_cpu_set_t(set);
        let rc = unsafe {
            libc::sched_setaffinity(0, size_of::<libc::cpu_set_t>(), &native)
        };
        if rc != 0 {
            return Err(CorescanError::affinity_os("sched_setaffinity"));
        }
        Ok(())
    }

    fn thread_affinity(&self) -> Option<CpuSet> {
        let mut native: libc::cpu_set_t = unsafe { std::mem::zeroed() };
        let rc = unsafe {
            libc::sched_getaffinity(0, size_of::<libc::cpu_set_t>(), &mut native)
        };
        if rc != 0 {
            return None;
        }
        Some(from_cpu_set_t(&native))
    }
}

fn to_cpu_set_t(set: &CpuSet) -> libc::cpu_set_t {
    let mut native: libc::cpu_set_t = unsafe { std::mem::zeroed() };
    for core in set.iter().take(libc::CPU_SETSIZE as usize) {
        unsafe { libc::CPU_SET(core, &mut native) };
    }
    native
}

fn from_cpu_set_t(native: &libc::cpu_set_t) -> CpuSet {
    let mut set = CpuSet::new();
    for core in 0..libc::CPU_SETSIZE as usize {
        if unsafe { libc::CPU_ISSET(core, native) } {
            set.enable(core);
        }
    }
    set
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cpu_set_t_roundtrip() {
        let set: CpuSet = [0, 2, 5].into_iter().collect();
        let native = to_cpu_set_t(&set);
        assert_eq!(from_cpu_set_t(&native), set);
    }

    #[test]
    fn probe_end_to_end() {
        let probe = LinuxProbe;
        let topo = probe.topology();
        assert!(topo.logical >= 1);
        assert!(topo.physical >= 1);
        assert!(topo.physical <= topo.logical);
        assert_eq!(topo.all.num_enabled(), topo.logical);
        assert!(topo.little.num_enabled() + topo.big.num_enabled() <= topo.logical);
        if topo.little.is_empty() {
            assert_eq!(topo.big.num_enabled(), topo.logical);
        }

        let isa = probe.isa(&topo);
        let caches = probe.caches(&topo, &isa);
        assert!(caches.l2 > 0);
    }
}
