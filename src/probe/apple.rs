use std::ffi::CString;

use crate::cpuset::CpuSet;
use crate::error::{CorescanError, Result};

use super::cache::{self, CacheInfo};
use super::identity::CpuIdentity;
use super::isa::IsaSupport;
use super::topology::{self, Topology};
use super::SystemProbe;

/// Probe backed by the `hw.*` sysctl namespace and Mach thread policies
pub struct AppleProbe;

impl SystemProbe for AppleProbe {
    fn topology(&self) -> Topology {
        let logical = sysctl_usize("hw.ncpu")
            .unwrap_or_else(topology::fallback_logical_count)
            .max(1);
        let physical = sysctl_usize("hw.physicalcpu_max")
            .unwrap_or(logical)
            .clamp(1, logical);

        let mut topo = Topology::symmetric(logical);
        topo.physical = physical;

        // Intel parts number HT siblings adjacently; pair them up
        if logical == physical * 2 {
            topo.core_group = (0..logical).map(|core| core / 2).collect();
            topo.smt = CpuSet::all_up_to(logical);
        }

        // perflevel0 is the performance tier, perflevel1 the efficiency tier;
        // the scheduler numbers efficiency cores first
        let perf = sysctl_usize("hw.perflevel0.logicalcpu_max");
        let efficiency = sysctl_usize("hw.perflevel1.logicalcpu_max");
        if let (Some(perf), Some(efficiency)) = (perf, efficiency)
            && perf > 0
            && efficiency > 0
            && perf + efficiency == logical
        {
            topo.little = (0..efficiency).collect();
            topo.big = (efficiency..logical).collect();
        }

        topo
    }

    fn isa(&self, _topo: &Topology) -> IsaSupport {
        #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
        {
            super::isa::detect_x86()
        }
        #[cfg(target_arch = "aarch64")]
        {
            detect_aarch64_sysctl()
        }
        #[cfg(not(any(target_arch = "x86", target_arch = "x86_64", target_arch = "aarch64")))]
        {
            IsaSupport::default()
        }
    }

    fn caches(&self, _topo: &Topology, isa: &IsaSupport) -> CacheInfo {
        let l2 = sysctl_usize("hw.perflevel0.l2cachesize")
            .map(|size| {
                let sharers = sysctl_usize("hw.perflevel0.cpusperl2").unwrap_or(1);
                cache::per_core_share(size, sharers)
            })
            .or_else(|| sysctl_usize("hw.l2cachesize"))
            .unwrap_or_else(|| cache::fallback_l2_size(isa));

        // one system-level cache value; not divided
        let l3 = sysctl_usize("hw.l3cachesize").unwrap_or(0);

        CacheInfo { l2, l3 }
    }

    fn identity(&self) -> CpuIdentity {
        CpuIdentity::read()
    }

    fn set_thread_affinity(&self, set: &CpuSet) -> Result<()> {
        // Advisory only: modern Apple kernels may ignore affinity tags. The
        // tag is derived from the lowest requested core so distinct masks
        // still land in distinct scheduling groups.
        let Some(core) = set.first() else {
            return Err(CorescanError::affinity("empty affinity mask"));
        };
        set_affinity_tag(core as i32 + 1)
    }

    fn thread_affinity(&self) -> Option<CpuSet> {
        None
    }
}

/// Apply a Mach THREAD_AFFINITY_POLICY tag to the calling thread
pub fn set_affinity_tag(tag: i32) -> Result<()> {
    #[repr(C)]
    struct ThreadAffinityPolicy {
        affinity_tag: libc::integer_t,
    }
    const THREAD_AFFINITY_POLICY: libc::thread_policy_flavor_t = 4;

    unsafe {
        let port = libc::mach_thread_self();
        let mut policy = ThreadAffinityPolicy { affinity_tag: tag };
        let rc = libc::thread_policy_set(
            port,
            THREAD_AFFINITY_POLICY,
            &mut policy as *mut _ as libc::thread_policy_t,
            1,
        );
        if rc != libc::KERN_SUCCESS {
            return Err(CorescanError::affinity(format!(
                "thread_policy_set returned {rc}"
            )));
        }
    }
    Ok(())
}

/// AArch64 feature resolution: FEAT_* sysctl, then the cpufamily table for
/// kernels that predate the FEAT_* names, then an opcode probe
#[cfg(target_arch = "aarch64")]
fn detect_aarch64_sysctl() -> IsaSupport {
    use super::opcode::{self, aarch64 as insn};

    let family = sysctl_u32("hw.cpufamily").and_then(family_features);

    let resolve = |name: &str, from_family: Option<bool>, probe: &[u8]| -> bool {
        if let Some(value) = sysctl_u32(name) {
            return value != 0;
        }
        if let Some(known) = from_family {
            return known;
        }
        opcode::opcode_faults(probe).map(|faults| !faults).unwrap_or(false)
    };

    let mut isa = IsaSupport::default();
    // FP and ASIMD are architectural on every Apple AArch64 part
    isa.arm_neon = true;
    isa.arm_vfpv4 = true;
    isa.arm_asimdhp = resolve(
        "hw.optional.arm.FEAT_FP16",
        family.map(|f| f.asimdhp),
        &insn::ASIMDHP_FADD,
    );
    isa.arm_asimddp = resolve(
        "hw.optional.arm.FEAT_DotProd",
        family.map(|f| f.asimddp),
        &insn::ASIMDDP_SDOT,
    );
    isa.arm_asimdfhm = resolve(
        "hw.optional.arm.FEAT_FHM",
        family.map(|f| f.asimdfhm),
        &insn::ASIMDFHM_FMLAL,
    );
    isa.arm_bf16 = resolve(
        "hw.optional.arm.FEAT_BF16",
        family.map(|f| f.bf16),
        &insn::BF16_BFMMLA,
    );
    isa.arm_i8mm = resolve(
        "hw.optional.arm.FEAT_I8MM",
        family.map(|f| f.i8mm),
        &insn::I8MM_SMMLA,
    );
    isa
}

/// Feature set of a known `hw.cpufamily` SoC generation
#[cfg(any(target_arch = "aarch64", test))]
#[derive(Debug, Clone, Copy)]
struct FamilyFeatures {
    asimdhp: bool,
    asimddp: bool,
    asimdfhm: bool,
    bf16: bool,
    i8mm: bool,
}

#[cfg(any(target_arch = "aarch64", test))]
fn family_features(family: u32) -> Option<FamilyFeatures> {
    match family {
        // A12 (Vortex/Tempest)
        0x07d3_4b9f => Some(FamilyFeatures {
            asimdhp: true,
            asimddp: true,
            asimdfhm: false,
            bf16: false,
            i8mm: false,
        }),
        // A13 (Lightning/Thunder), A14/M1 (Firestorm/Icestorm)
        0x4625_04d2 | 0x1b58_8bb3 => Some(FamilyFeatures {
            asimdhp: true,
            asimddp: true,
            asimdfhm: true,
            bf16: false,
            i8mm: false,
        }),
        // A15/M2 (Avalanche/Blizzard), A16 (Everest/Sawtooth), M3 (Coll)
        0xda33_d83d | 0x8765_edea | 0x2876_f5b5 => Some(FamilyFeatures {
            asimdhp: true,
            asimddp: true,
            asimdfhm: true,
            bf16: true,
            i8mm: true,
        }),
        _ => None,
    }
}

/// Integer sysctl read, `None` when the name is unknown or zero-sized
pub fn sysctl_usize(name: &str) -> Option<usize> {
    let cname = CString::new(name).ok()?;
    let mut value: u64 = 0;
    let mut len = size_of::<u64>() as libc::size_t;
    let rc = unsafe {
        libc::sysctlbyname(
            cname.as_ptr(),
            &mut value as *mut _ as *mut libc::c_void,
            &mut len,
            std::ptr::null_mut(),
            0,
        )
    };
    if rc != 0 {
        return None;
    }
    // 4-byte results land in the low half on little-endian Apple targets
    Some(value as usize)
}

pub fn sysctl_u32(name: &str) -> Option<u32> {
    sysctl_usize(name).map(|value| value as u32)
}

/// String sysctl read (two-call protocol: size, then contents)
pub fn sysctl_string(name: &str) -> Option<String> {
    let cname = CString::new(name).ok()?;
    let mut len: libc::size_t = 0;
    let rc = unsafe {
        libc::sysctlbyname(
            cname.as_ptr(),
            std::ptr::null_mut(),
            &mut len,
            std::ptr::null_mut(),
            0,
        )
    };
    if rc != 0 || len == 0 {
        return None;
    }

    let mut buf = vec![0u8; len];
    let rc = unsafe {
        libc::sysctlbyname(
            cname.as_ptr(),
            buf.as_mut_ptr() as *mut libc::c_void,
            &mut len,
            std::ptr::null_mut(),
            0,
        )
    };
    if rc != 0 {
        return None;
    }
    buf.truncate(len.saturating_sub(1)); // drop the NUL
    String::from_utf8(buf).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn family_table_lookups() {
        let m1 = family_features(0x1b58_8bb3).unwrap();
        assert!(m1.asimddp);
        assert!(m1.asimdfhm);
        assert!(!m1.i8mm);

        let m2 = family_features(0xda33_d83d).unwrap();
        assert!(m2.bf16);
        assert!(m2.i8mm);

        assert!(family_features(0xdead_beef).is_none());
    }

    #[test]
    fn probe_end_to_end() {
        let probe = AppleProbe;
        let topo = probe.topology();
        assert!(topo.logical >= 1);
        assert!(topo.physical <= topo.logical);
        if topo.little.is_empty() {
            assert_eq!(topo.big.num_enabled(), topo.logical);
        } else {
            assert_eq!(
                topo.little.num_enabled() + topo.big.num_enabled(),
                topo.logical
            );
        }

        let isa = probe.isa(&topo);
        let caches = probe.caches(&topo, &isa);
        assert!(caches.l2 > 0);
    }
}
