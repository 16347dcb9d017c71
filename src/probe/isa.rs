use serde::Serialize;

/// Per-extension support flags across the five architecture families.
///
/// Populated once during initialization and read-only afterwards. A flag is
/// only true when the probe positively confirmed the extension; every
/// unknown/unreachable combination stays false.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IsaSupport {
    // x86
    pub x86_sse3: bool,
    pub x86_ssse3: bool,
    pub x86_sse41: bool,
    pub x86_sse42: bool,
    pub x86_avx: bool,
    pub x86_avx2: bool,
    pub x86_fma: bool,
    pub x86_xop: bool,
    pub x86_f16c: bool,
    pub x86_avx_vnni: bool,
    /// F+CD+BW+DQ+VL composite with ZMM state enabled by the OS
    pub x86_avx512: bool,
    pub x86_avx512_vnni: bool,
    pub x86_avx512_bf16: bool,
    pub x86_avx512_fp16: bool,
    // ARM / AArch64
    pub arm_edsp: bool,
    pub arm_neon: bool,
    pub arm_vfpv4: bool,
    pub arm_asimdhp: bool,
    pub arm_asimddp: bool,
    pub arm_asimdfhm: bool,
    pub arm_bf16: bool,
    pub arm_i8mm: bool,
    pub arm_sve: bool,
    pub arm_sve2: bool,
    pub arm_svebf16: bool,
    pub arm_svei8mm: bool,
    pub arm_svef32mm: bool,
    /// Userspace MIDR emulation (`HWCAP_CPUID`)
    pub arm_cpuid: bool,
    // MIPS
    pub mips_msa: bool,
    // LoongArch
    pub loongarch_lsx: bool,
    pub loongarch_lasx: bool,
    // RISC-V
    pub riscv_v: bool,
    pub riscv_zfh: bool,
}

impl IsaSupport {
    /// Names of every supported extension, for the diagnostics report
    pub fn enabled_names(&self) -> Vec<&'static str> {
        let flags = [
            ("sse3", self.x86_sse3),
            ("ssse3", self.x86_ssse3),
            ("sse4.1", self.x86_sse41),
            ("sse4.2", self.x86_sse42),
            ("avx", self.x86_avx),
            ("avx2", self.x86_avx2),
            ("fma", self.x86_fma),
            ("xop", self.x86_xop),
            ("f16c", self.x86_f16c),
            ("avx-vnni", self.x86_avx_vnni),
            ("avx512", self.x86_avx512),
            ("avx512-vnni", self.x86_avx512_vnni),
            ("avx512-bf16", self.x86_avx512_bf16),
            ("avx512-fp16", self.x86_avx512_fp16),
            ("edsp", self.arm_edsp),
            ("neon", self.arm_neon),
            ("vfpv4", self.arm_vfpv4),
            ("asimdhp", self.arm_asimdhp),
            ("asimddp", self.arm_asimddp),
            ("asimdfhm", self.arm_asimdfhm),
            ("bf16", self.arm_bf16),
            ("i8mm", self.arm_i8mm),
            ("sve", self.arm_sve),
            ("sve2", self.arm_sve2),
            ("svebf16", self.arm_svebf16),
            ("svei8mm", self.arm_svei8mm),
            ("svef32mm", self.arm_svef32mm),
            ("cpuid", self.arm_cpuid),
            ("msa", self.mips_msa),
            ("lsx", self.loongarch_lsx),
            ("lasx", self.loongarch_lasx),
            ("v", self.riscv_v),
            ("zfh", self.riscv_zfh),
        ];
        flags
            .into_iter()
            .filter_map(|(name, enabled)| enabled.then_some(name))
            .collect()
    }
}

/// Does a RISC-V `isa` line advertise extension `ext`?
///
/// Single-letter extensions live in the run after the `rv32`/`rv64` prefix,
/// multi-letter ones as `_`-separated suffixes (`rv64imafdcv_zicsr_zfh`).
pub fn riscv_isa_has(isa: &str, ext: &str) -> bool {
    let isa = isa.trim().to_ascii_lowercase();
    let ext = ext.to_ascii_lowercase();
    let Some(base) = isa
        .strip_prefix("rv32")
        .or_else(|| isa.strip_prefix("rv64"))
    else {
        return false;
    };

    let mut groups = base.split('_');
    let singles = groups.next().unwrap_or("");
    if ext.len() == 1 {
        singles.contains(&ext)
    } else {
        groups.any(|group| group == ext)
    }
}

/// Does a whitespace-separated `/proc/cpuinfo` value line contain `word`?
/// Matches the first occurrence of `key` (e.g. `ASEs implemented`).
pub fn cpuinfo_value_has(cpuinfo: &str, key: &str, word: &str) -> bool {
    cpuinfo
        .lines()
        .find_map(|line| {
            let (k, v) = line.split_once(':')?;
            (k.trim() == key).then_some(v)
        })
        .map(|value| value.split_whitespace().any(|w| w == word))
        .unwrap_or(false)
}

/// x86 detection: CPUID leaves 1/7 cross-checked against XCR0.
///
/// A CPUID bit alone is not enough for the AVX families: the OS must have
/// enabled the wide register state in XCR0, otherwise executing the
/// instruction faults even though the CPU advertises it.
#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
pub fn detect_x86() -> IsaSupport {
    #[cfg(target_arch = "x86")]
    use core::arch::x86 as arch;
    #[cfg(target_arch = "x86_64")]
    use core::arch::x86_64 as arch;

    let cpuid = |leaf: u32, subleaf: u32| unsafe { arch::__cpuid_count(leaf, subleaf) };

    let mut isa = IsaSupport::default();

    let max_leaf = cpuid(0, 0).eax;
    if max_leaf < 1 {
        return isa;
    }

    let leaf1 = cpuid(1, 0);
    isa.x86_sse3 = leaf1.ecx & (1 << 0) != 0;
    isa.x86_ssse3 = leaf1.ecx & (1 << 9) != 0;
    isa.x86_sse41 = leaf1.ecx & (1 << 19) != 0;
    isa.x86_sse42 = leaf1.ecx & (1 << 20) != 0;

    let osxsave = leaf1.ecx & (1 << 27) != 0;
    // SAFETY: XGETBV is only executed once OSXSAVE confirms the OS exposes it
    let xcr0 = if osxsave { unsafe { arch::_xgetbv(0) } } else { 0 };
    let ymm_enabled = xcr0 & 0x6 == 0x6;
    let zmm_enabled = xcr0 & 0xe6 == 0xe6;

    isa.x86_avx = ymm_enabled && leaf1.ecx & (1 << 28) != 0;
    isa.x86_fma = ymm_enabled && leaf1.ecx & (1 << 12) != 0;
    isa.x86_f16c = ymm_enabled && leaf1.ecx & (1 << 29) != 0;

    if max_leaf >= 7 {
        let leaf7 = cpuid(7, 0);
        isa.x86_avx2 = ymm_enabled && leaf7.ebx & (1 << 5) != 0;

        let avx512_group = (1 << 16) | (1 << 17) | (1 << 28) | (1 << 30) | (1 << 31);
        isa.x86_avx512 = zmm_enabled && leaf7.ebx & avx512_group == avx512_group;
        isa.x86_avx512_vnni = isa.x86_avx512 && leaf7.ecx & (1 << 11) != 0;
        isa.x86_avx512_fp16 = isa.x86_avx512 && leaf7.edx & (1 << 23) != 0;

        if leaf7.eax >= 1 {
            let leaf7_1 = cpuid(7, 1);
            isa.x86_avx_vnni = ymm_enabled && leaf7_1.eax & (1 << 4) != 0;
            isa.x86_avx512_bf16 = isa.x86_avx512 && leaf7_1.eax & (1 << 5) != 0;
        }
    }

    if cpuid(0x8000_0000, 0).eax >= 0x8000_0001 {
        let ext1 = cpuid(0x8000_0001, 0);
        isa.x86_xop = ymm_enabled && ext1.ecx & (1 << 11) != 0;
    }

    isa
}

/// AArch64 Linux/Android detection from the kernel hwcap bits
#[cfg(all(any(target_os = "linux", target_os = "android"), target_arch = "aarch64"))]
pub fn detect_aarch64_linux() -> IsaSupport {
    use super::hwcap::{self, aarch64::*};

    let caps = hwcap::read();
    let mut isa = IsaSupport::default();

    isa.arm_neon = caps.has(HWCAP_ASIMD);
    // FP and SIMD are architectural on AArch64
    isa.arm_vfpv4 = isa.arm_neon;
    isa.arm_asimdhp = caps.has(HWCAP_ASIMDHP) && caps.has(HWCAP_FPHP);
    isa.arm_asimddp = caps.has(HWCAP_ASIMDDP);
    isa.arm_asimdfhm = caps.has(HWCAP_ASIMDFHM);
    isa.arm_cpuid = caps.has(HWCAP_CPUID);
    isa.arm_sve = caps.has(HWCAP_SVE);
    isa.arm_sve2 = caps.has2(HWCAP2_SVE2);
    isa.arm_svebf16 = caps.has2(HWCAP2_SVEBF16);
    isa.arm_svei8mm = caps.has2(HWCAP2_SVEI8MM);
    isa.arm_svef32mm = caps.has2(HWCAP2_SVEF32MM);
    isa.arm_bf16 = caps.has2(HWCAP2_BF16);
    isa.arm_i8mm = caps.has2(HWCAP2_I8MM);

    isa
}

/// 32-bit ARM Linux/Android detection from the kernel hwcap bits
#[cfg(all(any(target_os = "linux", target_os = "android"), target_arch = "arm"))]
pub fn detect_arm_linux() -> IsaSupport {
    use super::hwcap::{self, arm::*};

    let caps = hwcap::read();
    let mut isa = IsaSupport::default();

    isa.arm_edsp = caps.has(HWCAP_EDSP);
    isa.arm_neon = caps.has(HWCAP_NEON);
    isa.arm_vfpv4 = caps.has(HWCAP_VFPV4);

    isa
}

/// MIPS Linux detection: MSA from the `ASEs implemented` cpuinfo line
#[cfg(all(
    any(target_os = "linux", target_os = "android"),
    any(target_arch = "mips", target_arch = "mips64")
))]
pub fn detect_mips_linux() -> IsaSupport {
    let mut isa = IsaSupport::default();
    if let Ok(cpuinfo) = std::fs::read_to_string("/proc/cpuinfo") {
        isa.mips_msa = cpuinfo_value_has(&cpuinfo, "ASEs implemented", "msa");
    }
    isa
}

/// LoongArch Linux detection from the kernel hwcap bits
#[cfg(all(
    any(target_os = "linux", target_os = "android"),
    target_arch = "loongarch64"
))]
pub fn detect_loongarch_linux() -> IsaSupport {
    use super::hwcap::{self, loongarch::*};

    let caps = hwcap::read();
    let mut isa = IsaSupport::default();
    isa.loongarch_lsx = caps.has(HWCAP_LOONGARCH_LSX);
    isa.loongarch_lasx = caps.has(HWCAP_LOONGARCH_LASX);
    isa
}

/// RISC-V Linux detection: hwcap for the vector extension, the cpuinfo `isa`
/// line for multi-letter extensions
#[cfg(all(
    any(target_os = "linux", target_os = "android"),
    target_arch = "riscv64"
))]
pub fn detect_riscv_linux() -> IsaSupport {
    use super::hwcap::{self, riscv::*};

    let caps = hwcap::read();
    let mut isa = IsaSupport::default();
    isa.riscv_v = caps.has(HWCAP_ISA_V);

    if let Ok(cpuinfo) = std::fs::read_to_string("/proc/cpuinfo") {
        let line = cpuinfo.lines().find_map(|line| {
            let (key, value) = line.split_once(':')?;
            (key.trim() == "isa").then_some(value)
        });
        if let Some(line) = line {
            isa.riscv_v = isa.riscv_v || riscv_isa_has(line, "v");
            isa.riscv_zfh = riscv_isa_has(line, "zfh");
        }
    }
    isa
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn riscv_isa_line_parsing() {
        assert!(riscv_isa_has("rv64imafdcv_zicsr_zfh", "v"));
        assert!(riscv_isa_has("rv64imafdcv_zicsr_zfh", "zfh"));
        assert!(riscv_isa_has("rv64imafdcv_zicsr_zfh", "zicsr"));
        assert!(!riscv_isa_has("rv64imafdc", "v"));
        assert!(!riscv_isa_has("rv64imafdc_zicsr", "zfh"));
        // "v" must not match inside a multi-letter extension
        assert!(!riscv_isa_has("rv64imafdc_zve32x", "v"));
        assert!(!riscv_isa_has("not an isa line", "v"));
    }

    #[test]
    fn cpuinfo_value_lookup() {
        let cpuinfo = "\
system type\t\t: generic-loongson-machine
ASEs implemented\t: vz msa
";
        assert!(cpuinfo_value_has(cpuinfo, "ASEs implemented", "msa"));
        assert!(cpuinfo_value_has(cpuinfo, "ASEs implemented", "vz"));
        assert!(!cpuinfo_value_has(cpuinfo, "ASEs implemented", "ms"));
        assert!(!cpuinfo_value_has(cpuinfo, "Features", "msa"));
    }

    #[test]
    fn default_reports_nothing() {
        let isa = IsaSupport::default();
        assert!(isa.enabled_names().is_empty());
    }

    #[test]
    fn enabled_names_reflect_flags() {
        let isa = IsaSupport {
            x86_avx2: true,
            arm_neon: true,
            ..Default::default()
        };
        assert_eq!(isa.enabled_names(), vec!["avx2", "neon"]);
    }

    #[test]
    #[cfg(target_arch = "x86_64")]
    fn x86_detection_is_idempotent_and_sane() {
        let first = detect_x86();
        let second = detect_x86();
        assert_eq!(first.x86_avx2, second.x86_avx2);
        assert_eq!(first.x86_avx512, second.x86_avx512);
        // AVX-512 implies the AVX line below it
        if first.x86_avx512 {
            assert!(first.x86_avx);
        }
        if first.x86_avx2 {
            assert!(first.x86_avx);
        }
    }
}
