//! Kernel capability bits from the ELF auxiliary vector.
//!
//! `getauxval` answers directly on every kernel and Android API level this
//! crate targets; `/proc/self/auxv` stays as the fallback for linkers that
//! predate it.

/// AT_HWCAP and AT_HWCAP2 values
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Hwcaps {
    pub hwcap: u64,
    pub hwcap2: u64,
}

impl Hwcaps {
    pub fn has(&self, bit: u64) -> bool {
        self.hwcap & bit != 0
    }

    pub fn has2(&self, bit: u64) -> bool {
        self.hwcap2 & bit != 0
    }
}

// arch/arm64/include/uapi/asm/hwcap.h
#[cfg(any(target_arch = "aarch64", test))]
pub mod aarch64 {
    pub const HWCAP_ASIMD: u64 = 1 << 1;
    pub const HWCAP_FPHP: u64 = 1 << 9;
    pub const HWCAP_ASIMDHP: u64 = 1 << 10;
    pub const HWCAP_CPUID: u64 = 1 << 11;
    pub const HWCAP_ASIMDDP: u64 = 1 << 20;
    pub const HWCAP_SVE: u64 = 1 << 22;
    pub const HWCAP_ASIMDFHM: u64 = 1 << 23;

    pub const HWCAP2_SVE2: u64 = 1 << 1;
    pub const HWCAP2_SVEI8MM: u64 = 1 << 9;
    pub const HWCAP2_SVEF32MM: u64 = 1 << 10;
    pub const HWCAP2_SVEBF16: u64 = 1 << 12;
    pub const HWCAP2_I8MM: u64 = 1 << 13;
    pub const HWCAP2_BF16: u64 = 1 << 14;
}

// arch/arm/include/uapi/asm/hwcap.h
#[cfg(any(target_arch = "arm", test))]
pub mod arm {
    pub const HWCAP_EDSP: u64 = 1 << 7;
    pub const HWCAP_NEON: u64 = 1 << 12;
    pub const HWCAP_VFPV4: u64 = 1 << 16;
}

// arch/loongarch/include/uapi/asm/hwcap.h
#[cfg(any(target_arch = "loongarch64", test))]
pub mod loongarch {
    pub const HWCAP_LOONGARCH_LSX: u64 = 1 << 4;
    pub const HWCAP_LOONGARCH_LASX: u64 = 1 << 5;
}

// riscv COMPAT_HWCAP_ISA bits are keyed by extension letter
#[cfg(any(target_arch = "riscv64", test))]
pub mod riscv {
    pub const HWCAP_ISA_V: u64 = 1 << (b'v' - b'a') as u64;
}

/// Read the hwcap pair for the current process
#[cfg(any(target_os = "linux", target_os = "android"))]
pub fn read() -> Hwcaps {
    let hwcap = unsafe { libc::getauxval(libc::AT_HWCAP) } as u64;
    let hwcap2 = unsafe { libc::getauxval(libc::AT_HWCAP2) } as u64;
    if hwcap != 0 {
        return Hwcaps { hwcap, hwcap2 };
    }

    match std::fs::read("/proc/self/auxv") {
        Ok(bytes) => parse_auxv(&bytes, size_of::<usize>()),
        Err(_) => Hwcaps::default(),
    }
}

/// Parse a raw auxv image: (type, value) pairs of native words, AT_NULL ends.
///
/// `word` is the pointer width of the traced process in bytes (4 or 8).
pub fn parse_auxv(bytes: &[u8], word: usize) -> Hwcaps {
    const AT_HWCAP: u64 = 16;
    const AT_HWCAP2: u64 = 26;

    let mut caps = Hwcaps::default();
    if word != 4 && word != 8 {
        return caps;
    }

    let read_word = |chunk: &[u8]| -> u64 {
        if word == 8 {
            u64::from_ne_bytes(chunk.try_into().unwrap_or([0; 8]))
        } else {
            u32::from_ne_bytes(chunk.try_into().unwrap_or([0; 4])) as u64
        }
    };

    for pair in bytes.chunks_exact(word * 2) {
        let key = read_word(&pair[..word]);
        let value = read_word(&pair[word..]);
        match key {
            0 => break, // AT_NULL
            AT_HWCAP => caps.hwcap = value,
            AT_HWCAP2 => caps.hwcap2 = value,
            _ => {}
        }
    }
    caps
}

#[cfg(test)]
mod tests {
    use super::*;

    fn auxv_image(pairs: &[(u64, u64)]) -> Vec<u8> {
        let mut bytes = Vec::new();
        for (key, value) in pairs {
            bytes.extend_from_slice(&key.to_ne_bytes());
            bytes.extend_from_slice(&value.to_ne_bytes());
        }
        bytes
    }

    #[test]
    fn parses_hwcap_pairs() {
        let image = auxv_image(&[(6, 4096), (16, 0xff), (26, 0x3), (0, 0)]);
        let caps = parse_auxv(&image, 8);
        assert_eq!(caps.hwcap, 0xff);
        assert_eq!(caps.hwcap2, 0x3);
    }

    #[test]
    fn stops_at_null_entry() {
        let image = auxv_image(&[(0, 0), (16, 0xff)]);
        let caps = parse_auxv(&image, 8);
        assert_eq!(caps.hwcap, 0);
    }

    #[test]
    fn parses_32_bit_words() {
        let mut bytes = Vec::new();
        for (key, value) in [(16u32, 0x1000u32), (0, 0)] {
            bytes.extend_from_slice(&key.to_ne_bytes());
            bytes.extend_from_slice(&value.to_ne_bytes());
        }
        let caps = parse_auxv(&bytes, 4);
        assert_eq!(caps.hwcap, 0x1000);
        // HWCAP_NEON on 32-bit ARM
        assert!(caps.has(arm::HWCAP_NEON));
    }

    #[test]
    fn rejects_bad_word_sizes() {
        assert_eq!(parse_auxv(&[0; 32], 3), Hwcaps::default());
    }

    #[test]
    fn truncated_trailing_pair_is_ignored() {
        let mut image = auxv_image(&[(16, 0xff)]);
        image.truncate(image.len() - 3);
        let caps = parse_auxv(&image, 8);
        assert_eq!(caps.hwcap, 0);
    }

    #[test]
    fn bit_queries() {
        let caps = Hwcaps {
            hwcap: aarch64::HWCAP_ASIMD | aarch64::HWCAP_ASIMDDP,
            hwcap2: aarch64::HWCAP2_SVE2,
        };
        assert!(caps.has(aarch64::HWCAP_ASIMD));
        assert!(!caps.has(aarch64::HWCAP_SVE));
        assert!(caps.has2(aarch64::HWCAP2_SVE2));
        assert!(!caps.has2(aarch64::HWCAP2_BF16));
    }
}
