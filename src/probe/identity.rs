use serde::Serialize;

/// CPU naming information for the diagnostics report
#[derive(Debug, Clone, Default, Serialize)]
pub struct CpuIdentity {
    pub vendor: String,
    pub model_name: String,
    /// ARM SoC name from the `Hardware` line, when present
    pub hardware: String,
}

impl CpuIdentity {
    #[cfg(any(target_os = "linux", target_os = "android"))]
    pub fn read() -> Self {
        match std::fs::read_to_string("/proc/cpuinfo") {
            Ok(content) => Self::parse(&content),
            Err(_) => Self::default(),
        }
    }

    #[cfg(any(target_os = "macos", target_os = "ios"))]
    pub fn read() -> Self {
        let mut identity = Self::default();
        if let Some(brand) = crate::probe::apple::sysctl_string("machdep.cpu.brand_string") {
            identity.model_name = brand;
        }
        identity.vendor = "Apple".to_string();
        identity
    }

    #[cfg(not(any(
        target_os = "linux",
        target_os = "android",
        target_os = "macos",
        target_os = "ios"
    )))]
    pub fn read() -> Self {
        Self::default()
    }

    /// Parse the first CPU block of /proc/cpuinfo text
    pub fn parse(content: &str) -> Self {
        let mut identity = Self::default();

        for line in content.lines() {
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let key = key.trim();
            let value = value.trim();

            match key {
                "vendor_id" | "CPU implementer" if identity.vendor.is_empty() => {
                    identity.vendor = value.to_string();
                }
                "model name" if identity.model_name.is_empty() => {
                    identity.model_name = value.to_string();
                }
                "Hardware" if identity.hardware.is_empty() => {
                    identity.hardware = value.to_string();
                }
                _ => {}
            }
        }

        identity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_x86_block() {
        let content = "\
processor\t: 0
vendor_id\t: AuthenticAMD
model name\t: AMD Ryzen 9 7950X 16-Core Processor
processor\t: 1
vendor_id\t: ignored-second-block
model name\t: ignored too
";
        let identity = CpuIdentity::parse(content);
        assert_eq!(identity.vendor, "AuthenticAMD");
        assert_eq!(identity.model_name, "AMD Ryzen 9 7950X 16-Core Processor");
        assert!(identity.hardware.is_empty());
    }

    #[test]
    fn parses_arm_block() {
        let content = "\
processor\t: 0
CPU implementer\t: 0x41
CPU part\t: 0xd05
Hardware\t: Qualcomm Technologies, Inc SDM845
";
        let identity = CpuIdentity::parse(content);
        assert_eq!(identity.vendor, "0x41");
        assert_eq!(identity.hardware, "Qualcomm Technologies, Inc SDM845");
    }

    #[test]
    fn empty_input_yields_defaults() {
        let identity = CpuIdentity::parse("");
        assert!(identity.vendor.is_empty());
        assert!(identity.model_name.is_empty());
    }
}
