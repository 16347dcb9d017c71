//! Last-resort capability probing by executing candidate instructions.
//!
//! The whole backend sits behind one question: does executing these bytes
//! fault on this machine? Platforms with a trustworthy flag source (Linux
//! hwcap, Apple sysctl) never reach this module; Windows and older Apple
//! kernels do.
//!
//! On POSIX the candidate runs in a forked child and the parent classifies
//! the child's exit: a SIGILL/SIGSEGV death means unsupported. The parent's
//! signal dispositions are never touched, so there is no handler to leak on
//! any path. On Windows a vectored exception handler is installed around the
//! call and steers the faulting thread to a return gadget; the handler is
//! removed on every exit path.

/// Does executing `code` (without a trailing return) fault?
///
/// `None` means the probe could not run at all; callers must treat that as
/// "unsupported", never as a guess.
pub fn opcode_faults(code: &[u8]) -> Option<bool> {
    imp::opcode_faults(code)
}

/// Architecture return opcode appended to every probe sequence
#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
const RET: [u8; 1] = [0xc3];
#[cfg(target_arch = "aarch64")]
const RET: [u8; 4] = 0xd65f_03c0_u32.to_le_bytes();

#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
pub mod x86 {
    pub const SSE3_ADDSUBPD: &[u8] = &[0x66, 0x0f, 0xd0, 0xc0];
    pub const SSSE3_PSHUFB: &[u8] = &[0x66, 0x0f, 0x38, 0x00, 0xc0];
    pub const SSE41_PTEST: &[u8] = &[0x66, 0x0f, 0x38, 0x17, 0xc0];
    pub const SSE42_CRC32: &[u8] = &[0xf2, 0x0f, 0x38, 0xf1, 0xc0];
    pub const AVX_VPXOR: &[u8] = &[0xc5, 0xf1, 0xef, 0xc0];
    pub const AVX2_VPXOR_YMM: &[u8] = &[0xc5, 0xf5, 0xef, 0xc0];
    pub const FMA_VFMADD132PS: &[u8] = &[0xc4, 0xe2, 0x71, 0x98, 0xc2];
    pub const F16C_VCVTPH2PS: &[u8] = &[0xc4, 0xe2, 0x79, 0x13, 0xc1];
    pub const XOP_VFRCZPS: &[u8] = &[0x8f, 0xe9, 0x78, 0x80, 0xc0];
    pub const AVX_VNNI_VPDPBUSD: &[u8] = &[0xc4, 0xe2, 0x71, 0x50, 0xc2];
    pub const AVX512_VPXORD: &[u8] = &[0x62, 0xf1, 0x7d, 0x48, 0xef, 0xc0];
    pub const AVX512_VNNI_VPDPBUSD: &[u8] = &[0x62, 0xf2, 0x75, 0x48, 0x50, 0xc2];
    pub const AVX512_BF16_VCVTNE2PS2BF16: &[u8] = &[0x62, 0xf2, 0x77, 0x48, 0x72, 0xc2];
    pub const AVX512_FP16_VADDPH: &[u8] = &[0x62, 0xf5, 0x74, 0x48, 0x58, 0xc2];
    /// Guaranteed to fault everywhere
    pub const UD2: &[u8] = &[0x0f, 0x0b];
    /// Guaranteed not to fault anywhere
    pub const NOP: &[u8] = &[0x90];
}

#[cfg(target_arch = "aarch64")]
pub mod aarch64 {
    pub const ASIMDHP_FADD: [u8; 4] = 0x4e40_1400_u32.to_le_bytes();
    pub const ASIMDDP_SDOT: [u8; 4] = 0x4e80_9400_u32.to_le_bytes();
    pub const ASIMDFHM_FMLAL: [u8; 4] = 0x0e20_ec00_u32.to_le_bytes();
    pub const BF16_BFMMLA: [u8; 4] = 0x6e40_ec00_u32.to_le_bytes();
    pub const I8MM_SMMLA: [u8; 4] = 0x4e80_a400_u32.to_le_bytes();
    /// `udf #0`, permanently undefined
    pub const UDF: [u8; 4] = 0x0000_0000_u32.to_le_bytes();
    pub const NOP: [u8; 4] = 0xd503_201f_u32.to_le_bytes();
}

#[cfg(all(unix, any(target_arch = "x86", target_arch = "x86_64", target_arch = "aarch64")))]
mod imp {
    use std::io;
    use std::ptr;

    use super::RET;

    pub fn opcode_faults(code: &[u8]) -> Option<bool> {
        let mut buf = Vec::with_capacity(code.len() + RET.len());
        buf.extend_from_slice(code);
        buf.extend_from_slice(&RET);
        probe_forked(&buf)
    }

    /// Map the sequence executable, run it in a forked child, classify the
    /// child's fate.
    fn probe_forked(buf: &[u8]) -> Option<bool> {
        let len = buf.len();
        let page = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANON,
                -1,
                0,
            )
        };
        if page == libc::MAP_FAILED {
            log::debug!("opcode probe unavailable: mmap: {}", io::Error::last_os_error());
            return None;
        }

        let result = unsafe {
            ptr::copy_nonoverlapping(buf.as_ptr(), page as *mut u8, len);
            if libc::mprotect(page, len, libc::PROT_READ | libc::PROT_EXEC) != 0 {
                log::debug!(
                    "opcode probe unavailable: mprotect: {}",
                    io::Error::last_os_error()
                );
                None
            } else {
                #[cfg(any(target_os = "macos", target_os = "ios"))]
                libc::sys_icache_invalidate(page, len);
                run_in_child(page)
            }
        };

        unsafe {
            libc::munmap(page, len);
        }
        result
    }

    unsafe fn run_in_child(page: *mut libc::c_void) -> Option<bool> {
        let func: extern "C" fn() = unsafe { std::mem::transmute(page) };

        let pid = unsafe { libc::fork() };
        if pid < 0 {
            return None;
        }
        if pid == 0 {
            // child: default dispositions so a fault kills us cleanly
            unsafe {
                libc::signal(libc::SIGILL, libc::SIG_DFL);
                libc::signal(libc::SIGSEGV, libc::SIG_DFL);
                libc::signal(libc::SIGBUS, libc::SIG_DFL);
            }
            func();
            unsafe { libc::_exit(0) };
        }

        let mut status = 0;
        loop {
            let waited = unsafe { libc::waitpid(pid, &mut status, 0) };
            if waited == pid {
                break;
            }
            if io::Error::last_os_error().raw_os_error() != Some(libc::EINTR) {
                return None;
            }
        }

        if libc::WIFEXITED(status) && libc::WEXITSTATUS(status) == 0 {
            Some(false)
        } else if libc::WIFSIGNALED(status) {
            Some(true)
        } else {
            None
        }
    }
}

#[cfg(windows)]
mod imp {
    use std::ptr;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use windows_sys::Win32::Foundation::{
        EXCEPTION_ACCESS_VIOLATION, EXCEPTION_ILLEGAL_INSTRUCTION, EXCEPTION_PRIV_INSTRUCTION,
    };
    use windows_sys::Win32::System::Diagnostics::Debug::{
        AddVectoredExceptionHandler, EXCEPTION_POINTERS, FlushInstructionCache,
        RemoveVectoredExceptionHandler,
    };
    use windows_sys::Win32::System::Memory::{
        MEM_COMMIT, MEM_RELEASE, MEM_RESERVE, PAGE_EXECUTE_READWRITE, VirtualAlloc, VirtualFree,
    };
    use windows_sys::Win32::System::Threading::GetCurrentProcess;

    use super::RET;

    const CONTINUE_EXECUTION: i32 = -1;
    const CONTINUE_SEARCH: i32 = 0;

    // one probe at a time: the trap handler works through process statics
    static PROBE_LOCK: Mutex<()> = Mutex::new(());
    static FAULTED: AtomicBool = AtomicBool::new(false);
    static RESUME: AtomicUsize = AtomicUsize::new(0);

    unsafe extern "system" fn trap(info: *mut EXCEPTION_POINTERS) -> i32 {
        let resume = RESUME.load(Ordering::SeqCst);
        if resume == 0 {
            return CONTINUE_SEARCH;
        }
        unsafe {
            let code = (*(*info).ExceptionRecord).ExceptionCode;
            if code != EXCEPTION_ILLEGAL_INSTRUCTION
                && code != EXCEPTION_ACCESS_VIOLATION
                && code != EXCEPTION_PRIV_INSTRUCTION
            {
                return CONTINUE_SEARCH;
            }
            FAULTED.store(true, Ordering::SeqCst);
            let context = (*info).ContextRecord;
            #[cfg(target_arch = "x86_64")]
            {
                (*context).Rip = resume as u64;
            }
            #[cfg(target_arch = "x86")]
            {
                (*context).Eip = resume as u32;
            }
            #[cfg(target_arch = "aarch64")]
            {
                (*context).Pc = resume as u64;
            }
        }
        CONTINUE_EXECUTION
    }

    pub fn opcode_faults(code: &[u8]) -> Option<bool> {
        let _guard = PROBE_LOCK.lock().ok()?;
        let len = code.len() + RET.len();

        unsafe {
            let page =
                VirtualAlloc(ptr::null(), len, MEM_COMMIT | MEM_RESERVE, PAGE_EXECUTE_READWRITE)
                    as *mut u8;
            if page.is_null() {
                return None;
            }
            ptr::copy_nonoverlapping(code.as_ptr(), page, code.len());
            ptr::copy_nonoverlapping(RET.as_ptr(), page.add(code.len()), RET.len());
            FlushInstructionCache(GetCurrentProcess(), page as *const _, len);

            // the trailing return opcode doubles as the recovery gadget
            RESUME.store(page.add(code.len()) as usize, Ordering::SeqCst);
            FAULTED.store(false, Ordering::SeqCst);

            let handler = AddVectoredExceptionHandler(1, Some(trap));
            if handler.is_null() {
                RESUME.store(0, Ordering::SeqCst);
                VirtualFree(page as *mut _, 0, MEM_RELEASE);
                return None;
            }

            let func: extern "C" fn() = std::mem::transmute(page);
            func();

            RemoveVectoredExceptionHandler(handler);
            RESUME.store(0, Ordering::SeqCst);
            let faulted = FAULTED.load(Ordering::SeqCst);
            VirtualFree(page as *mut _, 0, MEM_RELEASE);
            Some(faulted)
        }
    }
}

#[cfg(not(any(
    all(unix, any(target_arch = "x86", target_arch = "x86_64", target_arch = "aarch64")),
    windows
)))]
mod imp {
    pub fn opcode_faults(_code: &[u8]) -> Option<bool> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[cfg(all(unix, target_arch = "x86_64"))]
    fn undefined_instruction_faults_and_process_survives() {
        assert_eq!(opcode_faults(x86::UD2), Some(true));
        // still alive and able to probe again
        assert_eq!(opcode_faults(x86::NOP), Some(false));
    }

    #[test]
    #[cfg(all(unix, target_arch = "x86_64"))]
    fn baseline_sse2_era_opcode_does_not_fault() {
        // addsubpd requires only SSE3, universal on x86-64 test hosts
        assert_eq!(opcode_faults(x86::SSE3_ADDSUBPD), Some(false));
    }

    #[test]
    #[cfg(all(unix, target_arch = "aarch64"))]
    fn undefined_instruction_faults_and_process_survives() {
        assert_eq!(opcode_faults(&aarch64::UDF), Some(true));
        assert_eq!(opcode_faults(&aarch64::NOP), Some(false));
    }
}
