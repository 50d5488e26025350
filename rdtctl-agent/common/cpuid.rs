use serde::Serialize;

/// Register output of one `cpuid` invocation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CpuidResult {
    pub eax: u32,
    pub ebx: u32,
    pub ecx: u32,
    pub edx: u32,
}

impl CpuidResult {
    pub fn bit(reg: u32, bit: u32) -> bool {
        (reg >> bit) & 1 == 1
    }
}

#[cfg(target_arch = "x86_64")]
pub fn cpuid(leaf: u32, subleaf: u32) -> CpuidResult {
    let ebx: u32;
    let edx: u32;
    let mut eax = leaf;
    let mut ecx = subleaf;

    // rbx is reserved by LLVM, so it is swapped through a scratch register.
    unsafe {
        std::arch::asm!(
            "mov {0:r}, rbx",
            "cpuid",
            "xchg {0:r}, rbx",
            out(reg) ebx,
            inout("eax") eax,
            inout("ecx") ecx,
            out("edx") edx,
            options(nostack, preserves_flags)
        );
    }

    CpuidResult { eax, ebx, ecx, edx }
}

#[cfg(not(target_arch = "x86_64"))]
pub fn cpuid(_leaf: u32, _subleaf: u32) -> CpuidResult {
    CpuidResult::default()
}

/// Decode the 12-byte vendor string from leaf 0
pub fn vendor_string(leaf0: &CpuidResult) -> String {
    let mut bytes = Vec::with_capacity(12);
    for reg in [leaf0.ebx, leaf0.edx, leaf0.ecx] {
        bytes.extend_from_slice(&reg.to_le_bytes());
    }
    String::from_utf8_lossy(&bytes)
        .trim_end_matches('\0')
        .to_string()
}

/// Inverse of [`vendor_string`]; used to fake leaf 0
pub fn vendor_leaf(vendor: &str) -> CpuidResult {
    let mut bytes = [0u8; 12];
    for (dst, src) in bytes.iter_mut().zip(vendor.bytes()) {
        *dst = src;
    }
    let word = |i: usize| u32::from_le_bytes([bytes[i], bytes[i + 1], bytes[i + 2], bytes[i + 3]]);
    CpuidResult {
        eax: 0x20,
        ebx: word(0),
        edx: word(4),
        ecx: word(8),
    }
}
