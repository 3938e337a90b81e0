//! Target description: ABI feature flags, OS and architecture names.

/// Every flag name `abi` understands
pub const ABI_FLAGS: [&str; 11] = [
    "64bit", "32bit", "le", "be", "win", "uwp", "eabi", "elfv2", "fpu", "hardfp", "softfp",
];

const SOFT_FLOAT: bool = cfg!(all(target_arch = "arm", not(target_feature = "vfp2")));

/// Whether the target has the ABI feature `flag`; unknown flags are false
pub fn abi(flag: &str) -> bool {
    match flag {
        "64bit" => cfg!(target_pointer_width = "64"),
        "32bit" => cfg!(target_pointer_width = "32"),
        "le" => cfg!(target_endian = "little"),
        "be" => cfg!(target_endian = "big"),
        "win" => cfg!(windows),
        "uwp" => cfg!(target_vendor = "uwp"),
        "eabi" => cfg!(all(target_arch = "arm", not(target_os = "ios"))),
        "elfv2" => cfg!(all(target_arch = "powerpc64", target_endian = "little")),
        "fpu" => !SOFT_FLOAT,
        "hardfp" => !SOFT_FLOAT,
        "softfp" => SOFT_FLOAT,
        _ => false,
    }
}

/// Flags that hold on this target
pub fn abi_flags() -> Vec<&'static str> {
    ABI_FLAGS.iter().copied().filter(|f| abi(f)).collect()
}

/// Operating system name as scripts see it
pub fn os() -> &'static str {
    if cfg!(windows) {
        "Windows"
    } else if cfg!(target_os = "linux") || cfg!(target_os = "android") {
        "Linux"
    } else if cfg!(target_vendor = "apple") {
        "OSX"
    } else if cfg!(any(
        target_os = "freebsd",
        target_os = "openbsd",
        target_os = "netbsd",
        target_os = "dragonfly"
    )) {
        "BSD"
    } else if cfg!(unix) {
        "POSIX"
    } else {
        "Other"
    }
}

/// Architecture name as scripts see it
pub fn arch() -> &'static str {
    let be = cfg!(target_endian = "big");
    if cfg!(target_arch = "x86_64") {
        "x64"
    } else if cfg!(target_arch = "x86") {
        "x86"
    } else if cfg!(target_arch = "aarch64") {
        if be { "arm64be" } else { "arm64" }
    } else if cfg!(target_arch = "arm") {
        if be { "armeb" } else { "arm" }
    } else if cfg!(target_arch = "powerpc64") {
        if be { "ppc64" } else { "ppc64le" }
    } else if cfg!(target_arch = "powerpc") {
        "ppc"
    } else if cfg!(target_arch = "mips64") {
        if be { "mips64" } else { "mips64el" }
    } else if cfg!(target_arch = "mips") {
        if be { "mips" } else { "mipsel" }
    } else if cfg!(target_arch = "riscv64") {
        "riscv64"
    } else if cfg!(target_arch = "s390x") {
        "s390x"
    } else {
        "unknown"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_word_size_and_endianness_are_exclusive() {
        assert_ne!(abi("64bit"), abi("32bit"));
        assert_ne!(abi("le"), abi("be"));
        assert_ne!(abi("hardfp"), abi("softfp"));
        assert!(!abi("nonsense"));
    }

    #[test]
    fn test_flags_are_listed() {
        let flags = abi_flags();
        assert!(flags.iter().all(|f| abi(f)));
        assert!(flags.contains(&"le") || flags.contains(&"be"));
    }

    #[cfg(all(target_arch = "x86_64", target_os = "linux"))]
    #[test]
    fn test_linux_x64_names() {
        assert_eq!(os(), "Linux");
        assert_eq!(arch(), "x64");
    }
}
