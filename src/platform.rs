//! Platform descriptors
//!
//! A platform is an (operating system, architecture, optional variant)
//! triple written as `os/arch[/variant]`. The recognized operating systems
//! and architectures are closed enumerations; anything else is rejected at
//! parse time with an error containing
//! "unknown operating system or architecture".

use crate::error::{XplatError, XplatResult};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

/// Error fragment callers match on for unrecognized platforms
pub const UNKNOWN_PLATFORM: &str = "unknown operating system or architecture";

/// Operating system family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[non_exhaustive]
pub enum Os {
    Linux,
    Darwin,
    Windows,
    FreeBsd,
}

impl Os {
    /// All recognized operating systems
    pub fn all() -> &'static [Self] {
        &[Self::Linux, Self::Darwin, Self::Windows, Self::FreeBsd]
    }

    /// Canonical OCI name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Linux => "linux",
            Self::Darwin => "darwin",
            Self::Windows => "windows",
            Self::FreeBsd => "freebsd",
        }
    }

    /// Parse a canonical OS name (or the Rust `target_os` spelling)
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "linux" => Some(Self::Linux),
            "darwin" | "macos" => Some(Self::Darwin),
            "windows" => Some(Self::Windows),
            "freebsd" => Some(Self::FreeBsd),
            _ => None,
        }
    }

    /// OS the current process is running on
    pub fn detect() -> Option<Self> {
        Self::from_name(std::env::consts::OS)
    }
}

impl fmt::Display for Os {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// CPU architecture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[non_exhaustive]
pub enum Arch {
    Amd64,
    Arm64,
    S390x,
    I386,
    Arm,
    Ppc64le,
    Riscv64,
}

impl Arch {
    /// All recognized architectures
    pub fn all() -> &'static [Self] {
        &[
            Self::Amd64,
            Self::Arm64,
            Self::S390x,
            Self::I386,
            Self::Arm,
            Self::Ppc64le,
            Self::Riscv64,
        ]
    }

    /// Canonical OCI name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Amd64 => "amd64",
            Self::Arm64 => "arm64",
            Self::S390x => "s390x",
            Self::I386 => "386",
            Self::Arm => "arm",
            Self::Ppc64le => "ppc64le",
            Self::Riscv64 => "riscv64",
        }
    }

    /// Parse an architecture name, accepting common kernel/toolchain aliases.
    ///
    /// Returns the architecture and the variant implied by the alias, if any.
    pub fn from_name(name: &str) -> Option<(Self, Option<&'static str>)> {
        let arch = match name {
            "amd64" | "x86_64" | "x86-64" => (Self::Amd64, None),
            "arm64" | "aarch64" => (Self::Arm64, None),
            "s390x" => (Self::S390x, None),
            "386" | "i386" | "i686" => (Self::I386, None),
            "arm" => (Self::Arm, None),
            "armhf" | "armv7l" => (Self::Arm, Some("v7")),
            "armel" | "armv6l" => (Self::Arm, Some("v6")),
            "ppc64le" => (Self::Ppc64le, None),
            "riscv64" => (Self::Riscv64, None),
            _ => return None,
        };
        Some(arch)
    }

    /// The machine name a process sees from `uname -m` on this architecture
    pub fn uname_machine(&self) -> &'static str {
        match self {
            Self::Amd64 => "x86_64",
            Self::Arm64 => "aarch64",
            Self::S390x => "s390x",
            Self::I386 => "i686",
            Self::Arm => "armv7l",
            Self::Ppc64le => "ppc64le",
            Self::Riscv64 => "riscv64",
        }
    }

    /// Name of the qemu user-mode emulator (and binfmt_misc handler suffix)
    pub fn qemu_name(&self) -> &'static str {
        match self {
            Self::Amd64 => "x86_64",
            Self::Arm64 => "aarch64",
            Self::S390x => "s390x",
            Self::I386 => "i386",
            Self::Arm => "arm",
            Self::Ppc64le => "ppc64le",
            Self::Riscv64 => "riscv64",
        }
    }

    /// Validate and normalize a variant for this architecture
    fn normalize_variant(&self, variant: Option<&str>) -> Result<Option<String>, String> {
        let Some(variant) = variant else {
            return Ok(None);
        };
        let accepted: &[&str] = match self {
            Self::Arm => &["v5", "v6", "v7", "v8"],
            Self::Arm64 => &["v8"],
            Self::Amd64 => &["v1", "v2", "v3", "v4"],
            _ => &[],
        };
        if !accepted.contains(&variant) {
            return Err(format!("unknown variant '{}' for {}", variant, self));
        }
        // Baseline variants carry no information
        match (self, variant) {
            (Self::Arm64, "v8") | (Self::Amd64, "v1") => Ok(None),
            _ => Ok(Some(variant.to_string())),
        }
    }

    /// Architecture of the running kernel, falling back to the compile target
    pub fn detect() -> Option<(Self, Option<&'static str>)> {
        running_machine()
            .and_then(|m| Self::from_name(&m))
            .or_else(|| Self::from_name(std::env::consts::ARCH))
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(unix)]
fn running_machine() -> Option<String> {
    // SAFETY: utsname is plain old data and uname only writes into it
    let mut uts: libc::utsname = unsafe { std::mem::zeroed() };
    if unsafe { libc::uname(&mut uts) } != 0 {
        return None;
    }
    // SAFETY: uname NUL-terminates every field on success
    let machine = unsafe { std::ffi::CStr::from_ptr(uts.machine.as_ptr()) };
    Some(machine.to_string_lossy().into_owned())
}

#[cfg(not(unix))]
fn running_machine() -> Option<String> {
    None
}

/// An execution target: OS, architecture and optional variant
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Platform {
    os: Os,
    arch: Arch,
    variant: Option<String>,
}

impl Platform {
    /// Create a platform without a variant
    pub fn new(os: Os, arch: Arch) -> Self {
        Self {
            os,
            arch,
            variant: None,
        }
    }

    /// Create a platform with a validated variant
    pub fn with_variant(os: Os, arch: Arch, variant: &str) -> XplatResult<Self> {
        let variant = arch
            .normalize_variant(Some(variant))
            .map_err(|reason| XplatError::invalid_platform(format!("{}/{}/{}", os, arch, variant), reason))?;
        Ok(Self { os, arch, variant })
    }

    /// Parse `os/arch[/variant]`.
    ///
    /// Input is trimmed and lower-cased and architecture aliases are mapped
    /// to their canonical names (`x86_64` → `amd64`, `aarch64` → `arm64`).
    pub fn parse(text: &str) -> XplatResult<Self> {
        let normalized = text.trim().to_ascii_lowercase();
        let parts: Vec<&str> = normalized.split('/').collect();

        if !(2..=3).contains(&parts.len()) || parts.iter().any(|p| p.is_empty()) {
            return Err(XplatError::invalid_platform(text, UNKNOWN_PLATFORM));
        }

        let os = Os::from_name(parts[0])
            .ok_or_else(|| XplatError::invalid_platform(text, UNKNOWN_PLATFORM))?;
        let (arch, implied) = Arch::from_name(parts[1])
            .ok_or_else(|| XplatError::invalid_platform(text, UNKNOWN_PLATFORM))?;

        let requested = parts.get(2).copied();
        if let (Some(implied), Some(requested)) = (implied, requested) {
            if implied != requested {
                return Err(XplatError::invalid_platform(
                    text,
                    format!("architecture alias implies {} but variant is {}", implied, requested),
                ));
            }
        }

        let variant = arch
            .normalize_variant(requested.or(implied))
            .map_err(|reason| XplatError::invalid_platform(text, reason))?;

        Ok(Self { os, arch, variant })
    }

    /// Parse a comma separated platform list, rejecting duplicates
    pub fn parse_list(text: &str) -> XplatResult<Vec<Self>> {
        let mut seen = HashSet::new();
        let mut platforms = Vec::new();

        for item in text.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let platform = Self::parse(item)?;
            if !seen.insert(platform.clone()) {
                return Err(XplatError::DuplicatePlatform(platform));
            }
            platforms.push(platform);
        }

        if platforms.is_empty() {
            return Err(XplatError::User("at least one platform is required".to_string()));
        }

        Ok(platforms)
    }

    /// Operating system
    pub fn os(&self) -> Os {
        self.os
    }

    /// Architecture
    pub fn arch(&self) -> Arch {
        self.arch
    }

    /// Variant, if any
    pub fn variant(&self) -> Option<&str> {
        self.variant.as_deref()
    }

    /// True iff the architecture (and variant, when both name one) is identical.
    ///
    /// A platform that matches the host runs natively; anything else needs
    /// emulation.
    pub fn matches(&self, host: &Platform) -> bool {
        if self.arch != host.arch {
            return false;
        }
        match (&self.variant, &host.variant) {
            (Some(a), Some(b)) => a == b,
            _ => true,
        }
    }

    /// Whether processes for this platform can execute on `host` at all.
    ///
    /// A foreign architecture is emulated; a foreign OS family cannot be.
    pub fn supports_execution_on(&self, host: &Platform) -> bool {
        self.os == host.os
    }

    /// Platform the current process runs on
    pub fn host() -> Self {
        let os = Os::detect().unwrap_or(Os::Linux);
        Self::detected(os)
    }

    /// Default platform for containers on this host.
    ///
    /// Container runtimes on macOS and Windows run Linux guests, so the
    /// native container platform is always Linux on the host architecture.
    pub fn native() -> Self {
        Self::detected(Os::Linux)
    }

    fn detected(os: Os) -> Self {
        let (arch, variant) = Arch::detect().unwrap_or((Arch::Amd64, None));
        let variant = arch.normalize_variant(variant).ok().flatten();
        Self { os, arch, variant }
    }

    /// Curated list of commonly targeted platforms, in display order
    pub fn known() -> Vec<Self> {
        const KNOWN: &[&str] = &[
            "linux/amd64",
            "linux/amd64/v2",
            "linux/amd64/v3",
            "linux/arm64",
            "linux/arm/v6",
            "linux/arm/v7",
            "linux/386",
            "linux/s390x",
            "linux/ppc64le",
            "linux/riscv64",
            "windows/amd64",
            "windows/arm64",
            "darwin/amd64",
            "darwin/arm64",
            "freebsd/amd64",
        ];
        KNOWN
            .iter()
            .filter_map(|p| Self::parse(p).ok())
            .collect()
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.os, self.arch)?;
        if let Some(ref variant) = self.variant {
            write!(f, "/{}", variant)?;
        }
        Ok(())
    }
}

impl FromStr for Platform {
    type Err = XplatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Platform {
    type Error = XplatError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Platform> for String {
    fn from(platform: Platform) -> Self {
        platform.to_string()
    }
}
