//! Platform table for cross-compiling the server

/// A Go `GOOS`/`GOARCH` pair the server can be built for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildTarget {
    /// Value for `GOOS` (e.g., "linux", "windows")
    pub os: &'static str,
    /// Value for `GOARCH` (e.g., "amd64", "arm64")
    pub arch: &'static str,
    /// Executable suffix on this platform
    pub extension: &'static str,
}

const SUPPORTED: &[BuildTarget] = &[
    BuildTarget { os: "linux", arch: "amd64", extension: "" },
    BuildTarget { os: "linux", arch: "arm64", extension: "" },
    BuildTarget { os: "darwin", arch: "amd64", extension: "" },
    BuildTarget { os: "darwin", arch: "arm64", extension: "" },
    BuildTarget { os: "windows", arch: "amd64", extension: ".exe" },
    BuildTarget { os: "windows", arch: "arm64", extension: ".exe" },
];

impl BuildTarget {
    pub const LINUX_AMD64: BuildTarget = SUPPORTED[0];
    pub const WINDOWS_AMD64: BuildTarget = SUPPORTED[4];

    /// Look up a target, accepting Rust-style spellings too ("macos", "x86_64")
    pub fn from_os_arch(os: &str, arch: &str) -> Result<Self, String> {
        let os = match os {
            "macos" => "darwin",
            other => other,
        };
        let arch = match arch {
            "x86_64" => "amd64",
            "aarch64" => "arm64",
            other => other,
        };
        SUPPORTED
            .iter()
            .find(|target| target.os == os && target.arch == arch)
            .copied()
            .ok_or_else(|| {
                format!(
                    "Unsupported platform: {}-{}\nSupported platforms: {}",
                    os,
                    arch,
                    Self::supported_names().join(", ")
                )
            })
    }

    pub fn supported_names() -> Vec<String> {
        SUPPORTED
            .iter()
            .map(|target| format!("{}-{}", target.os, target.arch))
            .collect()
    }

    /// Output directory name for this target, e.g. `server_linux_amd64`
    pub fn output_dir(&self, binary: &str) -> String {
        format!("{}_{}_{}", binary, self.os, self.arch)
    }

    pub fn executable(&self, binary: &str) -> String {
        format!("{}{}", binary, self.extension)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linux_amd64() {
        let target = BuildTarget::from_os_arch("linux", "amd64").unwrap();
        assert_eq!(target, BuildTarget::LINUX_AMD64);
        assert_eq!(target.output_dir("server"), "server_linux_amd64");
        assert_eq!(target.executable("server"), "server");
    }

    #[test]
    fn test_rust_spellings_are_accepted() {
        let target = BuildTarget::from_os_arch("macos", "aarch64").unwrap();
        assert_eq!(target.os, "darwin");
        assert_eq!(target.arch, "arm64");
    }

    #[test]
    fn test_windows_executable_suffix() {
        assert_eq!(BuildTarget::WINDOWS_AMD64.executable("server"), "server.exe");
    }

    #[test]
    fn test_unsupported_platform() {
        let err = BuildTarget::from_os_arch("plan9", "mips").unwrap_err();
        assert!(err.contains("Unsupported platform"));
        assert!(err.contains("linux-amd64"));
    }
}
