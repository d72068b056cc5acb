//! Host platform identification.

use std::fmt;

/// Platform that owns platform-conditional options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Platform {
    Windows,
    MacOs,
    Linux,
    Other,
}

impl Platform {
    pub fn current() -> Self {
        if cfg!(target_os = "windows") {
            Self::Windows
        } else if cfg!(target_os = "macos") {
            Self::MacOs
        } else if cfg!(target_os = "linux") {
            Self::Linux
        } else {
            Self::Other
        }
    }

    pub fn is_windows(self) -> bool {
        self == Self::Windows
    }

    /// File name of the launcher script for an artifact named `stem`.
    pub fn launcher_file_name(self, stem: &str) -> String {
        if self.is_windows() {
            format!("{stem}.bat")
        } else {
            format!("{stem}.sh")
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Windows => "windows",
            Self::MacOs => "macos",
            Self::Linux => "linux",
            Self::Other => "other",
        };
        f.write_str(name)
    }
}
