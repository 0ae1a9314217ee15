//! Versioned module artifacts
//!
//! Artifacts live in one directory and follow the naming convention
//! `<prefix><name>-<version><suffix>`, where prefix and suffix are the
//! platform's shared-library affixes (`libchat-1.4.0.so`, `chat-1.4.0.dll`).

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::cmp::Ordering;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{ModuleLoadError, ModuleLoadResult, IntoLoadReport};

/// Module version information
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModuleVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
    /// Pre-release tag (e.g., "alpha", "rc1")
    pub prerelease: Option<String>,
    pub build: Option<String>,
}

impl ModuleVersion {
    pub fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
            prerelease: None,
            build: None,
        }
    }

    /// Parse from string (e.g., "1.2.3-rc1+build7")
    pub fn parse(version: &str) -> Result<Self, ModuleLoadError> {
        let version = version.trim();
        let invalid = || ModuleLoadError::InvalidVersion(version.to_string());

        let (version_pre, build) = match version.split_once('+') {
            Some((head, build)) => (head, Some(build.to_string())),
            None => (version, None),
        };

        let (version_core, prerelease) = match version_pre.split_once('-') {
            Some((core, pre)) => (core, Some(pre.to_string())),
            None => (version_pre, None),
        };

        let parts: Vec<&str> = version_core.split('.').collect();
        if parts.len() < 2 || parts.len() > 3 {
            return Err(invalid());
        }

        let major = parts[0].parse::<u32>().map_err(|_| invalid())?;
        let minor = parts[1].parse::<u32>().map_err(|_| invalid())?;
        let patch = match parts.get(2) {
            Some(p) => p.parse::<u32>().map_err(|_| invalid())?,
            None => 0,
        };

        Ok(Self {
            major,
            minor,
            patch,
            prerelease,
            build,
        })
    }

    /// Same major version.
    pub fn is_compatible(&self, other: &ModuleVersion) -> bool {
        self.major == other.major
    }

    pub fn is_newer_than(&self, other: &ModuleVersion) -> bool {
        self > other
    }
}

impl Ord for ModuleVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.major, self.minor, self.patch)
            .cmp(&(other.major, other.minor, other.patch))
            .then_with(|| match (&self.prerelease, &other.prerelease) {
                (None, None) => Ordering::Equal,
                // a release outranks any of its pre-releases
                (None, Some(_)) => Ordering::Greater,
                (Some(_), None) => Ordering::Less,
                (Some(a), Some(b)) => a.cmp(b),
            })
            .then_with(|| self.build.cmp(&other.build))
    }
}

impl PartialOrd for ModuleVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl std::fmt::Display for ModuleVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if let Some(ref pre) = self.prerelease {
            write!(f, "-{}", pre)?;
        }
        if let Some(ref build) = self.build {
            write!(f, "+{}", build)?;
        }
        Ok(())
    }
}

impl Default for ModuleVersion {
    fn default() -> Self {
        Self::new(0, 0, 0)
    }
}

/// Identity of a loaded artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactInfo {
    pub path: PathBuf,
    pub name: String,
    pub version: ModuleVersion,
    /// Hex SHA-256 of the artifact bytes at load time.
    pub sha256: String,
    pub size: u64,
}

impl ArtifactInfo {
    /// Hash the file at `path` and record its identity.
    pub fn inspect(path: &Path, name: &str, version: ModuleVersion) -> ModuleLoadResult<Self> {
        let mut file = std::fs::File::open(path)
            .map_err(ModuleLoadError::from)
            .into_report()?;
        let mut hasher = Sha256::new();
        let mut buf = [0u8; 64 * 1024];
        let mut size = 0u64;
        loop {
            let read = file.read(&mut buf).map_err(ModuleLoadError::from).into_report()?;
            if read == 0 {
                break;
            }
            size += read as u64;
            hasher.update(&buf[..read]);
        }

        Ok(Self {
            path: path.to_path_buf(),
            name: name.to_string(),
            version,
            sha256: format!("{:x}", hasher.finalize()),
            size,
        })
    }
}

/// Resolves which artifact to load for a module name.
#[derive(Debug, Clone)]
pub struct ArtifactLocator {
    directory: PathBuf,
    name: String,
    pinned: Option<ModuleVersion>,
}

impl ArtifactLocator {
    pub fn new(directory: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        Self {
            directory: directory.into(),
            name: name.into(),
            pinned: None,
        }
    }

    /// Always load this exact version instead of the newest one.
    pub fn with_pinned_version(mut self, version: ModuleVersion) -> Self {
        self.pinned = Some(version);
        self
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn affixes() -> (&'static str, &'static str) {
        if cfg!(target_os = "windows") {
            ("", ".dll")
        } else if cfg!(target_os = "macos") {
            ("lib", ".dylib")
        } else {
            ("lib", ".so")
        }
    }

    /// File name of `version` under the naming convention.
    pub fn file_name(&self, version: &ModuleVersion) -> String {
        let (prefix, suffix) = Self::affixes();
        format!("{prefix}{}-{version}{suffix}", self.name)
    }

    /// Extract the version from a conforming file name.
    pub fn parse_file_name(&self, file_name: &str) -> Option<ModuleVersion> {
        let (prefix, suffix) = Self::affixes();
        let stem = file_name
            .strip_prefix(prefix)?
            .strip_suffix(suffix)?
            .strip_prefix(self.name.as_str())?
            .strip_prefix('-')?;
        ModuleVersion::parse(stem).ok()
    }

    /// All conforming artifacts in the directory, oldest first.
    pub fn candidates(&self) -> ModuleLoadResult<Vec<(ModuleVersion, PathBuf)>> {
        let entries = std::fs::read_dir(&self.directory)
            .map_err(ModuleLoadError::from)
            .into_report()?;

        let mut found = Vec::new();
        for entry in entries {
            let entry = entry.map_err(ModuleLoadError::from).into_report()?;
            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };
            if let Some(version) = self.parse_file_name(file_name) {
                found.push((version, entry.path()));
            } else {
                debug!(file = file_name, "Ignoring non-conforming file in artifact directory");
            }
        }
        found.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(found)
    }

    /// The artifact to load next: the pinned version, or the newest one.
    pub fn resolve(&self) -> ModuleLoadResult<(ModuleVersion, PathBuf)> {
        if let Some(pinned) = &self.pinned {
            let path = self.directory.join(self.file_name(pinned));
            if path.is_file() {
                return Ok((pinned.clone(), path));
            }
            return Err(ModuleLoadError::ArtifactNotFound {
                name: format!("{}-{}", self.name, pinned),
                directory: self.directory.clone(),
            })
            .into_report();
        }

        self.candidates()?
            .pop()
            .ok_or_else(|| ModuleLoadError::ArtifactNotFound {
                name: self.name.clone(),
                directory: self.directory.clone(),
            })
            .into_report()
    }
}
