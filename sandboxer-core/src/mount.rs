//! Project bind mount for a sandbox

use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};

/// Where the project directory appears inside every sandbox
pub const PROJECT_MOUNT_TARGET: &str = "/home/developer/project";

const SELINUX_FS: &str = "/sys/fs/selinux";

/// A host directory bind-mounted read-write into the sandbox
#[derive(Debug, Clone, PartialEq)]
pub struct MountPoint {
    /// Source path on host
    pub source: PathBuf,

    /// Target path in sandbox
    pub target: PathBuf,

    /// Relabel the source for the container (SELinux hosts)
    pub relabel: bool,
}

impl MountPoint {
    /// Mount `source` at [`PROJECT_MOUNT_TARGET`], relabelling when the host
    /// runs SELinux
    pub fn project<P: AsRef<Path>>(source: P) -> Self {
        Self {
            source: source.as_ref().to_path_buf(),
            target: PathBuf::from(PROJECT_MOUNT_TARGET),
            relabel: selinux_enabled(),
        }
    }

    /// Read-write bind mount without relabelling
    pub fn rw<P: AsRef<Path>>(source: P, target: P) -> Self {
        Self {
            source: source.as_ref().to_path_buf(),
            target: target.as_ref().to_path_buf(),
            relabel: false,
        }
    }

    /// Convert this mount point to container runtime arguments
    pub fn to_args(&self) -> Vec<OsString> {
        let mut volume = OsString::from(self.source.as_os_str());
        volume.push(":");
        volume.push(self.target.as_os_str());
        if self.relabel {
            volume.push(":Z");
        }
        vec!["-v".into(), volume]
    }
}

/// Whether the host has SELinux, in which case bind mounts need `:Z`
pub fn selinux_enabled() -> bool {
    Path::new(SELINUX_FS).join("enforce").exists()
}

/// Numeric owner and group of a host path
#[cfg(unix)]
pub fn owner(path: &Path) -> io::Result<(u32, u32)> {
    use std::os::unix::fs::MetadataExt;
    let meta = std::fs::metadata(path)?;
    Ok((meta.uid(), meta.gid()))
}

#[cfg(not(unix))]
pub fn owner(_path: &Path) -> io::Result<(u32, u32)> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "file ownership is only available on unix hosts",
    ))
}
