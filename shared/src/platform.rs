use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::digest::DigestAlgorithm;
use crate::pcr::PcrIndex;

/// The environment variable that relocates all sysfs and efivarfs accesses.
pub const SYSFS_ROOT_ENV: &str = "LZBT_SYSFS_ROOT";

/// Locations of the kernel interfaces this tool reads from.
///
/// Everything is resolved below a root directory, which is `/` on a real system. Tests point
/// the root at a temporary directory that mimics the relevant parts of sysfs.
#[derive(Debug, Clone)]
pub struct Platform {
    root: PathBuf,
}

impl Platform {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The running system, unless relocated via [`SYSFS_ROOT_ENV`].
    pub fn from_env() -> Self {
        match std::env::var_os(SYSFS_ROOT_ENV) {
            Some(root) => Self::new(root),
            None => Self::new("/"),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn tpm(&self) -> PathBuf {
        self.root.join("sys/class/tpm/tpm0")
    }

    /// `/sys/class/tpm/tpm0/pcr-<bank>`
    pub fn pcr_bank_dir(&self, algorithm: &DigestAlgorithm) -> PathBuf {
        self.tpm().join(format!("pcr-{}", algorithm.bank()))
    }

    /// `/sys/class/tpm/tpm0/pcr-<bank>/<index>`
    pub fn pcr_path(&self, algorithm: &DigestAlgorithm, index: PcrIndex) -> PathBuf {
        self.pcr_bank_dir(algorithm).join(index.nr().to_string())
    }

    pub fn efivars(&self) -> PathBuf {
        self.root.join("sys/firmware/efi/efivars")
    }

    /// Whether the system was booted via UEFI.
    pub fn is_efi_boot(&self) -> bool {
        self.root.join("sys/firmware/efi").is_dir()
    }

    /// Whether the firmware provides a TPM2.
    ///
    /// Either the firmware event log has been handed over to the kernel or ACPI announces a TPM2.
    pub fn firmware_has_tpm2(&self) -> bool {
        self.is_efi_boot()
            && (self
                .root
                .join("sys/kernel/security/tpm0/binary_bios_measurements")
                .exists()
                || self.root.join("sys/firmware/acpi/tables/TPM2").exists())
    }

    /// Whether the kernel exposes a TPM2 resource manager.
    pub fn driver_has_tpm2(&self) -> Result<bool> {
        let tpmrm = self.root.join("sys/class/tpmrm");
        match fs::read_dir(&tpmrm) {
            Ok(mut entries) => Ok(entries.next().is_some()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e).with_context(|| format!("Failed to list {tpmrm:?}")),
        }
    }

    pub fn has_full_tpm2_support(&self) -> Result<bool> {
        Ok(self.firmware_has_tpm2() && self.driver_has_tpm2()?)
    }
}
