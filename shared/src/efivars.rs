use std::fs;
use std::io;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use bitflags::bitflags;

use crate::pcr::PcrIndex;
use crate::platform::Platform;

/// systemd loader's GUID
/// != systemd's GUID
/// https://github.com/systemd/systemd/blob/main/src/boot/efi/util.h#L114-L121
/// https://systemd.io/BOOT_LOADER_INTERFACE/
pub const BOOT_LOADER_VENDOR_UUID: &str = "4a67b082-0a4c-41cf-b6c7-440b29bb8c4f";

/// efivarfs prefixes the variable data with the 32 bit attributes.
const ATTRIBUTES_SIZE: usize = 4;

bitflags! {
    #[repr(transparent)]
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    /// Feature flags as described in https://www.freedesktop.org/software/systemd/man/systemd-stub.html
    pub struct EfiStubFeatures: u64 {
       /// Is `LoaderDevicePartUUID` loaded in UEFI variables?
       const ReportBootPartition = 1 << 0;
       /// Are credentials picked up from the boot partition?
       const PickUpCredentials = 1 << 1;
       /// Are system extensions picked up from the boot partition?
       const PickUpSysExts = 1 << 2;
       /// Are we able to measure kernel image, parameters and sysexts?
       const ThreePcrs = 1 << 3;
       /// Can we pass a random seed to the kernel?
       const RandomSeed = 1 << 4;
       /// Are `.cmdline` addons picked up?
       const CmdlineAddons = 1 << 5;
       /// Is the kernel command line extended from SMBIOS Type #11?
       const CmdlineSmbios = 1 << 6;
       /// Are `.dtb` addons picked up?
       const DevicetreeAddons = 1 << 7;
    }
}

/// Read-only view on the variables of the boot loader vendor.
pub struct LoaderVariables {
    directory: PathBuf,
}

impl LoaderVariables {
    pub fn new(platform: &Platform) -> Self {
        Self {
            directory: platform.efivars(),
        }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.directory
            .join(format!("{name}-{BOOT_LOADER_VENDOR_UUID}"))
    }

    /// Read the data of a variable, without the attributes.
    ///
    /// Returns `None` if the variable does not exist.
    pub fn get(&self, name: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path(name);
        let raw = match fs::read(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).with_context(|| format!("Failed to read EFI variable {path:?}")),
        };

        if raw.len() < ATTRIBUTES_SIZE {
            bail!("EFI variable {path:?} is too short ({} bytes).", raw.len());
        }

        Ok(Some(raw[ATTRIBUTES_SIZE..].to_vec()))
    }

    /// Read a variable holding a NUL terminated UTF-16LE string.
    pub fn get_string(&self, name: &str) -> Result<Option<String>> {
        match self.get(name)? {
            Some(data) => Ok(Some(
                decode_utf16le(&data)
                    .with_context(|| format!("EFI variable '{name}' is not a valid string"))?,
            )),
            None => Ok(None),
        }
    }

    /// The features the stub that booted the running system announced.
    ///
    /// Stubs that predate `StubFeatures` only set `StubInfo`, they implicitly support
    /// reporting the boot partition. Without both variables no stub was involved at all.
    pub fn stub_features(&self) -> Result<EfiStubFeatures> {
        match self.get("StubFeatures")? {
            Some(data) => {
                let bytes: [u8; 8] = data.as_slice().try_into().map_err(|_| {
                    anyhow::anyhow!(
                        "EFI variable 'StubFeatures' has unexpected size {} (expected 8).",
                        data.len()
                    )
                })?;
                Ok(EfiStubFeatures::from_bits_retain(u64::from_le_bytes(bytes)))
            }
            None if self.get("StubInfo")?.is_some() => Ok(EfiStubFeatures::ReportBootPartition),
            None => Ok(EfiStubFeatures::empty()),
        }
    }

    /// The PCR the stub reported for the given role, if any.
    ///
    /// systemd-stub stores the number as a decimal UTF-16 string, the lanzaboote stub in some
    /// versions as a raw little endian `u32`. Both are understood.
    pub fn reported_pcr(&self, role: PcrIndex) -> Result<Option<u32>> {
        let name = role.efi_variable();
        let Some(data) = self.get(name)? else {
            return Ok(None);
        };

        if let Ok(text) = decode_utf16le(&data) {
            if let Ok(nr) = text.trim().parse::<u32>() {
                return Ok(Some(nr));
            }
        }

        if let Ok(bytes) = <[u8; 4]>::try_from(data.as_slice()) {
            log::debug!("EFI variable '{name}' holds a binary PCR number.");
            return Ok(Some(u32::from_le_bytes(bytes)));
        }

        bail!("Failed to parse EFI variable '{name}': {}", hex::encode(&data));
    }
}

fn decode_utf16le(data: &[u8]) -> Result<String> {
    if data.len() % 2 != 0 {
        bail!("Odd number of bytes in UTF-16 string.");
    }

    let units: Vec<u16> = data
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .take_while(|unit| *unit != 0)
        .collect();

    Ok(String::from_utf16(&units)?)
}
