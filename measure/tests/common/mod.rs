// Utility code in this module can become marked as dead code if it is not used in every single
// module in `tests/`. Thus we need to allow dead code here. See
// https://stackoverflow.com/a/67902444
#![allow(dead_code)]

use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Output;

use anyhow::Result;
use assert_cmd::Command;

/// Vendor GUID of the variables the stub and boot loader publish.
const LOADER_GUID: &str = "4a67b082-0a4c-41cf-b6c7-440b29bb8c4f";

/// `EFI_STUB_FEATURE_THREE_PCRS`
pub const STUB_FEATURE_THREE_PCRS: u64 = 1 << 3;

/// Call `lzbt-measure` with the given arguments.
///
/// If `sysfs_root` is set, all sysfs and efivarfs accesses are redirected to it.
pub fn lzbt_measure(
    sysfs_root: Option<&Path>,
    args: impl IntoIterator<Item = impl AsRef<OsStr>>,
) -> Result<Output> {
    let mut cmd = Command::cargo_bin("lzbt-measure")?;
    if let Some(root) = sysfs_root {
        cmd.env("LZBT_SYSFS_ROOT", root);
    }
    let output = cmd.args(args).output()?;

    // Print debugging output.
    // This is a weird hack to make cargo test capture the output.
    // See https://github.com/rust-lang/rust/issues/12309
    print!("{}", String::from_utf8(output.stdout.clone())?);
    print!("{}", String::from_utf8(output.stderr.clone())?);

    Ok(output)
}

pub fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

pub fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

/// Write the unified sections of a small mock UKI into `tmpdir`.
///
/// Returns the arguments that pass them to `calculate`.
pub fn setup_sections(tmpdir: &Path) -> Result<Vec<String>> {
    let sections: [(&str, &[u8]); 4] = [
        ("linux", b"kernel image"),
        ("osrel", b"ID=lanza\nPRETTY_NAME=\"LanzaOS\"\n"),
        ("cmdline", b"init=/nix/store/init quiet"),
        ("initrd", b"initrd contents"),
    ];

    let mut args = Vec::new();
    for (name, contents) in sections {
        let path = tmpdir.join(name);
        fs::write(&path, contents)?;
        args.push(format!("--{name}={}", path.display()));
    }
    Ok(args)
}

/// A directory that mimics the parts of sysfs and efivarfs of a system booted via a UKI.
pub struct FakeSysfs {
    root: PathBuf,
}

impl FakeSysfs {
    /// An EFI system with a TPM2 whose stub measured into the three PCRs.
    pub fn with_tpm2(root: &Path) -> Result<Self> {
        let sysfs = Self {
            root: root.to_path_buf(),
        };
        fs::create_dir_all(sysfs.efivars())?;
        fs::create_dir_all(root.join("sys/firmware/acpi/tables"))?;
        fs::write(root.join("sys/firmware/acpi/tables/TPM2"), b"")?;
        fs::create_dir_all(root.join("sys/class/tpmrm/tpmrm0"))?;
        sysfs.set_stub_features(STUB_FEATURE_THREE_PCRS)?;
        Ok(sysfs)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn efivars(&self) -> PathBuf {
        self.root.join("sys/firmware/efi/efivars")
    }

    pub fn set_variable(&self, name: &str, data: &[u8]) -> Result<()> {
        let mut raw = vec![0x06, 0, 0, 0];
        raw.extend_from_slice(data);
        fs::write(self.efivars().join(format!("{name}-{LOADER_GUID}")), raw)?;
        Ok(())
    }

    pub fn set_stub_features(&self, features: u64) -> Result<()> {
        self.set_variable("StubFeatures", &features.to_le_bytes())
    }

    /// Publish the PCR the stub claims to have measured into, as a UTF-16 string.
    pub fn set_reported_pcr(&self, variable: &str, nr: u32) -> Result<()> {
        let data: Vec<u8> = nr
            .to_string()
            .encode_utf16()
            .chain([0])
            .flat_map(|c| c.to_le_bytes())
            .collect();
        self.set_variable(variable, &data)
    }

    /// Expose a PCR value the way the kernel does, as hex with a trailing newline.
    pub fn set_pcr(&self, bank: &str, nr: u32, contents: &str) -> Result<()> {
        let directory = self.bank_dir(bank);
        fs::create_dir_all(&directory)?;
        fs::write(directory.join(nr.to_string()), format!("{contents}\n"))?;
        Ok(())
    }

    pub fn bank_dir(&self, bank: &str) -> PathBuf {
        self.root.join(format!("sys/class/tpm/tpm0/pcr-{bank}"))
    }
}
