use std::fs::File;
use std::io::{ErrorKind, Read};

use anyhow::{Context, Result};
use log::info;

use crate::bank::PcrBank;
use crate::digest::BankHasher;
use crate::section::SectionPaths;

const BUFFER_SIZE: usize = 16 * 1024;

/// Replay the measurements the stub makes into PCR 11.
///
/// Per the [UKI specification](https://uapi-group.org/specifications/specs/unified_kernel_image/#uki-tpm-pcr-measurements):
/// "For each section two measurements shall be made into PCR 11 with the event code EV_IPL:
///
/// 1. The section name in ASCII (including one trailing NUL byte)
/// 2. The (binary) section contents"
///
/// Sections are measured in canonical order, no matter in which order they were configured.
/// Sections without a file and sections with an empty file are skipped, the stub does the same.
///
/// Returns the number of measured sections.
pub fn measure_sections(banks: &mut [PcrBank], sections: &SectionPaths) -> Result<u32> {
    let mut buffer = vec![0u8; BUFFER_SIZE];
    let mut measured = 0;

    for (section, path) in sections.iter() {
        let mut file =
            File::open(path).with_context(|| format!("Failed to open '{}'", path.display()))?;

        // One pass over the file feeds every bank.
        let mut hashers: Vec<Box<dyn BankHasher>> = banks
            .iter()
            .map(|bank| bank.algorithm().hasher())
            .collect();
        let mut size: u64 = 0;

        loop {
            let read = match file.read(&mut buffer) {
                Ok(0) => break,
                Ok(read) => read,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    return Err(e).with_context(|| format!("Failed to read '{}'", path.display()))
                }
            };

            for hasher in hashers.iter_mut() {
                hasher.update(&buffer[..read]);
            }
            size += read as u64;
        }

        if size == 0 {
            info!("Skipping empty section `{}`.", section.name());
            continue;
        }

        info!(
            "Measuring section `{}` ({size} bytes from '{}')...",
            section.name(),
            path.display()
        );

        let name = section.measured_name();
        for (bank, hasher) in banks.iter_mut().zip(hashers) {
            let name_digest = bank.algorithm().digest(&name);
            bank.extend(&name_digest);
            bank.extend(&hasher.finalize());
        }

        measured += 1;
    }

    Ok(measured)
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::{Path, PathBuf};

    use sha2::{Digest, Sha256};
    use tempfile::{tempdir, TempDir};

    use super::*;
    use crate::digest::{DigestAlgorithm, SHA1, SHA256, SHA384, SHA512};
    use crate::section::UnifiedSection;

    fn write(dir: &TempDir, name: &str, contents: &[u8]) -> Result<PathBuf> {
        let path = dir.path().join(name);
        fs::write(&path, contents)?;
        Ok(path)
    }

    fn run(algorithms: &[DigestAlgorithm], sections: &SectionPaths) -> Result<Vec<PcrBank>> {
        let mut banks: Vec<_> = algorithms.iter().copied().map(PcrBank::new).collect();
        measure_sections(&mut banks, sections)?;
        Ok(banks)
    }

    /// Independent reference for the value of PCR 11 with SHA256.
    fn reference_sha256(measurements: &[(&str, &[u8])]) -> Vec<u8> {
        let mut pcr = vec![0u8; 32];
        for (name, contents) in measurements {
            let name_digest = Sha256::digest(format!("{name}\0"));
            pcr = Sha256::new()
                .chain_update(&pcr)
                .chain_update(name_digest)
                .finalize()
                .to_vec();
            pcr = Sha256::new()
                .chain_update(&pcr)
                .chain_update(Sha256::digest(contents))
                .finalize()
                .to_vec();
        }
        pcr
    }

    #[test]
    fn matches_reference_chain() -> Result<()> {
        let dir = tempdir()?;
        let sections = SectionPaths::new()
            .with(UnifiedSection::Linux, write(&dir, "kernel", b"kernel image")?)
            .with(UnifiedSection::CmdLine, write(&dir, "cmdline", b"quiet splash")?);

        let banks = run(&[SHA256], &sections)?;

        assert_eq!(
            banks[0].value(),
            reference_sha256(&[
                (".linux", &b"kernel image"[..]),
                (".cmdline", &b"quiet splash"[..]),
            ])
        );
        Ok(())
    }

    #[test]
    fn empty_kernel_and_initrd_scenario() -> Result<()> {
        let dir = tempdir()?;
        let kernel = b"0123456789";
        let sections = SectionPaths::new()
            .with(UnifiedSection::Initrd, write(&dir, "initrd", b"")?)
            .with(UnifiedSection::Linux, write(&dir, "kernel", kernel)?);

        let mut banks = vec![PcrBank::new(SHA256)];
        let measured = measure_sections(&mut banks, &sections)?;

        let first = Sha256::new()
            .chain_update([0u8; 32])
            .chain_update(Sha256::digest(b".linux\0"))
            .finalize();
        let expected = Sha256::new()
            .chain_update(first)
            .chain_update(Sha256::digest(kernel))
            .finalize();

        assert_eq!(measured, 1);
        assert_eq!(banks[0].value(), expected.as_slice());
        Ok(())
    }

    #[test]
    fn empty_file_is_like_no_file() -> Result<()> {
        let dir = tempdir()?;
        let kernel = write(&dir, "kernel", b"kernel")?;
        let splash = write(&dir, "splash", b"")?;

        let without = run(
            &[SHA256, SHA1],
            &SectionPaths::new().with(UnifiedSection::Linux, &kernel),
        )?;
        let with = run(
            &[SHA256, SHA1],
            &SectionPaths::new()
                .with(UnifiedSection::Linux, &kernel)
                .with(UnifiedSection::Splash, &splash),
        )?;

        for (a, b) in without.iter().zip(&with) {
            assert_eq!(a.value(), b.value());
            assert_eq!(a.extensions(), b.extensions());
        }
        Ok(())
    }

    #[test]
    fn two_extends_per_section() -> Result<()> {
        let dir = tempdir()?;
        let sections =
            SectionPaths::new().with(UnifiedSection::OsRel, write(&dir, "osrel", b"ID=lanza\n")?);

        let banks = run(&[SHA384], &sections)?;
        assert_eq!(banks[0].extensions(), 2);
        Ok(())
    }

    #[test]
    fn nothing_configured_leaves_banks_untouched() -> Result<()> {
        let banks = run(&[SHA256], &SectionPaths::new())?;
        assert_eq!(banks[0].value(), [0u8; 32]);
        assert_eq!(banks[0].extensions(), 0);
        Ok(())
    }

    #[test]
    fn configuration_order_does_not_matter() -> Result<()> {
        let dir = tempdir()?;
        let files: Vec<(UnifiedSection, PathBuf)> = UnifiedSection::ALL
            .iter()
            .map(|section| -> Result<(UnifiedSection, PathBuf)> {
                let contents = format!("contents of {}", section.name());
                Ok((*section, write(&dir, &section.name()[1..], contents.as_bytes())?))
            })
            .collect::<Result<_>>()?;

        let forward = files
            .iter()
            .fold(SectionPaths::new(), |paths, (s, p)| paths.with(*s, p));
        let backward = files
            .iter()
            .rev()
            .fold(SectionPaths::new(), |paths, (s, p)| paths.with(*s, p));

        let a = run(&[SHA256, SHA512], &forward)?;
        let b = run(&[SHA256, SHA512], &backward)?;
        assert_eq!(a[0].value(), b[0].value());
        assert_eq!(a[1].value(), b[1].value());
        Ok(())
    }

    #[test]
    fn banks_are_independent() -> Result<()> {
        let dir = tempdir()?;
        let sections = SectionPaths::new()
            .with(UnifiedSection::Linux, write(&dir, "kernel", b"kernel")?)
            .with(UnifiedSection::Dtb, write(&dir, "dtb", b"\xd0\x0d\xfe\xed")?);

        let alone = run(&[SHA256], &sections)?;
        let together = run(&[SHA256, SHA512], &sections)?;
        assert_eq!(alone[0].value(), together[0].value());
        Ok(())
    }

    #[test]
    fn deterministic_and_sensitive_to_every_byte() -> Result<()> {
        let dir = tempdir()?;
        let original = vec![0x5a; 3 * BUFFER_SIZE + 17];
        let mut flipped = original.clone();
        flipped[2 * BUFFER_SIZE + 3] ^= 1;

        let sections = |name: &str, contents: &[u8]| -> Result<SectionPaths> {
            Ok(SectionPaths::new().with(UnifiedSection::Initrd, write(&dir, name, contents)?))
        };

        let first = run(&[SHA1, SHA256], &sections("a", &original)?)?;
        let second = run(&[SHA1, SHA256], &sections("b", &original)?)?;
        let changed = run(&[SHA1, SHA256], &sections("c", &flipped)?)?;

        for i in 0..2 {
            assert_eq!(first[i].value(), second[i].value());
            assert_ne!(first[i].value(), changed[i].value());
        }
        Ok(())
    }

    #[test]
    fn large_file_matches_single_shot_digest() -> Result<()> {
        let dir = tempdir()?;
        let contents: Vec<u8> = (0..5 * BUFFER_SIZE + 1).map(|i| i as u8).collect();
        let sections =
            SectionPaths::new().with(UnifiedSection::Linux, write(&dir, "kernel", &contents)?);

        let banks = run(&[SHA256], &sections)?;
        assert_eq!(banks[0].value(), reference_sha256(&[(".linux", contents.as_slice())]));
        Ok(())
    }

    #[test]
    fn missing_file_aborts() -> Result<()> {
        let dir = tempdir()?;
        let missing = dir.path().join("does-not-exist");
        let sections = SectionPaths::new()
            .with(UnifiedSection::Linux, write(&dir, "kernel", b"kernel")?)
            .with(UnifiedSection::Initrd, &missing);

        let mut banks = vec![PcrBank::new(SHA256)];
        let err = measure_sections(&mut banks, &sections).unwrap_err();
        assert!(err.to_string().contains("Failed to open"));
        assert!(err.to_string().contains(&missing.display().to_string()));
        Ok(())
    }

    /// A hash that just sums up bytes, so values can be worked out by hand.
    struct ByteSum(u8);

    impl BankHasher for ByteSum {
        fn update(&mut self, data: &[u8]) {
            for byte in data {
                self.0 = self.0.wrapping_add(*byte);
            }
        }

        fn finalize(self: Box<Self>) -> Vec<u8> {
            vec![self.0]
        }
    }

    fn byte_sum() -> Box<dyn BankHasher> {
        Box::new(ByteSum(0))
    }

    #[test]
    fn works_with_any_provider() -> Result<()> {
        let dir = tempdir()?;
        let sections =
            SectionPaths::new().with(UnifiedSection::CmdLine, write(&dir, "cmdline", &[1, 2, 3])?);
        let fake = DigestAlgorithm::new("SUM8", 1, byte_sum);

        let banks = run(&[fake], &sections)?;

        let name_sum = b".cmdline".iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
        // 0 + sum(name), then + sum(contents)
        assert_eq!(banks[0].value(), [name_sum.wrapping_add(6)]);
        Ok(())
    }

    #[test]
    fn reading_a_directory_fails() -> Result<()> {
        let dir = tempdir()?;
        let sections = SectionPaths::new().with(UnifiedSection::Linux, Path::new(dir.path()));
        let mut banks = vec![PcrBank::new(SHA256)];
        assert!(measure_sections(&mut banks, &sections).is_err());
        Ok(())
    }
}
