use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use anyhow::{bail, Context, Result};

use crate::digest::DigestAlgorithm;
use crate::pcr::PcrIndex;
use crate::platform::Platform;

/// sysfs PCR files are tiny, anything beyond this is not a PCR value.
const MAX_PCR_FILE_SIZE: u64 = 4096;

/// A PCR value as reported by the kernel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrentPcr {
    pub index: PcrIndex,
    pub value: Vec<u8>,
}

/// The outcome of reading one bank.
#[derive(Debug)]
pub struct BankReading {
    pub algorithm: DigestAlgorithm,
    pub result: Result<Vec<CurrentPcr>>,
}

/// Read the current value of a single PCR from sysfs.
///
/// Returns `None` if the kernel does not expose this PCR.
pub fn read_pcr(
    platform: &Platform,
    algorithm: &DigestAlgorithm,
    index: PcrIndex,
) -> Result<Option<Vec<u8>>> {
    let path = platform.pcr_path(algorithm, index);

    let contents = match read_virtual_file(&path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e).with_context(|| format!("Failed to read {path:?}")),
    };

    let value = hex::decode(contents.trim())
        .with_context(|| format!("Failed to decode PCR value '{}' from {path:?}", contents.trim()))?;

    assert_eq!(
        value.len(),
        algorithm.digest_size(),
        "{path:?} holds a value that does not match the {algorithm} digest size"
    );

    Ok(Some(value))
}

/// Read all the given PCRs of one bank.
///
/// PCRs the kernel does not expose are left out. Any other failure fails the bank.
pub fn read_bank(
    platform: &Platform,
    algorithm: &DigestAlgorithm,
    indices: &[PcrIndex],
) -> Result<Vec<CurrentPcr>> {
    let mut pcrs = Vec::with_capacity(indices.len());
    for &index in indices {
        if let Some(value) = read_pcr(platform, algorithm, index)? {
            pcrs.push(CurrentPcr { index, value });
        }
    }
    Ok(pcrs)
}

/// Read the given PCRs of every bank.
///
/// A failing bank does not stop the other banks from being read, its error is kept in the
/// corresponding [`BankReading`].
pub fn read_banks(
    platform: &Platform,
    algorithms: &[DigestAlgorithm],
    indices: &[PcrIndex],
) -> Vec<BankReading> {
    algorithms
        .iter()
        .map(|algorithm| BankReading {
            algorithm: *algorithm,
            result: read_bank(platform, algorithm, indices),
        })
        .collect()
}

fn read_virtual_file(path: &Path) -> io::Result<String> {
    let mut contents = String::new();
    let read = File::open(path)?
        .take(MAX_PCR_FILE_SIZE + 1)
        .read_to_string(&mut contents)?;

    if read as u64 > MAX_PCR_FILE_SIZE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("file exceeds {MAX_PCR_FILE_SIZE} bytes"),
        ));
    }

    Ok(contents)
}

/// Load the current value of a PCR into a starting point for further extends.
pub fn require_pcr(
    platform: &Platform,
    algorithm: &DigestAlgorithm,
    index: PcrIndex,
) -> Result<Vec<u8>> {
    match read_pcr(platform, algorithm, index)? {
        Some(value) => Ok(value),
        None => bail!(
            "PCR {index} of bank {} is not exposed at {:?}.",
            algorithm.bank(),
            platform.pcr_path(algorithm, index)
        ),
    }
}
