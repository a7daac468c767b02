use std::fmt;

use anyhow::{bail, Context, Result};
use log::warn;

use crate::digest::DigestAlgorithm;
use crate::efivars::{EfiStubFeatures, LoaderVariables};
use crate::pcr::PcrIndex;
use crate::platform::Platform;

/// Something about the booted stub that makes the measurements questionable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StubWarning {
    /// The stub does not measure into all three PCRs.
    MissingThreePcrs,
    /// The stub measured into a different PCR than we expect.
    PcrIndexMismatch {
        role: PcrIndex,
        reported: u32,
        expected: u32,
    },
}

impl fmt::Display for StubWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StubWarning::MissingThreePcrs => write!(
                f,
                "Current kernel image does not support measuring itself, the command line or initrd system extension images. \
                 The PCR measurements seen are unlikely to be valid."
            ),
            StubWarning::PcrIndexMismatch {
                role,
                reported,
                expected,
            } => write!(
                f,
                "PCR number reported by stub for {} ({reported}) different from our expectation ({expected}). \
                 The measurements are likely inconsistent.",
                role.description()
            ),
        }
    }
}

/// Check that the running system can give meaningful answers about the stub's measurements.
///
/// Hard failures are returned as errors. Everything else is logged and returned as warnings,
/// it does not influence the reported values.
pub fn validate_stub(
    platform: &Platform,
    algorithms: &[DigestAlgorithm],
) -> Result<Vec<StubWarning>> {
    if !platform.has_full_tpm2_support()? {
        bail!("Sorry, system lacks full TPM2 support.");
    }

    let variables = LoaderVariables::new(platform);
    let mut warnings = Vec::new();

    let features = variables
        .stub_features()
        .context("Unable to get stub features")?;
    if !features.contains(EfiStubFeatures::ThreePcrs) {
        warnings.push(StubWarning::MissingThreePcrs);
    }

    for role in PcrIndex::ALL {
        if let Some(reported) = variables.reported_pcr(role)? {
            if reported != role.nr() {
                warnings.push(StubWarning::PcrIndexMismatch {
                    role,
                    reported,
                    expected: role.nr(),
                });
            }
        }
    }

    for warning in &warnings {
        warn!("Warning: {warning}");
    }

    let mut found = false;
    for algorithm in algorithms {
        let directory = platform.pcr_bank_dir(algorithm);
        match directory.try_exists() {
            Ok(true) => found = true,
            Ok(false) => log::debug!("PCR bank {} does not exist.", algorithm.bank()),
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("Failed to detect if {directory:?} exists")
                })
            }
        }
    }

    if !found {
        bail!("None of the selected PCR banks appear to exist.");
    }

    Ok(warnings)
}
