use anyhow::{bail, Result};
use log::{error, info};

use crate::bank::PcrBank;
use crate::current::{read_banks, require_pcr};
use crate::digest::DigestAlgorithm;
use crate::measure::measure_sections;
use crate::pcr::PcrIndex;
use crate::platform::Platform;
use crate::report::MeasurementReport;
use crate::section::{SectionPaths, UnifiedSection};
use crate::validate::{validate_stub, StubWarning};

/// Where the starting values of the PCR banks come from.
#[derive(Debug)]
pub enum PcrSource {
    /// Replay the stub's measurements of these files on top of zeroed PCRs.
    Sections(SectionPaths),
    /// Take the value of PCR 11 the running system reports.
    Current(Platform),
}

impl PcrSource {
    /// Check the combination of `--current` and section paths.
    pub fn new(sections: SectionPaths, current: Option<Platform>) -> Result<Self> {
        match current {
            Some(_) if !sections.is_empty() => bail!(
                "The --current switch cannot be used in combination with --linux= and related switches."
            ),
            Some(platform) => Ok(Self::Current(platform)),
            None if sections.get(UnifiedSection::Linux).is_none() => {
                bail!("Either --linux= or --current must be specified, refusing.")
            }
            None => Ok(Self::Sections(sections)),
        }
    }
}

/// Pre-calculate the value of PCR 11 for every bank.
pub fn calculate(algorithms: &[DigestAlgorithm], source: &PcrSource) -> Result<MeasurementReport> {
    let banks = match source {
        PcrSource::Sections(sections) => {
            let mut banks: Vec<PcrBank> = algorithms.iter().copied().map(PcrBank::new).collect();
            let measured = measure_sections(&mut banks, sections)?;
            info!("Measured {measured} sections.");
            banks
        }
        PcrSource::Current(platform) => algorithms
            .iter()
            .map(|algorithm| {
                let value = require_pcr(platform, algorithm, PcrIndex::KernelImage)?;
                Ok(PcrBank::with_value(*algorithm, value))
            })
            .collect::<Result<Vec<_>>>()?,
    };

    Ok(MeasurementReport::from_banks(&banks))
}

/// The outcome of `status`.
#[derive(Debug)]
pub struct Status {
    pub report: MeasurementReport,
    pub warnings: Vec<StubWarning>,
    /// Banks that could not be read, the report lacks their values.
    pub failed_banks: Vec<String>,
}

/// Read the PCRs the stub measures into, after making sure the stub and the TPM can be trusted
/// to have produced meaningful values.
pub fn status(platform: &Platform, algorithms: &[DigestAlgorithm]) -> Result<Status> {
    let warnings = validate_stub(platform, algorithms)?;

    let readings = read_banks(platform, algorithms, &PcrIndex::ALL);
    let mut failed_banks = Vec::new();
    for reading in &readings {
        if let Err(e) = &reading.result {
            error!("Failed to read PCR bank {}: {e:#}", reading.algorithm.bank());
            failed_banks.push(reading.algorithm.bank());
        }
    }

    Ok(Status {
        report: MeasurementReport::from_readings(&readings),
        warnings,
        failed_banks,
    })
}
