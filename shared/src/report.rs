use std::collections::BTreeMap;

use anyhow::Result;
use serde::Serialize;

use crate::bank::PcrBank;
use crate::current::BankReading;
use crate::pcr::PcrIndex;

/// One PCR value of one bank.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PcrRecord {
    pub bank: String,
    pub index: PcrIndex,
    pub hash: Vec<u8>,
}

impl PcrRecord {
    /// A PCR that was never extended.
    pub fn is_unset(&self) -> bool {
        self.hash.iter().all(|b| *b == 0)
    }

    /// `11:sha256=<hex>`
    pub fn to_line(&self) -> String {
        format!("{}:{}={}", self.index.nr(), self.bank, hex::encode(&self.hash))
    }
}

/// The JSON representation of a record, grouped under its bank name.
#[derive(Serialize)]
struct JsonRecord<'a> {
    pcr: u32,
    #[serde(with = "hex::serde")]
    hash: &'a [u8],
}

/// The final PCR values, ordered by PCR index and then bank name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MeasurementReport {
    records: Vec<PcrRecord>,
}

impl MeasurementReport {
    pub fn from_records(mut records: Vec<PcrRecord>) -> Self {
        records.sort_by(|a, b| (a.index, &a.bank).cmp(&(b.index, &b.bank)));
        Self { records }
    }

    /// The predicted values of PCR 11, one per bank.
    pub fn from_banks(banks: &[PcrBank]) -> Self {
        Self::from_records(
            banks
                .iter()
                .map(|bank| PcrRecord {
                    bank: bank.bank(),
                    index: PcrIndex::KernelImage,
                    hash: bank.value().to_vec(),
                })
                .collect(),
        )
    }

    /// The values of all banks that could be read.
    pub fn from_readings(readings: &[BankReading]) -> Self {
        let records = readings
            .iter()
            .filter_map(|reading| {
                let pcrs = reading.result.as_ref().ok()?;
                Some(pcrs.iter().map(move |pcr| PcrRecord {
                    bank: reading.algorithm.bank(),
                    index: pcr.index,
                    hash: pcr.value.clone(),
                }))
            })
            .flatten()
            .collect();
        Self::from_records(records)
    }

    pub fn records(&self) -> &[PcrRecord] {
        &self.records
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// One line per record, see [`PcrRecord::to_line`].
    pub fn to_lines(&self) -> String {
        self.records
            .iter()
            .map(|record| record.to_line() + "\n")
            .collect()
    }

    /// `{"sha256": [{"pcr": 11, "hash": "<hex>"}]}`
    pub fn to_json(&self) -> Result<serde_json::Value> {
        let mut banks: BTreeMap<&str, Vec<JsonRecord>> = BTreeMap::new();
        for record in &self.records {
            banks.entry(&record.bank).or_default().push(JsonRecord {
                pcr: record.index.nr(),
                hash: &record.hash,
            });
        }
        Ok(serde_json::to_value(banks)?)
    }
}
