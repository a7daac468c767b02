//! Pre-calculate the TPM PCR values a UKI stub produces and inspect the values it produced.
//!
//! Only PCR 11 can be predicted offline, it covers the unified sections of the kernel image.
//! PCR 12 and 13 depend on runtime input of the stub and are only shown by `status`.

pub mod bank;
pub mod current;
pub mod digest;
pub mod efivars;
pub mod measure;
pub mod pcr;
pub mod platform;
pub mod report;
pub mod run;
pub mod section;
pub mod validate;
