use std::fmt;

use crate::digest::DigestAlgorithm;

/// A virtual PCR of a single bank.
///
/// The register can only be changed through [`PcrBank::extend`], just like a real TPM PCR.
pub struct PcrBank {
    algorithm: DigestAlgorithm,
    register: Vec<u8>,
    extensions: usize,
}

impl PcrBank {
    /// A freshly reset PCR, i.e. all zeroes.
    pub fn new(algorithm: DigestAlgorithm) -> Self {
        Self {
            algorithm,
            register: vec![0; algorithm.digest_size()],
            extensions: 0,
        }
    }

    /// A PCR that starts from a value read back from the TPM.
    pub fn with_value(algorithm: DigestAlgorithm, value: Vec<u8>) -> Self {
        assert_eq!(
            value.len(),
            algorithm.digest_size(),
            "PCR value does not match the {algorithm} digest size"
        );
        Self {
            algorithm,
            register: value,
            extensions: 0,
        }
    }

    pub fn algorithm(&self) -> DigestAlgorithm {
        self.algorithm
    }

    /// Lowercase bank name, e.g. `sha256`.
    pub fn bank(&self) -> String {
        self.algorithm.bank()
    }

    pub fn value(&self) -> &[u8] {
        &self.register
    }

    /// How many times this PCR has been extended.
    pub fn extensions(&self) -> usize {
        self.extensions
    }

    /// Extend the PCR: `register = Hash(register || data)`.
    pub fn extend(&mut self, data: &[u8]) {
        // The old value goes first, this is what makes the PCR a chain.
        let mut hasher = self.algorithm.hasher();
        hasher.update(&self.register);
        hasher.update(data);
        let value = hasher.finalize();

        assert_eq!(
            value.len(),
            self.register.len(),
            "{} produced a digest of unexpected size",
            self.algorithm
        );

        log::debug!(
            "Extended {} with {} bytes: {}",
            self.algorithm.bank(),
            data.len(),
            hex::encode(&value)
        );

        self.register = value;
        self.extensions += 1;
    }
}

impl fmt::Debug for PcrBank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PcrBank")
            .field("bank", &self.algorithm.name())
            .field("register", &hex::encode(&self.register))
            .field("extensions", &self.extensions)
            .finish()
    }
}
