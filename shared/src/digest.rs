use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use anyhow::{bail, Result};
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha384, Sha512};

/// The banks that are selected when none are requested explicitly.
pub const DEFAULT_BANKS: [&str; 4] = ["SHA1", "SHA256", "SHA384", "SHA512"];

/// A streaming hash context.
///
/// One context is used per extend and one per bank while a section is being read.
pub trait BankHasher {
    fn update(&mut self, data: &[u8]);
    fn finalize(self: Box<Self>) -> Vec<u8>;
}

/// A hash algorithm as resolved by a [`DigestProvider`].
///
/// Algorithms are identified by their canonical uppercase name. Equality and ordering only
/// consider that name, so sorting a list of algorithms yields the order in which banks are
/// reported.
#[derive(Clone, Copy)]
pub struct DigestAlgorithm {
    name: &'static str,
    digest_size: usize,
    new_hasher: fn() -> Box<dyn BankHasher>,
}

impl DigestAlgorithm {
    pub const fn new(
        name: &'static str,
        digest_size: usize,
        new_hasher: fn() -> Box<dyn BankHasher>,
    ) -> Self {
        Self {
            name,
            digest_size,
            new_hasher,
        }
    }

    /// Canonical name, e.g. `SHA256`.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// The bank identifier as used by sysfs and in reports, e.g. `sha256`.
    pub fn bank(&self) -> String {
        self.name.to_ascii_lowercase()
    }

    pub fn digest_size(&self) -> usize {
        self.digest_size
    }

    pub fn hasher(&self) -> Box<dyn BankHasher> {
        (self.new_hasher)()
    }

    /// Hash a complete buffer in one go.
    pub fn digest(&self, data: &[u8]) -> Vec<u8> {
        let mut hasher = self.hasher();
        hasher.update(data);
        hasher.finalize()
    }
}

impl fmt::Debug for DigestAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DigestAlgorithm")
            .field("name", &self.name)
            .field("digest_size", &self.digest_size)
            .finish()
    }
}

impl fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

impl PartialEq for DigestAlgorithm {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for DigestAlgorithm {}

impl PartialOrd for DigestAlgorithm {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DigestAlgorithm {
    fn cmp(&self, other: &Self) -> Ordering {
        self.name.cmp(other.name)
    }
}

impl Hash for DigestAlgorithm {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

/// Resolves algorithm names to implementations.
///
/// The measurement code never looks up hash implementations itself. Everything it needs is
/// carried by the [`DigestAlgorithm`] handles a provider hands out, which allows tests to plug in
/// deterministic fakes.
pub trait DigestProvider {
    fn resolve(&self, name: &str) -> Option<DigestAlgorithm>;
}

/// RustCrypto backed provider for the algorithms a TPM2 bank can use.
#[derive(Debug, Default, Clone, Copy)]
pub struct RustCryptoDigests;

struct RustCryptoHasher<D>(D);

impl<D: Digest> BankHasher for RustCryptoHasher<D> {
    fn update(&mut self, data: &[u8]) {
        Digest::update(&mut self.0, data);
    }

    fn finalize(self: Box<Self>) -> Vec<u8> {
        let Self(digest) = *self;
        digest.finalize().to_vec()
    }
}

fn new_hasher<D: Digest + 'static>() -> Box<dyn BankHasher> {
    Box::new(RustCryptoHasher(D::new()))
}

pub const SHA1: DigestAlgorithm = DigestAlgorithm::new("SHA1", 20, new_hasher::<Sha1>);
pub const SHA256: DigestAlgorithm = DigestAlgorithm::new("SHA256", 32, new_hasher::<Sha256>);
pub const SHA384: DigestAlgorithm = DigestAlgorithm::new("SHA384", 48, new_hasher::<Sha384>);
pub const SHA512: DigestAlgorithm = DigestAlgorithm::new("SHA512", 64, new_hasher::<Sha512>);

impl DigestProvider for RustCryptoDigests {
    fn resolve(&self, name: &str) -> Option<DigestAlgorithm> {
        // Accept the spellings OpenSSL accepts: SHA256, sha256, SHA-256, SHA2-256.
        let normalized = name.trim().to_ascii_uppercase().replace(['-', '_'], "");
        let algorithm = match normalized.as_str() {
            "SHA1" => SHA1,
            "SHA256" | "SHA2256" => SHA256,
            "SHA384" | "SHA2384" => SHA384,
            "SHA512" | "SHA2512" => SHA512,
            _ => return None,
        };
        Some(algorithm)
    }
}

/// Resolve the requested bank names into a sorted, deduplicated list of algorithms.
///
/// An empty request selects [`DEFAULT_BANKS`].
pub fn select_banks<S: AsRef<str>>(
    provider: &dyn DigestProvider,
    requested: &[S],
) -> Result<Vec<DigestAlgorithm>> {
    let mut algorithms = Vec::with_capacity(requested.len().max(DEFAULT_BANKS.len()));

    if requested.is_empty() {
        for name in DEFAULT_BANKS {
            match provider.resolve(name) {
                Some(algorithm) => algorithms.push(algorithm),
                None => bail!("Default bank '{name}' is not supported by the digest provider."),
            }
        }
    } else {
        for name in requested {
            let name = name.as_ref();
            match provider.resolve(name) {
                Some(algorithm) => algorithms.push(algorithm),
                None => bail!("Unknown bank '{name}', refusing."),
            }
        }
    }

    algorithms.sort();
    algorithms.dedup();
    Ok(algorithms)
}
