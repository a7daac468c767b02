use std::fmt;

/// The PCRs the stub measures into.
///
/// These numbers are part of the contract between the stub and the OS, they are not
/// configurable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PcrIndex {
    /// This is where any stub payloads are extended, e.g. kernel ELF image, embedded initrd
    /// and so on.
    KernelImage,
    /// This is where the stub extends the kernel command line and any passed credentials into.
    KernelParameters,
    /// This is where the initrd sysext images passed to the booted kernel are extended into.
    InitrdSysExts,
}

impl PcrIndex {
    pub const ALL: [PcrIndex; 3] = [
        PcrIndex::KernelImage,
        PcrIndex::KernelParameters,
        PcrIndex::InitrdSysExts,
    ];

    pub fn nr(&self) -> u32 {
        match self {
            PcrIndex::KernelImage => 11,
            PcrIndex::KernelParameters => 12,
            PcrIndex::InitrdSysExts => 13,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            PcrIndex::KernelImage => "Unified Kernel Image",
            PcrIndex::KernelParameters => "Kernel Parameters",
            PcrIndex::InitrdSysExts => "initrd System Extensions",
        }
    }

    /// The EFI variable the stub sets to report which PCR it measured into.
    pub fn efi_variable(&self) -> &'static str {
        match self {
            PcrIndex::KernelImage => "StubPcrKernelImage",
            PcrIndex::KernelParameters => "StubPcrKernelParameters",
            PcrIndex::InitrdSysExts => "StubPcrInitRDSysExts",
        }
    }
}

impl fmt::Display for PcrIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.nr())
    }
}
