use std::path::{Path, PathBuf};

/// List of PE sections that have a special meaning with respect to
/// UKI specification.
/// This is the canonical order in which they are measured into TPM
/// PCR 11.
/// !!! DO NOT REORDER !!!
///
/// `.pcrsig` is never measured, hence it is not listed here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum UnifiedSection {
    Linux = 0,
    OsRel = 1,
    CmdLine = 2,
    Initrd = 3,
    Splash = 4,
    Dtb = 5,
    Uname = 6,
    Sbat = 7,
    PcrPkey = 8,
}

impl UnifiedSection {
    pub const COUNT: usize = 9;

    /// All sections in canonical order.
    pub const ALL: [UnifiedSection; Self::COUNT] = [
        Self::Linux,
        Self::OsRel,
        Self::CmdLine,
        Self::Initrd,
        Self::Splash,
        Self::Dtb,
        Self::Uname,
        Self::Sbat,
        Self::PcrPkey,
    ];

    /// The canonical section name.
    pub fn name(&self) -> &'static str {
        match self {
            UnifiedSection::Linux => ".linux",
            UnifiedSection::OsRel => ".osrel",
            UnifiedSection::CmdLine => ".cmdline",
            UnifiedSection::Initrd => ".initrd",
            UnifiedSection::Splash => ".splash",
            UnifiedSection::Dtb => ".dtb",
            UnifiedSection::Uname => ".uname",
            UnifiedSection::Sbat => ".sbat",
            UnifiedSection::PcrPkey => ".pcrpkey",
        }
    }

    /// The section name as measured by the stub: ASCII including one trailing NUL byte.
    pub fn measured_name(&self) -> Vec<u8> {
        let mut name = self.name().as_bytes().to_vec();
        name.push(0);
        name
    }
}

impl TryFrom<&str> for UnifiedSection {
    type Error = anyhow::Error;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::ALL
            .into_iter()
            .find(|section| section.name() == value)
            .ok_or_else(|| anyhow::anyhow!("Unknown unified section '{value}'"))
    }
}

/// The files to measure, one optional path per unified section.
#[derive(Debug, Default, Clone)]
pub struct SectionPaths([Option<PathBuf>; UnifiedSection::COUNT]);

impl SectionPaths {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, section: UnifiedSection, path: impl Into<PathBuf>) {
        self.0[section as usize] = Some(path.into());
    }

    pub fn with(mut self, section: UnifiedSection, path: impl Into<PathBuf>) -> Self {
        self.set(section, path);
        self
    }

    pub fn get(&self, section: UnifiedSection) -> Option<&Path> {
        self.0[section as usize].as_deref()
    }

    pub fn is_empty(&self) -> bool {
        self.0.iter().all(Option::is_none)
    }

    /// Configured sections in canonical order.
    pub fn iter(&self) -> impl Iterator<Item = (UnifiedSection, &Path)> + '_ {
        UnifiedSection::ALL
            .into_iter()
            .filter_map(|section| self.get(section).map(|path| (section, path)))
    }
}
