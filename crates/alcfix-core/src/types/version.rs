//! Kernel release numbers and applicability ranges.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Darwin kernel major version of the running system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KernelVersion(u32);

impl KernelVersion
{
    /// 10.4
    pub const TIGER: Self = Self(8);
    /// 10.5
    pub const LEOPARD: Self = Self(9);
    /// 10.6
    pub const SNOW_LEOPARD: Self = Self(10);
    /// 10.7
    pub const LION: Self = Self(11);
    /// 10.8
    pub const MOUNTAIN_LION: Self = Self(12);
    /// 10.9
    pub const MAVERICKS: Self = Self(13);
    /// 10.10
    pub const YOSEMITE: Self = Self(14);
    /// 10.11
    pub const EL_CAPITAN: Self = Self(15);
    /// 10.12
    pub const SIERRA: Self = Self(16);
    /// 10.13
    pub const HIGH_SIERRA: Self = Self(17);
    /// 10.14
    pub const MOJAVE: Self = Self(18);
    /// 10.15
    pub const CATALINA: Self = Self(19);
    /// 11
    pub const BIG_SUR: Self = Self(20);
    /// 12
    pub const MONTEREY: Self = Self(21);
    /// 13
    pub const VENTURA: Self = Self(22);
    /// 14
    pub const SONOMA: Self = Self(23);

    /// Wrap a raw Darwin major version.
    #[must_use]
    pub const fn new(major: u32) -> Self
    {
        Self(major)
    }

    /// Raw Darwin major version.
    #[must_use]
    pub const fn major(self) -> u32
    {
        self.0
    }
}

impl fmt::Display for KernelVersion
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "darwin {}", self.0)
    }
}

/// Inclusive kernel range a patch or resource file applies to.
///
/// Either bound may be left open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct VersionRange
{
    /// Lowest applicable kernel, `None` for unbounded.
    #[serde(default)]
    pub min: Option<KernelVersion>,
    /// Highest applicable kernel, `None` for unbounded.
    #[serde(default)]
    pub max: Option<KernelVersion>,
}

impl VersionRange
{
    /// Applies to every kernel.
    pub const ANY: Self = Self { min: None, max: None };

    /// Applies to `min..=max`.
    #[must_use]
    pub const fn between(min: KernelVersion, max: KernelVersion) -> Self
    {
        Self {
            min: Some(min),
            max: Some(max),
        }
    }

    /// Applies to `min` and everything newer.
    #[must_use]
    pub const fn since(min: KernelVersion) -> Self
    {
        Self { min: Some(min), max: None }
    }

    /// Applies to `max` and everything older.
    #[must_use]
    pub const fn until(max: KernelVersion) -> Self
    {
        Self { min: None, max: Some(max) }
    }

    /// `min <= version <= max` with open bounds treated as satisfied.
    #[must_use]
    pub fn contains(&self, version: KernelVersion) -> bool
    {
        self.min.is_none_or(|min| min <= version) && self.max.is_none_or(|max| version <= max)
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_open_range_contains_everything()
    {
        assert!(VersionRange::ANY.contains(KernelVersion::TIGER));
        assert!(VersionRange::ANY.contains(KernelVersion::SONOMA));
    }

    #[test]
    fn test_bounds_are_inclusive()
    {
        let range = VersionRange::between(KernelVersion::MAVERICKS, KernelVersion::MOJAVE);
        assert!(range.contains(KernelVersion::MAVERICKS));
        assert!(range.contains(KernelVersion::MOJAVE));
        assert!(!range.contains(KernelVersion::MOUNTAIN_LION));
        assert!(!range.contains(KernelVersion::CATALINA));
    }

    #[test]
    fn test_half_open_ranges()
    {
        assert!(VersionRange::since(KernelVersion::SIERRA).contains(KernelVersion::SONOMA));
        assert!(!VersionRange::since(KernelVersion::SIERRA).contains(KernelVersion::EL_CAPITAN));
        assert!(VersionRange::until(KernelVersion::LION).contains(KernelVersion::TIGER));
        assert!(!VersionRange::until(KernelVersion::LION).contains(KernelVersion::MOUNTAIN_LION));
    }
}
