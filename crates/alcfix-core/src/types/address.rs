//! Kernel address type.

use std::fmt;
use std::ops::{Add, Sub};

use serde::{Deserialize, Serialize};

/// Strongly typed kernel address
///
/// Module base addresses, resolved symbols and hook trampolines are all
/// addresses in the kernel's address space. Wrapping them keeps them from
/// being mixed up with sizes, device ids or load indices, which are all `u64`
/// or `usize` as well.
///
/// ## Example
///
/// ```rust
/// use alcfix_core::types::Address;
///
/// let base = Address::from(0xffff_ff80_0010_0000);
/// let symbol = base + 0x1f40;
/// assert_eq!(symbol.offset_from(base), Some(0x1f40));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Address(u64);

impl Address
{
    /// The null address, used by substrates that have not resolved anything yet.
    pub const ZERO: Self = Address(0);

    /// Create a new address from a `u64` value (usable in const contexts).
    pub const fn new(value: u64) -> Self
    {
        Address(value)
    }

    /// Get the raw `u64` value of this address
    pub const fn value(self) -> u64
    {
        self.0
    }

    /// Add an offset to this address, checking for overflow
    ///
    /// ```rust
    /// use alcfix_core::types::Address;
    ///
    /// let addr = Address::from(0x1000);
    /// assert_eq!(addr.checked_add(0x100), Some(Address::from(0x1100)));
    /// assert_eq!(addr.checked_add(u64::MAX), None);
    /// ```
    pub fn checked_add(self, offset: u64) -> Option<Self>
    {
        self.0.checked_add(offset).map(Address)
    }

    /// Distance from `base` to this address, or `None` if this address lies below it.
    pub fn offset_from(self, base: Address) -> Option<u64>
    {
        self.0.checked_sub(base.0)
    }

    /// Whether this address lies within `[base, base + size)`.
    ///
    /// ```rust
    /// use alcfix_core::types::Address;
    ///
    /// let base = Address::from(0x1000);
    /// assert!(Address::from(0x1fff).within(base, 0x1000));
    /// assert!(!Address::from(0x2000).within(base, 0x1000));
    /// ```
    pub fn within(self, base: Address, size: usize) -> bool
    {
        self.offset_from(base).is_some_and(|offset| offset < size as u64)
    }
}

impl From<u64> for Address
{
    fn from(value: u64) -> Self
    {
        Address(value)
    }
}

impl From<Address> for u64
{
    fn from(address: Address) -> Self
    {
        address.0
    }
}

impl fmt::Display for Address
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "0x{:016x}", self.0)
    }
}

impl Add<u64> for Address
{
    type Output = Address;

    fn add(self, rhs: u64) -> Self::Output
    {
        Address(self.0.wrapping_add(rhs))
    }
}

impl Sub<u64> for Address
{
    type Output = Address;

    fn sub(self, rhs: u64) -> Self::Output
    {
        Address(self.0.wrapping_sub(rhs))
    }
}
