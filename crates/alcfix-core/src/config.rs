//! Boot-time configuration.
//!
//! Flags are read once from the kernel boot-arguments line. Valued keys take
//! the form `key=value` with a decimal or `0x`-prefixed hexadecimal value;
//! switches are bare words starting with `-`.

use tracing::{debug, warn};

use crate::error::{AlcError, AlcResult};

/// Layout-id override key.
pub const ARG_LAYOUT_ID: &str = "alcid";
/// Controller-start delay key (milliseconds).
pub const ARG_DELAY: &str = "alcdelay";
/// TCSEL update key.
pub const ARG_TCSEL: &str = "alctcsel";
/// Verb support key.
pub const ARG_VERBS: &str = "alcverbs";
/// Debug switch. Disables log-erasure patches.
pub const ARG_DEBUG: &str = "-alcdbg";
/// Entitlement override switch.
pub const ARG_DRIVER_HOST: &str = "-alcdhost";

/// Parsed boot arguments.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BootArgs
{
    /// `alcid`
    pub layout_id: Option<u32>,
    /// `alcdelay`
    pub delay: Option<u32>,
    /// `alctcsel`
    pub tcsel: Option<u32>,
    /// `alcverbs`
    pub verbs: Option<u32>,
    /// `-alcdbg`
    pub debug: bool,
    /// `-alcdhost`
    pub driver_host: bool,
}

impl BootArgs
{
    /// Parse a boot-arguments line. Unknown words are ignored, malformed
    /// values are logged and dropped.
    #[must_use]
    pub fn parse(line: &str) -> Self
    {
        let mut args = Self::default();
        for word in line.split_whitespace() {
            match word {
                ARG_DEBUG => args.debug = true,
                ARG_DRIVER_HOST => args.driver_host = true,
                _ => {
                    let Some((key, value)) = word.split_once('=') else {
                        continue;
                    };
                    let slot = match key {
                        ARG_LAYOUT_ID => &mut args.layout_id,
                        ARG_DELAY => &mut args.delay,
                        ARG_TCSEL => &mut args.tcsel,
                        ARG_VERBS => &mut args.verbs,
                        _ => continue,
                    };
                    match parse_number(key, value) {
                        Ok(number) => {
                            debug!("boot argument {key} = {number}");
                            *slot = Some(number);
                        }
                        Err(err) => warn!("{err}, ignoring"),
                    }
                }
            }
        }
        args
    }

    /// Verb support as set on the command line, `None` when not given.
    #[must_use]
    pub fn verbs_requested(&self) -> Option<bool>
    {
        self.verbs.map(|value| value != 0)
    }

    /// Start delay enablement as set on the command line.
    #[must_use]
    pub fn delay_requested(&self) -> Option<bool>
    {
        self.delay.map(|value| value != 0)
    }

    /// TCSEL update as set on the command line.
    #[must_use]
    pub fn tcsel_requested(&self) -> Option<bool>
    {
        self.tcsel.map(|value| value != 0)
    }
}

/// Parse a decimal or `0x` hexadecimal 32-bit value.
///
/// # Errors
///
/// Returns [`AlcError::InvalidBootArg`] when `value` is not a valid number.
pub fn parse_number(key: &str, value: &str) -> AlcResult<u32>
{
    let parsed = match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => value.parse::<u32>(),
    };
    parsed.map_err(|_| AlcError::InvalidBootArg {
        key: key.to_owned(),
        value: value.to_owned(),
    })
}
