//! Resource container decoding.
//!
//! Resource blobs pass through two pure functions: a [`Decompressor`] that
//! unpacks the container and a [`TreeParser`] that turns the unpacked
//! property list into a [`PropertyValue`] tree.

use std::io::Cursor;

use crate::device::{PropertyDict, PropertyValue};
use crate::error::{AlcError, AlcResult};

/// Buffer size the consuming driver allocates for one resource.
pub const RESOURCE_BUFFER_LIMIT: usize = 0x7A000;

/// Unpacks a resource container.
pub trait Decompressor
{
    /// Decompress `data`, refusing output larger than `limit` bytes.
    ///
    /// # Errors
    ///
    /// [`AlcError::ResourceTooLarge`] when the output would exceed `limit`,
    /// [`AlcError::Decompression`] when the container is corrupt.
    fn decompress(&self, data: &[u8], limit: usize) -> AlcResult<Vec<u8>>;
}

/// Identity decompressor for uncompressed containers.
#[derive(Debug, Clone, Copy, Default)]
pub struct StoredDecompressor;

impl Decompressor for StoredDecompressor
{
    fn decompress(&self, data: &[u8], limit: usize) -> AlcResult<Vec<u8>>
    {
        if data.len() > limit {
            return Err(AlcError::ResourceTooLarge { size: data.len(), limit });
        }
        Ok(data.to_vec())
    }
}

/// LZ4 block with a little-endian `u32` size prefix.
#[derive(Debug, Clone, Copy, Default)]
pub struct Lz4Decompressor;

impl Decompressor for Lz4Decompressor
{
    fn decompress(&self, data: &[u8], limit: usize) -> AlcResult<Vec<u8>>
    {
        let Some((prefix, block)) = data.split_first_chunk::<4>() else {
            return Err(AlcError::Decompression("missing size prefix".to_owned()));
        };
        let size = u32::from_le_bytes(*prefix) as usize;
        if size > limit {
            return Err(AlcError::ResourceTooLarge { size, limit });
        }
        lz4_flex::block::decompress(block, size).map_err(|err| AlcError::Decompression(err.to_string()))
    }
}

/// Parses a hierarchical key-value document.
pub trait TreeParser
{
    /// Parse `data` into a property tree.
    ///
    /// # Errors
    ///
    /// [`AlcError::Parse`] when `data` is not a valid document.
    fn parse_tree(&self, data: &[u8]) -> AlcResult<PropertyValue>;

    /// Parse `data` and require a dictionary at the root.
    ///
    /// # Errors
    ///
    /// [`AlcError::Parse`] when parsing fails or the root is not a dictionary.
    fn parse_dict(&self, data: &[u8]) -> AlcResult<PropertyDict>
    {
        match self.parse_tree(data)? {
            PropertyValue::Dict(dict) => Ok(dict),
            _ => Err(AlcError::Parse("root element is not a dictionary".to_owned())),
        }
    }
}

/// Property-list parser (XML or binary).
#[derive(Debug, Clone, Copy, Default)]
pub struct PlistParser;

impl TreeParser for PlistParser
{
    fn parse_tree(&self, data: &[u8]) -> AlcResult<PropertyValue>
    {
        let value = plist::Value::from_reader(Cursor::new(data)).map_err(|err| AlcError::Parse(err.to_string()))?;
        from_plist(value)
    }
}

/// Resource documents carry no reals or dates; those are rejected.
fn from_plist(value: plist::Value) -> AlcResult<PropertyValue>
{
    let converted = match value {
        plist::Value::Dictionary(dict) => PropertyValue::Dict(
            dict.into_iter()
                .map(|(key, value)| Ok((key, from_plist(value)?)))
                .collect::<AlcResult<_>>()?,
        ),
        plist::Value::Array(items) => {
            PropertyValue::Array(items.into_iter().map(from_plist).collect::<AlcResult<_>>()?)
        }
        plist::Value::Boolean(flag) => PropertyValue::Bool(flag),
        plist::Value::Data(bytes) => PropertyValue::Data(bytes),
        plist::Value::String(text) => PropertyValue::String(text),
        plist::Value::Integer(number) => match number.as_unsigned() {
            Some(unsigned) => PropertyValue::Number(unsigned),
            // Negative values keep their 32-bit two's complement form, the way
            // the driver reads them.
            None => PropertyValue::Number(u64::from(number.as_signed().unwrap_or_default() as u32)),
        },
        plist::Value::Uid(uid) => PropertyValue::Number(uid.get()),
        other => return Err(AlcError::Parse(format!("unsupported plist value {other:?}"))),
    };
    Ok(converted)
}

#[cfg(test)]
mod tests
{
    use super::*;

    const LAYOUT: &[u8] = br#"<?xml version="1.0" encoding="UTF-8"?>
<plist version="1.0">
<dict>
    <key>LayoutID</key>
    <integer>7</integer>
    <key>Enabled</key>
    <true/>
    <key>Blob</key>
    <data>AQID</data>
    <key>Items</key>
    <array><string>a</string></array>
</dict>
</plist>"#;

    #[test]
    fn test_plist_maps_into_property_values()
    {
        let dict = PlistParser.parse_dict(LAYOUT).unwrap();
        assert_eq!(dict.get("LayoutID"), Some(&PropertyValue::Number(7)));
        assert_eq!(dict.get("Enabled"), Some(&PropertyValue::Bool(true)));
        assert_eq!(dict.get("Blob"), Some(&PropertyValue::Data(vec![1, 2, 3])));
        assert_eq!(
            dict.get("Items"),
            Some(&PropertyValue::Array(vec![PropertyValue::String("a".to_owned())]))
        );
    }

    #[test]
    fn test_invalid_document_is_a_parse_error()
    {
        assert!(matches!(PlistParser.parse_tree(b"<plist"), Err(AlcError::Parse(_))));
    }

    #[test]
    fn test_reals_and_dates_are_rejected()
    {
        let real = br#"<?xml version="1.0" encoding="UTF-8"?><plist version="1.0"><dict><key>Gain</key><real>1.5</real></dict></plist>"#;
        assert!(matches!(PlistParser.parse_dict(real), Err(AlcError::Parse(_))));
        let date = br#"<?xml version="1.0" encoding="UTF-8"?><plist version="1.0"><array><date>2020-01-01T00:00:00Z</date></array></plist>"#;
        assert!(matches!(PlistParser.parse_tree(date), Err(AlcError::Parse(_))));
    }

    #[test]
    fn test_stored_enforces_ceiling()
    {
        assert_eq!(StoredDecompressor.decompress(b"abc", 3).unwrap(), b"abc");
        assert!(matches!(
            StoredDecompressor.decompress(b"abcd", 3),
            Err(AlcError::ResourceTooLarge { size: 4, limit: 3 })
        ));
    }

    #[test]
    fn test_lz4_checks_prefix_before_decoding()
    {
        let payload = b"pin configuration pin configuration".to_vec();
        let mut container = (payload.len() as u32).to_le_bytes().to_vec();
        container.extend(lz4_flex::block::compress(&payload));

        assert_eq!(Lz4Decompressor.decompress(&container, RESOURCE_BUFFER_LIMIT).unwrap(), payload);
        assert!(matches!(
            Lz4Decompressor.decompress(&container, 8),
            Err(AlcError::ResourceTooLarge { .. })
        ));
        assert!(Lz4Decompressor.decompress(&[1, 2], 8).is_err());
    }
}
