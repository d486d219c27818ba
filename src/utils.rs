//! Identifier utilities shared by the normalizer and the registration flow.

/// Check that an identifier is an E.164-style number: `+` followed by digits.
///
/// Only the shape is checked. Region and length rules belong to the phone
/// number library of the host application.
pub fn is_number_sane(number: &str) -> bool {
    match number.strip_prefix('+') {
        Some(digits) => !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()),
        None => false,
    }
}

/// Split an encoded device address (`number.deviceId`) into its parts.
///
/// Returns the number and the device id, if one is present and numeric.
pub fn unencode_number(encoded: &str) -> (&str, Option<u32>) {
    match encoded.split_once('.') {
        Some((number, device)) => (number, device.parse().ok()),
        None => (encoded, None),
    }
}

/// Build a device address from a number and a device id.
pub fn encode_number(number: &str, device_id: u32) -> String {
    format!("{number}.{device_id}")
}

/// Shorten an identifier for log output.
pub(crate) fn redact(identifier: &str) -> String {
    let skip = identifier.chars().count().saturating_sub(4);
    let tail: String = identifier.chars().skip(skip).collect();
    format!("…{tail}")
}
