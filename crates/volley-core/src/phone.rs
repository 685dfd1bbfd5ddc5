//! Canonicalizes raw phone input into the address form the transport expects.
//!
//! This is a best-effort heuristic for the Brazilian numbering plan (country
//! code 55, two-digit area codes, the extra mobile nine), not a general E.164
//! normalizer. Input that matches no rule passes through digit-stripped.

/// Canonicalize one raw phone entry. Total: never fails on any input.
///
/// Rules, first match wins:
/// 1. `55` + 13 digits with a '9' in position 4: the redundant mobile nine —
///    drop it.
/// 2. 11 digits starting with '9': bare mobile with no area code — assume
///    area code 61 and prepend the country code.
/// 3. 10 or 11 digits: area code + local number — prepend the country code.
/// 4. Anything else: returned as-is (digits only).
pub fn normalize(raw: &str) -> String {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();

    if digits.len() == 13 && digits.starts_with("55") && digits.as_bytes()[4] == b'9' {
        format!("{}{}", &digits[..4], &digits[5..])
    } else if digits.len() == 11 && digits.starts_with('9') {
        format!("5561{}", &digits[1..])
    } else if digits.len() == 10 || digits.len() == 11 {
        format!("55{digits}")
    } else {
        digits
    }
}
