// Version string ordering and validation
//
// Versions are dotted strings chosen by whoever publishes them. Each segment
// splits into a leading number and a suffix ("10-rc1" is 10 then "-rc1").
// Segments with a number sort before those without; numbers compare by value,
// then suffixes lexically. So "1.10" > "1.9" > "1.1a", and "1.9-beta" > "1.9".
// On an equal prefix the longer version wins. Versions that still tie (only
// possible with leading zeros) fall back to plain string order.

use std::cmp::Ordering;

use crate::errors::StoreError;

/// Leading digits (without leading zeros) and the rest of the segment.
fn split_segment(segment: &str) -> (Option<&str>, &str) {
    let digits = segment
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(segment.len());
    if digits == 0 {
        return (None, segment);
    }
    let number = segment[..digits].trim_start_matches('0');
    (Some(number), &segment[digits..])
}

/// Compare digit strings without leading zeros by numeric value.
fn compare_numbers(a: &str, b: &str) -> Ordering {
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

fn compare_segments(a: &str, b: &str) -> Ordering {
    let (a_num, a_rest) = split_segment(a);
    let (b_num, b_rest) = split_segment(b);
    let numbers = match (a_num, b_num) {
        (Some(x), Some(y)) => compare_numbers(x, y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    };
    numbers.then_with(|| a_rest.cmp(b_rest))
}

pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let mut left = a.split('.');
    let mut right = b.split('.');
    loop {
        match (left.next(), right.next()) {
            (None, None) => return a.cmp(b),
            (Some(_), None) => return Ordering::Greater,
            (None, Some(_)) => return Ordering::Less,
            (Some(l), Some(r)) => {
                let ord = compare_segments(l, r);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
        }
    }
}

/// Versions double as directory names under `versions/` and as URL path
/// segments, so only a conservative character set is accepted.
pub fn validate_version(version: &str) -> Result<(), StoreError> {
    let invalid = version.is_empty()
        || !version
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | '+' | '~'))
        || version == "."
        || version.contains("..");
    if invalid {
        Err(StoreError::InvalidVersion(version.to_string()))
    } else {
        Ok(())
    }
}
