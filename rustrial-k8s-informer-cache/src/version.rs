//! Ordering of `metadata.resourceVersion` tokens.
//!
//! Resource versions are opaque. The only ordering applied here is the one of
//! canonical decimal tokens (as issued by etcd backed API servers), decided
//! by digit count first and then lexicographically, which never interprets
//! the token as a number. Anything else is not ordered.

use std::cmp::Ordering;

fn is_canonical_decimal(v: &str) -> bool {
    !v.is_empty() && v.bytes().all(|b| b.is_ascii_digit()) && (v == "0" || !v.starts_with('0'))
}

/// Compare two resource versions, `None` if they cannot be ordered.
pub fn compare(left: &str, right: &str) -> Option<Ordering> {
    if left == right {
        return Some(Ordering::Equal);
    }
    if is_canonical_decimal(left) && is_canonical_decimal(right) {
        Some(left.len().cmp(&right.len()).then_with(|| left.cmp(right)))
    } else {
        None
    }
}

/// `true` only if `candidate` is known to be strictly older than `reference`.
pub fn is_older(candidate: &str, reference: &str) -> bool {
    compare(candidate, reference) == Some(Ordering::Less)
}

/// `true` only if `candidate` is known to be strictly newer than `reference`.
pub fn is_newer(candidate: &str, reference: &str) -> bool {
    compare(candidate, reference) == Some(Ordering::Greater)
}
