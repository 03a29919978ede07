//! Hostname normalization for the provisioning identity.
//!
//! Instances are usually reached through a per-instance subdomain such as
//! `9a5029d5-f769-4749-804e-50f6711bd509.example.app`. The certificate is bound
//! to the wildcard form (`*.example.app`) so every instance of a deployment
//! shares one recognizable name pattern.

use crate::error::{BootError, BootResult};
use uuid::Uuid;

const MAX_DOMAIN_LEN: usize = 253;
const MAX_LABEL_LEN: usize = 63;

/// Replace a UUID leftmost label with `*`.
///
/// Other well-formed hostnames (including IP literals) are returned unchanged.
/// An empty leftmost label (`.example.app`) is treated as a wildcard request.
/// The function is idempotent.
pub fn to_wildcard_domain(host: &str) -> BootResult<String> {
    let host = host.trim();
    let host = host.strip_suffix('.').unwrap_or(host);

    if host.is_empty() {
        return Err(BootError::configuration("hostname is empty"));
    }
    if host.len() > MAX_DOMAIN_LEN {
        return Err(BootError::configuration(format!(
            "hostname exceeds {} characters",
            MAX_DOMAIN_LEN
        )));
    }

    let (first, rest) = match host.split_once('.') {
        Some((first, rest)) => (first, Some(rest)),
        None => (host, None),
    };

    if let Some(rest) = rest {
        for label in rest.split('.') {
            validate_label(label, host)?;
        }
    }

    // Only label-shaped UUIDs qualify, not the braced or URN forms
    if !first.is_empty() && first != "*" {
        validate_label(first, host)?;
    }

    let wildcard = first.is_empty() || Uuid::try_parse(first).is_ok();
    if wildcard {
        return match rest {
            Some(rest) => Ok(format!("*.{}", rest)),
            None => Err(BootError::configuration(format!(
                "cannot derive a wildcard domain from '{}'",
                host
            ))),
        };
    }

    Ok(host.to_string())
}

fn validate_label(label: &str, host: &str) -> BootResult<()> {
    let valid = !label.is_empty()
        && label.len() <= MAX_LABEL_LEN
        && label
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');

    if valid {
        Ok(())
    } else {
        Err(BootError::configuration(format!(
            "can't parse host to extract a domain name: '{}'",
            host
        )))
    }
}
