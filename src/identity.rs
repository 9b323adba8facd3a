/// Canonicalize a DID-like identifier by stripping an optional `#fragment`.
///
/// `did:web:example.com#service` and `did:web:example.com` map to the same
/// principal for logging/rate-limiting correlation purposes.
pub fn canonical_did(value: &str) -> &str {
    value.split('#').next().unwrap_or(value)
}

/// Compare two DID-like identifiers after canonicalization.
pub fn dids_equivalent(left: &str, right: &str) -> bool {
    canonical_did(left) == canonical_did(right)
}

/// Whether a string is syntactically a DID (begins with the `did:` prefix).
pub fn is_did(value: &str) -> bool {
    value.starts_with("did:")
}

/// Whether an issuer string is a DID or an absolute URL, the only two forms
/// the protocol allows for `iss`.
pub fn is_valid_issuer(value: &str, allow_http: bool) -> bool {
    if is_did(value) {
        return true;
    }
    match url::Url::parse(value) {
        Ok(url) => url.scheme() == "https" || (allow_http && url.scheme() == "http"),
        Err(_) => false,
    }
}
