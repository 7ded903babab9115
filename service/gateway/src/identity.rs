//! Identity Extractor (IE): a pure function from a request's host/path to a `computeId`,
//! per spec §4.5. Evaluated in order, first match wins; hostname rules outrank path rules.

/// The result of extracting identity from a single request: the resolved `computeId` and,
/// when the `<port>-<id>` form matched, the port to target instead of the preset default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedIdentity {
    pub compute_id: String,
    pub port: Option<u16>,
}

/// Extracts a compute id from a request's `host` header and request path, trying each rule
/// from spec §4.5 in order. Returns `None` when no rule matches ("no compute in this
/// request"), which callers turn into `400 Missing compute ID`.
pub fn extract(host: &str, path: &str, preview_domain: &str) -> Option<ExtractedIdentity> {
    if let Some(identity) = match_port_prefixed_host(host, preview_domain) {
        return Some(identity);
    }
    if let Some(identity) = match_plain_host(host, preview_domain) {
        return Some(identity);
    }
    if let Some(identity) = match_port_prefixed_path(path) {
        return Some(identity);
    }
    if let Some(identity) = match_plain_path(path) {
        return Some(identity);
    }
    None
}

fn strip_domain_suffix<'a>(host: &'a str, preview_domain: &str) -> Option<&'a str> {
    let suffix = format!(".{}", preview_domain);
    host.strip_suffix(&suffix)
}

/// Rule 1: `<port>-<computeID>.<preview-domain>`. The `port` segment must be a valid id
/// (non-empty, no dots) to disambiguate from a bare compute id containing a hyphen.
fn match_port_prefixed_host(host: &str, preview_domain: &str) -> Option<ExtractedIdentity> {
    let label = strip_domain_suffix(host, preview_domain)?;
    let (port, id) = label.split_once('-')?;
    let port: u16 = port.parse().ok()?;
    if id.is_empty() || id.contains('.') {
        return None;
    }
    Some(ExtractedIdentity {
        compute_id: id.to_string(),
        port: Some(port),
    })
}

/// Rule 2: `<computeID>.<preview-domain>`.
fn match_plain_host(host: &str, preview_domain: &str) -> Option<ExtractedIdentity> {
    let label = strip_domain_suffix(host, preview_domain)?;
    if label.is_empty() || label.contains('.') {
        return None;
    }
    Some(ExtractedIdentity {
        compute_id: label.to_string(),
        port: None,
    })
}

/// Rule 3: `/preview/<port>-<computeID>`.
fn match_port_prefixed_path(path: &str) -> Option<ExtractedIdentity> {
    let rest = path.strip_prefix("/preview/")?;
    let segment = rest.split('/').next().unwrap_or(rest);
    let (port, id) = segment.split_once('-')?;
    let port: u16 = port.parse().ok()?;
    if id.is_empty() || id.contains('.') {
        return None;
    }
    Some(ExtractedIdentity {
        compute_id: id.to_string(),
        port: Some(port),
    })
}

/// Rule 4: `/preview/<computeID>`.
fn match_plain_path(path: &str) -> Option<ExtractedIdentity> {
    let rest = path.strip_prefix("/preview/")?;
    let segment = rest.split('/').next().unwrap_or(rest);
    if segment.is_empty() || segment.contains('.') {
        return None;
    }
    Some(ExtractedIdentity {
        compute_id: segment.to_string(),
        port: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const PREVIEW_DOMAIN: &str = "preview.example.com";

    #[test]
    fn table_driven_host_and_path_rules() {
        let cases: Vec<(&str, &str, Option<ExtractedIdentity>)> = vec![
            (
                "abc123.preview.example.com",
                "/health",
                Some(ExtractedIdentity {
                    compute_id: "abc123".to_string(),
                    port: None,
                }),
            ),
            (
                "3000-abc123.preview.example.com",
                "/app",
                Some(ExtractedIdentity {
                    compute_id: "abc123".to_string(),
                    port: Some(3000),
                }),
            ),
            (
                "gateway.internal",
                "/preview/8080-xyz789",
                Some(ExtractedIdentity {
                    compute_id: "xyz789".to_string(),
                    port: Some(8080),
                }),
            ),
            (
                "gateway.internal",
                "/preview/xyz789",
                Some(ExtractedIdentity {
                    compute_id: "xyz789".to_string(),
                    port: None,
                }),
            ),
            ("gateway.internal", "/health", None),
            ("preview.example.com", "/", None),
            ("gateway.internal", "/preview/", None),
        ];
        for (host, path, want) in cases {
            assert_eq!(extract(host, path, PREVIEW_DOMAIN), want, "host={} path={}", host, path);
        }
    }

    #[test]
    fn hostname_rules_outrank_path_rules() {
        let got = extract(
            "abc123.preview.example.com",
            "/preview/other456",
            PREVIEW_DOMAIN,
        );
        assert_eq!(
            got,
            Some(ExtractedIdentity {
                compute_id: "abc123".to_string(),
                port: None,
            })
        );
    }

    #[test]
    fn is_a_pure_function() {
        let a = extract("abc.preview.example.com", "/x", PREVIEW_DOMAIN);
        let b = extract("abc.preview.example.com", "/x", PREVIEW_DOMAIN);
        assert_eq!(a, b);
    }
}
