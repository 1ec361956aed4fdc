use crate::error::{Error, Result};

/// Validates a hostname against the policy in SPEC_FULL §4.2: RFC 1123
/// restricted to lowercase alphanumerics and hyphens, length 1-63,
/// first/last character alphanumeric. No collision resolution happens
/// here — this only rejects malformed input, including anything that
/// could be interpreted as a shell metacharacter downstream.
pub fn validate_hostname(hostname: &str) -> Result<()> {
    if hostname.is_empty() || hostname.len() > 63 {
        return Err(Error::Validation(format!(
            "hostname must be 1-63 characters, got {}",
            hostname.len()
        )));
    }

    let bytes = hostname.as_bytes();
    let is_alnum = |b: u8| b.is_ascii_lowercase() || b.is_ascii_digit();

    if !is_alnum(bytes[0]) || !is_alnum(bytes[bytes.len() - 1]) {
        return Err(Error::Validation(
            "hostname must start and end with a lowercase alphanumeric character".to_string(),
        ));
    }

    if !bytes.iter().all(|&b| is_alnum(b) || b == b'-') {
        return Err(Error::Validation(format!(
            "hostname {hostname:?} contains characters outside [a-z0-9-]"
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_valid_hostnames() {
        assert!(validate_hostname("demo1").is_ok());
        assert!(validate_hostname("a").is_ok());
        assert!(validate_hostname("my-app-2").is_ok());
        assert!(validate_hostname(&"a".repeat(63)).is_ok());
    }

    #[test]
    fn rejects_empty_and_overlong() {
        assert!(validate_hostname("").is_err());
        assert!(validate_hostname(&"a".repeat(64)).is_err());
    }

    #[test]
    fn rejects_bad_edges() {
        assert!(validate_hostname("-app").is_err());
        assert!(validate_hostname("app-").is_err());
    }

    #[test]
    fn rejects_uppercase_and_underscores() {
        assert!(validate_hostname("Demo1").is_err());
        assert!(validate_hostname("demo_1").is_err());
    }

    #[test]
    fn rejects_shell_metacharacters() {
        for bad in [
            "demo;rm -rf /",
            "demo|whoami",
            "demo`id`",
            "demo with space",
            "demo$(id)",
        ] {
            assert!(
                validate_hostname(bad).is_err(),
                "expected {bad:?} to be rejected"
            );
        }
    }
}
