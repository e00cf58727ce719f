// ABOUTME: Validates topic and channel names against nsqd's naming rules
// ABOUTME: `^[.a-zA-Z0-9_\-]{2,64}(#ephemeral)?$`, checked client-side before a SUB/PUB round trip

use crate::error::{NsqError, NsqResult};

const EPHEMERAL_SUFFIX: &str = "#ephemeral";
const MIN_LEN: usize = 2;
const MAX_LEN: usize = 64;

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-'
}

/// Validate a topic or channel name, optionally suffixed with `#ephemeral`.
/// The base name (suffix excluded) must be 2-64 characters from
/// `[.a-zA-Z0-9_-]`.
pub fn validate_name(name: &str) -> NsqResult<()> {
    let base = name.strip_suffix(EPHEMERAL_SUFFIX).unwrap_or(name);

    if base.len() < MIN_LEN || base.len() > MAX_LEN {
        return Err(NsqError::InvalidTopicOrChannel(format!(
            "{name:?} must be between {MIN_LEN} and {MAX_LEN} characters (excluding any #ephemeral suffix)"
        )));
    }

    if !base.chars().all(is_name_char) {
        return Err(NsqError::InvalidTopicOrChannel(format!(
            "{name:?} contains characters outside [.a-zA-Z0-9_-]"
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_minimum_length() {
        assert!(validate_name("ab").is_ok());
    }

    #[test]
    fn accepts_maximum_length() {
        assert!(validate_name(&"a".repeat(64)).is_ok());
    }

    #[test]
    fn rejects_single_character() {
        assert!(validate_name("a").is_err());
    }

    #[test]
    fn rejects_over_maximum_length() {
        assert!(validate_name(&"a".repeat(65)).is_err());
    }

    #[test]
    fn accepts_ephemeral_suffix() {
        assert!(validate_name("events#ephemeral").is_ok());
    }

    #[test]
    fn rejects_ephemeral_suffix_in_the_middle() {
        assert!(validate_name("events#ephemeral_extra").is_err());
    }

    #[test]
    fn rejects_disallowed_characters() {
        assert!(validate_name("bad topic!").is_err());
    }
}
