use winnow::ascii::digit1;
use winnow::combinator::opt;
use winnow::{ModalResult, Parser};

use keel_types::{KernelError, Result};

use crate::model::ContractVersion;

fn number(input: &mut &str) -> ModalResult<u32> {
    digit1.try_map(|s: &str| s.parse::<u32>()).parse_next(input)
}

/// `[v]MAJOR.MINOR.PATCH`
fn dotted(input: &mut &str) -> ModalResult<ContractVersion> {
    (opt('v'), number, '.', number, '.', number)
        .map(|(_, major, _, minor, _, patch)| ContractVersion::new(major, minor, patch))
        .parse_next(input)
}

/// `vMAJOR_MINOR_PATCH`, the versioned directory naming convention.
fn underscored(input: &mut &str) -> ModalResult<ContractVersion> {
    ('v', number, '_', number, '_', number)
        .map(|(_, major, _, minor, _, patch)| ContractVersion::new(major, minor, patch))
        .parse_next(input)
}

/// Parse a `major.minor.patch` version string (an optional leading `v` is accepted).
pub fn parse_version(input: &str) -> Result<ContractVersion> {
    dotted
        .parse(input.trim())
        .map_err(|e| KernelError::VersionParse {
            input: input.to_string(),
            message: e.to_string(),
        })
}

/// Parse a versioned directory name such as `v1_0_0`. Returns `None` for
/// anything else.
pub fn parse_version_dir(name: &str) -> Option<ContractVersion> {
    underscored.parse(name).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_triple() {
        assert_eq!(parse_version("1.2.3").unwrap(), ContractVersion::new(1, 2, 3));
    }

    #[test]
    fn accepts_leading_v_and_whitespace() {
        assert_eq!(parse_version(" v10.0.7 ").unwrap(), ContractVersion::new(10, 0, 7));
    }

    #[test]
    fn rejects_missing_patch() {
        let err = parse_version("1.2").unwrap_err();
        assert!(matches!(err, KernelError::VersionParse { .. }));
    }

    #[test]
    fn rejects_trailing_garbage() {
        assert!(parse_version("1.2.3-beta").is_err());
    }

    #[test]
    fn version_dir_round_trip() {
        let v = ContractVersion::new(2, 1, 0);
        assert_eq!(v.dir_name(), "v2_1_0");
        assert_eq!(parse_version_dir("v2_1_0"), Some(v));
        assert_eq!(parse_version_dir("2.1.0"), None);
        assert_eq!(parse_version_dir("v2_1"), None);
    }
}
