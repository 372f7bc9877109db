//! Branch name validation.

use lazy_regex::regex_is_match;

/// Revision used when none is given.
pub const DEFAULT_BRANCH: &str = "main";

/// Accept a branch name made only of ASCII letters, digits, `.`, `_` and `-`.
pub fn sanitize_branch_name(name: &str) -> Result<&str, BranchError> {
    if regex_is_match!(r"^[a-zA-Z0-9._-]+$", name) {
        Ok(name)
    } else {
        Err(BranchError::Invalid(name.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BranchError {
    #[error(
        "invalid branch name `{0}`: only alphanumeric characters, period, underscore and dash are allowed"
    )]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test_case("main")]
    #[test_case("feature-1.2_b")]
    #[test_case("refs.pr.1")]
    fn test_accepted(name: &str) {
        assert_eq!(sanitize_branch_name(name), Ok(name));
    }

    #[test_case("main/x" ; "slash")]
    #[test_case("" ; "empty")]
    #[test_case("a b" ; "space")]
    #[test_case("../etc" ; "traversal")]
    #[test_case("main\n" ; "trailing newline")]
    #[test_case("brânch" ; "non ascii")]
    fn test_rejected(name: &str) {
        assert!(matches!(
            sanitize_branch_name(name),
            Err(BranchError::Invalid(_))
        ));
    }
}
