use semver::Version;

use crate::error::FilterError;

/// Parse the version specs are checked against. Missing minor or patch
/// components are taken as zero, so `"2"` and `"2.1"` are accepted.
pub fn parse_version(version: &str) -> Result<Version, FilterError> {
    let trimmed = version.trim().trim_start_matches('v');
    let padded = match trimmed.split('.').count() {
        1 => format!("{trimmed}.0.0"),
        2 => format!("{trimmed}.0"),
        _ => trimmed.to_string(),
    };
    Version::parse(&padded).map_err(|source| FilterError::SemVer {
        version: version.to_string(),
        source,
    })
}
