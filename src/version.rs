/// A `major.minor.patch` version packed into one integer so plain comparison orders it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Version(u64);

const COMPONENT_LIMIT: u64 = 1000;

impl Version {
    /// Parses `major[.minor[.patch]]`, missing components count as 0.
    ///
    /// A pre-release or build suffix (`4.20.0-rc.1`, `4.19.9+abc`) is ignored. Returns
    /// `None` for anything that does not fit the encoding: empty input, non-numeric or
    /// empty components, more than three components, or components above 999.
    pub fn parse(raw: &str) -> Option<Version> {
        let core = raw.trim().split(['-', '+']).next()?;
        if core.is_empty() {
            return None;
        }

        let mut parts = [0u64; 3];
        for (i, component) in core.split('.').enumerate() {
            if i >= parts.len() || component.is_empty() {
                return None;
            }
            if !component.bytes().all(|b| b.is_ascii_digit()) {
                return None;
            }
            let value: u64 = component.parse().ok()?;
            if value >= COMPONENT_LIMIT {
                return None;
            }
            parts[i] = value;
        }

        Some(Version(
            parts[0] * COMPONENT_LIMIT * COMPONENT_LIMIT + parts[1] * COMPONENT_LIMIT + parts[2],
        ))
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let major = self.0 / (COMPONENT_LIMIT * COMPONENT_LIMIT);
        let minor = (self.0 / COMPONENT_LIMIT) % COMPONENT_LIMIT;
        let patch = self.0 % COMPONENT_LIMIT;
        write!(f, "{}.{}.{}", major, minor, patch)
    }
}

/// Whether `version >= minimum`.
///
/// `None` means the comparison is indeterminate because one side could not be
/// parsed; callers take the conservative branch in that case.
pub fn is_at_least(version: &str, minimum: &str) -> Option<bool> {
    Some(Version::parse(version)? >= Version::parse(minimum)?)
}
