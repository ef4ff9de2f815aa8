//! Schema version parsing and the forward-only migration plan.

use std::cmp::Ordering;
use std::fmt;

use ybox_shared::errors::{YboxError, YboxResult};

use super::schema;

/// A dotted numeric schema version like `0.9.10`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaVersion(Vec<u32>);

impl SchemaVersion {
    pub fn parse(text: &str) -> YboxResult<SchemaVersion> {
        let parts: Result<Vec<u32>, _> = text.trim().split('.').map(str::parse).collect();
        match parts {
            Ok(parts) if !parts.is_empty() => Ok(SchemaVersion(parts)),
            _ => Err(YboxError::Schema(format!("invalid schema version '{}'", text))),
        }
    }
}

impl fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(u32::to_string).collect();
        write!(f, "{}", parts.join("."))
    }
}

impl PartialOrd for SchemaVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SchemaVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        // compare componentwise with implicit trailing zeros
        let len = self.0.len().max(other.0.len());
        for idx in 0..len {
            let a = self.0.get(idx).copied().unwrap_or(0);
            let b = other.0.get(idx).copied().unwrap_or(0);
            match a.cmp(&b) {
                Ordering::Equal => continue,
                unequal => return unequal,
            }
        }
        Ordering::Equal
    }
}

/// One migration step `<from>:<to>.sql`.
#[derive(Debug)]
pub struct MigrationStep {
    pub from: SchemaVersion,
    pub to: SchemaVersion,
    pub script: &'static str,
}

/// The migration steps applicable to move `old` forward to `new`,
/// sorted ascending by their `from` version. Fails when the stored
/// version is newer than the library (downgrade).
pub fn plan_migrations(
    old: &SchemaVersion,
    new: &SchemaVersion,
) -> YboxResult<Vec<MigrationStep>> {
    if old > new {
        return Err(YboxError::Schema(format!(
            "state database version {} is newer than this version of ybox ({}); \
             upgrade ybox instead of downgrading the database",
            old, new
        )));
    }
    let mut steps = Vec::new();
    for (name, script) in schema::MIGRATION_SCRIPTS {
        let spec = name
            .strip_suffix(".sql")
            .ok_or_else(|| YboxError::Schema(format!("bad migration script name '{}'", name)))?;
        let (from_text, to_text) = spec.split_once(':').ok_or_else(|| {
            YboxError::Schema(format!("bad migration script name '{}'", name))
        })?;
        let from = SchemaVersion::parse(from_text)?;
        let to = SchemaVersion::parse(to_text)?;
        if &from >= old && &to <= new {
            steps.push(MigrationStep { from, to, script });
        }
    }
    steps.sort_by(|a, b| a.from.cmp(&b.from));
    Ok(steps)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_ordering() {
        let v090 = SchemaVersion::parse("0.9.0").unwrap();
        let v092 = SchemaVersion::parse("0.9.2").unwrap();
        let v0910 = SchemaVersion::parse("0.9.10").unwrap();
        assert!(v090 < v092);
        // numeric, not lexicographic
        assert!(v092 < v0910);
        assert_eq!(v090, SchemaVersion::parse("0.9.0").unwrap());
        assert!(SchemaVersion::parse("0.9").unwrap() == v090);
    }

    #[test]
    fn test_invalid_versions() {
        assert!(SchemaVersion::parse("").is_err());
        assert!(SchemaVersion::parse("a.b").is_err());
        assert!(SchemaVersion::parse("0.9.x").is_err());
    }

    #[test]
    fn test_plan_full_chain() {
        let old = SchemaVersion::parse("0.9.0").unwrap();
        let new = SchemaVersion::parse(crate::VERSION).unwrap();
        let steps = plan_migrations(&old, &new).unwrap();
        assert_eq!(steps.len(), schema::MIGRATION_SCRIPTS.len());
        // ascending and contiguous endpoints
        for window in steps.windows(2) {
            assert!(window[0].from < window[1].from);
            assert_eq!(window[0].to, window[1].from);
        }
        assert_eq!(steps.first().unwrap().from, old);
        assert_eq!(steps.last().unwrap().to, new);
    }

    #[test]
    fn test_plan_partial_chain() {
        let old = SchemaVersion::parse("0.9.6").unwrap();
        let new = SchemaVersion::parse(crate::VERSION).unwrap();
        let steps = plan_migrations(&old, &new).unwrap();
        assert_eq!(steps.first().unwrap().from, old);
        assert!(steps.iter().all(|s| s.from >= old));
    }

    #[test]
    fn test_downgrade_rejected() {
        let old = SchemaVersion::parse("99.0").unwrap();
        let new = SchemaVersion::parse(crate::VERSION).unwrap();
        let err = plan_migrations(&old, &new).unwrap_err();
        assert!(matches!(err, YboxError::Schema(_)));
    }
}
