//! Bundled schema SQL and the `SOURCE '…';` include directive.
//!
//! The on-disk format of the `schema/` directory is preserved verbatim:
//! `init.sql` plus helper files for the current schema,
//! `added/<version>-added.sql` snapshots of each released schema (used
//! as migration test fixtures), and `migrate/<from>:<to>.sql` migration
//! steps. Scripts may include other scripts with a MariaDB-style
//! `SOURCE '<file>';` line which the loader expands before execution;
//! relative names resolve against the including script's directory.

use ybox_shared::errors::{YboxError, YboxResult};

/// Every bundled schema file, keyed by its path below `schema/`.
pub const SCHEMA_FILES: &[(&str, &str)] = &[
    ("init.sql", include_str!("../../schema/init.sql")),
    ("tables.sql", include_str!("../../schema/tables.sql")),
    ("indexes.sql", include_str!("../../schema/indexes.sql")),
    (
        "added/0.9.0-added.sql",
        include_str!("../../schema/added/0.9.0-added.sql"),
    ),
    (
        "added/0.9.1-added.sql",
        include_str!("../../schema/added/0.9.1-added.sql"),
    ),
    (
        "added/0.9.2-added.sql",
        include_str!("../../schema/added/0.9.2-added.sql"),
    ),
    (
        "added/0.9.5-added.sql",
        include_str!("../../schema/added/0.9.5-added.sql"),
    ),
    (
        "added/0.9.6-added.sql",
        include_str!("../../schema/added/0.9.6-added.sql"),
    ),
    (
        "added/0.9.7-added.sql",
        include_str!("../../schema/added/0.9.7-added.sql"),
    ),
    (
        "added/0.9.10-added.sql",
        include_str!("../../schema/added/0.9.10-added.sql"),
    ),
    (
        "migrate/0.9.0:0.9.1.sql",
        include_str!("../../schema/migrate/0.9.0:0.9.1.sql"),
    ),
    (
        "migrate/0.9.1:0.9.2.sql",
        include_str!("../../schema/migrate/0.9.1:0.9.2.sql"),
    ),
    (
        "migrate/0.9.2:0.9.5.sql",
        include_str!("../../schema/migrate/0.9.2:0.9.5.sql"),
    ),
    (
        "migrate/0.9.5:0.9.6.sql",
        include_str!("../../schema/migrate/0.9.5:0.9.6.sql"),
    ),
    (
        "migrate/0.9.6:0.9.7.sql",
        include_str!("../../schema/migrate/0.9.6:0.9.7.sql"),
    ),
    (
        "migrate/0.9.7:0.9.10.sql",
        include_str!("../../schema/migrate/0.9.7:0.9.10.sql"),
    ),
    (
        "migrate/0.9.10:0.9.11.sql",
        include_str!("../../schema/migrate/0.9.10:0.9.11.sql"),
    ),
];

/// Migration scripts as `(file name, text)` pairs.
pub const MIGRATION_SCRIPTS: &[(&str, &str)] = &[
    ("0.9.0:0.9.1.sql", include_str!("../../schema/migrate/0.9.0:0.9.1.sql")),
    ("0.9.1:0.9.2.sql", include_str!("../../schema/migrate/0.9.1:0.9.2.sql")),
    ("0.9.2:0.9.5.sql", include_str!("../../schema/migrate/0.9.2:0.9.5.sql")),
    ("0.9.5:0.9.6.sql", include_str!("../../schema/migrate/0.9.5:0.9.6.sql")),
    ("0.9.6:0.9.7.sql", include_str!("../../schema/migrate/0.9.6:0.9.7.sql")),
    ("0.9.7:0.9.10.sql", include_str!("../../schema/migrate/0.9.7:0.9.10.sql")),
    ("0.9.10:0.9.11.sql", include_str!("../../schema/migrate/0.9.10:0.9.11.sql")),
];

fn schema_file(name: &str) -> Option<&'static str> {
    SCHEMA_FILES
        .iter()
        .find(|(file, _)| *file == name)
        .map(|(_, text)| *text)
}

fn join_schema_path(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", dir, name)
    }
}

/// Expand all `SOURCE '<file>';` lines in a bundled script, recursively.
/// `script_name` is the path of the script below `schema/`, used to
/// resolve relative includes.
pub fn expand_script(script_name: &str) -> YboxResult<String> {
    let text = schema_file(script_name)
        .ok_or_else(|| YboxError::Schema(format!("no bundled schema script '{}'", script_name)))?;
    let dir = script_name.rsplit_once('/').map(|(d, _)| d).unwrap_or("");
    expand_text(text, dir)
}

/// Expand `SOURCE` directives in arbitrary script text against bundled
/// files in `dir`.
pub fn expand_text(text: &str, dir: &str) -> YboxResult<String> {
    let mut out = String::with_capacity(text.len());
    for line in text.lines() {
        if let Some(included) = parse_source_line(line) {
            let inc_name = join_schema_path(dir, included);
            let inc_text = schema_file(&inc_name).ok_or_else(|| {
                YboxError::Schema(format!(
                    "SOURCE '{}' not found among bundled schema scripts",
                    inc_name
                ))
            })?;
            let inc_dir = inc_name.rsplit_once('/').map(|(d, _)| d).unwrap_or("");
            out.push_str(&expand_text(inc_text, inc_dir)?);
        } else {
            out.push_str(line);
        }
        out.push('\n');
    }
    Ok(out)
}

/// Match a `SOURCE '<file>';` line (case-insensitive, no quote allowed
/// inside the file name).
fn parse_source_line(line: &str) -> Option<&str> {
    let trimmed = line.trim();
    let lower = trimmed.to_lowercase();
    if !lower.starts_with("source") {
        return None;
    }
    let rest = trimmed[6..].trim_start();
    let rest = rest.strip_prefix('\'')?;
    let (file, tail) = rest.split_once('\'')?;
    let tail = tail.trim();
    if tail == ";" && !file.contains('\'') {
        Some(file)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_source_line() {
        assert_eq!(parse_source_line("SOURCE 'tables.sql';"), Some("tables.sql"));
        assert_eq!(parse_source_line("  source 'a/b.sql' ;"), Some("a/b.sql"));
        assert_eq!(parse_source_line("-- SOURCE 'x';"), None);
        assert_eq!(parse_source_line("SELECT 1;"), None);
        assert_eq!(parse_source_line("SOURCE 'unterminated"), None);
    }

    #[test]
    fn test_expand_init_script() {
        let text = expand_script("init.sql").unwrap();
        assert!(text.contains("CREATE TABLE IF NOT EXISTS containers"));
        assert!(text.contains("idx_package_deps_dependency"));
        assert!(!text.to_lowercase().contains("source '"));
    }

    #[test]
    fn test_expand_nested_added_scripts() {
        // 0.9.10-added sources 0.9.7-added which sources 0.9.6-added ...
        let text = expand_script("added/0.9.10-added.sql").unwrap();
        assert!(text.contains("CREATE TABLE IF NOT EXISTS containers"));
        assert!(text.contains("ADD COLUMN destroyed"));
        assert!(text.contains("ADD COLUMN flags"));
        assert!(!text.to_lowercase().contains("source '"));
    }

    #[test]
    fn test_missing_source_fails() {
        let err = expand_text("SOURCE 'nope.sql';", "").unwrap_err();
        assert!(err.to_string().contains("nope.sql"));
    }
}
