//! Value interpolation for resolved INI documents.
//!
//! Two substitution forms are applied to every value:
//!
//! - `${NAME}` and `$NAME` expand environment references. A controlled
//!   placeholder set (target home, container identity, XDG dirs) is
//!   consulted before the process environment. A `${NAME}` naming a
//!   recognized placeholder that has no value is an error; any other
//!   undefined reference is left as literal text.
//! - `%(key)s` references another key in the same section, resolved
//!   lazily so definition order does not matter. Undefined references
//!   and reference cycles fail with a configuration error. `%%` escapes
//!   a literal percent.

use std::collections::HashMap;

use ybox_shared::errors::{YboxError, YboxResult};

use super::ini::IniDocument;

/// Placeholder names that must resolve when referenced as `${NAME}`.
const RECOGNIZED: &[&str] = &[
    "TARGET_HOME",
    "TARGET_SCRIPTS_DIR",
    "HOME",
    "USER",
    "XDG_RUNTIME_DIR",
    "XDG_CONFIG_HOME",
    "XDG_DATA_HOME",
    "YBOX_CONTAINER_NAME",
    "YBOX_HOST_UID",
    "YBOX_HOST_GID",
];

/// Expansion context: the controlled placeholder values plus the
/// sections for which environment expansion is skipped (their values are
/// consumed verbatim inside the container where the environment
/// differs).
#[derive(Debug, Clone, Default)]
pub struct ExpandContext {
    placeholders: HashMap<String, String>,
    skip_sections: Vec<String>,
}

impl ExpandContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn placeholder(mut self, name: &str, value: impl Into<String>) -> Self {
        self.placeholders.insert(name.to_string(), value.into());
        self
    }

    /// Skip `${…}` expansion for a whole section.
    pub fn skip_section(mut self, name: &str) -> Self {
        self.skip_sections.push(name.to_string());
        self
    }

    fn lookup(&self, name: &str) -> Option<String> {
        if let Some(value) = self.placeholders.get(name) {
            return Some(value.clone());
        }
        std::env::var(name).ok()
    }
}

/// Resolve an entire document: pass one expands environment references
/// in every value, pass two resolves `%(key)s` references lazily per
/// section with cycle detection. Returns a new document with the same
/// section/key order.
pub fn resolve_document(doc: &IniDocument, ctx: &ExpandContext) -> YboxResult<IniDocument> {
    let mut expanded = doc.clone();
    for section in doc.sections() {
        let skip_env = ctx.skip_sections.iter().any(|s| s == &section.name);
        for (key, value) in section.entries() {
            let new_value = if skip_env {
                value.to_string()
            } else {
                expand_env(value, ctx)?
            };
            expanded.set_value(&section.name, key, new_value);
        }
    }

    let mut resolved = expanded.clone();
    for section in expanded.sections() {
        let mut memo: HashMap<String, String> = HashMap::new();
        for (key, _) in section.entries() {
            let mut stack = Vec::new();
            let value =
                resolve_key(&expanded, &section.name, key, &mut memo, &mut stack)?;
            resolved.set_value(&section.name, key, value);
        }
    }
    Ok(resolved)
}

fn now_re() -> &'static regex::Regex {
    static RE: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();
    RE.get_or_init(|| regex::Regex::new(r"\$\{NOW:([^}]*)\}").expect("static regex"))
}

/// Expand `${NAME}` and `$NAME` references in one value. A special
/// `${NOW:<fmt>}` form substitutes the current time in strftime format
/// (useful for log file names in profiles).
pub fn expand_env(value: &str, ctx: &ExpandContext) -> YboxResult<String> {
    let value = now_re().replace_all(value, |caps: &regex::Captures<'_>| {
        use chrono::format::{Item, StrftimeItems};
        let items: Vec<Item<'_>> = StrftimeItems::new(&caps[1]).collect();
        if items.iter().any(|item| matches!(item, Item::Error)) {
            // leave malformed strftime patterns alone
            return caps[0].to_string();
        }
        chrono::Local::now()
            .format_with_items(items.into_iter())
            .to_string()
    });
    let value = value.as_ref();
    let mut out = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos + 1..];
        if let Some(body) = tail.strip_prefix('{') {
            match body.find('}') {
                Some(end) => {
                    let name = &body[..end];
                    rest = &body[end + 1..];
                    match ctx.lookup(name) {
                        Some(val) => out.push_str(&val),
                        None if RECOGNIZED.contains(&name) => {
                            return Err(YboxError::Config(format!(
                                "undefined placeholder '${{{}}}'",
                                name
                            )));
                        }
                        None => {
                            out.push_str("${");
                            out.push_str(name);
                            out.push('}');
                        }
                    }
                }
                None => {
                    // unterminated ${ is literal
                    out.push_str("${");
                    rest = body;
                }
            }
        } else {
            let end = tail
                .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                .unwrap_or(tail.len());
            if end == 0 {
                out.push('$');
                rest = tail;
            } else {
                let name = &tail[..end];
                rest = &tail[end..];
                match ctx.lookup(name) {
                    Some(val) => out.push_str(&val),
                    None => {
                        out.push('$');
                        out.push_str(name);
                    }
                }
            }
        }
    }
    out.push_str(rest);
    Ok(out)
}

fn resolve_key(
    doc: &IniDocument,
    section: &str,
    key: &str,
    memo: &mut HashMap<String, String>,
    stack: &mut Vec<String>,
) -> YboxResult<String> {
    if let Some(done) = memo.get(key) {
        return Ok(done.clone());
    }
    if stack.iter().any(|k| k == key) {
        return Err(YboxError::Config(format!(
            "interpolation cycle in section [{}]: {} -> {}",
            section,
            stack.join(" -> "),
            key
        )));
    }
    let raw = doc.get(section, key).ok_or_else(|| {
        YboxError::Config(format!(
            "undefined interpolation reference '%({})s' in section [{}]",
            key, section
        ))
    })?;
    stack.push(key.to_string());
    let value = interpolate_value(doc, section, raw, memo, stack)?;
    stack.pop();
    memo.insert(key.to_string(), value.clone());
    Ok(value)
}

fn interpolate_value(
    doc: &IniDocument,
    section: &str,
    raw: &str,
    memo: &mut HashMap<String, String>,
    stack: &mut Vec<String>,
) -> YboxResult<String> {
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(pos) = rest.find('%') {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos + 1..];
        if let Some(stripped) = tail.strip_prefix('%') {
            out.push('%');
            rest = stripped;
        } else if let Some(after_paren) = tail.strip_prefix('(') {
            let end = after_paren.find(")s").ok_or_else(|| {
                YboxError::Config(format!(
                    "malformed interpolation in section [{}]: '{}'",
                    section, raw
                ))
            })?;
            let name = &after_paren[..end];
            let value = resolve_key(doc, section, name, memo, stack)?;
            out.push_str(&value);
            rest = &after_paren[end + 2..];
        } else {
            return Err(YboxError::Config(format!(
                "stray '%' in section [{}]: '{}' (use '%%' for a literal percent)",
                section, raw
            )));
        }
    }
    out.push_str(rest);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ini::IniDocument;

    fn ctx() -> ExpandContext {
        ExpandContext::new()
            .placeholder("TARGET_HOME", "/home/box")
            .placeholder("YBOX_CONTAINER_NAME", "c1")
    }

    #[test]
    fn test_expand_recognized_placeholder() {
        assert_eq!(
            expand_env("home is ${TARGET_HOME}", &ctx()).unwrap(),
            "home is /home/box"
        );
    }

    #[test]
    fn test_expand_bare_var() {
        assert_eq!(
            expand_env("name=$YBOX_CONTAINER_NAME!", &ctx()).unwrap(),
            "name=c1!"
        );
    }

    #[test]
    fn test_unknown_braced_var_left_literal() {
        assert_eq!(
            expand_env("keep ${SOME_RANDOM_THING} as is", &ctx()).unwrap(),
            "keep ${SOME_RANDOM_THING} as is"
        );
    }

    #[test]
    fn test_recognized_but_undefined_errors() {
        let empty = ExpandContext::new();
        // TARGET_HOME is in the recognized set but has no value here
        std::env::remove_var("TARGET_HOME");
        let err = expand_env("${TARGET_HOME}", &empty).unwrap_err();
        assert!(matches!(err, YboxError::Config(_)));
    }

    #[test]
    fn test_unknown_bare_var_left_literal() {
        assert_eq!(
            expand_env("$NOT_A_REAL_VAR_12345", &ctx()).unwrap(),
            "$NOT_A_REAL_VAR_12345"
        );
    }

    #[test]
    fn test_basic_interpolation() {
        let doc = IniDocument::parse(
            "[base]\nname = arch\nimage = docker.io/%(name)s:latest\n",
            "test",
        )
        .unwrap();
        let resolved = resolve_document(&doc, &ExpandContext::new()).unwrap();
        assert_eq!(resolved.get("base", "image"), Some("docker.io/arch:latest"));
    }

    #[test]
    fn test_interpolation_chain() {
        let doc = IniDocument::parse(
            "[base]\na = 1\nb = %(a)s2\nc = %(b)s3\n",
            "test",
        )
        .unwrap();
        let resolved = resolve_document(&doc, &ExpandContext::new()).unwrap();
        assert_eq!(resolved.get("base", "c"), Some("123"));
    }

    #[test]
    fn test_interpolation_cycle_errors() {
        let doc = IniDocument::parse("[base]\na = %(b)s\nb = %(a)s\n", "test").unwrap();
        let err = resolve_document(&doc, &ExpandContext::new()).unwrap_err();
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn test_undefined_reference_errors() {
        let doc = IniDocument::parse("[base]\na = %(missing)s\n", "test").unwrap();
        let err = resolve_document(&doc, &ExpandContext::new()).unwrap_err();
        assert!(err.to_string().contains("undefined interpolation"));
    }

    #[test]
    fn test_percent_escape() {
        let doc = IniDocument::parse("[base]\na = 50%% done\n", "test").unwrap();
        let resolved = resolve_document(&doc, &ExpandContext::new()).unwrap();
        assert_eq!(resolved.get("base", "a"), Some("50% done"));
    }

    #[test]
    fn test_now_substitution() {
        let expanded = expand_env("log-${NOW:%Y}.txt", &ExpandContext::new()).unwrap();
        assert!(expanded.starts_with("log-2"));
        assert!(expanded.ends_with(".txt"));
        assert!(!expanded.contains("NOW"));
    }

    #[test]
    fn test_skip_section() {
        let doc = IniDocument::parse("[configs]\nk = $HOME/.bashrc -> .bashrc\n", "test").unwrap();
        let ctx = ExpandContext::new().skip_section("configs");
        let resolved = resolve_document(&doc, &ctx).unwrap();
        assert_eq!(resolved.get("configs", "k"), Some("$HOME/.bashrc -> .bashrc"));
    }
}
