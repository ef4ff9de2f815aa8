//! Placeholder substitution for `[pkgmgr]` and `[repo]` command
//! templates.
//!
//! Templates carry `{name}` style placeholders. Flag placeholders
//! (`{quiet}`, `{opt_dep}`, `{purge}`, `{remove_deps}`, `{official}`,
//! `{word_start}`, `{word_end}`) are substituted from fixed values in
//! the same distribution INI; value placeholders (`{package}`,
//! `{packages}`, `{separator}`, `{prefix}`, `{header}`, `{name}`,
//! `{urls}`, `{key}`, `{url}`, `{server}`, `{options}`) are filled by
//! the dispatcher. Unknown placeholders are left untouched so template
//! authors get a visible artifact instead of silent corruption.

/// Replace each `{key}` with its value.
pub fn substitute(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = template.to_string();
    for (key, value) in vars {
        out = out.replace(&format!("{{{}}}", key), value);
    }
    // collapse doubled spaces left behind by empty flag values
    let mut collapsed = String::with_capacity(out.len());
    let mut last_space = false;
    for ch in out.trim().chars() {
        if ch == ' ' {
            if !last_space {
                collapsed.push(ch);
            }
            last_space = true;
        } else {
            collapsed.push(ch);
            last_space = false;
        }
    }
    collapsed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_substitute_flags() {
        let template = "sudo pacman -S {quiet} --needed {opt_dep}";
        assert_eq!(
            substitute(template, &[("quiet", "--noconfirm"), ("opt_dep", "--asdeps")]),
            "sudo pacman -S --noconfirm --needed --asdeps"
        );
        // empty flags collapse cleanly
        assert_eq!(
            substitute(template, &[("quiet", ""), ("opt_dep", "")]),
            "sudo pacman -S --needed"
        );
    }

    #[test]
    fn test_unknown_placeholder_left() {
        assert_eq!(substitute("x {unknown} y", &[]), "x {unknown} y");
    }

    #[test]
    fn test_package_substitution() {
        assert_eq!(
            substitute("pacman -Qlq '{package}'", &[("package", "vim")]),
            "pacman -Qlq 'vim'"
        );
    }
}
