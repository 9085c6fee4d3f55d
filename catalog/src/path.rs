//! Virtual path normalisation and glob matching (component C1).
//!
//! Every path entering the VFS is folded to a canonical form: forward
//! slashes, ASCII-lowercased, drive/prefix stripped, `.` and redundant `/`
//! collapsed. Comparison on the normalised form is exact; external callers
//! may pass any mix of case and separators and still resolve to the same
//! entry.

/// A normalised virtual path: lowercase, forward-slash separated, no leading
/// slash, no `.` or empty components.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VPath(String);

impl VPath {
    /// Normalise an arbitrary path string into canonical form.
    pub fn normalize(raw: &str) -> Self {
        Self(normalize_str(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl std::fmt::Display for VPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for VPath {
    fn from(raw: &str) -> Self {
        Self::normalize(raw)
    }
}

impl From<String> for VPath {
    fn from(raw: String) -> Self {
        Self::normalize(&raw)
    }
}

impl AsRef<str> for VPath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Strip a drive/prefix (`C:\`, `\\server\share`, a leading `/`), convert
/// backslashes to forward slashes, ASCII-lowercase, and collapse `.` and
/// empty components produced by doubled or redundant separators.
fn normalize_str(raw: &str) -> String {
    let stripped = strip_prefix(raw);
    let mut out_components: Vec<&str> = Vec::new();
    for component in stripped.split(['/', '\\']) {
        match component {
            "" | "." => continue,
            ".." => {
                // The game's virtual namespace has no parent-escape; treat
                // a literal ".." component as a name rather than silently
                // popping, since catalogs never legitimately contain one.
                out_components.push(component);
            }
            other => out_components.push(other),
        }
    }
    out_components.join("/").to_ascii_lowercase()
}

fn strip_prefix(raw: &str) -> &str {
    // Windows drive letter, e.g. `C:\foo` or `C:/foo`.
    let bytes = raw.as_bytes();
    if bytes.len() >= 2 && bytes[1] == b':' && bytes[0].is_ascii_alphabetic() {
        return &raw[2..];
    }
    raw
}

/// A compiled glob pattern supporting `*`, `?`, and `[...]`, matched against
/// the normalised form of a path (case-folded, like everything else in the
/// virtual namespace).
#[derive(Debug, Clone)]
pub struct Glob {
    pattern: String,
}

impl Glob {
    pub fn new(pattern: &str) -> Self {
        Self {
            pattern: normalize_str(pattern),
        }
    }

    pub fn matches(&self, path: &VPath) -> bool {
        glob_match(self.pattern.as_bytes(), path.as_str().as_bytes())
    }

    pub fn matches_str(&self, path: &str) -> bool {
        self.matches(&VPath::normalize(path))
    }
}

/// Classic recursive glob matcher over byte slices. `*` matches any run
/// (including empty, including `/`), `?` matches exactly one byte, `[...]`
/// matches one byte from the bracketed set (supporting `!` negation and
/// `a-z` ranges).
fn glob_match(pattern: &[u8], text: &[u8]) -> bool {
    match (pattern.first(), text.first()) {
        (None, None) => true,
        (None, Some(_)) => false,
        (Some(b'*'), _) => {
            // Try matching zero characters, then grow.
            if glob_match(&pattern[1..], text) {
                return true;
            }
            if !text.is_empty() && glob_match(pattern, &text[1..]) {
                return true;
            }
            false
        }
        (Some(b'?'), Some(_)) => glob_match(&pattern[1..], &text[1..]),
        (Some(b'?'), None) => false,
        (Some(b'['), Some(c)) => {
            if let Some((matched, rest)) = match_bracket(&pattern[1..], *c) {
                matched && glob_match(rest, &text[1..])
            } else {
                false
            }
        }
        (Some(p), Some(c)) => p == c && glob_match(&pattern[1..], &text[1..]),
        (Some(_), None) => false,
    }
}

/// Parses a `[...]` bracket expression starting just after the `[`. Returns
/// whether `c` matched and the pattern slice immediately after the closing
/// `]`.
fn match_bracket(pattern: &[u8], c: u8) -> Option<(bool, &[u8])> {
    let negate = pattern.first() == Some(&b'!');
    let mut rest = if negate { &pattern[1..] } else { pattern };
    let mut matched = false;
    let mut first = true;
    loop {
        match rest.first() {
            None => return None, // unterminated bracket: no match possible
            Some(b']') if !first => {
                rest = &rest[1..];
                break;
            }
            Some(&lo) => {
                first = false;
                if rest.get(1) == Some(&b'-') && rest.get(2).is_some_and(|&b| b != b']') {
                    let hi = rest[2];
                    if (lo..=hi).contains(&c) {
                        matched = true;
                    }
                    rest = &rest[3..];
                } else {
                    if lo == c {
                        matched = true;
                    }
                    rest = &rest[1..];
                }
            }
        }
    }
    Some((matched != negate, rest))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_case_and_separators() {
        assert_eq!(
            VPath::normalize(r"Libraries\JOBS.xml").as_str(),
            "libraries/jobs.xml"
        );
        assert_eq!(
            VPath::normalize("libraries//jobs.xml").as_str(),
            "libraries/jobs.xml"
        );
        assert_eq!(
            VPath::normalize("./libraries/./jobs.xml").as_str(),
            "libraries/jobs.xml"
        );
    }

    #[test]
    fn strips_drive_prefix() {
        assert_eq!(
            VPath::normalize(r"C:\Game\libraries\jobs.xml").as_str(),
            "game/libraries/jobs.xml"
        );
    }

    #[test]
    fn mixed_spellings_resolve_equal() {
        let a = VPath::normalize(r"Libraries\Jobs.XML");
        let b = VPath::normalize("libraries/jobs.xml");
        assert_eq!(a, b);
    }

    #[test]
    fn glob_star_and_question() {
        let g = Glob::new("libraries/*.xml");
        assert!(g.matches_str("libraries/jobs.xml"));
        assert!(g.matches_str("LIBRARIES/WARES.XML"));
        assert!(!g.matches_str("libraries/sub/jobs.xml_not"));

        let g2 = Glob::new("libraries/job?.xml");
        assert!(g2.matches_str("libraries/jobs.xml"));
        assert!(!g2.matches_str("libraries/jobss.xml"));
    }

    #[test]
    fn glob_bracket_set() {
        let g = Glob::new("libraries/job[sz].xml");
        assert!(g.matches_str("libraries/jobs.xml"));
        assert!(g.matches_str("libraries/jobz.xml"));
        assert!(!g.matches_str("libraries/joby.xml"));

        let neg = Glob::new("libraries/job[!sz].xml");
        assert!(neg.matches_str("libraries/joby.xml"));
        assert!(!neg.matches_str("libraries/jobs.xml"));
    }
}
