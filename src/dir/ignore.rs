// Ignore patterns for directory scans.
//
// Pattern list syntax: patterns are separated by `#`; `:#` is a literal `#`
// and `::` a literal `:`. Within a pattern `*` matches any run of characters,
// `/` included. A pattern without `/` is also tried against the last path
// component, so `*.tmp` ignores `a/b/x.tmp`. A pattern ending in `/` matches
// that directory and everything below it.

#[derive(Debug, Clone, PartialEq, Eq)]
struct Pattern {
    glob: String,
    dir_only: bool,
    anchored: bool,
}

impl Pattern {
    fn new(raw: &str) -> Option<Self> {
        let (glob, dir_only) = match raw.strip_suffix('/') {
            Some(g) => (g, true),
            None => (raw, false),
        };
        if glob.is_empty() {
            return None;
        }
        Some(Self {
            glob: glob.to_string(),
            dir_only,
            anchored: glob.contains('/'),
        })
    }

    /// `path` has no trailing `/`.
    fn matches_one(&self, path: &str) -> bool {
        if wildcard_match(self.glob.as_bytes(), path.as_bytes()) {
            return true;
        }
        if self.anchored {
            return false;
        }
        let name = path.rsplit('/').next().unwrap_or(path);
        wildcard_match(self.glob.as_bytes(), name.as_bytes())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IgnoreList {
    patterns: Vec<Pattern>,
    source: String,
}

impl IgnoreList {
    /// Parse a `#`-separated pattern list. Empty patterns are skipped.
    pub fn parse(list: &str) -> Self {
        let mut patterns = Vec::new();
        let mut cur = String::new();
        let mut chars = list.chars().peekable();
        while let Some(c) = chars.next() {
            match c {
                ':' if matches!(chars.peek(), Some('#' | ':')) => {
                    cur.extend(chars.next());
                }
                '#' => {
                    patterns.extend(Pattern::new(&cur));
                    cur.clear();
                }
                _ => cur.push(c),
            }
        }
        patterns.extend(Pattern::new(&cur));
        Self {
            patterns,
            source: list.to_string(),
        }
    }

    /// Add more patterns in the same syntax.
    pub fn extend(&mut self, list: &str) {
        if list.is_empty() {
            return;
        }
        let more = Self::parse(list);
        self.patterns.extend(more.patterns);
        if !self.source.is_empty() {
            self.source.push('#');
        }
        self.source.push_str(list);
    }

    /// The pattern list as given, escapes intact.
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    /// Whether a listing path (directories end in `/`) is ignored.
    pub fn is_ignored(&self, path: &str) -> bool {
        if path.is_empty() || self.patterns.is_empty() {
            return false;
        }
        let is_dir = path.ends_with('/');
        let path = path.trim_end_matches('/');

        for p in &self.patterns {
            if p.dir_only {
                // The path itself when it is a directory, then every ancestor.
                if is_dir && p.matches_one(path) {
                    return true;
                }
                let mut end = path.len();
                while let Some(i) = path[..end].rfind('/') {
                    if p.matches_one(&path[..i]) {
                        return true;
                    }
                    end = i;
                }
            } else if p.matches_one(path) {
                return true;
            }
        }
        false
    }
}

/// `*` matches any run of bytes; everything else matches itself.
fn wildcard_match(pattern: &[u8], text: &[u8]) -> bool {
    let (mut p, mut t) = (0usize, 0usize);
    let mut star: Option<(usize, usize)> = None;
    while t < text.len() {
        if p < pattern.len() && pattern[p] == b'*' {
            star = Some((p, t));
            p += 1;
        } else if p < pattern.len() && pattern[p] == text[t] {
            p += 1;
            t += 1;
        } else if let Some((sp, st)) = star {
            p = sp + 1;
            t = st + 1;
            star = Some((sp, st + 1));
        } else {
            return false;
        }
    }
    pattern[p..].iter().all(|&c| c == b'*')
}
