//! Ant-style path matching.
//!
//! `*` matches any run of characters inside one segment, `?` matches exactly
//! one character and `**` matches zero or more whole segments.

/// Immutable, process-wide set of glob patterns.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathRuleSet {
    patterns: Vec<String>,
}

impl PathRuleSet {
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns = patterns
            .into_iter()
            .map(|p| p.as_ref().trim().to_string())
            .filter(|p| !p.is_empty())
            .collect();
        Self { patterns }
    }

    /// Build from a comma-separated list, e.g. `/api/login,/api/public/**`.
    pub fn from_csv(raw: &str) -> Self {
        Self::new(raw.split(','))
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    pub fn matches_any(&self, path: &str) -> bool {
        matches_any(&self.patterns, path)
    }

    pub fn matches_prefix_any(&self, path: &str) -> bool {
        self.patterns.iter().any(|p| matches_prefix(p, path))
    }
}

/// Full match of `path` against `pattern`.
pub fn matches(pattern: &str, path: &str) -> bool {
    do_match(pattern, path, true)
}

/// True if any pattern matches; stops at the first hit.
pub fn matches_any<S: AsRef<str>>(patterns: &[S], path: &str) -> bool {
    patterns.iter().any(|p| matches(p.as_ref(), path))
}

/// True if `path` could be the start of something `pattern` matches.
pub fn matches_prefix(pattern: &str, path: &str) -> bool {
    do_match(pattern, path, false)
}

fn tokenize(s: &str) -> Vec<&str> {
    s.split('/').map(str::trim).filter(|t| !t.is_empty()).collect()
}

fn do_match(pattern: &str, path: &str, full_match: bool) -> bool {
    if path.starts_with('/') != pattern.starts_with('/') {
        return false;
    }

    let patt = tokenize(pattern);
    let dirs = tokenize(path);

    let mut patt_start: isize = 0;
    let mut patt_end: isize = patt.len() as isize - 1;
    let mut path_start: isize = 0;
    let mut path_end: isize = dirs.len() as isize - 1;

    // leading segments up to the first `**`
    while patt_start <= patt_end && path_start <= path_end {
        let seg = patt[patt_start as usize];
        if seg == "**" {
            break;
        }
        if !match_segment(seg, dirs[path_start as usize]) {
            return false;
        }
        patt_start += 1;
        path_start += 1;
    }

    if path_start > path_end {
        // path exhausted
        if patt_start > patt_end {
            return pattern.ends_with('/') == path.ends_with('/');
        }
        if !full_match {
            return true;
        }
        if patt_start == patt_end && patt[patt_start as usize] == "*" && path.ends_with('/') {
            return true;
        }
        return only_double_stars(&patt, patt_start, patt_end);
    } else if patt_start > patt_end {
        // pattern exhausted, path is not
        return false;
    } else if !full_match && patt[patt_start as usize] == "**" {
        return true;
    }

    // trailing segments back to the last `**`
    while patt_start <= patt_end && path_start <= path_end {
        let seg = patt[patt_end as usize];
        if seg == "**" {
            break;
        }
        if !match_segment(seg, dirs[path_end as usize]) {
            return false;
        }
        patt_end -= 1;
        path_end -= 1;
    }

    if path_start > path_end {
        return only_double_stars(&patt, patt_start, patt_end);
    }

    // fixed runs sandwiched between `**` markers
    while patt_start != patt_end && path_start <= path_end {
        let next_stars = ((patt_start + 1)..=patt_end).find(|&i| patt[i as usize] == "**");
        let Some(next_stars) = next_stars else {
            break;
        };
        if next_stars == patt_start + 1 {
            patt_start += 1;
            continue;
        }

        let run_len = next_stars - patt_start - 1;
        let avail = path_end - path_start + 1;
        let found = (0..=(avail - run_len)).find(|&offset| {
            (0..run_len).all(|j| {
                match_segment(
                    patt[(patt_start + j + 1) as usize],
                    dirs[(path_start + offset + j) as usize],
                )
            })
        });

        match found {
            Some(offset) => {
                patt_start = next_stars;
                path_start = path_start + offset + run_len;
            }
            None => return false,
        }
    }

    only_double_stars(&patt, patt_start, patt_end)
}

fn only_double_stars(patt: &[&str], from: isize, to: isize) -> bool {
    (from..=to).all(|i| patt[i as usize] == "**")
}

/// Single-segment wildcard match for `*` and `?`.
fn match_segment(pattern: &str, segment: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let s: Vec<char> = segment.chars().collect();

    let (mut pi, mut si) = (0usize, 0usize);
    let mut star: Option<usize> = None;
    let mut mark = 0usize;

    while si < s.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == s[si]) {
            pi += 1;
            si += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = Some(pi);
            mark = si;
            pi += 1;
        } else if let Some(sp) = star {
            pi = sp + 1;
            mark += 1;
            si = mark;
        } else {
            return false;
        }
    }
    while pi < p.len() && p[pi] == '*' {
        pi += 1;
    }
    pi == p.len()
}
