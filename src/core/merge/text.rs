// Line-oriented three-way merge. When both sides edit the same base region
// with different replacements, the user's version wins and the conflict is
// reported with the approximate base line number.

/// Merges `theirs` (new pack) and `ours` (user) against `base`.
/// Returns the merged bytes and any conflicts.
pub fn merge_text(base: &[u8], theirs: &[u8], ours: &[u8]) -> (Vec<u8>, Vec<String>) {
    let base_str = String::from_utf8_lossy(base);
    let theirs_str = String::from_utf8_lossy(theirs);
    let ours_str = String::from_utf8_lossy(ours);

    let base_lines = split_lines(&base_str);
    let theirs_lines = split_lines(&theirs_str);
    let ours_lines = split_lines(&ours_str);

    if ours_lines == base_lines {
        return (theirs.to_vec(), Vec::new());
    }
    if theirs_lines == base_lines || ours_lines == theirs_lines {
        return (ours.to_vec(), Vec::new());
    }

    let (merged, conflicts) = merge_lines(&base_lines, &theirs_lines, &ours_lines);
    (merged.join("\n").into_bytes(), conflicts)
}

pub(super) fn split_lines(s: &str) -> Vec<&str> {
    if s.is_empty() {
        return Vec::new();
    }
    let mut lines: Vec<&str> = s.split('\n').collect();
    // Drop the empty tail produced by a final newline.
    if lines.last() == Some(&"") {
        lines.pop();
    }
    lines
}

#[derive(Debug)]
struct Edit<'a> {
    base_start: usize,
    base_end: usize,
    new_lines: Vec<&'a str>,
}

/// Walks both edit scripts in lockstep over the base, applying
/// non-overlapping edits from either side; overlapping distinct edits keep
/// the user's lines and record a conflict.
fn merge_lines<'a>(
    base: &[&'a str],
    theirs: &[&'a str],
    ours: &[&'a str],
) -> (Vec<&'a str>, Vec<String>) {
    let theirs_diff = diff_lines(base, theirs);
    let ours_diff = diff_lines(base, ours);

    let mut result: Vec<&str> = Vec::new();
    let mut conflicts = Vec::new();

    let mut bi = 0; // base index
    let mut ti = 0; // theirs edit index
    let mut oi = 0; // ours edit index

    while bi < base.len() || ti < theirs_diff.len() || oi < ours_diff.len() {
        let theirs_edit = theirs_diff.get(ti).filter(|e| e.base_start <= bi);
        let ours_edit = ours_diff.get(oi).filter(|e| e.base_start <= bi);

        match (theirs_edit, ours_edit) {
            (Some(te), Some(oe)) => {
                if te.new_lines == oe.new_lines {
                    // Identical change on both sides, apply once.
                    result.extend_from_slice(&oe.new_lines);
                } else {
                    // Conflict: user wins.
                    result.extend_from_slice(&oe.new_lines);
                    conflicts.push(format!("line-level conflict near line {}", bi + 1));
                }
                bi = te.base_end.max(oe.base_end);
                ti += 1;
                oi += 1;
            }
            (Some(te), None) => {
                result.extend_from_slice(&te.new_lines);
                bi = te.base_end;
                ti += 1;
            }
            (None, Some(oe)) => {
                result.extend_from_slice(&oe.new_lines);
                bi = oe.base_end;
                oi += 1;
            }
            (None, None) => {
                if bi < base.len() {
                    result.push(base[bi]);
                    bi += 1;
                } else {
                    break;
                }
            }
        }
    }

    (result, conflicts)
}

/// Groups consecutive changes from `a` to `b` into edits, anchored on the
/// longest common subsequence.
fn diff_lines<'a>(a: &[&'a str], b: &[&'a str]) -> Vec<Edit<'a>> {
    let lcs = compute_lcs(a, b);

    let mut edits = Vec::new();
    let (mut ai, mut bi) = (0, 0);

    for anchor in &lcs {
        let Some(match_a) = a[ai..].iter().position(|l| l == anchor).map(|p| ai + p) else {
            break;
        };
        let Some(match_b) = b[bi..].iter().position(|l| l == anchor).map(|p| bi + p) else {
            break;
        };

        if ai < match_a || bi < match_b {
            edits.push(Edit {
                base_start: ai,
                base_end: match_a,
                new_lines: b[bi..match_b].to_vec(),
            });
        }

        ai = match_a + 1;
        bi = match_b + 1;
    }

    if ai < a.len() || bi < b.len() {
        edits.push(Edit {
            base_start: ai,
            base_end: a.len(),
            new_lines: b[bi..].to_vec(),
        });
    }

    edits
}

/// Longest common subsequence of the two line slices.
fn compute_lcs<'a>(a: &[&'a str], b: &[&'a str]) -> Vec<&'a str> {
    let (m, n) = (a.len(), b.len());
    if m == 0 || n == 0 {
        return Vec::new();
    }

    let mut dp = vec![vec![0usize; n + 1]; m + 1];
    for i in 1..=m {
        for j in 1..=n {
            dp[i][j] = if a[i - 1] == b[j - 1] {
                dp[i - 1][j - 1] + 1
            } else {
                dp[i - 1][j].max(dp[i][j - 1])
            };
        }
    }

    let mut lcs = Vec::with_capacity(dp[m][n]);
    let (mut i, mut j) = (m, n);
    while i > 0 && j > 0 {
        if a[i - 1] == b[j - 1] {
            lcs.push(a[i - 1]);
            i -= 1;
            j -= 1;
        } else if dp[i - 1][j] > dp[i][j - 1] {
            i -= 1;
        } else {
            j -= 1;
        }
    }
    lcs.reverse();
    lcs
}
