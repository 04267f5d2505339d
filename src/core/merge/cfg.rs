// Forge-style .cfg configs: brace-delimited categories holding
// `TYPE:key=value` entries with `#` comments. Parsed into an ordered
// structure so comments and intra-category order survive a merge.

use std::collections::BTreeMap;

use super::text::merge_text;

#[derive(Debug, Default, Clone)]
pub struct CfgFile {
    /// Lines before the first category (comments, blank lines).
    pub preamble: Vec<String>,
    /// Categories in order of appearance.
    pub categories: Vec<CfgCategory>,
}

#[derive(Debug, Default, Clone)]
pub struct CfgCategory {
    /// Comment lines immediately before the category.
    pub comments: Vec<String>,
    /// Full category name (e.g. "general").
    pub name: String,
    /// Entries in order of appearance.
    pub entries: Vec<CfgEntry>,
}

#[derive(Debug, Default, Clone)]
pub struct CfgEntry {
    /// Comment lines immediately before this entry.
    pub comments: Vec<String>,
    /// Type prefix + key name (e.g. "S:key").
    pub key: String,
    pub value: String,
}

/// Parses a .cfg document. Nested categories are tracked for depth but their
/// entries are flattened into the enclosing top-level category.
pub fn parse_cfg(input: &str) -> CfgFile {
    let mut cfg = CfgFile::default();
    let mut in_category = false;
    let mut pending_comments: Vec<String> = Vec::new();
    let mut depth = 0usize;

    for line in input.lines() {
        let trimmed = line.trim();

        if !in_category {
            if trimmed.is_empty() || trimmed.starts_with('#') {
                if depth == 0 {
                    pending_comments.push(line.to_string());
                }
                continue;
            }

            if let Some(name) = trimmed.strip_suffix('{') {
                let name = name.trim().trim_matches('"').to_string();
                if depth == 0 {
                    cfg.categories.push(CfgCategory {
                        name,
                        comments: std::mem::take(&mut pending_comments),
                        entries: Vec::new(),
                    });
                    in_category = true;
                }
                depth += 1;
                continue;
            }

            // Anything else belongs to the preamble.
            cfg.preamble.append(&mut pending_comments);
            cfg.preamble.push(line.to_string());
            continue;
        }

        // Inside a category.
        if trimmed == "}" {
            depth -= 1;
            if depth == 0 {
                in_category = false;
            }
            continue;
        }

        if trimmed.ends_with('{') {
            depth += 1;
            continue;
        }

        if trimmed.is_empty() || trimmed.starts_with('#') {
            pending_comments.push(line.to_string());
            continue;
        }

        let Some(category) = cfg.categories.last_mut() else {
            continue;
        };
        if let Some(eq) = trimmed.find('=') {
            category.entries.push(CfgEntry {
                comments: std::mem::take(&mut pending_comments),
                key: trimmed[..eq].to_string(),
                value: trimmed[eq + 1..].to_string(),
            });
        } else {
            // Non key=value line inside a category, treat as comment.
            pending_comments.push(line.to_string());
        }
    }

    cfg
}

impl CfgFile {
    /// Flat `category.key` → value map.
    pub fn to_map(&self) -> BTreeMap<String, String> {
        let mut m = BTreeMap::new();
        for cat in &self.categories {
            for e in &cat.entries {
                m.insert(format!("{}.{}", cat.name, e.key), e.value.clone());
            }
        }
        m
    }

    /// Renders the file: categories sorted alphabetically, entries keeping
    /// intra-category order, comments preserved.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for line in &self.preamble {
            out.push_str(line);
            out.push('\n');
        }

        let mut cats: Vec<&CfgCategory> = self.categories.iter().collect();
        cats.sort_by(|a, b| a.name.cmp(&b.name));

        for cat in cats {
            for line in &cat.comments {
                out.push_str(line);
                out.push('\n');
            }
            out.push_str(&cat.name);
            out.push_str(" {\n");
            for e in &cat.entries {
                for line in &e.comments {
                    out.push_str(line);
                    out.push('\n');
                }
                out.push_str("    ");
                out.push_str(&e.key);
                out.push('=');
                out.push_str(&e.value);
                out.push('\n');
            }
            out.push_str("}\n\n");
        }
        out
    }
}

/// Three-way merge of .cfg files: the new pack's structure is the skeleton,
/// user changes overlay where the pack did not change, and where both
/// changed the user's value wins with a recorded conflict.
pub fn merge_cfg(base: &[u8], theirs: &[u8], ours: &[u8]) -> (Vec<u8>, Vec<String>) {
    let (Ok(base_str), Ok(theirs_str), Ok(ours_str)) = (
        std::str::from_utf8(base),
        std::str::from_utf8(theirs),
        std::str::from_utf8(ours),
    ) else {
        return merge_text(base, theirs, ours);
    };

    let base_map = parse_cfg(base_str).to_map();
    let theirs_cfg = parse_cfg(theirs_str);
    let theirs_map = theirs_cfg.to_map();
    let ours_map = parse_cfg(ours_str).to_map();

    let mut conflicts = Vec::new();
    let mut result = theirs_cfg;

    for cat in &mut result.categories {
        for entry in &mut cat.entries {
            let full_key = format!("{}.{}", cat.name, entry.key);

            // New key in pack, or key the user deleted: keep the pack value.
            let Some(base_val) = base_map.get(&full_key) else {
                continue;
            };
            let Some(ours_val) = ours_map.get(&full_key) else {
                continue;
            };
            let theirs_val = theirs_map.get(&full_key).cloned().unwrap_or_default();

            let user_changed = ours_val != base_val;
            let pack_changed = &theirs_val != base_val;

            if user_changed && pack_changed && ours_val != &theirs_val {
                entry.value = ours_val.clone();
                conflicts.push(format!(
                    "conflict: {full_key} (user: {ours_val}, pack: {theirs_val})"
                ));
            } else if user_changed {
                entry.value = ours_val.clone();
            }
            // Only the pack changed, or neither: the pack value stands.
        }
    }

    (result.render().into_bytes(), conflicts)
}
