// ─── Diff Engine ───
// Compares the installed mod set against the manifest (minus excludes, plus
// extras) and produces a deterministic change list.

use std::collections::{BTreeMap, HashSet};

use crate::core::manifest::ManifestSnapshot;
use crate::core::side::{side_included, InstallSide};
use crate::core::state::LocalState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Added,
    Removed,
    Updated,
    Unchanged,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change {
    pub name: String,
    pub kind: ChangeKind,
    pub old_version: String,
    pub new_version: String,
    pub side: String,
}

/// Version and side of an extra mod after resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedExtraMod {
    pub version: String,
    pub side: String,
}

#[derive(Debug, Default)]
pub struct ComputeOptions {
    pub exclude_mods: Vec<String>,
    pub extra_mods: BTreeMap<String, ResolvedExtraMod>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Summary {
    pub added: usize,
    pub removed: usize,
    pub updated: usize,
    pub unchanged: usize,
}

/// Computes the change list. Mod names are visited in sorted order so the
/// output is reproducible.
pub fn compute(
    state: &LocalState,
    manifest: &ManifestSnapshot,
    install: InstallSide,
    opts: &ComputeOptions,
) -> Vec<Change> {
    let new_mods = manifest.all_mods();
    let exclude_set: HashSet<&str> = opts.exclude_mods.iter().map(String::as_str).collect();

    let mut changes = Vec::new();

    // Added and updated mods from the manifest.
    for (name, pin) in &new_mods {
        if !side_included(&pin.side, install) {
            continue;
        }

        // Excluded mods produce a removal when currently installed.
        if exclude_set.contains(name.as_str()) {
            if let Some(installed) = state.mods.get(name) {
                changes.push(Change {
                    name: name.clone(),
                    kind: ChangeKind::Removed,
                    old_version: installed.version.clone(),
                    new_version: String::new(),
                    side: installed.side.clone(),
                });
            }
            continue;
        }

        match state.mods.get(name) {
            None => changes.push(Change {
                name: name.clone(),
                kind: ChangeKind::Added,
                old_version: String::new(),
                new_version: pin.version.clone(),
                side: pin.side.clone(),
            }),
            Some(installed) if installed.version != pin.version => changes.push(Change {
                name: name.clone(),
                kind: ChangeKind::Updated,
                old_version: installed.version.clone(),
                new_version: pin.version.clone(),
                side: pin.side.clone(),
            }),
            Some(installed) => changes.push(Change {
                name: name.clone(),
                kind: ChangeKind::Unchanged,
                old_version: installed.version.clone(),
                new_version: pin.version.clone(),
                side: pin.side.clone(),
            }),
        }
    }

    // Removed mods: installed but no longer in the manifest and not a
    // pending extra.
    for (name, installed) in &state.mods {
        if new_mods.contains_key(name) || opts.extra_mods.contains_key(name) {
            continue;
        }
        changes.push(Change {
            name: name.clone(),
            kind: ChangeKind::Removed,
            old_version: installed.version.clone(),
            new_version: String::new(),
            side: installed.side.clone(),
        });
    }

    // Extra mods. The manifest wins on a name collision unless excluded.
    for (name, extra) in &opts.extra_mods {
        if new_mods.contains_key(name) && !exclude_set.contains(name.as_str()) {
            continue;
        }
        if !side_included(&extra.side, install) {
            continue;
        }

        match state.mods.get(name) {
            None => changes.push(Change {
                name: name.clone(),
                kind: ChangeKind::Added,
                old_version: String::new(),
                new_version: extra.version.clone(),
                side: extra.side.clone(),
            }),
            Some(installed) if installed.version != extra.version => changes.push(Change {
                name: name.clone(),
                kind: ChangeKind::Updated,
                old_version: installed.version.clone(),
                new_version: extra.version.clone(),
                side: extra.side.clone(),
            }),
            Some(installed) => changes.push(Change {
                name: name.clone(),
                kind: ChangeKind::Unchanged,
                old_version: installed.version.clone(),
                new_version: extra.version.clone(),
                side: extra.side.clone(),
            }),
        }
    }

    changes.sort_by(|a, b| a.name.cmp(&b.name));
    changes
}

/// Counts by change kind.
pub fn summary(changes: &[Change]) -> Summary {
    let mut s = Summary::default();
    for c in changes {
        match c.kind {
            ChangeKind::Added => s.added += 1,
            ChangeKind::Removed => s.removed += 1,
            ChangeKind::Updated => s.updated += 1,
            ChangeKind::Unchanged => s.unchanged += 1,
        }
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::manifest::ModPin;
    use crate::core::state::InstalledMod;

    fn installed(version: &str, side: &str) -> InstalledMod {
        InstalledMod {
            version: version.to_string(),
            filename: String::new(),
            side: side.to_string(),
        }
    }

    fn pin(version: &str, side: &str) -> ModPin {
        serde_json::from_value(serde_json::json!({"version": version, "side": side})).unwrap()
    }

    fn change_map(changes: Vec<Change>) -> BTreeMap<String, Change> {
        changes.into_iter().map(|c| (c.name.clone(), c)).collect()
    }

    #[test]
    fn excludes_extras_and_side_filtering() {
        let state = LocalState {
            side: "client".to_string(),
            mods: BTreeMap::from([
                ("alpha".to_string(), installed("1.0.0", "BOTH")),
                ("beta".to_string(), installed("1.0.0", "CLIENT")),
                ("gamma".to_string(), installed("1.0.0", "BOTH")),
                ("orphan".to_string(), installed("1.0.0", "BOTH")),
                ("extra-kept".to_string(), installed("9.0.0", "BOTH")),
                ("manifest-and-extra".to_string(), installed("0.9.0", "BOTH")),
            ]),
            ..Default::default()
        };

        let manifest = ManifestSnapshot {
            first_party_mods: BTreeMap::from([
                ("alpha".to_string(), pin("2.0.0", "BOTH")),
                ("beta".to_string(), pin("1.0.0", "CLIENT")),
                ("gamma".to_string(), pin("1.0.0", "BOTH")),
                ("new-client".to_string(), pin("1.0.0", "CLIENT")),
                ("server-only".to_string(), pin("1.0.0", "SERVER")),
                ("manifest-and-extra".to_string(), pin("1.0.0", "BOTH")),
            ]),
            ..Default::default()
        };

        let opts = ComputeOptions {
            exclude_mods: vec!["beta".to_string()],
            extra_mods: BTreeMap::from([
                (
                    "extra-new".to_string(),
                    ResolvedExtraMod {
                        version: "5.0.0".to_string(),
                        side: "BOTH".to_string(),
                    },
                ),
                (
                    "extra-kept".to_string(),
                    ResolvedExtraMod {
                        version: "9.0.0".to_string(),
                        side: "BOTH".to_string(),
                    },
                ),
                (
                    "manifest-and-extra".to_string(),
                    ResolvedExtraMod {
                        version: "2.0.0".to_string(),
                        side: "BOTH".to_string(),
                    },
                ),
            ]),
        };

        let changes = compute(&state, &manifest, InstallSide::Client, &opts);

        // Sorted by name for reproducibility.
        let names: Vec<&str> = changes.iter().map(|c| c.name.as_str()).collect();
        let mut sorted = names.clone();
        sorted.sort_unstable();
        assert_eq!(names, sorted);

        let s = summary(&changes);
        assert_eq!(
            s,
            Summary {
                added: 2,
                removed: 2,
                updated: 2,
                unchanged: 2,
            }
        );
        assert_eq!(
            s.added + s.removed + s.updated + s.unchanged,
            changes.len()
        );

        let got = change_map(changes);
        assert_eq!(got["alpha"].kind, ChangeKind::Updated);
        assert_eq!(got["alpha"].new_version, "2.0.0");
        assert_eq!(got["beta"].kind, ChangeKind::Removed);
        assert_eq!(got["gamma"].kind, ChangeKind::Unchanged);
        assert_eq!(got["new-client"].kind, ChangeKind::Added);
        assert_eq!(got["orphan"].kind, ChangeKind::Removed);
        assert_eq!(got["extra-kept"].kind, ChangeKind::Unchanged);
        assert_eq!(got["extra-new"].kind, ChangeKind::Added);
        // Manifest wins over a same-named extra unless excluded.
        assert_eq!(got["manifest-and-extra"].kind, ChangeKind::Updated);
        assert_eq!(got["manifest-and-extra"].new_version, "1.0.0");
        assert!(!got.contains_key("server-only"));
    }

    #[test]
    fn excluded_but_not_installed_is_no_change() {
        let state = LocalState {
            side: "client".to_string(),
            ..Default::default()
        };
        let manifest = ManifestSnapshot {
            first_party_mods: BTreeMap::from([("skipme".to_string(), pin("1.0.0", "BOTH"))]),
            ..Default::default()
        };
        let opts = ComputeOptions {
            exclude_mods: vec!["skipme".to_string()],
            ..Default::default()
        };

        let changes = compute(&state, &manifest, InstallSide::Client, &opts);
        assert!(changes.is_empty());
    }

    #[test]
    fn server_side_filtering() {
        let state = LocalState {
            side: "server".to_string(),
            mods: BTreeMap::from([("common".to_string(), installed("1.0.0", "BOTH"))]),
            ..Default::default()
        };
        let manifest = ManifestSnapshot {
            first_party_mods: BTreeMap::from([
                ("common".to_string(), pin("1.0.0", "BOTH")),
                ("client-only".to_string(), pin("1.0.0", "CLIENT")),
            ]),
            ..Default::default()
        };

        let changes = compute(&state, &manifest, InstallSide::Server, &ComputeOptions::default());
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].name, "common");
        assert_eq!(changes[0].kind, ChangeKind::Unchanged);
    }
}
