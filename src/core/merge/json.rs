// Structural three-way merge for JSON configs. Falls back to the text merge
// whenever any of the three documents fails to parse.

use serde_json::{Map, Value};

use super::text::merge_text;

/// Merges `theirs` (new pack) and `ours` (user) against `base`. The merged
/// document is emitted sorted and indented, with a trailing newline.
pub fn merge_json(base: &[u8], theirs: &[u8], ours: &[u8]) -> (Vec<u8>, Vec<String>) {
    let (Ok(base_val), Ok(theirs_val), Ok(ours_val)) = (
        serde_json::from_slice::<Value>(base),
        serde_json::from_slice::<Value>(theirs),
        serde_json::from_slice::<Value>(ours),
    ) else {
        return merge_text(base, theirs, ours);
    };

    let mut conflicts = Vec::new();
    let merged = merge_value("", Some(&base_val), &theirs_val, &ours_val, &mut conflicts);

    match serde_json::to_vec_pretty(&merged) {
        Ok(mut out) => {
            out.push(b'\n');
            (out, conflicts)
        }
        Err(_) => merge_text(base, theirs, ours),
    }
}

fn merge_value(
    path: &str,
    base: Option<&Value>,
    theirs: &Value,
    ours: &Value,
    conflicts: &mut Vec<String>,
) -> Value {
    // All three mappings: merge key by key.
    if let (Some(Value::Object(base_map)), Value::Object(theirs_map), Value::Object(ours_map)) =
        (base, theirs, ours)
    {
        return merge_objects(path, base_map, theirs_map, ours_map, conflicts);
    }

    // Scalar (or mixed-shape) rule.
    let user_changed = base != Some(ours);
    let pack_changed = base != Some(theirs);

    if user_changed && pack_changed && theirs != ours {
        // Both changed differently: user wins, conflict recorded.
        conflicts.push(format!("conflict at {path}: user and pack both changed"));
        return ours.clone();
    }
    if user_changed {
        return ours.clone();
    }
    theirs.clone()
}

fn merge_objects(
    path: &str,
    base: &Map<String, Value>,
    theirs: &Map<String, Value>,
    ours: &Map<String, Value>,
    conflicts: &mut Vec<String>,
) -> Value {
    let mut result = Map::new();

    let mut all_keys: Vec<&String> = base.keys().chain(theirs.keys()).chain(ours.keys()).collect();
    all_keys.sort();
    all_keys.dedup();

    for key in all_keys {
        let key_path = if path.is_empty() {
            key.clone()
        } else {
            format!("{path}.{key}")
        };

        let base_val = base.get(key);
        let theirs_val = theirs.get(key);
        let ours_val = ours.get(key);

        match (base_val, theirs_val, ours_val) {
            // Key exists everywhere: merge recursively.
            (Some(b), Some(t), Some(o)) => {
                result.insert(key.clone(), merge_value(&key_path, Some(b), t, o, conflicts));
            }

            // Added by one side only: adopt it.
            (None, Some(t), None) => {
                result.insert(key.clone(), t.clone());
            }
            (None, None, Some(o)) => {
                result.insert(key.clone(), o.clone());
            }

            // Added by both sides: merge with no base.
            (None, Some(t), Some(o)) => {
                result.insert(key.clone(), merge_value(&key_path, None, t, o, conflicts));
            }

            // Pack removed, user kept: user wins only if the user changed it.
            (Some(b), None, Some(o)) => {
                if b != o {
                    result.insert(key.clone(), o.clone());
                }
            }

            // User removed, pack kept: respect the removal unless the pack
            // changed the value, which is restored with a conflict.
            (Some(b), Some(t), None) => {
                if b != t {
                    result.insert(key.clone(), t.clone());
                    conflicts.push(format!(
                        "conflict at {key_path}: user removed but pack changed"
                    ));
                }
            }

            // Removed by both: drop.
            (Some(_), None, None) => {}

            (None, None, None) => unreachable!("key came from one of the maps"),
        }
    }

    Value::Object(result)
}
