// Mode selection for an instance. The substring check on the config version
// is the single documented fallback for state files that predate the mode
// field; nothing else should inspect the version string for this.

use crate::core::error::UpdaterResult;
use crate::core::manifest::Mode;
use crate::core::state::LocalState;

/// Last-resort inference: experimental pack versions carry "experimental" in
/// their config version tag.
fn infer_mode_from_config_version(config_version: &str) -> Mode {
    if config_version
        .to_ascii_lowercase()
        .contains(Mode::Experimental.as_str())
    {
        Mode::Experimental
    } else {
        Mode::Daily
    }
}

/// The mode an instance follows: its stored mode when valid, else inferred
/// from the installed config version.
pub fn resolve_mode(state: &LocalState) -> Mode {
    if !state.mode.is_empty() {
        if let Ok(mode) = Mode::parse(&state.mode) {
            return mode;
        }
    }
    infer_mode_from_config_version(&state.config_version)
}

/// Mode for an init run: the explicit flag wins, else inference from the
/// supplied config version.
pub fn resolve_init_mode(config_version: &str, mode_flag: &str) -> UpdaterResult<Mode> {
    if !mode_flag.is_empty() {
        return Mode::parse(mode_flag);
    }
    Ok(infer_mode_from_config_version(config_version))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stored_mode_wins() {
        let state = LocalState {
            mode: "experimental".to_string(),
            config_version: "2.8.0".to_string(),
            ..Default::default()
        };
        assert_eq!(resolve_mode(&state), Mode::Experimental);
    }

    #[test]
    fn config_version_fallback() {
        let state = LocalState {
            config_version: "2.9.0-experimental-3".to_string(),
            ..Default::default()
        };
        assert_eq!(resolve_mode(&state), Mode::Experimental);

        let state = LocalState {
            config_version: "2.8.0".to_string(),
            ..Default::default()
        };
        assert_eq!(resolve_mode(&state), Mode::Daily);
    }

    #[test]
    fn init_mode_flag_wins() {
        assert_eq!(
            resolve_init_mode("2.9.0-experimental-3", "daily").unwrap(),
            Mode::Daily
        );
        assert_eq!(
            resolve_init_mode("2.9.0-experimental-3", "").unwrap(),
            Mode::Experimental
        );
        assert!(resolve_init_mode("x", "nightly").is_err());
    }
}
