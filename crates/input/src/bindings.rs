use std::collections::BTreeMap;
use std::path::Path;

use penumbra_render::ConfigError;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::action::Action;

/// Box-size change per second for the default zoom keys.
pub const DEFAULT_ZOOM_RATE: f32 = 4.0;

/// Key names mapped to actions.
///
/// Keys are named after winit's `KeyCode` variants (`KeyP`, `PageUp`, ...).
/// In YAML:
///
/// ```yaml
/// KeyP: { action: toggle_perspective }
/// PageUp: { action: zoom_box, rate: 4.0 }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InputBindings {
    keys: BTreeMap<String, Action>,
}

impl Default for InputBindings {
    fn default() -> Self {
        let keys = [
            ("KeyP", Action::TogglePerspective),
            ("KeyM", Action::ToggleShadowDebug),
            ("KeyF", Action::ToggleWireframe),
            ("PageUp", Action::ZoomBox { rate: DEFAULT_ZOOM_RATE }),
            ("PageDown", Action::ZoomBox { rate: -DEFAULT_ZOOM_RATE }),
        ]
        .into_iter()
        .map(|(key, action)| (key.to_string(), action))
        .collect();
        Self { keys }
    }
}

impl InputBindings {
    pub fn empty() -> Self {
        Self {
            keys: BTreeMap::new(),
        }
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let bindings = Self::from_yaml_str(&text)?;
        debug!(path = %path.display(), keys = bindings.keys.len(), "loaded input bindings");
        Ok(bindings)
    }

    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(text)?)
    }

    /// The action bound to `key`; [`Action::Noop`] when unbound.
    pub fn action_for(&self, key: &str) -> Action {
        self.keys.get(key).copied().unwrap_or(Action::Noop)
    }

    /// Bind `key`, returning the action it replaced.
    pub fn bind(&mut self, key: impl Into<String>, action: Action) -> Option<Action> {
        self.keys.insert(key.into(), action)
    }

    pub fn unbind(&mut self, key: &str) -> Option<Action> {
        self.keys.remove(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Action)> {
        self.keys.iter().map(|(key, action)| (key.as_str(), *action))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn default_keys() {
        let bindings = InputBindings::default();
        assert_eq!(bindings.action_for("KeyP"), Action::TogglePerspective);
        assert_eq!(bindings.action_for("KeyM"), Action::ToggleShadowDebug);
        assert_eq!(bindings.action_for("KeyF"), Action::ToggleWireframe);
        assert_eq!(
            bindings.action_for("PageDown"),
            Action::ZoomBox { rate: -DEFAULT_ZOOM_RATE }
        );
        assert_eq!(bindings.action_for("KeyQ"), Action::Noop);
        assert_eq!(bindings.iter().count(), 5);
    }

    #[test]
    fn parse_yaml() {
        let yaml = "KeyW: { action: toggle_wireframe }\nPageUp: { action: zoom_box, rate: 2.5 }\n";
        let bindings = InputBindings::from_yaml_str(yaml).unwrap();
        assert_eq!(bindings.action_for("KeyW"), Action::ToggleWireframe);
        assert_eq!(bindings.action_for("PageUp"), Action::ZoomBox { rate: 2.5 });
        assert_eq!(bindings.action_for("KeyF"), Action::Noop);
    }

    #[test]
    fn unknown_action_is_rejected() {
        let err = InputBindings::from_yaml_str("KeyX: { action: explode }").unwrap_err();
        assert!(matches!(err, ConfigError::Yaml(_)));
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "KeyM: {{ action: toggle_shadow_debug }}").unwrap();
        let bindings = InputBindings::load(file.path()).unwrap();
        assert_eq!(bindings.action_for("KeyM"), Action::ToggleShadowDebug);
    }

    #[test]
    fn rebinding() {
        let mut bindings = InputBindings::empty();
        assert_eq!(bindings.bind("KeyT", Action::ToggleWireframe), None);
        assert_eq!(
            bindings.bind("KeyT", Action::TogglePerspective),
            Some(Action::ToggleWireframe)
        );
        assert_eq!(bindings.unbind("KeyT"), Some(Action::TogglePerspective));
        assert_eq!(bindings.action_for("KeyT"), Action::Noop);
    }
}
