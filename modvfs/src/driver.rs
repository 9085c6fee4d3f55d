//! Thin error-rendering surface (§7's last paragraph): not a CLI — no
//! argument parsing, no process exit path — just the developer-mode vs
//! summarised `Display` choice callers make when reporting a failure.

use std::fmt;

use crate::config::EngineConfig;
use crate::error::ModVfsError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderMode {
    Developer,
    Summarized,
}

impl RenderMode {
    pub fn from_config(config: &EngineConfig) -> Self {
        if config.developer_mode {
            RenderMode::Developer
        } else {
            RenderMode::Summarized
        }
    }
}

/// A `Display`-only wrapper pairing an error with the mode it should be
/// rendered under, so callers can `println!("{}", rendered)` instead of
/// matching on the mode themselves.
pub struct RenderedError<'a> {
    error: &'a ModVfsError,
    mode: RenderMode,
}

impl<'a> RenderedError<'a> {
    pub fn new(error: &'a ModVfsError, mode: RenderMode) -> Self {
        Self { error, mode }
    }

    pub fn for_config(error: &'a ModVfsError, config: &EngineConfig) -> Self {
        Self::new(error, RenderMode::from_config(config))
    }
}

impl fmt::Display for RenderedError<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.error.render(self.mode == RenderMode::Developer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfigBuilder;

    #[test]
    fn summarized_mode_uses_display_not_debug() {
        let config = EngineConfigBuilder::new().game_root("/game").build().unwrap();
        let error = ModVfsError::PathMissing { path: "foo.xml".to_string() };
        let rendered = RenderedError::for_config(&error, &config).to_string();
        assert_eq!(rendered, error.to_string());
    }

    #[test]
    fn developer_mode_uses_debug_formatting() {
        let config = EngineConfigBuilder::new().game_root("/game").developer_mode(true).build().unwrap();
        let error = ModVfsError::PathMissing { path: "foo.xml".to_string() };
        let rendered = RenderedError::for_config(&error, &config).to_string();
        assert_eq!(rendered, format!("{error:?}"));
    }
}
