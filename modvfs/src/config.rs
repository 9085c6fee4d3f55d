//! Engine configuration (ambient, §3/§9): the immutable record threaded
//! into `VirtualFileSystem::new` and `SourceLocation` construction, built
//! through a validating builder since ownership of "settings" moves from
//! scattered mutable globals (the original's pattern) to a single record
//! here.

use std::collections::HashSet;
use std::path::PathBuf;

use crate::error::{ModVfsError, Result};

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub game_root: PathBuf,
    pub user_dir: Option<PathBuf>,
    pub source_override_root: Option<PathBuf>,
    pub extension_roots: Vec<PathBuf>,
    pub allow_md5_errors: bool,
    pub ignore_output_extension: bool,
    pub output_to_catalog: bool,
    pub developer_mode: bool,
    pub whitelist: Option<HashSet<String>>,
    pub blacklist: HashSet<String>,
    pub output_extension_id: String,
    pub forced_xpath_attributes: Vec<String>,
    pub make_maximal_diffs: bool,
    pub strict_user_dir: bool,
}

#[derive(Debug, Clone, Default)]
pub struct EngineConfigBuilder {
    game_root: Option<PathBuf>,
    user_dir: Option<PathBuf>,
    source_override_root: Option<PathBuf>,
    extension_roots: Vec<PathBuf>,
    allow_md5_errors: bool,
    ignore_output_extension: bool,
    output_to_catalog: bool,
    developer_mode: bool,
    whitelist: Option<HashSet<String>>,
    blacklist: HashSet<String>,
    output_extension_id: Option<String>,
    forced_xpath_attributes: Vec<String>,
    make_maximal_diffs: bool,
    strict_user_dir: bool,
}

impl EngineConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn game_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.game_root = Some(root.into());
        self
    }

    pub fn user_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.user_dir = Some(dir.into());
        self
    }

    pub fn source_override_root(mut self, dir: impl Into<PathBuf>) -> Self {
        self.source_override_root = Some(dir.into());
        self
    }

    pub fn extension_roots(mut self, roots: Vec<PathBuf>) -> Self {
        self.extension_roots = roots;
        self
    }

    pub fn allow_md5_errors(mut self, value: bool) -> Self {
        self.allow_md5_errors = value;
        self
    }

    pub fn ignore_output_extension(mut self, value: bool) -> Self {
        self.ignore_output_extension = value;
        self
    }

    pub fn output_to_catalog(mut self, value: bool) -> Self {
        self.output_to_catalog = value;
        self
    }

    pub fn developer_mode(mut self, value: bool) -> Self {
        self.developer_mode = value;
        self
    }

    pub fn whitelist(mut self, ids: HashSet<String>) -> Self {
        self.whitelist = Some(ids);
        self
    }

    pub fn blacklist(mut self, ids: HashSet<String>) -> Self {
        self.blacklist = ids;
        self
    }

    pub fn output_extension_id(mut self, id: impl Into<String>) -> Self {
        self.output_extension_id = Some(id.into());
        self
    }

    pub fn forced_xpath_attributes(mut self, attrs: Vec<String>) -> Self {
        self.forced_xpath_attributes = attrs;
        self
    }

    pub fn make_maximal_diffs(mut self, value: bool) -> Self {
        self.make_maximal_diffs = value;
        self
    }

    pub fn strict_user_dir(mut self, value: bool) -> Self {
        self.strict_user_dir = value;
        self
    }

    pub fn build(self) -> Result<EngineConfig> {
        let game_root = self.game_root.ok_or_else(|| ModVfsError::ConfigValidation {
            detail: "game_root is required".to_string(),
        })?;
        if game_root.as_os_str().is_empty() {
            return Err(ModVfsError::ConfigValidation {
                detail: "game_root must not be empty".to_string(),
            });
        }
        let output_extension_id = self.output_extension_id.unwrap_or_else(|| "modframework_output".to_string());
        if output_extension_id.trim().is_empty() {
            return Err(ModVfsError::ConfigValidation {
                detail: "output_extension_id must not be empty".to_string(),
            });
        }

        Ok(EngineConfig {
            game_root,
            user_dir: self.user_dir,
            source_override_root: self.source_override_root,
            extension_roots: self.extension_roots,
            allow_md5_errors: self.allow_md5_errors,
            ignore_output_extension: self.ignore_output_extension,
            output_to_catalog: self.output_to_catalog,
            developer_mode: self.developer_mode,
            whitelist: self.whitelist,
            blacklist: self.blacklist,
            output_extension_id,
            forced_xpath_attributes: self.forced_xpath_attributes,
            make_maximal_diffs: self.make_maximal_diffs,
            strict_user_dir: self.strict_user_dir,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_game_root_is_rejected() {
        let err = EngineConfigBuilder::new().build().unwrap_err();
        assert!(matches!(err, ModVfsError::ConfigValidation { .. }));
    }

    #[test]
    fn defaults_are_applied_when_unset() {
        let config = EngineConfigBuilder::new().game_root("/game").build().unwrap();
        assert_eq!(config.output_extension_id, "modframework_output");
        assert!(!config.output_to_catalog);
        assert!(config.blacklist.is_empty());
    }
}
