//! Extension manifest reader (C4): parses an extension's `content.xml` for
//! id, name, version, dependencies and the enabled flag, plus the small
//! `<user>/config.xml` schema that carries the disabled-extension list.

use std::path::Path;

use quick_xml::events::Event;
use quick_xml::name::QName;
use quick_xml::reader::Reader;
use tracing::{debug, warn};

use crate::error::{ExtmanError, IoContext, Result};

/// One `<dependency>` entry of a `content.xml`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    pub id: String,
    pub version: Option<String>,
    pub optional: bool,
}

/// The parsed contents of an extension's `content.xml`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    pub id: String,
    pub name: String,
    pub version: String,
    pub save: bool,
    pub dependencies: Vec<Dependency>,
}

impl Manifest {
    /// Parse manifest text, falling back to `folder_name` (lowercased) for a
    /// missing `id` attribute per the reader's lenient contract.
    pub fn parse(xml_text: &str, folder_name: &str) -> Result<Self> {
        let mut reader = Reader::from_str(xml_text);
        reader.config_mut().trim_text(true);

        let mut id = None;
        let mut name = String::new();
        let mut version = String::new();
        let mut save = false;
        let mut dependencies = Vec::new();
        let mut found_content = false;

        loop {
            match reader.read_event() {
                Ok(Event::Empty(e)) | Ok(Event::Start(e)) => {
                    let local = local_name(e.name());
                    if local == "content" {
                        found_content = true;
                        for attr in e.attributes().flatten() {
                            let key = local_name(attr.key);
                            let value = attr
                                .unescape_value()
                                .map_err(|err| manifest_error(folder_name, err.to_string()))?
                                .into_owned();
                            match key.as_str() {
                                "id" => id = Some(value),
                                "name" => name = value,
                                "version" => version = value,
                                "save" => save = value.eq_ignore_ascii_case("true") || value == "1",
                                _ => {}
                            }
                        }
                    } else if local == "dependency" {
                        let mut dep_id = None;
                        let mut dep_version = None;
                        let mut optional = false;
                        for attr in e.attributes().flatten() {
                            let key = local_name(attr.key);
                            let value = attr
                                .unescape_value()
                                .map_err(|err| manifest_error(folder_name, err.to_string()))?
                                .into_owned();
                            match key.as_str() {
                                "id" => dep_id = Some(value),
                                "version" => dep_version = Some(value),
                                "optional" => optional = value.eq_ignore_ascii_case("true") || value == "1",
                                _ => {}
                            }
                        }
                        let Some(dep_id) = dep_id else {
                            warn!("dependency entry in {folder_name}'s content.xml is missing an id, skipping");
                            continue;
                        };
                        dependencies.push(Dependency {
                            id: dep_id,
                            version: dep_version,
                            optional,
                        });
                    }
                }
                Ok(Event::Eof) => break,
                Ok(_) => {}
                Err(err) => return Err(manifest_error(folder_name, err.to_string())),
            }
        }

        if !found_content {
            return Err(manifest_error(folder_name, "missing root <content> element".to_string()));
        }

        let id = id.unwrap_or_else(|| {
            debug!("content.xml for {folder_name} has no id attribute, falling back to folder name");
            folder_name.to_ascii_lowercase()
        });

        Ok(Manifest {
            id,
            name,
            version,
            save,
            dependencies,
        })
    }

    /// Read and parse `<extension_dir>/content.xml`.
    pub fn read(extension_dir: &Path) -> Result<Self> {
        let path = extension_dir.join("content.xml");
        let text = std::fs::read_to_string(&path).with_path(&path)?;
        let folder_name = extension_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self::parse(&text, &folder_name)
    }
}

/// The `<user>/config.xml` disabled-extensions list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserConfig {
    pub disabled_extensions: Vec<String>,
}

impl UserConfig {
    /// Parse leniently: unknown children are ignored, matching C4's
    /// tolerance for `content.xml`.
    pub fn parse(xml_text: &str) -> Result<Self> {
        let mut reader = Reader::from_str(xml_text);
        reader.config_mut().trim_text(true);

        let mut disabled_extensions = Vec::new();
        loop {
            match reader.read_event() {
                Ok(Event::Empty(e)) | Ok(Event::Start(e)) => {
                    if local_name(e.name()) == "extension" {
                        for attr in e.attributes().flatten() {
                            if local_name(attr.key) == "id" {
                                if let Ok(value) = attr.unescape_value() {
                                    disabled_extensions.push(value.into_owned());
                                }
                            }
                        }
                    }
                }
                Ok(Event::Eof) => break,
                Ok(_) => {}
                Err(err) => {
                    return Err(ExtmanError::ManifestParseError {
                        path: Path::new("config.xml").to_path_buf(),
                        detail: err.to_string(),
                    })
                }
            }
        }
        Ok(UserConfig { disabled_extensions })
    }

    /// Read `<user_dir>/config.xml`, validating that `<user_dir>` looks like
    /// a real game user directory (`uidata.xml` present) when `strict` is
    /// set. A missing `config.xml` in a valid (or non-strict) user dir is
    /// treated as "nothing disabled".
    pub fn read(user_dir: &Path, strict: bool) -> Result<Self> {
        if strict && !user_dir.join("uidata.xml").is_file() {
            return Err(ExtmanError::UserDirInvalid {
                path: user_dir.to_path_buf(),
            });
        }
        let path = user_dir.join("config.xml");
        if !path.is_file() {
            return Ok(UserConfig::default());
        }
        let text = std::fs::read_to_string(&path).with_path(&path)?;
        Self::parse(&text)
    }
}

fn local_name(name: QName<'_>) -> String {
    String::from_utf8_lossy(name.local_name().as_ref()).into_owned()
}

fn manifest_error(folder_name: &str, detail: String) -> ExtmanError {
    ExtmanError::ManifestParseError {
        path: Path::new(folder_name).join("content.xml"),
        detail,
    }
}
