use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    time::SystemTime,
};

use crate::{error::ConfigError, store::Dn};

/// The setting naming the configuration record
pub const CONFIGURATION_DN_KEY: &str = "configurationEntryDN";
/// The setting naming the directory of the fallback configuration files
pub const CONF_DIR_KEY: &str = "confDir";
/// The setting naming the directory of the fallback key set file
pub const CERTS_DIR_KEY: &str = "certsDir";

/// Where the bootstrap settings file may be found
///
/// The primary path wins whenever a file exists there.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BootstrapLocation {
    primary: PathBuf,
    fallback: PathBuf,
}

impl BootstrapLocation {
    /// A location checking `primary` before `fallback`
    pub fn new(primary: impl Into<PathBuf>, fallback: impl Into<PathBuf>) -> Self {
        Self {
            primary: primary.into(),
            fallback: fallback.into(),
        }
    }

    /// The conventional file names within a directory
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self::new(dir.join("warden-store.properties"), dir.join("store.properties"))
    }

    /// The path the settings should be read from right now
    pub async fn resolve(&self) -> &Path {
        if tokio::fs::metadata(&self.primary).await.is_ok() {
            &self.primary
        } else {
            &self.fallback
        }
    }
}

/// Low-level settings read from a `key=value` file
///
/// These settings locate the configuration record and the fallback files.
/// The dynamic configuration itself lives in the store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Bootstrap {
    path: PathBuf,
    modified: Option<SystemTime>,
    settings: BTreeMap<String, String>,
}

impl Bootstrap {
    /// Reads settings from the file at `path`
    ///
    /// # Errors
    ///
    /// The file cannot be read, or a line cannot be parsed.
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = tokio::fs::read(path)
            .await
            .map_err(|source| ConfigError::File {
                path: path.to_owned(),
                source,
            })?;
        let modified = tokio::fs::metadata(path)
            .await
            .ok()
            .and_then(|m| m.modified().ok());

        let settings = dotenvy::from_read_iter(contents.as_slice())
            .collect::<Result<BTreeMap<_, _>, _>>()
            .map_err(|source| ConfigError::Bootstrap {
                path: path.to_owned(),
                source,
            })?;

        Ok(Self {
            path: path.to_owned(),
            modified,
            settings,
        })
    }

    /// Constructs settings directly, as if read from `path`
    pub fn from_settings(path: impl Into<PathBuf>, settings: BTreeMap<String, String>) -> Self {
        Self {
            path: path.into(),
            modified: None,
            settings,
        }
    }

    /// The file the settings were read from
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// When the file was last modified, as of reading it
    #[must_use]
    pub fn modified(&self) -> Option<SystemTime> {
        self.modified
    }

    /// Whether the file at `path`, last modified at `modified`, differs
    /// from the one these settings were read from
    #[must_use]
    pub fn is_outdated_by(&self, path: &Path, modified: Option<SystemTime>) -> bool {
        path != self.path || modified > self.modified
    }

    /// Looks up a setting
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.settings
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
    }

    /// Looks up a mandatory setting
    ///
    /// # Errors
    ///
    /// The setting is absent or blank.
    pub fn require(&self, key: &'static str) -> Result<&str, ConfigError> {
        self.get(key).ok_or(ConfigError::MissingBootstrapValue(key))
    }

    /// The DN of the configuration record
    ///
    /// # Errors
    ///
    /// The setting is absent.
    pub fn configuration_dn(&self) -> Result<Dn, ConfigError> {
        self.require(CONFIGURATION_DN_KEY)
            .map(|dn| Dn::new(dn.to_owned()))
    }

    /// The directory holding the fallback configuration files
    ///
    /// Defaults to the directory of the settings file.
    #[must_use]
    pub fn conf_dir(&self) -> PathBuf {
        match self.get(CONF_DIR_KEY) {
            Some(dir) => PathBuf::from(dir),
            None => self
                .path
                .parent()
                .map(Path::to_owned)
                .unwrap_or_default(),
        }
    }

    /// The directory holding the fallback key set file
    ///
    /// Defaults to the configuration directory.
    #[must_use]
    pub fn certs_dir(&self) -> PathBuf {
        match self.get(CERTS_DIR_KEY) {
            Some(dir) => PathBuf::from(dir),
            None => self.conf_dir(),
        }
    }
}

#[cfg(test)]
mod tests {
    use color_eyre::Result;

    use super::*;

    #[tokio::test]
    async fn primary_path_wins_when_present() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let location = BootstrapLocation::in_dir(dir.path());

        assert_eq!(location.resolve().await, dir.path().join("store.properties"));

        std::fs::write(dir.path().join("warden-store.properties"), "a=b\n")?;
        assert_eq!(
            location.resolve().await,
            dir.path().join("warden-store.properties")
        );
        Ok(())
    }

    #[tokio::test]
    async fn settings_are_parsed_from_key_value_lines() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("store.properties");
        std::fs::write(
            &path,
            "# store connection\nconfigurationEntryDN=ou=configuration,o=warden\ncertsDir=/etc/certs\nblank=\n",
        )?;

        let bootstrap = Bootstrap::load(&path).await?;

        assert_eq!(
            bootstrap.configuration_dn()?.as_str(),
            "ou=configuration,o=warden"
        );
        assert_eq!(bootstrap.conf_dir(), dir.path());
        assert_eq!(bootstrap.certs_dir(), PathBuf::from("/etc/certs"));
        assert!(bootstrap.get("blank").is_none());
        assert!(bootstrap.modified().is_some());
        Ok(())
    }

    #[tokio::test]
    async fn missing_configuration_dn_is_reported() -> Result<()> {
        let bootstrap = Bootstrap::from_settings("/nowhere/store.properties", BTreeMap::new());
        assert!(matches!(
            bootstrap.configuration_dn(),
            Err(ConfigError::MissingBootstrapValue(CONFIGURATION_DN_KEY))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn missing_file_is_reported() {
        let result = Bootstrap::load(Path::new("/nowhere/store.properties")).await;
        assert!(matches!(result, Err(ConfigError::File { .. })));
    }

    #[test]
    fn a_new_path_or_newer_file_outdates_settings() {
        let earlier = SystemTime::UNIX_EPOCH;
        let later = earlier + std::time::Duration::from_secs(5);
        let bootstrap = Bootstrap {
            path: PathBuf::from("/conf/store.properties"),
            modified: Some(earlier),
            settings: BTreeMap::new(),
        };

        assert!(!bootstrap.is_outdated_by(Path::new("/conf/store.properties"), Some(earlier)));
        assert!(bootstrap.is_outdated_by(Path::new("/conf/store.properties"), Some(later)));
        assert!(bootstrap.is_outdated_by(Path::new("/conf/warden-store.properties"), Some(earlier)));
    }
}
