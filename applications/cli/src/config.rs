/// Evener configuration
use crate::error::{CliError, Result};
use evener_core::DEFAULT_FACTOR;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// File loaded from the working directory when no `--config` is given
pub const DEFAULT_CONFIG_FILE: &str = "evener.toml";

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct EvenerConfig {
    /// Multiplier on the reference level (or each file's own level)
    #[serde(default = "default_factor")]
    pub factor: f64,

    #[serde(default)]
    pub output: OutputTarget,

    /// File extensions picked up when scanning directories
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,

    /// Descend into subdirectories when scanning
    #[serde(default = "default_recursive")]
    pub recursive: bool,
}

/// Where adjusted files are written
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(tag = "mode", content = "value", rename_all = "snake_case")]
pub enum OutputTarget {
    /// Overwrite each source file
    #[default]
    InPlace,
    /// Write into this directory under the source file name
    Directory(PathBuf),
    /// Write next to the source with this suffix before the extension
    Suffix(String),
}

impl OutputTarget {
    /// Output path for the source file `path`
    pub fn resolve(&self, path: &Path) -> PathBuf {
        match self {
            OutputTarget::InPlace => path.to_path_buf(),
            OutputTarget::Directory(dir) => match path.file_name() {
                Some(name) => dir.join(name),
                None => dir.join(path),
            },
            OutputTarget::Suffix(suffix) => {
                let stem = path
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_default();
                let name = match path.extension() {
                    Some(ext) => format!("{}{}.{}", stem, suffix, ext.to_string_lossy()),
                    None => format!("{}{}", stem, suffix),
                };
                path.with_file_name(name)
            }
        }
    }
}

impl EvenerConfig {
    /// Load configuration from file and environment
    ///
    /// `file` must exist when given; otherwise `evener.toml` in the working
    /// directory is used if present.
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let mut settings = config::Config::builder();

        match file {
            Some(path) => {
                settings = settings.add_source(config::File::from(path.to_path_buf()).required(true));
            }
            None => {
                let config_path = PathBuf::from(DEFAULT_CONFIG_FILE);
                if config_path.exists() {
                    settings = settings.add_source(config::File::from(config_path));
                }
            }
        }

        // Override with environment variables (prefixed with EVENER_)
        settings = settings.add_source(
            config::Environment::with_prefix("EVENER")
                .separator("_")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("extensions"),
        );

        let config: Self = settings.build()?.try_deserialize()?;
        tracing::debug!("Loaded configuration: {:?}", config);
        Ok(config)
    }

    /// Apply command-line overrides on top of the loaded values
    pub fn with_overrides(
        mut self,
        factor: Option<f64>,
        out_dir: Option<PathBuf>,
        suffix: Option<String>,
    ) -> Self {
        if let Some(factor) = factor {
            self.factor = factor;
        }
        if let Some(dir) = out_dir {
            self.output = OutputTarget::Directory(dir);
        } else if let Some(suffix) = suffix {
            self.output = OutputTarget::Suffix(suffix);
        }
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if !(self.factor.is_finite() && self.factor > 0.0) {
            return Err(CliError::Config(format!(
                "factor must be a positive number, got {}",
                self.factor
            )));
        }

        match &self.output {
            OutputTarget::Suffix(suffix) if suffix.is_empty() => {
                return Err(CliError::Config(
                    "output suffix must not be empty (use in_place to overwrite)".to_string(),
                ));
            }
            OutputTarget::Directory(dir) if dir.as_os_str().is_empty() => {
                return Err(CliError::Config(
                    "output directory must not be empty".to_string(),
                ));
            }
            _ => {}
        }

        if self.extensions.is_empty() {
            return Err(CliError::Config(
                "at least one file extension is required".to_string(),
            ));
        }

        Ok(())
    }
}

// Default values
fn default_factor() -> f64 {
    DEFAULT_FACTOR
}

fn default_extensions() -> Vec<String> {
    vec!["wav".to_string()]
}

fn default_recursive() -> bool {
    true
}

impl Default for EvenerConfig {
    fn default() -> Self {
        Self {
            factor: default_factor(),
            output: OutputTarget::default(),
            extensions: default_extensions(),
            recursive: default_recursive(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EvenerConfig::default();
        assert_eq!(config.factor, 1.0);
        assert_eq!(config.output, OutputTarget::InPlace);
        assert_eq!(config.extensions, vec!["wav"]);
        assert!(config.recursive);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("evener.toml");
        std::fs::write(
            &path,
            r#"
factor = 1.5
recursive = false

[output]
mode = "suffix"
value = "_leveled"
"#,
        )
        .unwrap();

        let config = EvenerConfig::load(Some(&path)).unwrap();
        assert_eq!(config.factor, 1.5);
        assert!(!config.recursive);
        assert_eq!(config.output, OutputTarget::Suffix("_leveled".to_string()));
        assert_eq!(config.extensions, vec!["wav"]);
    }

    #[test]
    fn test_missing_explicit_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = EvenerConfig::load(Some(&dir.path().join("absent.toml")));
        assert!(matches!(result, Err(CliError::Config(_))));
    }

    #[test]
    fn test_overrides() {
        let config = EvenerConfig::default().with_overrides(
            Some(2.0),
            Some(PathBuf::from("/out")),
            Some("_x".to_string()),
        );
        assert_eq!(config.factor, 2.0);
        // Directory wins over suffix
        assert_eq!(config.output, OutputTarget::Directory(PathBuf::from("/out")));

        let config = EvenerConfig::default().with_overrides(None, None, Some("_x".to_string()));
        assert_eq!(config.factor, 1.0);
        assert_eq!(config.output, OutputTarget::Suffix("_x".to_string()));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = EvenerConfig::default();
        config.factor = 0.0;
        assert!(config.validate().is_err());
        config.factor = f64::INFINITY;
        assert!(config.validate().is_err());

        let mut config = EvenerConfig::default();
        config.output = OutputTarget::Suffix(String::new());
        assert!(config.validate().is_err());

        let mut config = EvenerConfig::default();
        config.extensions.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_resolve_output_paths() {
        let source = Path::new("/music/take.wav");

        assert_eq!(OutputTarget::InPlace.resolve(source), source);
        assert_eq!(
            OutputTarget::Directory(PathBuf::from("/leveled")).resolve(source),
            PathBuf::from("/leveled/take.wav")
        );
        assert_eq!(
            OutputTarget::Suffix("_even".to_string()).resolve(source),
            PathBuf::from("/music/take_even.wav")
        );
        assert_eq!(
            OutputTarget::Suffix("_even".to_string()).resolve(Path::new("/music/raw")),
            PathBuf::from("/music/raw_even")
        );
    }
}
