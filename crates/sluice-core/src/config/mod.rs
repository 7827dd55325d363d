//! Configuration helpers shared by sluice binaries.

mod path;
mod vars;

pub use path::{CliArgs, is_yaml_file};
pub use vars::{interpolate, interpolate_with};

use serde::de::DeserializeOwned;
use snafu::prelude::*;
use std::path::Path;

use crate::error::{ConfigError, ReadFileSnafu, UnsupportedFormatSnafu, YamlParseSnafu};

/// Byte size constants (binary/IEC units).
pub const KB: usize = 1024;
pub const MB: usize = 1024 * KB;

/// Parse a YAML document after interpolating environment variables.
pub fn parse_yaml<T: DeserializeOwned>(contents: &str) -> Result<T, ConfigError> {
    let text = interpolate(contents)?;
    serde_yaml::from_str(&text).context(YamlParseSnafu)
}

/// Read and parse a YAML configuration file.
pub fn load_yaml_file<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    ensure!(
        is_yaml_file(path),
        UnsupportedFormatSnafu {
            path: path.to_path_buf()
        }
    );
    let contents = std::fs::read_to_string(path).context(ReadFileSnafu {
        path: path.to_path_buf(),
    })?;
    parse_yaml(&contents)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::io::Write;

    #[derive(Debug, Deserialize)]
    struct Sample {
        name: String,
        #[serde(default)]
        port: u16,
    }

    #[test]
    fn test_load_yaml_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "name: sample\nport: 8080").unwrap();

        let sample: Sample = load_yaml_file(file.path()).unwrap();
        assert_eq!(sample.name, "sample");
        assert_eq!(sample.port, 8080);
    }

    #[test]
    fn test_rejects_non_yaml_extension() {
        let file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        let err = load_yaml_file::<Sample>(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::UnsupportedFormat { .. }));
    }

    #[test]
    fn test_yaml_error_is_reported() {
        let err = parse_yaml::<Sample>("port: [not, a, number]").unwrap_err();
        assert!(matches!(err, ConfigError::YamlParse { .. }));
    }
}
