mod types;

pub use types::*;

use anyhow::{Context, Result};
use sceneforged_extractor::{CapturingSink, MediaParser, ParameterValue};
use std::path::Path;

/// Default config locations, in lookup order.
pub const DEFAULT_PATHS: [&str; 2] = ["./sceneforged-demux.toml", "~/.config/sceneforged/demux.toml"];

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    validate_config(&config).with_context(|| format!("Invalid config file: {:?}", path))?;

    Ok(config)
}

/// Load config from default locations or return default config
pub fn load_config_or_default(custom_path: Option<&Path>) -> Result<Config> {
    if let Some(path) = custom_path {
        return load_config(path);
    }

    for path_str in DEFAULT_PATHS {
        let path = shellexpand::tilde(path_str);
        let path = Path::new(path.as_ref());
        if path.exists() {
            tracing::debug!("Using config file {:?}", path);
            return load_config(path);
        }
    }

    Ok(Config::default())
}

/// Converts a TOML value into a parameter value.
pub fn parameter_value(name: &str, value: &toml::Value) -> Result<ParameterValue> {
    match value {
        toml::Value::Boolean(b) => Ok(ParameterValue::Bool(*b)),
        toml::Value::Integer(i) => Ok(ParameterValue::Int(*i)),
        toml::Value::String(s) => Ok(ParameterValue::String(s.clone())),
        other => anyhow::bail!(
            "Parameter '{}' must be a bool, integer or string, got {}",
            name,
            other.type_str()
        ),
    }
}

/// Parses a command-line parameter value: `true`/`false`, an integer, or text.
pub fn parse_parameter_value(raw: &str) -> ParameterValue {
    match raw {
        "true" => ParameterValue::Bool(true),
        "false" => ParameterValue::Bool(false),
        _ => match raw.parse::<i64>() {
            Ok(i) => ParameterValue::Int(i),
            Err(_) => ParameterValue::String(raw.to_string()),
        },
    }
}

impl Config {
    /// The `[parameters]` table as registry values.
    pub fn parameter_values(&self) -> Result<Vec<(String, ParameterValue)>> {
        self.parameters
            .iter()
            .map(|(name, value)| Ok((name.clone(), parameter_value(name, value)?)))
            .collect()
    }
}

/// Validate configuration
pub fn validate_config(config: &Config) -> Result<()> {
    if config.input.sniff_window == 0 {
        anyhow::bail!("input.sniff_window cannot be 0");
    }
    if config.input.read_chunk == 0 {
        anyhow::bail!("input.read_chunk cannot be 0");
    }
    if config.output.max_samples == Some(0) {
        anyhow::bail!("output.max_samples cannot be 0");
    }

    // A session over every format accepts exactly the registered names.
    let mut probe = MediaParser::create_by_auto_detection(CapturingSink::metadata_only(), &[])?;
    for (name, value) in config.parameter_values()? {
        if !probe.supports_parameter(&name) {
            tracing::warn!("Parameter '{}' is not recognised by any format and has no effect", name);
            continue;
        }
        probe
            .set_parameter(&name, value)
            .with_context(|| format!("Invalid value for parameter '{}'", name))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sceneforged_extractor::params;

    fn parse(text: &str) -> Config {
        toml::from_str(text).unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = parse("");
        assert_eq!(config.input.sniff_window, 128 * 1024);
        assert_eq!(config.input.read_chunk, 64 * 1024);
        assert_eq!(config.output.max_samples, None);
        assert!(!config.output.json);
        assert!(config.parameters.is_empty());
        validate_config(&config).unwrap();
    }

    #[test]
    fn test_sections() {
        let config = parse(
            r#"
            [input]
            sniff_window = 4096

            [output]
            max_samples = 10
            json = true

            [parameters]
            "ts.mode" = "multi_pmt"
            "adts.enable_cbr_seeking" = true
            "ts.timestamp_search_bytes" = 1880
            "#,
        );
        assert_eq!(config.input.sniff_window, 4096);
        assert_eq!(config.input.read_chunk, 64 * 1024);
        assert_eq!(config.output.max_samples, Some(10));
        assert!(config.output.json);

        let values = config.parameter_values().unwrap();
        assert_eq!(values.len(), 3);
        assert!(values.contains(&(params::TS_MODE.to_string(), ParameterValue::from("multi_pmt"))));
        assert!(values.contains(&(params::TS_TIMESTAMP_SEARCH_BYTES.to_string(), ParameterValue::Int(1880))));
        validate_config(&config).unwrap();
    }

    #[test]
    fn test_rejects_zero_sizes() {
        assert!(validate_config(&parse("[input]\nsniff_window = 0")).is_err());
        assert!(validate_config(&parse("[input]\nread_chunk = 0")).is_err());
        assert!(validate_config(&parse("[output]\nmax_samples = 0")).is_err());
    }

    #[test]
    fn test_rejects_mistyped_parameters() {
        let err = validate_config(&parse("[parameters]\n\"mp3.disable_id3\" = \"yes\"")).unwrap_err();
        assert!(format!("{err:#}").contains("mp3.disable_id3"));
        assert!(validate_config(&parse("[parameters]\n\"ts.mode\" = \"dvb\"")).is_err());
        assert!(validate_config(&parse("[parameters]\n\"ts.mode\" = [1, 2]")).is_err());
    }

    #[test]
    fn test_unknown_parameters_are_accepted() {
        validate_config(&parse("[parameters]\n\"vendor.flag\" = 3")).unwrap();
    }

    #[test]
    fn test_parse_parameter_value() {
        assert_eq!(parse_parameter_value("true"), ParameterValue::Bool(true));
        assert_eq!(parse_parameter_value("false"), ParameterValue::Bool(false));
        assert_eq!(parse_parameter_value("-12"), ParameterValue::Int(-12));
        assert_eq!(parse_parameter_value("hls"), ParameterValue::String("hls".to_string()));
    }

    #[test]
    fn test_load_config_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("demux.toml");
        std::fs::write(&path, "[input\n").unwrap();
        let err = load_config(&path).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config file"));
        assert!(load_config(&dir.path().join("missing.toml")).is_err());
    }
}
