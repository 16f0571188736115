use std::io::ErrorKind;
use std::path::Path;

use spendshield_engine::EngineConfig;
use tracing::debug;

/// Read and validate the engine configuration. A missing file means defaults.
pub(crate) fn load(path: &Path) -> Result<EngineConfig, String> {
    let config = match std::fs::read_to_string(path) {
        Ok(text) => parse(&text).map_err(|e| format!("invalid config '{}': {e}", path.display()))?,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!(path = %path.display(), "no config file, using defaults");
            EngineConfig::default()
        }
        Err(e) => return Err(format!("error reading config '{}': {e}", path.display())),
    };
    config.validate().map_err(|e| e.to_string())?;
    Ok(config)
}

fn parse(text: &str) -> Result<EngineConfig, toml::de::Error> {
    toml::from_str(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    #[test]
    fn partial_file_keeps_other_defaults() {
        let config = parse(
            r#"
            [anomaly]
            new_vendor_days = 90
            inflation_trigger = "1.10"

            [pool]
            max_connections = 4
            "#,
        )
        .unwrap();
        assert_eq!(config.anomaly.new_vendor_days, 90);
        assert_eq!(config.anomaly.inflation_trigger, Decimal::new(110, 2));
        assert_eq!(config.pool.max_connections, 4);
        assert_eq!(config.scoring, EngineConfig::default().scoring);
    }

    #[test]
    fn missing_file_is_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn nonsense_values_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("spendshield.toml");
        std::fs::write(&path, "[verification]\nlookback_months = 0\n").unwrap();
        let err = load(&path).unwrap_err();
        assert!(err.contains("verification.lookback_months"), "{err}");
    }

    #[test]
    fn unknown_section_type_errors() {
        assert!(parse("pool = 3").is_err());
    }
}
