mod meter_config;

pub use meter_config::MeterConfig;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;
    use tempfile::NamedTempFile;

    fn create_temp_file(content: &str) -> NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    fn env(vars: &[(&str, &str)]) -> config::Environment {
        let mut map = config::Map::new();
        for (key, value) in vars {
            map.insert(key.to_string(), value.to_string());
        }
        config::Environment::with_prefix("METER").source(Some(map))
    }

    #[test]
    fn parse_full_meter_config() {
        let content = r#"
api_addr = "0.0.0.0:9000"
database_path = "/var/lib/meter/meter.db"
collect_interval_secs = 30
fetch_timeout_secs = 2
log_level = "debug"
log_dir = "/var/log/meter"
log_file = "collector.log"
runtime_threads = 4
"#;
        let file = create_temp_file(content);
        let config = MeterConfig::load_with_env(file.path(), env(&[])).unwrap();

        assert_eq!(config.api_addr, "0.0.0.0:9000");
        assert_eq!(config.database_path, "/var/lib/meter/meter.db");
        assert_eq!(config.collect_interval(), Duration::from_secs(30));
        assert_eq!(config.fetch_timeout(), Duration::from_secs(2));
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.log_dir.as_deref(), Some("/var/log/meter"));
        assert_eq!(config.log_file, "collector.log");
        assert_eq!(config.runtime_threads, Some(4));
        assert_eq!(config.console_port, None);
    }

    #[test]
    fn empty_file_falls_back_to_defaults() {
        let file = create_temp_file("");
        let config = MeterConfig::load_with_env(file.path(), env(&[])).unwrap();

        assert_eq!(config.api_addr, "127.0.0.1:8080");
        assert_eq!(config.database_path, "data/meter.db");
        assert_eq!(config.collect_interval(), Duration::from_secs(60));
        assert_eq!(config.fetch_timeout(), Duration::from_secs(5));
        assert_eq!(config.log_level, "info");
        assert!(config.log_dir.is_none());
    }

    #[test]
    fn fetch_timeout_is_capped() {
        let file = create_temp_file("fetch_timeout_secs = 30\ncollect_interval_secs = 0\n");
        let config = MeterConfig::load_with_env(file.path(), env(&[])).unwrap();

        assert_eq!(config.fetch_timeout(), Duration::from_secs(5));
        assert_eq!(config.collect_interval(), Duration::from_secs(1));
    }

    #[test]
    fn environment_overrides_file_values() {
        let file = create_temp_file("collect_interval_secs = 30\n");
        let vars = env(&[
            ("METER_COLLECT_INTERVAL_SECS", "15"),
            ("METER_API_ADDR", "127.0.0.1:9999"),
        ]);
        let config = MeterConfig::load_with_env(file.path(), vars).unwrap();

        assert_eq!(config.collect_interval_secs, 15);
        assert_eq!(config.api_addr, "127.0.0.1:9999");
    }

    #[test]
    fn environment_applies_without_config_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let missing = dir.path().join("meter.toml");
        let vars = env(&[("METER_API_ADDR", "0.0.0.0:7070")]);

        let config = MeterConfig::load_with_env(&missing, vars).unwrap();

        assert_eq!(config.api_addr, "0.0.0.0:7070");
        assert_eq!(config.database_path, "data/meter.db");
        assert_eq!(config.collect_interval(), Duration::from_secs(60));
    }

    #[test]
    fn save_and_load_roundtrip() {
        let original = MeterConfig {
            api_addr: "127.0.0.1:7000".to_string(),
            collect_interval_secs: 45,
            ..MeterConfig::default()
        };

        let file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        original.save(file.path()).unwrap();
        let loaded = MeterConfig::load_with_env(file.path(), env(&[])).unwrap();

        assert_eq!(loaded.api_addr, "127.0.0.1:7000");
        assert_eq!(loaded.collect_interval_secs, 45);
        assert_eq!(loaded.log_dir, None);
    }

    #[test]
    fn parse_invalid_toml_returns_error() {
        let file = create_temp_file("this is not valid toml {{{");
        let result = MeterConfig::load_with_env(file.path(), env(&[]));
        assert!(result.is_err());
    }
}
