//! Annotator configuration.
//!
//! Settings can be loaded from a file, from environment variables, or built
//! programmatically. Unknown keys in a file are ignored.

use crate::reconcile::DEFAULT_MERGE_TOLERANCE;
use crate::text_layer::TextLayerOptions;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq)]
pub struct AnnotatorConfig {
    /// Per-component bbox tolerance for reconciliation, in points
    pub merge_tolerance: f32,
    /// A page needs more native text items than this to skip OCR
    pub native_text_min_items: usize,
    pub column_detection: bool,
    /// Minimum horizontal gutter between columns, in points
    pub min_column_gap: f32,
    pub device_pixel_ratio: f32,
    pub min_scale: f32,
    pub max_scale: f32,
    /// Eraser reach around an annotation, in points
    pub hit_tolerance: f32,
    /// Overrides the platform data directory for the local store
    pub data_dir: Option<PathBuf>,
}

impl Default for AnnotatorConfig {
    fn default() -> Self {
        Self {
            merge_tolerance: DEFAULT_MERGE_TOLERANCE,
            native_text_min_items: 5,
            column_detection: false,
            min_column_gap: 18.0,
            device_pixel_ratio: 1.0,
            min_scale: 0.1,
            max_scale: 5.0,
            hit_tolerance: 4.0,
            data_dir: None,
        }
    }
}

impl AnnotatorConfig {
    pub fn with_merge_tolerance(mut self, tolerance: f32) -> Self {
        self.merge_tolerance = tolerance;
        self
    }

    pub fn with_column_detection(mut self, enabled: bool) -> Self {
        self.column_detection = enabled;
        self
    }

    pub fn with_device_pixel_ratio(mut self, ratio: f32) -> Self {
        self.device_pixel_ratio = ratio;
        self
    }

    pub fn with_data_dir<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.data_dir = Some(path.as_ref().to_path_buf());
        self
    }

    /// Clamp a requested display scale into the configured range.
    pub fn clamp_scale(&self, scale: f32) -> f32 {
        if scale.is_nan() {
            return 1.0_f32.clamp(self.min_scale, self.max_scale);
        }
        scale.clamp(self.min_scale, self.max_scale)
    }

    pub fn text_layer_options(&self) -> TextLayerOptions {
        TextLayerOptions::default()
            .with_min_native_items(self.native_text_min_items)
            .with_column_detection(self.column_detection)
            .with_min_column_gap(self.min_column_gap)
            .with_device_pixel_ratio(self.device_pixel_ratio)
    }

    /// Loads configuration from environment variables.
    ///
    /// Environment variables:
    /// - `PAGEMARK_MERGE_TOLERANCE`
    /// - `PAGEMARK_NATIVE_TEXT_MIN_ITEMS`
    /// - `PAGEMARK_COLUMN_DETECTION` (`true`/`false`/`1`/`0`)
    /// - `PAGEMARK_MIN_COLUMN_GAP`
    /// - `PAGEMARK_DEVICE_PIXEL_RATIO`
    /// - `PAGEMARK_HIT_TOLERANCE`
    /// - `PAGEMARK_DATA_DIR`
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        for (key, field) in ENV_KEYS {
            if let Ok(value) = std::env::var(key) {
                config.apply(field, &value).map_err(|_| ConfigError::InvalidValue(key.to_string()))?;
            }
        }
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a `key = value` file.
    ///
    /// ```toml
    /// merge_tolerance = 2.0
    /// column_detection = true
    /// data_dir = "/path/to/annotations"
    /// ```
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path.as_ref())?;
        Self::from_toml(&contents)
    }

    fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        for line in toml_str.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some((key, value)) = line.split_once('=') {
                let key = key.trim();
                let value = value.trim().trim_matches('"');
                config.apply(key, value).map_err(|_| ConfigError::InvalidValue(key.to_string()))?;
            }
        }

        config.validate()?;
        Ok(config)
    }

    fn apply(&mut self, field: &str, value: &str) -> Result<(), ()> {
        fn float(value: &str) -> Result<f32, ()> {
            value.parse::<f32>().ok().filter(|v| v.is_finite()).ok_or(())
        }

        match field {
            "merge_tolerance" => self.merge_tolerance = float(value)?,
            "native_text_min_items" => {
                self.native_text_min_items = value.parse().map_err(|_| ())?
            }
            "column_detection" => {
                self.column_detection = match value {
                    "true" | "1" => true,
                    "false" | "0" => false,
                    _ => return Err(()),
                }
            }
            "min_column_gap" => self.min_column_gap = float(value)?,
            "device_pixel_ratio" => self.device_pixel_ratio = float(value)?,
            "min_scale" => self.min_scale = float(value)?,
            "max_scale" => self.max_scale = float(value)?,
            "hit_tolerance" => self.hit_tolerance = float(value)?,
            "data_dir" => self.data_dir = Some(PathBuf::from(value)),
            _ => {}
        }
        Ok(())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.merge_tolerance < 0.0 {
            return Err(ConfigError::InvalidValue("merge_tolerance".to_string()));
        }
        if self.device_pixel_ratio <= 0.0 {
            return Err(ConfigError::InvalidValue("device_pixel_ratio".to_string()));
        }
        if self.min_scale <= 0.0 || self.min_scale > self.max_scale {
            return Err(ConfigError::InvalidValue("min_scale".to_string()));
        }
        Ok(())
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        fs::write(path.as_ref(), self.to_toml())?;
        Ok(())
    }

    fn to_toml(&self) -> String {
        let mut out = format!(
            "# pagemark configuration\n\
             merge_tolerance = {}\n\
             native_text_min_items = {}\n\
             column_detection = {}\n\
             min_column_gap = {}\n\
             device_pixel_ratio = {}\n\
             min_scale = {}\n\
             max_scale = {}\n\
             hit_tolerance = {}\n",
            self.merge_tolerance,
            self.native_text_min_items,
            self.column_detection,
            self.min_column_gap,
            self.device_pixel_ratio,
            self.min_scale,
            self.max_scale,
            self.hit_tolerance,
        );
        if let Some(dir) = &self.data_dir {
            out.push_str(&format!("data_dir = \"{}\"\n", dir.display()));
        }
        out
    }
}

const ENV_KEYS: [(&str, &str); 9] = [
    ("PAGEMARK_MERGE_TOLERANCE", "merge_tolerance"),
    ("PAGEMARK_NATIVE_TEXT_MIN_ITEMS", "native_text_min_items"),
    ("PAGEMARK_COLUMN_DETECTION", "column_detection"),
    ("PAGEMARK_MIN_COLUMN_GAP", "min_column_gap"),
    ("PAGEMARK_DEVICE_PIXEL_RATIO", "device_pixel_ratio"),
    ("PAGEMARK_MIN_SCALE", "min_scale"),
    ("PAGEMARK_MAX_SCALE", "max_scale"),
    ("PAGEMARK_HIT_TOLERANCE", "hit_tolerance"),
    ("PAGEMARK_DATA_DIR", "data_dir"),
];

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for configuration key: {0}")]
    InvalidValue(String),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;

    #[test]
    fn test_default_config() {
        let config = AnnotatorConfig::default();
        assert_eq!(config.merge_tolerance, 2.0);
        assert_eq!(config.native_text_min_items, 5);
        assert!(!config.column_detection);
        assert_eq!(config.data_dir, None);
    }

    #[test]
    fn test_builder_methods() {
        let config = AnnotatorConfig::default()
            .with_merge_tolerance(3.0)
            .with_column_detection(true)
            .with_device_pixel_ratio(2.0)
            .with_data_dir("/custom/path");

        assert_eq!(config.merge_tolerance, 3.0);
        assert!(config.column_detection);
        assert_eq!(config.data_dir, Some(PathBuf::from("/custom/path")));
        assert_eq!(config.text_layer_options().device_pixel_ratio, 2.0);
    }

    #[test]
    fn test_clamp_scale() {
        let config = AnnotatorConfig::default();
        assert_eq!(config.clamp_scale(0.01), 0.1);
        assert_eq!(config.clamp_scale(12.0), 5.0);
        assert_eq!(config.clamp_scale(1.5), 1.5);
        assert_eq!(config.clamp_scale(f32::NAN), 1.0);
    }

    #[test]
    fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pagemark.toml");
        let config = AnnotatorConfig::default()
            .with_column_detection(true)
            .with_data_dir(dir.path().join("data"));

        config.save_to_file(&path).unwrap();
        assert_eq!(AnnotatorConfig::from_file(&path).unwrap(), config);
    }

    #[test]
    fn test_file_ignores_comments_and_unknown_keys() {
        let config = AnnotatorConfig::from_toml(
            "# comment\n\nhit_tolerance = 6\nsomething_else = 1\ncolumn_detection = 1\n",
        )
        .unwrap();
        assert_eq!(config.hit_tolerance, 6.0);
        assert!(config.column_detection);
    }

    #[test]
    fn test_invalid_value_names_key() {
        let err = AnnotatorConfig::from_toml("merge_tolerance = wide").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(key) if key == "merge_tolerance"));

        let err = AnnotatorConfig::from_toml("min_scale = 9").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(key) if key == "min_scale"));
    }

    #[test]
    #[serial]
    fn test_from_env() {
        let _guard = EnvGuard::new(&ENV_KEYS.map(|(key, _)| key));

        env::set_var("PAGEMARK_MERGE_TOLERANCE", "1.5");
        env::set_var("PAGEMARK_COLUMN_DETECTION", "true");
        env::set_var("PAGEMARK_DATA_DIR", "/tmp/pagemark-test");

        let config = AnnotatorConfig::from_env().unwrap();
        assert_eq!(config.merge_tolerance, 1.5);
        assert!(config.column_detection);
        assert_eq!(config.data_dir, Some(PathBuf::from("/tmp/pagemark-test")));
    }

    #[test]
    #[serial]
    fn test_from_env_invalid_value() {
        let _guard = EnvGuard::new(&ENV_KEYS.map(|(key, _)| key));

        env::set_var("PAGEMARK_DEVICE_PIXEL_RATIO", "retina");

        let err = AnnotatorConfig::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(key) if key == "PAGEMARK_DEVICE_PIXEL_RATIO"));
    }

    /// Restores environment variables on drop.
    struct EnvGuard {
        saved: Vec<(String, Option<String>)>,
    }

    impl EnvGuard {
        fn new(keys: &[&str]) -> Self {
            let saved = keys
                .iter()
                .map(|key| {
                    let previous = env::var(key).ok();
                    env::remove_var(key);
                    (key.to_string(), previous)
                })
                .collect();
            Self { saved }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (key, value) in &self.saved {
                match value {
                    Some(value) => env::set_var(key, value),
                    None => env::remove_var(key),
                }
            }
        }
    }
}
