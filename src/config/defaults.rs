//! Bootstrap defaults for the global settings table.
//!
//! On first boot the `app_settings` table is seeded from these defaults.
//! Each value can be pre-set through an environment variable of the same
//! name, or through an optional `settings.toml` file whose entries win over
//! the environment. After seeding, the database is the source of truth and
//! none of this is consulted again.

use serde::Deserialize;
use std::path::Path;

use crate::core::settings::{SettingDefault, category_for_key, data_type_for_key, description_for_key};
use crate::errors::{Error, Result};

/// Structure of the optional `settings.toml` bootstrap file.
#[derive(Debug, Deserialize)]
pub struct SettingsFile {
    /// Key/value pairs overriding the built-in and env-provided defaults
    pub settings: Vec<SettingsFileEntry>,
}

/// One `[[settings]]` entry.
#[derive(Debug, Deserialize, Clone)]
pub struct SettingsFileEntry {
    pub key: String,
    pub value: String,
}

/// Loads the bootstrap settings file.
///
/// # Errors
/// Returns an error if the file cannot be read or the TOML is invalid.
pub fn load_settings_file<P: AsRef<Path>>(path: P) -> Result<SettingsFile> {
    let contents = std::fs::read_to_string(path.as_ref()).map_err(|e| Error::Config {
        message: format!("Failed to read settings file: {e}"),
    })?;

    toml::from_str(&contents).map_err(|e| Error::Config {
        message: format!("Failed to parse settings.toml: {e}"),
    })
}

/// The full default key set with built-in fallback values.
const BUILTIN_DEFAULTS: [(&str, &str); 25] = [
    // Company info
    ("COMPANY_NAME", "RFCO Buddy"),
    ("COMPANY_EMAIL", "changeorders@example.com"),
    ("COMPANY_PHONE", ""),
    ("COMPANY_LOGO_URL", ""),
    ("TZ", "America/New_York"),
    // SMTP
    ("SMTP_ENABLED", "false"),
    ("SMTP_HOST", ""),
    ("SMTP_PORT", "587"),
    ("SMTP_USE_TLS", "true"),
    ("SMTP_USERNAME", ""),
    ("SMTP_FROM_EMAIL", ""),
    ("SMTP_FROM_NAME", ""),
    // Labor rates
    ("RATE_PROJECT_MANAGER", "95.00"),
    ("RATE_SUPERINTENDENT", "85.00"),
    ("RATE_CARPENTER", "57.00"),
    ("RATE_LABORER", "42.00"),
    // OH&P percentages
    ("DEFAULT_MATERIAL_OHP", "15.00"),
    ("DEFAULT_LABOR_OHP", "20.00"),
    ("DEFAULT_EQUIPMENT_OHP", "10.00"),
    ("DEFAULT_SUBCONTRACTOR_OHP", "5.00"),
    // Reminders
    ("REMINDER_ENABLED", "true"),
    ("REMINDER_INTERVAL_DAYS", "7"),
    ("REMINDER_MAX_RETRIES", "4"),
    // Approval
    ("APPROVAL_TOKEN_EXPIRATION_HOURS", "168"),
    ("REQUIRE_GC_SIGNATURE_ON_APPROVAL", "false"),
];

/// Builds the seed list: built-in defaults, overlaid by same-named
/// environment variables, overlaid by the optional settings file.
#[must_use]
pub fn default_settings(file: Option<&SettingsFile>) -> Vec<SettingDefault> {
    BUILTIN_DEFAULTS
        .iter()
        .map(|(key, builtin)| {
            let mut value = std::env::var(key).unwrap_or_else(|_| (*builtin).to_string());
            if let Some(file) = file {
                if let Some(entry) = file.settings.iter().find(|entry| entry.key == *key) {
                    value = entry.value.clone();
                }
            }
            SettingDefault {
                key: (*key).to_string(),
                value,
                category: category_for_key(key).to_string(),
                data_type: data_type_for_key(key).to_string(),
                description: description_for_key(key).to_string(),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

    #[test]
    fn test_parse_settings_file() {
        let toml_str = r#"
            [[settings]]
            key = "COMPANY_NAME"
            value = "Acme Construction"

            [[settings]]
            key = "DEFAULT_LABOR_OHP"
            value = "22.50"
        "#;

        let file: SettingsFile = toml::from_str(toml_str).unwrap();
        assert_eq!(file.settings.len(), 2);
        assert_eq!(file.settings[0].key, "COMPANY_NAME");
        assert_eq!(file.settings[1].value, "22.50");
    }

    #[test]
    fn test_default_settings_cover_full_key_set() {
        let defaults = default_settings(None);
        assert_eq!(defaults.len(), BUILTIN_DEFAULTS.len());

        let labor_ohp = defaults
            .iter()
            .find(|d| d.key == "DEFAULT_LABOR_OHP")
            .unwrap();
        assert_eq!(labor_ohp.category, "ohp");
        assert_eq!(labor_ohp.data_type, "float");

        let smtp_port = defaults.iter().find(|d| d.key == "SMTP_PORT").unwrap();
        assert_eq!(smtp_port.data_type, "integer");
    }

    #[test]
    fn test_settings_file_overrides_builtin() {
        let file: SettingsFile = toml::from_str(
            r#"
            [[settings]]
            key = "REMINDER_INTERVAL_DAYS"
            value = "3"
        "#,
        )
        .unwrap();

        let defaults = default_settings(Some(&file));
        let interval = defaults
            .iter()
            .find(|d| d.key == "REMINDER_INTERVAL_DAYS")
            .unwrap();
        assert_eq!(interval.value, "3");
    }
}
