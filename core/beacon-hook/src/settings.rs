//! `config get` / `config set`.

use crate::HookError;
use beacon_core::{ConfigStore, StorageConfig};

pub fn get(storage: &StorageConfig, key: &str) -> Result<(), HookError> {
    validate_key(key)?;
    let store = ConfigStore::with_storage(storage);
    match store.get_setting(key) {
        Some(value) => {
            println!("{}", value);
            Ok(())
        }
        None => Err(HookError::NotSet(key.to_string())),
    }
}

pub fn set(storage: &StorageConfig, key: &str, value: &str) -> Result<(), HookError> {
    validate_key(key)?;
    let store = ConfigStore::with_storage(storage);
    store.set_setting(key, value)?;
    tracing::info!(key, path = %store.path().display(), "Setting saved");
    Ok(())
}

/// Keys are written verbatim into the INI file, so anything that would break
/// the line format is refused.
fn validate_key(key: &str) -> Result<(), HookError> {
    let valid = !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.');
    if valid {
        Ok(())
    } else {
        Err(HookError::InvalidKey(key.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_keys_that_break_ini_lines() {
        assert!(validate_key("api_key").is_ok());
        assert!(validate_key("status_bar.enabled").is_ok());
        assert!(validate_key("").is_err());
        assert!(validate_key("a=b").is_err());
        assert!(validate_key("[settings]").is_err());
        assert!(validate_key("two words").is_err());
    }
}
