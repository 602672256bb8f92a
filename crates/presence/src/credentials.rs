// Access-token storage in the OS keychain.

use anyhow::{bail, Context, Result};

pub const ACCESS_TOKEN_ENV: &str = "QUILL_ACCESS_TOKEN";

const KEYRING_SERVICE: &str = "com.quill.presence";
const ACCESS_TOKEN_ACCOUNT: &str = "access_token";

/// Somewhere a token can be kept between runs.
pub trait TokenStore: Send + Sync {
    fn set_secret(&self, service: &str, account: &str, value: &str) -> Result<()>;
    fn get_secret(&self, service: &str, account: &str) -> Result<Option<String>>;
    fn delete_secret(&self, service: &str, account: &str) -> Result<()>;
}

pub struct KeyringTokenStore;

impl TokenStore for KeyringTokenStore {
    fn set_secret(&self, service: &str, account: &str, value: &str) -> Result<()> {
        let entry = keyring::Entry::new(service, account)
            .context("failed to initialize keychain entry")?;
        entry.set_password(value).context("failed to write keychain entry")?;
        Ok(())
    }

    fn get_secret(&self, service: &str, account: &str) -> Result<Option<String>> {
        let entry = keyring::Entry::new(service, account)
            .context("failed to initialize keychain entry")?;
        match entry.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(error) => Err(error).context("failed to read keychain entry"),
        }
    }

    fn delete_secret(&self, service: &str, account: &str) -> Result<()> {
        let entry = keyring::Entry::new(service, account)
            .context("failed to initialize keychain entry")?;
        match entry.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(error) => Err(error).context("failed to delete keychain entry"),
        }
    }
}

pub fn store_access_token(token: &str) -> Result<()> {
    store_access_token_with(&KeyringTokenStore, token)
}

/// `QUILL_ACCESS_TOKEN` if set, otherwise the keychain entry.
pub fn load_access_token() -> Result<Option<String>> {
    load_access_token_with(&KeyringTokenStore, |key| std::env::var(key))
}

pub fn clear_access_token() -> Result<()> {
    clear_access_token_with(&KeyringTokenStore)
}

pub fn store_access_token_with(store: &dyn TokenStore, token: &str) -> Result<()> {
    let token = token.trim();
    if token.is_empty() {
        bail!("access token must not be empty");
    }
    store
        .set_secret(KEYRING_SERVICE, ACCESS_TOKEN_ACCOUNT, token)
        .with_context(|| format!("failed to persist `{ACCESS_TOKEN_ACCOUNT}` in keychain"))
}

pub fn load_access_token_with<F>(store: &dyn TokenStore, env: F) -> Result<Option<String>>
where
    F: Fn(&str) -> Result<String, std::env::VarError>,
{
    if let Ok(token) = env(ACCESS_TOKEN_ENV) {
        if !token.trim().is_empty() {
            return Ok(Some(token.trim().to_string()));
        }
    }
    store
        .get_secret(KEYRING_SERVICE, ACCESS_TOKEN_ACCOUNT)
        .with_context(|| format!("failed to read `{ACCESS_TOKEN_ACCOUNT}` from keychain"))
}

pub fn clear_access_token_with(store: &dyn TokenStore) -> Result<()> {
    store
        .delete_secret(KEYRING_SERVICE, ACCESS_TOKEN_ACCOUNT)
        .with_context(|| format!("failed to clear `{ACCESS_TOKEN_ACCOUNT}` from keychain"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MemoryTokenStore {
        values: Mutex<HashMap<(String, String), String>>,
    }

    impl TokenStore for MemoryTokenStore {
        fn set_secret(&self, service: &str, account: &str, value: &str) -> Result<()> {
            self.values
                .lock()
                .expect("memory token store lock should not be poisoned")
                .insert((service.to_string(), account.to_string()), value.to_string());
            Ok(())
        }

        fn get_secret(&self, service: &str, account: &str) -> Result<Option<String>> {
            Ok(self
                .values
                .lock()
                .expect("memory token store lock should not be poisoned")
                .get(&(service.to_string(), account.to_string()))
                .cloned())
        }

        fn delete_secret(&self, service: &str, account: &str) -> Result<()> {
            self.values
                .lock()
                .expect("memory token store lock should not be poisoned")
                .remove(&(service.to_string(), account.to_string()));
            Ok(())
        }
    }

    fn no_env(_: &str) -> Result<String, std::env::VarError> {
        Err(std::env::VarError::NotPresent)
    }

    #[test]
    fn token_round_trip() {
        let store = MemoryTokenStore::default();
        store_access_token_with(&store, " tok-1 ").expect("write should succeed");
        assert_eq!(
            load_access_token_with(&store, no_env).expect("read should succeed"),
            Some("tok-1".to_string())
        );
        clear_access_token_with(&store).expect("clear should succeed");
        assert_eq!(load_access_token_with(&store, no_env).expect("read should succeed"), None);
    }

    #[test]
    fn empty_token_is_rejected() {
        let store = MemoryTokenStore::default();
        let error = store_access_token_with(&store, "   ").expect_err("write should fail");
        assert!(error.to_string().contains("must not be empty"));
    }

    #[test]
    fn env_token_wins_over_keychain() {
        let store = MemoryTokenStore::default();
        store_access_token_with(&store, "stored").unwrap();
        let env = |key: &str| {
            if key == ACCESS_TOKEN_ENV {
                Ok("from-env".to_string())
            } else {
                Err(std::env::VarError::NotPresent)
            }
        };
        assert_eq!(load_access_token_with(&store, env).unwrap(), Some("from-env".to_string()));
    }

    #[test]
    fn blank_env_token_falls_back_to_keychain() {
        let store = MemoryTokenStore::default();
        store_access_token_with(&store, "stored").unwrap();
        let env = |_: &str| Ok(String::new());
        assert_eq!(load_access_token_with(&store, env).unwrap(), Some("stored".to_string()));
    }
}
