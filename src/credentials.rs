//! Credential resolution: config file, environment, and an interactive
//! fallback prompt.

use crate::error::{Result, SyncError};

/// Resolved credentials for one remote session. `Debug` is hand-written to
/// avoid ever printing the password.
pub struct Credentials {
    /// Username to authenticate with.
    pub username: String,
    /// Password, if password authentication is in play.
    pub password: Option<String>,
    /// Private key file, if public-key authentication is in play.
    pub key_file: Option<std::path::PathBuf>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("key_file", &self.key_file)
            .finish()
    }
}

/// Resolves credentials for `username` (already known, e.g. from the URL
/// or `--username`). Checks the `FTPSYNC_PASSWORD` environment variable
/// before falling back to an interactive prompt, unless `no_prompt` is set
/// and no password/key is otherwise available.
///
/// # Errors
///
/// Returns [`SyncError::Auth`] if no credential source is available and
/// `no_prompt` prevents prompting.
pub fn resolve(
    username: String,
    key_file: Option<std::path::PathBuf>,
    no_prompt: bool,
    host: &str,
) -> Result<Credentials> {
    if key_file.is_some() {
        return Ok(Credentials { username, password: None, key_file });
    }

    if let Ok(password) = std::env::var("FTPSYNC_PASSWORD") {
        return Ok(Credentials { username, password: Some(password), key_file: None });
    }

    if no_prompt {
        return Err(SyncError::Auth { target: host.to_string() });
    }

    let prompt = format!("Password for {username}@{host}: ");
    let password = rpassword::prompt_password(prompt).map_err(SyncError::Io)?;
    Ok(Credentials { username, password: Some(password), key_file: None })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_file_bypasses_password_entirely() {
        let creds = resolve("bob".into(), Some("/home/bob/.ssh/id_ed25519".into()), true, "example.com").unwrap();
        assert!(creds.password.is_none());
        assert!(creds.key_file.is_some());
    }

    #[test]
    fn no_prompt_without_any_source_fails() {
        std::env::remove_var("FTPSYNC_PASSWORD");
        let err = resolve("bob".into(), None, true, "example.com").unwrap_err();
        assert!(matches!(err, SyncError::Auth { .. }));
    }

    #[test]
    fn debug_redacts_password() {
        let creds = Credentials { username: "bob".into(), password: Some("hunter2".into()), key_file: None };
        let rendered = format!("{creds:?}");
        assert!(!rendered.contains("hunter2"));
    }
}
