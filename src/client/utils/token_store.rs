use keyring::Entry;

const SERVICE: &str = "ritrovo_app";

fn fallback_path(session_id: &str) -> std::path::PathBuf {
    std::path::Path::new("data")
        .join("invite_tokens")
        .join(format!("{}.txt", session_id))
}

fn fallback_enabled() -> bool {
    std::env::var("KEYRING_FALLBACK").unwrap_or_default() == "true"
}

/// Stash the creator's invite token in the OS keyring, keyed by session id.
pub fn save_invite_token(session_id: &str, token: &str) -> anyhow::Result<()> {
    let entry = Entry::new(SERVICE, session_id);
    match entry.set_password(token) {
        Ok(()) => Ok(()),
        Err(_e) => {
            // Keyring failed. Optionally fall back to a local file when
            // explicitly allowed.
            if fallback_enabled() {
                let path = fallback_path(session_id);
                if let Some(parent) = path.parent() {
                    let _ = std::fs::create_dir_all(parent);
                }
                std::fs::write(&path, token)?;
                // warn in logs but do not print the token
                log::warn!("[TOKEN_STORE] Keyring unavailable, persisted token to fallback file");
                Ok(())
            } else {
                // do not persist to disk silently; return error so caller can decide
                Err(anyhow::anyhow!("keyring unavailable and file fallback disabled"))
            }
        }
    }
}

pub fn load_invite_token(session_id: &str) -> Option<String> {
    let entry = Entry::new(SERVICE, session_id);
    match entry.get_password() {
        Ok(token) => {
            if token.trim().is_empty() {
                None
            } else {
                Some(token)
            }
        }
        Err(_e) => {
            if fallback_enabled() {
                let path = fallback_path(session_id);
                if path.exists() {
                    if let Ok(s) = std::fs::read_to_string(&path) {
                        let token = s.trim().to_string();
                        if !token.is_empty() {
                            return Some(token);
                        }
                    }
                }
            }
            None
        }
    }
}

pub fn clear_invite_token(session_id: &str) -> anyhow::Result<()> {
    let entry = Entry::new(SERVICE, session_id);
    let _ = entry.delete_password();
    if fallback_enabled() {
        let path = fallback_path(session_id);
        if path.exists() {
            let _ = std::fs::remove_file(&path);
        }
    }
    Ok(())
}
