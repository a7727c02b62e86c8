use std::path::{Path, PathBuf};

const BASE_DIR_ENV: &str = "FLASHNEWS_RUST_DIR";
const BASE_DIR_NAME: &str = ".flashnews-rust";

/// Directory holding `settings.toml`: `$FLASHNEWS_RUST_DIR` when set, else
/// `~/.flashnews-rust`.
pub(crate) fn settings_dir() -> Option<PathBuf> {
    if let Some(dir) = base_dir_override() {
        return Some(dir);
    }
    home_join(BASE_DIR_NAME)
}

/// Parent directory for generated carousels.
pub(crate) fn output_dir() -> PathBuf {
    if let Some(dir) = base_dir_override() {
        return dir.join("output");
    }
    home_join(".flashnews-rust/output").unwrap_or_else(|| PathBuf::from(".flashnews-rust/output"))
}

/// Expands a leading `~` in a settings value.
pub(crate) fn expand_home(value: &str) -> PathBuf {
    normalize_path(PathBuf::from(expand_tilde(value.trim())))
}

fn base_dir_override() -> Option<PathBuf> {
    std::env::var(BASE_DIR_ENV)
        .ok()
        .and_then(|value| normalize_dir(&value))
}

fn home_join(suffix: &str) -> Option<PathBuf> {
    std::env::var("HOME").ok().and_then(|home| {
        let home = home.trim();
        if home.is_empty() {
            None
        } else {
            Some(Path::new(home).join(suffix))
        }
    })
}

fn normalize_dir(value: &str) -> Option<PathBuf> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(expand_home(trimmed))
}

fn normalize_path(path: PathBuf) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        normalized.push(component.as_os_str());
    }
    normalized
}

fn expand_tilde(value: &str) -> String {
    if (value == "~" || value.starts_with("~/"))
        && let Ok(home) = std::env::var("HOME")
    {
        let home = home.trim();
        if home.is_empty() {
            return value.to_string();
        }
        if value == "~" {
            return home.to_string();
        }
        return format!("{}{}", home, &value[1..]);
    }
    value.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::with_temp_home;

    #[test]
    fn expands_tilde_against_home() {
        with_temp_home(|home| {
            assert_eq!(expand_home("~/fonts/Bold.ttf"), home.join("fonts/Bold.ttf"));
            assert_eq!(expand_home("~"), home.to_path_buf());
            assert_eq!(expand_home("/abs/font.ttf"), PathBuf::from("/abs/font.ttf"));
            assert_eq!(expand_home("rel//font.ttf"), PathBuf::from("rel/font.ttf"));
        });
    }

    #[test]
    fn defaults_live_under_home() {
        with_temp_home(|home| {
            assert_eq!(settings_dir(), Some(home.join(".flashnews-rust")));
            assert_eq!(output_dir(), home.join(".flashnews-rust/output"));
        });
    }

    #[test]
    fn env_override_moves_every_directory() {
        with_temp_home(|home| {
            let custom = home.join("custom");
            unsafe { std::env::set_var(BASE_DIR_ENV, &custom) };
            let settings = settings_dir();
            let output = output_dir();
            unsafe { std::env::remove_var(BASE_DIR_ENV) };
            assert_eq!(settings, Some(custom.clone()));
            assert_eq!(output, custom.join("output"));
        });
    }
}
