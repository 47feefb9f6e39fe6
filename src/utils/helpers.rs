/// Helper utilities shared by the backup commands

use std::ffi::OsString;

/// Format duration to human-readable string
pub fn format_duration(seconds: u64) -> String {
    let days = seconds / 86400;
    let hours = (seconds % 86400) / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;

    if days > 0 {
        format!("{}d {}h", days, hours)
    } else if hours > 0 {
        format!("{}h {}m", hours, minutes)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, secs)
    } else {
        format!("{}s", secs)
    }
}

/// Keep only the last `max_chars` characters of a string
pub fn tail_chars(s: &str, max_chars: usize) -> &str {
    let count = s.chars().count();
    if count <= max_chars {
        return s;
    }
    match s.char_indices().nth(count - max_chars) {
        Some((idx, _)) => &s[idx..],
        None => s,
    }
}

/// Mask sensitive data (show only first and last N characters)
pub fn mask_sensitive(value: &str, visible_chars: usize) -> String {
    let count = value.chars().count();
    if count <= visible_chars * 2 {
        "*".repeat(count)
    } else {
        let start: String = value.chars().take(visible_chars).collect();
        format!("{}...{}", start, tail_chars(value, visible_chars))
    }
}

/// Remove the root slash of a path: `/srv/data` becomes `srv/data`
pub fn strip_root(path: &str) -> &str {
    let path = path.trim();
    path.strip_prefix('/').unwrap_or(path)
}

/// Temporarily sets one environment variable.
///
/// The previous value is put back (or the variable removed when it was unset)
/// when the guard is dropped, including on early returns and panics.
#[must_use = "the variable is restored as soon as the guard is dropped"]
pub struct EnvGuard {
    name: String,
    previous: Option<OsString>,
}

impl EnvGuard {
    pub fn set(name: impl Into<String>, value: impl AsRef<str>) -> Self {
        let name = name.into();
        let previous = std::env::var_os(&name);
        std::env::set_var(&name, value.as_ref());
        Self { name, previous }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        match self.previous.take() {
            Some(value) => std::env::set_var(&self.name, value),
            None => std::env::remove_var(&self.name),
        }
    }
}

/// Simplified container state derived from Docker inspect data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    Running,
    Stopped,
    Restarting,
    Dead,
    Unknown,
}

impl From<&str> for ContainerState {
    fn from(status: &str) -> Self {
        let status_lower = status.to_lowercase();
        if status_lower.contains("up") || status_lower.contains("running") {
            ContainerState::Running
        } else if status_lower.contains("restarting") {
            ContainerState::Restarting
        } else if status_lower.contains("dead") || status_lower.contains("removing") {
            ContainerState::Dead
        } else if ["exited", "stopped", "created", "paused"]
            .iter()
            .any(|s| status_lower.contains(s))
        {
            ContainerState::Stopped
        } else {
            ContainerState::Unknown
        }
    }
}

impl ContainerState {
    pub fn is_running(&self) -> bool {
        matches!(self, ContainerState::Running)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(30), "30s");
        assert_eq!(format_duration(90), "1m 30s");
        assert_eq!(format_duration(3661), "1h 1m");
        assert_eq!(format_duration(86400), "1d 0h");
    }

    #[test]
    fn test_mask_sensitive() {
        let token = "5e7f294e4c92a9aa661fae8d347d832d";
        let masked = mask_sensitive(token, 4);
        assert_eq!(masked, "5e7f...832d");
        assert_eq!(mask_sensitive("abc", 4), "***");
        assert_eq!(mask_sensitive("pässwörd-geheimnis", 2), "pä...is");
        assert_eq!(mask_sensitive("ßßß", 2), "***");
    }

    #[test]
    fn test_tail_chars() {
        assert_eq!(tail_chars("hello", 10), "hello");
        assert_eq!(tail_chars("hello world", 5), "world");
        assert_eq!(tail_chars("ééééé", 2), "éé");
    }

    #[test]
    fn test_strip_root() {
        assert_eq!(strip_root("/srv/data"), "srv/data");
        assert_eq!(strip_root("srv/data"), "srv/data");
        assert_eq!(strip_root(" /data "), "data");
    }

    #[test]
    fn test_env_guard_removes_unset_variable() {
        let name = "RCB_TEST_GUARD_UNSET";
        std::env::remove_var(name);
        {
            let guard = EnvGuard::set(name, "secret");
            assert_eq!(guard.name(), name);
            assert_eq!(std::env::var(name).as_deref(), Ok("secret"));
        }
        assert!(std::env::var(name).is_err());
    }

    #[test]
    fn test_env_guard_restores_previous_value() {
        let name = "RCB_TEST_GUARD_PREVIOUS";
        std::env::set_var(name, "original");
        {
            let _guard = EnvGuard::set(name, "override");
            assert_eq!(std::env::var(name).as_deref(), Ok("override"));
        }
        assert_eq!(std::env::var(name).as_deref(), Ok("original"));
        std::env::remove_var(name);
    }

    #[test]
    fn test_env_guard_restores_on_panic() {
        let name = "RCB_TEST_GUARD_PANIC";
        std::env::remove_var(name);
        let result = std::panic::catch_unwind(|| {
            let _guard = EnvGuard::set(name, "value");
            panic!("copy step failed");
        });
        assert!(result.is_err());
        assert!(std::env::var(name).is_err());
    }

    #[test]
    fn test_container_state() {
        assert_eq!(ContainerState::from("running"), ContainerState::Running);
        assert_eq!(ContainerState::from("exited"), ContainerState::Stopped);
        assert_eq!(ContainerState::from("created"), ContainerState::Stopped);
        assert_eq!(ContainerState::from("paused"), ContainerState::Stopped);
        assert!(ContainerState::Running.is_running());
        assert!(!ContainerState::Stopped.is_running());
    }
}
