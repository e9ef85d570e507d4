use crate::error::Result;
use crate::events::WindowInfo;
use crate::watch_error;
use std::process::Command;
use tracing::debug;

/// Фокусировка окна по подстроке заголовка: xdotool, затем wmctrl
#[derive(Debug, Clone, Default)]
pub struct WindowFocuser;

impl WindowFocuser {
    pub fn new() -> Self {
        Self
    }

    pub fn focus(&self, hint: &str) -> Result<WindowInfo> {
        if hint.trim().is_empty() {
            return Err(watch_error!(dispatch, "Пустая подсказка заголовка окна"));
        }

        match Self::focus_with_xdotool(hint) {
            Ok(window) => Ok(window),
            Err(e) => {
                debug!("xdotool не смог сфокусировать '{}': {}, пробуем wmctrl", hint, e);
                Self::focus_with_wmctrl(hint)
            }
        }
    }

    fn focus_with_xdotool(hint: &str) -> Result<WindowInfo> {
        let output = Command::new("xdotool")
            .args(["search", "--name", hint])
            .output()
            .map_err(|e| watch_error!(dispatch, "xdotool не найден: {}", e))?;

        if !output.status.success() {
            return Err(watch_error!(dispatch, "xdotool не нашёл окно '{}'", hint));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let id = parse_first_window_id(&stdout)
            .ok_or_else(|| watch_error!(dispatch, "xdotool не нашёл окно '{}'", hint))?;

        let activate = Command::new("xdotool")
            .args(["windowactivate", id.as_str()])
            .output()
            .map_err(|e| watch_error!(dispatch, "xdotool windowactivate: {}", e))?;
        if !activate.status.success() {
            let stderr = String::from_utf8_lossy(&activate.stderr);
            return Err(watch_error!(dispatch, "xdotool вернул ошибку: {}", stderr.trim()));
        }

        let title = Command::new("xdotool")
            .args(["getwindowname", id.as_str()])
            .output()
            .ok()
            .filter(|o| o.status.success())
            .map(|o| String::from_utf8_lossy(&o.stdout).trim().to_string())
            .unwrap_or_else(|| hint.to_string());

        let window = WindowInfo::new(title).with_id(id);
        if !window.matches_hint(hint) {
            debug!("Заголовок активированного окна {} не содержит '{}'", window, hint);
        }
        debug!("xdotool активировал окно {}", window);
        Ok(window)
    }

    fn focus_with_wmctrl(hint: &str) -> Result<WindowInfo> {
        let output = Command::new("wmctrl")
            .args(["-a", hint])
            .output()
            .map_err(|e| watch_error!(dispatch, "wmctrl не найден: {}", e))?;

        if !output.status.success() {
            return Err(watch_error!(dispatch, "wmctrl не нашёл окно '{}'", hint));
        }

        Ok(WindowInfo::new(hint.to_string()))
    }
}

/// Первый идентификатор окна из вывода `xdotool search`
fn parse_first_window_id(stdout: &str) -> Option<String> {
    stdout
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty() && line.chars().all(|c| c.is_ascii_digit()))
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_first_window_id() {
        assert_eq!(parse_first_window_id("48234497\n52428803\n"), Some("48234497".to_string()));
        assert_eq!(parse_first_window_id("\n  62914563  \n"), Some("62914563".to_string()));
        assert_eq!(parse_first_window_id("Defaulting to search window name\n"), None);
        assert_eq!(parse_first_window_id(""), None);
    }

    #[test]
    fn test_empty_hint_is_rejected() {
        assert!(WindowFocuser::new().focus("   ").is_err());
    }
}
