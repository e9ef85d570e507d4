use serde::{Deserialize, Serialize};
use std::fmt;

/// Информация об окне
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WindowInfo {
    pub id: Option<String>,
    pub title: String,
}

impl WindowInfo {
    pub fn new(title: String) -> Self {
        Self { id: None, title }
    }

    pub fn with_id(mut self, id: String) -> Self {
        self.id = Some(id);
        self
    }

    /// Проверить, соответствует ли окно подсказке (регистронезависимо)
    pub fn matches_hint(&self, hint: &str) -> bool {
        if hint.is_empty() {
            return true;
        }
        self.title.to_lowercase().contains(&hint.to_lowercase())
    }
}

impl fmt::Display for WindowInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.id {
            Some(id) => write!(f, "\"{}\" ({})", self.title, id),
            None => write!(f, "\"{}\"", self.title),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_info_creation() {
        let window = WindowInfo::new("영웅문G - 차트".to_string()).with_id("0x3a00007".to_string());

        assert_eq!(window.title, "영웅문G - 차트");
        assert_eq!(window.id.as_deref(), Some("0x3a00007"));
        assert_eq!(window.to_string(), "\"영웅문G - 차트\" (0x3a00007)");
    }

    #[test]
    fn test_window_hint_matching() {
        let window = WindowInfo::new("HTS Chart - Futures".to_string());

        assert!(window.matches_hint("chart"));
        assert!(window.matches_hint("HTS"));
        assert!(window.matches_hint(""));
        assert!(!window.matches_hint("browser"));
    }
}
