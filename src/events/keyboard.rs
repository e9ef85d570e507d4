use crate::error::{Result, WatchError};
use crate::services::keycode_map::KeycodeMap;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::fmt;
use std::str::FromStr;

/// Состояние клавиши
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyState {
    Pressed,
    Released,
}

/// Код клавиши (evdev коды)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeyCode(pub u16);

impl KeyCode {
    pub fn new(code: u16) -> Self {
        Self(code)
    }

    pub fn value(&self) -> u16 {
        self.0
    }
}

impl fmt::Display for KeyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match KeycodeMap::get_key_name(self.0) {
            Some(name) => write!(f, "{}", name),
            None => write!(f, "KEY_{}", self.0),
        }
    }
}

/// Комбинация клавиш, которую нужно нажать при срабатывании сигнала.
///
/// Клавиши нажимаются в указанном порядке и отпускаются в обратном
/// (`ctrl+alt+1`: ctrl, alt, 1 вниз, затем 1, alt, ctrl вверх).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyCombo {
    keys: SmallVec<[KeyCode; 4]>,
}

impl KeyCombo {
    pub fn new(keys: impl IntoIterator<Item = KeyCode>) -> Result<Self> {
        let keys: SmallVec<[KeyCode; 4]> = keys.into_iter().collect();
        if keys.is_empty() {
            return WatchError::config("Пустая комбинация клавиш");
        }
        Ok(Self { keys })
    }

    pub fn keys(&self) -> &[KeyCode] {
        &self.keys
    }

    pub fn press_order(&self) -> impl Iterator<Item = KeyCode> + '_ {
        self.keys.iter().copied()
    }

    pub fn release_order(&self) -> impl Iterator<Item = KeyCode> + '_ {
        self.keys.iter().rev().copied()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }
}

impl FromStr for KeyCombo {
    type Err = WatchError;

    /// Разбор строки вида `ctrl+alt+1` (имена через `+`, пустые части игнорируются)
    fn from_str(s: &str) -> Result<Self> {
        let mut keys = SmallVec::<[KeyCode; 4]>::new();
        for part in s.split('+').map(str::trim).filter(|p| !p.is_empty()) {
            let code = KeycodeMap::get_keycode(part)
                .map_err(|e| WatchError::Config(format!("Неверная клавиша в комбинации '{}': {}", s, e)))?;
            keys.push(KeyCode::new(code));
        }
        Self::new(keys)
    }
}

impl fmt::Display for KeyCombo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, key) in self.keys.iter().enumerate() {
            if i > 0 {
                write!(f, "+")?;
            }
            write!(f, "{}", key)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_combo_parsing() {
        let combo: KeyCombo = "ctrl+alt+1".parse().unwrap();
        assert_eq!(combo.len(), 3);
        assert_eq!(combo.keys(), &[KeyCode(29), KeyCode(56), KeyCode(2)]);
        assert_eq!(combo.to_string(), "ctrl+alt+1");
    }

    #[test]
    fn test_combo_parsing_tolerates_spaces_and_aliases() {
        let combo: KeyCombo = " Control + F1 + ".parse().unwrap();
        assert_eq!(combo.to_string(), "ctrl+f1");
    }

    #[test]
    fn test_release_order_is_reversed() {
        let combo: KeyCombo = "ctrl+shift+s".parse().unwrap();
        let pressed: Vec<_> = combo.press_order().collect();
        let released: Vec<_> = combo.release_order().collect();
        assert_eq!(pressed, vec![KeyCode(29), KeyCode(42), KeyCode(31)]);
        assert_eq!(released, vec![KeyCode(31), KeyCode(42), KeyCode(29)]);
    }

    #[test]
    fn test_empty_and_unknown_combos_are_config_errors() {
        assert!(matches!("".parse::<KeyCombo>(), Err(WatchError::Config(_))));
        assert!(matches!(" + ".parse::<KeyCombo>(), Err(WatchError::Config(_))));
        assert!(matches!("ctrl+banana".parse::<KeyCombo>(), Err(WatchError::Config(_))));
    }

    #[test]
    fn test_unknown_code_display() {
        assert_eq!(KeyCode::new(999).to_string(), "KEY_999");
    }
}
