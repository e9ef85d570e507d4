use std::collections::HashMap;
use once_cell::sync::Lazy;

/// Маппинг между именами клавиш и кодами evdev
pub struct KeycodeMap;

// Канонические имена; обратная карта строится только по ним
const CANONICAL_KEYS: &[(&str, u16)] = &[
    // Буквенные клавиши
    ("a", 30), ("b", 48), ("c", 46), ("d", 32), ("e", 18), ("f", 33),
    ("g", 34), ("h", 35), ("i", 23), ("j", 36), ("k", 37), ("l", 38),
    ("m", 50), ("n", 49), ("o", 24), ("p", 25), ("q", 16), ("r", 19),
    ("s", 31), ("t", 20), ("u", 22), ("v", 47), ("w", 17), ("x", 45),
    ("y", 21), ("z", 44),

    // Цифровые клавиши (верхний ряд)
    ("1", 2), ("2", 3), ("3", 4), ("4", 5), ("5", 6),
    ("6", 7), ("7", 8), ("8", 9), ("9", 10), ("0", 11),

    // Специальные клавиши
    ("space", 57),      // KEY_SPACE
    ("enter", 28),      // KEY_ENTER
    ("escape", 1),      // KEY_ESC
    ("backspace", 14),  // KEY_BACKSPACE
    ("tab", 15),        // KEY_TAB

    // Пунктуация
    ("minus", 12), ("equal", 13), ("leftbrace", 26), ("rightbrace", 27),
    ("backslash", 43), ("semicolon", 39), ("apostrophe", 40), ("grave", 41),
    ("comma", 51), ("dot", 52), ("slash", 53),

    // Навигация/редакция
    ("insert", 110), ("delete", 111), ("home", 102), ("end", 107),
    ("pageup", 104), ("pagedown", 109),

    // Numpad
    ("kp0", 82), ("kp1", 79), ("kp2", 80), ("kp3", 81), ("kp4", 75),
    ("kp5", 76), ("kp6", 77), ("kp7", 71), ("kp8", 72), ("kp9", 73),
    ("kpenter", 96),

    // Модификаторы
    ("ctrl", 29),       // KEY_LEFTCTRL
    ("alt", 56),        // KEY_LEFTALT
    ("shift", 42),      // KEY_LEFTSHIFT
    ("super", 125),     // KEY_LEFTMETA

    // Стрелки
    ("up", 103), ("down", 108), ("left", 105), ("right", 106),

    // Функциональные клавиши
    ("f1", 59), ("f2", 60), ("f3", 61), ("f4", 62), ("f5", 63), ("f6", 64),
    ("f7", 65), ("f8", 66), ("f9", 67), ("f10", 68), ("f11", 87), ("f12", 88),
];

// Синонимы в стиле pyautogui / xdotool
const KEY_ALIASES: &[(&str, &str)] = &[
    ("control", "ctrl"),
    ("esc", "escape"),
    ("return", "enter"),
    ("win", "super"),
    ("meta", "super"),
    ("cmd", "super"),
    ("pgup", "pageup"),
    ("pgdn", "pagedown"),
    ("del", "delete"),
    ("ins", "insert"),
];

static KEY_NAME_TO_CODE: Lazy<HashMap<&'static str, u16>> = Lazy::new(|| {
    let mut map: HashMap<&'static str, u16> = CANONICAL_KEYS.iter().copied().collect();
    for &(alias, target) in KEY_ALIASES {
        if let Some(&code) = map.get(target) {
            map.insert(alias, code);
        }
    }
    map
});

static CODE_TO_KEY_NAME: Lazy<HashMap<u16, &'static str>> = Lazy::new(|| {
    CANONICAL_KEYS.iter().map(|&(name, code)| (code, name)).collect()
});

impl KeycodeMap {
    /// Получить код клавиши по её имени
    pub fn get_keycode(key_name: &str) -> Result<u16, String> {
        let normalized = key_name.trim().to_lowercase();
        KEY_NAME_TO_CODE.get(normalized.as_str())
            .copied()
            .ok_or_else(|| format!("Unknown key: {}", key_name))
    }

    /// Получить имя клавиши по её коду
    pub fn get_key_name(keycode: u16) -> Option<&'static str> {
        CODE_TO_KEY_NAME.get(&keycode).copied()
    }

    /// Проверить, является ли клавиша модификатором
    pub fn is_modifier(key_name: &str) -> bool {
        matches!(
            Self::get_keycode(key_name).ok().and_then(Self::get_key_name),
            Some("ctrl" | "alt" | "shift" | "super")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_key_mapping() {
        assert_eq!(KeycodeMap::get_keycode("a").unwrap(), 30);
        assert_eq!(KeycodeMap::get_keycode("space").unwrap(), 57);
        assert_eq!(KeycodeMap::get_keycode("ctrl").unwrap(), 29);
        assert_eq!(KeycodeMap::get_keycode("f1").unwrap(), 59);
        assert_eq!(KeycodeMap::get_keycode("f12").unwrap(), 88);
    }

    #[test]
    fn test_case_insensitive() {
        assert_eq!(KeycodeMap::get_keycode("A").unwrap(), 30);
        assert_eq!(KeycodeMap::get_keycode("SPACE").unwrap(), 57);
        assert_eq!(KeycodeMap::get_keycode(" Alt ").unwrap(), 56);
    }

    #[test]
    fn test_aliases_resolve_to_canonical_names() {
        assert_eq!(KeycodeMap::get_keycode("control").unwrap(), 29);
        assert_eq!(KeycodeMap::get_keycode("esc").unwrap(), 1);
        assert_eq!(KeycodeMap::get_key_name(29), Some("ctrl"));
        assert_eq!(KeycodeMap::get_key_name(1), Some("escape"));
    }

    #[test]
    fn test_reverse_mapping() {
        assert_eq!(KeycodeMap::get_key_name(30), Some("a"));
        assert_eq!(KeycodeMap::get_key_name(57), Some("space"));
        assert_eq!(KeycodeMap::get_key_name(9999), None);
    }

    #[test]
    fn test_invalid_key() {
        assert!(KeycodeMap::get_keycode("invalid_key").is_err());
    }

    #[test]
    fn test_modifier_detection() {
        assert!(KeycodeMap::is_modifier("ctrl"));
        assert!(KeycodeMap::is_modifier("SHIFT"));
        assert!(KeycodeMap::is_modifier("win"));
        assert!(!KeycodeMap::is_modifier("a"));
        assert!(!KeycodeMap::is_modifier("space"));
    }
}
