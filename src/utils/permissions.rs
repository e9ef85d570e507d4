use crate::error::{Result, WatchError};
use std::fs::OpenOptions;
use std::path::Path;
use tracing::{info, warn};

const UINPUT_DEVICE: &str = "/dev/uinput";

/// Проверить права доступа к необходимым ресурсам
pub fn check_permissions() -> Result<()> {
    info!("Проверка прав доступа...");

    // Захват экрана невозможен без графической сессии
    check_display(std::env::var_os("DISPLAY").is_some(), std::env::var_os("WAYLAND_DISPLAY").is_some())?;

    // Инъекция клавиш идёт через /dev/uinput
    check_uinput_access(Path::new(UINPUT_DEVICE))?;

    check_not_root();

    info!("Проверка прав доступа завершена успешно");
    Ok(())
}

fn check_display(has_x11: bool, has_wayland: bool) -> Result<()> {
    if !has_x11 && !has_wayland {
        return Err(WatchError::Permission(
            "Не найдена графическая сессия: не заданы DISPLAY и WAYLAND_DISPLAY".to_string(),
        ));
    }
    if has_wayland && !has_x11 {
        warn!("Сессия Wayland без XWayland: фокусировка окон через xdotool/wmctrl недоступна");
    }
    Ok(())
}

fn check_uinput_access(device: &Path) -> Result<()> {
    if !device.exists() {
        return Err(WatchError::Permission(format!(
            "{} не существует. Загрузите модуль: sudo modprobe uinput",
            device.display()
        )));
    }

    match OpenOptions::new().write(true).open(device) {
        Ok(_) => {
            info!("Доступ к {} подтвержден", device.display());
            Ok(())
        }
        Err(e) => Err(WatchError::Permission(format!(
            "Нет прав записи в {}: {}. Добавьте пользователя в группу 'uinput' или 'input'",
            device.display(),
            e
        ))),
    }
}

fn check_not_root() {
    // Проверяем переменную окружения USER
    match std::env::var("USER") {
        Ok(user) if user == "root" => {
            warn!("⚠️  Приложение запущено от имени root!");
            warn!("   Рекомендуется добавить пользователя в группы 'input' и 'uinput'");
            warn!("   и запускать приложение от имени обычного пользователя");
            warn!("   Команды:");
            for command in setup_commands() {
                warn!("   {}", command);
            }
        }
        Ok(user) => {
            info!("Приложение запущено от имени пользователя: {}", user);
        }
        Err(_) => {
            warn!("Не удалось определить пользователя");
        }
    }
}

/// Рекомендуемые команды для настройки прав доступа
pub fn setup_commands() -> Vec<&'static str> {
    vec![
        "sudo usermod -a -G input,uinput $USER",
        "sudo modprobe uinput",
        "echo 'uinput' | sudo tee /etc/modules-load.d/uinput.conf",
        "(затем перезайдите в систему)",
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setup_commands() {
        let commands = setup_commands();
        assert!(commands.iter().any(|cmd| cmd.contains("usermod")));
        assert!(commands.iter().any(|cmd| cmd.contains("modprobe")));
    }

    #[test]
    fn test_display_required() {
        assert!(matches!(check_display(false, false), Err(WatchError::Permission(_))));
        assert!(check_display(true, false).is_ok());
        assert!(check_display(false, true).is_ok());
    }

    #[test]
    fn test_missing_uinput_is_permission_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("uinput");
        assert!(matches!(check_uinput_access(&missing), Err(WatchError::Permission(_))));

        std::fs::write(&missing, b"").unwrap();
        assert!(check_uinput_access(&missing).is_ok());
    }
}
