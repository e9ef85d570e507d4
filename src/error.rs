use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum WatchError {
    /// Фатальная ошибка конфигурации: цикл не должен запускаться
    #[error("Ошибка конфигурации: {0}")]
    Config(String),

    #[error("Не удалось загрузить шаблон {path:?}: {source}")]
    TemplateLoad {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("Ошибка захвата экрана: {0}")]
    Capture(String),

    #[error("Ошибка отправки комбинации: {0}")]
    Dispatch(String),

    #[error("Ошибка сопоставления шаблона: {0}")]
    MatchComputation(String),

    #[error("Ошибка ввода-вывода: {0}")]
    Io(#[from] std::io::Error),

    #[error("Ошибка uinput: {0}")]
    Uinput(String),

    #[error("Недостаточно прав доступа: {0}")]
    Permission(String),

    #[error("Внутренняя ошибка: {0}")]
    Internal(String),
}

impl WatchError {
    pub fn config<T>(msg: impl Into<String>) -> Result<T> {
        Err(WatchError::Config(msg.into()))
    }

    /// Фатальна ли ошибка для запуска цикла
    pub fn is_configuration(&self) -> bool {
        matches!(self, WatchError::Config(_) | WatchError::TemplateLoad { .. })
    }
}

impl From<uinput::Error> for WatchError {
    fn from(err: uinput::Error) -> Self {
        WatchError::Uinput(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, WatchError>;

// Удобные макросы для создания ошибок
#[macro_export]
macro_rules! watch_error {
    (config, $($arg:tt)*) => {
        $crate::error::WatchError::Config(format!($($arg)*))
    };
    (capture, $($arg:tt)*) => {
        $crate::error::WatchError::Capture(format!($($arg)*))
    };
    (dispatch, $($arg:tt)*) => {
        $crate::error::WatchError::Dispatch(format!($($arg)*))
    };
    (matching, $($arg:tt)*) => {
        $crate::error::WatchError::MatchComputation(format!($($arg)*))
    };
    (permission, $($arg:tt)*) => {
        $crate::error::WatchError::Permission(format!($($arg)*))
    };
    (internal, $($arg:tt)*) => {
        $crate::error::WatchError::Internal(format!($($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_errors_are_fatal() {
        let err = crate::watch_error!(config, "пустая комбинация");
        assert!(err.is_configuration());
        assert_eq!(err.to_string(), "Ошибка конфигурации: пустая комбинация");

        let err = crate::watch_error!(capture, "дисплей {} недоступен", 0);
        assert!(!err.is_configuration());
        assert!(matches!(err, WatchError::Capture(ref m) if m == "дисплей 0 недоступен"));
    }

    #[test]
    fn test_config_helper() {
        let result: Result<()> = WatchError::config("threshold вне диапазона");
        assert!(matches!(result, Err(WatchError::Config(_))));
    }
}
