use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Этап цикла, к которому относится запись
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Start,
    Capture,
    Matching,
    Detection,
    /// Фокусировка окна перед отправкой
    Focus,
    Dispatch,
    Stop,
}

/// Итог этапа
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Started,
    /// Сигнал найден и гейт взведён: комбинация отправлена
    Triggered,
    /// Сигнал найден, но гейт ещё остывает
    Suppressed,
    Failed,
    Stopped,
}

/// Запись журнала мониторинга: одна строка для статуса и таблицы логов.
///
/// Записи только наблюдательные, цикл их не читает.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub timestamp: DateTime<Local>,
    /// Метка стратегии (имя цикла)
    pub category: String,
    pub phase: Phase,
    pub outcome: Outcome,
    pub detail: String,
}

impl EventRecord {
    pub fn new(category: impl Into<String>, phase: Phase, outcome: Outcome, detail: impl Into<String>) -> Self {
        Self {
            timestamp: Local::now(),
            category: category.into(),
            phase,
            outcome,
            detail: detail.into(),
        }
    }

    pub fn started(category: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::new(category, Phase::Start, Outcome::Started, detail)
    }

    pub fn stopped(category: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::new(category, Phase::Stop, Outcome::Stopped, detail)
    }

    pub fn failed(category: impl Into<String>, phase: Phase, detail: impl Into<String>) -> Self {
        Self::new(category, phase, Outcome::Failed, detail)
    }

    /// Запись о найденном сигнале (сработавшем или подавленном)
    pub fn is_found(&self) -> bool {
        self.phase == Phase::Detection
    }

    pub fn time_str(&self) -> String {
        self.timestamp.format("%H:%M:%S").to_string()
    }
}

impl fmt::Display for EventRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} | {} | {:?} | {:?} | {}",
            self.time_str(),
            self.category,
            self.phase,
            self.outcome,
            self.detail
        )
    }
}
