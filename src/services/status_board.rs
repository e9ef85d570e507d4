use crate::events::{EventRecord, Outcome, Phase};
use crate::services::event_sink::log_record;
use dashmap::DashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StrategyStatus {
    #[default]
    Idle,
    Running,
}

impl fmt::Display for StrategyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StrategyStatus::Idle => write!(f, "остановлена"),
            StrategyStatus::Running => write!(f, "работает"),
        }
    }
}

/// Счётчики одной стратегии
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StrategyStats {
    pub status: StrategyStatus,
    pub found: u64,
    pub triggered: u64,
    pub suppressed: u64,
    pub failures: u64,
    pub last_event: Option<String>,
}

/// Сводка по записям журнала всех стратегий
#[derive(Clone, Default)]
pub struct StatusBoard {
    stats: Arc<DashMap<String, StrategyStats>>,
}

impl StatusBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, record: &EventRecord) {
        let mut stats = self.stats.entry(record.category.clone()).or_default();

        match (record.phase, record.outcome) {
            (Phase::Start, _) => stats.status = StrategyStatus::Running,
            (Phase::Stop, _) => stats.status = StrategyStatus::Idle,
            (_, Outcome::Failed) => stats.failures += 1,
            (Phase::Detection, Outcome::Triggered) => {
                stats.found += 1;
                stats.triggered += 1;
            }
            (Phase::Detection, Outcome::Suppressed) => {
                stats.found += 1;
                stats.suppressed += 1;
            }
            _ => {}
        }
        stats.last_event = Some(record.to_string());
    }

    /// Читать записи из канала, пока все отправители не закроются
    pub fn spawn(&self, mut receiver: UnboundedReceiver<EventRecord>) -> JoinHandle<()> {
        let board = self.clone();
        tokio::spawn(async move {
            while let Some(record) = receiver.recv().await {
                log_record(&record);
                board.record(&record);
            }
        })
    }

    #[cfg(test)]
    pub fn stats(&self, name: &str) -> Option<StrategyStats> {
        self.stats.get(name).map(|s| s.clone())
    }

    pub fn summary_lines(&self) -> Vec<String> {
        let mut lines: Vec<String> = self
            .stats
            .iter()
            .map(|e| {
                let s = e.value();
                format!(
                    "{}: {} | найдено {} | отправлено {} | подавлено {} | ошибок {}",
                    e.key(),
                    s.status,
                    s.found,
                    s.triggered,
                    s.suppressed,
                    s.failures
                )
            })
            .collect();
        lines.sort();
        lines
    }

    pub fn log_summary(&self) {
        info!("Итоги мониторинга:");
        for line in self.summary_lines() {
            info!("  {}", line);
        }
    }
}
