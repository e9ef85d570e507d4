use crate::error::{Result, WatchError};
use crate::services::detection_loop::{DetectionLoop, LoopHandle, LoopState, LoopSummary};
use dashmap::DashMap;
use std::time::Duration;
use tracing::{error, info, warn};

/// Набор независимых циклов, по одному на стратегию
pub struct StrategySupervisor {
    loops: DashMap<String, LoopHandle>,
}

impl StrategySupervisor {
    pub fn new() -> Self {
        Self { loops: DashMap::new() }
    }

    /// Запустить цикл. Имя стратегии должно быть уникальным среди работающих.
    pub fn start(&self, detection: DetectionLoop) -> Result<()> {
        let name = detection.name().to_string();
        if self.loops.get(&name).is_some_and(|h| !h.is_finished()) {
            return WatchError::config(format!("Стратегия '{}' уже запущена", name));
        }

        let handle = detection.start();
        info!("Стратегия '{}' запущена", name);
        // Завершившийся цикл с тем же именем заменяется новым
        self.loops.insert(name, handle);
        Ok(())
    }

    /// Остановить одну стратегию и дождаться её завершения
    pub async fn stop(&self, name: &str, timeout: Duration) -> Result<LoopSummary> {
        let (_, handle) = self
            .loops
            .remove(name)
            .ok_or_else(|| WatchError::Internal(format!("Стратегия '{}' не найдена", name)))?;
        handle.shutdown(timeout).await
    }

    /// Остановить все циклы; каждый ждём не дольше `timeout`
    pub async fn stop_all(&self, timeout: Duration) -> Vec<(String, LoopSummary)> {
        // Сначала сигнал всем, потом ожидание: остановка идёт параллельно
        for entry in self.loops.iter() {
            entry.value().stop();
        }

        let names: Vec<String> = self.loops.iter().map(|e| e.key().clone()).collect();
        let mut summaries = Vec::with_capacity(names.len());
        for name in names {
            let Some((name, handle)) = self.loops.remove(&name) else {
                continue;
            };
            match handle.shutdown(timeout).await {
                Ok(summary) => summaries.push((name, summary)),
                Err(e) => error!("Стратегия '{}' не остановлена корректно: {}", name, e),
            }
        }

        if !self.loops.is_empty() {
            warn!("После остановки остались циклы: {}", self.loops.len());
        }
        summaries
    }

    pub fn states(&self) -> Vec<(String, LoopState)> {
        let mut states: Vec<_> = self
            .loops
            .iter()
            .map(|e| (e.key().clone(), e.value().state()))
            .collect();
        states.sort_by(|a, b| a.0.cmp(&b.0));
        states
    }

    /// Все циклы завершились сами (например, в режиме --once)
    pub fn all_finished(&self) -> bool {
        self.loops.iter().all(|e| e.value().is_finished())
    }

    pub fn len(&self) -> usize {
        self.loops.len()
    }
}

impl Default for StrategySupervisor {
    fn default() -> Self {
        Self::new()
    }
}
