use crate::services::matcher::MatchResult;
use std::fmt;
use std::time::{Duration, Instant};

/// Логическое состояние гейта
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    Armed,
    Cooling,
}

impl fmt::Display for GateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GateState::Armed => write!(f, "ARMED"),
            GateState::Cooling => write!(f, "COOLING"),
        }
    }
}

/// Время последнего срабатывания и длительность остывания
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriggerState {
    pub last_trigger: Option<Instant>,
    pub cooldown: Duration,
}

/// Порог + остывание. Возврат в ARMED вычисляется лениво при каждом вызове,
/// отдельного таймера нет.
#[derive(Debug, Clone)]
pub struct TriggerGate {
    state: TriggerState,
}

impl TriggerGate {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            state: TriggerState {
                last_trigger: None,
                cooldown,
            },
        }
    }

    pub fn should_fire(&self, result: &MatchResult, now: Instant) -> bool {
        result.found && self.state(now) == GateState::Armed
    }

    /// Вызывается после каждой попытки отправки, даже неудачной
    pub fn on_fired(&mut self, now: Instant) {
        self.state.last_trigger = Some(now);
    }

    pub fn state(&self, now: Instant) -> GateState {
        match self.state.last_trigger {
            Some(last) if now.saturating_duration_since(last) < self.state.cooldown => GateState::Cooling,
            _ => GateState::Armed,
        }
    }

    /// Сколько осталось до возврата в ARMED
    pub fn remaining(&self, now: Instant) -> Duration {
        self.state
            .last_trigger
            .map(|last| self.state.cooldown.saturating_sub(now.saturating_duration_since(last)))
            .unwrap_or(Duration::ZERO)
    }
}
