use crate::events::{EventRecord, Outcome};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{info, warn};

/// Получатель записей журнала. Вызывается из задачи цикла, не должен блокировать.
pub trait EventSink: Send + Sync {
    fn emit(&self, record: EventRecord);
}

/// Пересылка записей в канал (StatusBoard на другом конце)
pub struct ChannelEventSink {
    sender: UnboundedSender<EventRecord>,
}

impl ChannelEventSink {
    pub fn new(sender: UnboundedSender<EventRecord>) -> Self {
        Self { sender }
    }
}

impl EventSink for ChannelEventSink {
    fn emit(&self, record: EventRecord) {
        if let Err(e) = self.sender.send(record) {
            // Получатель закрыт при остановке
            log_record(&e.0);
        }
    }
}

pub fn log_record(record: &EventRecord) {
    match record.outcome {
        Outcome::Failed => warn!(
            category = %record.category,
            phase = ?record.phase,
            "{}",
            record.detail
        ),
        _ => info!(
            category = %record.category,
            phase = ?record.phase,
            outcome = ?record.outcome,
            "{}",
            record.detail
        ),
    }
}
