//! ActionDispatcher service: responsibility and boundaries
//!
//! This module is the only place that produces externally observable input:
//! synthetic key combos injected through uinput and best-effort focusing of a
//! target window. The detection loop talks to it only through the
//! `ActionDispatcher` trait, so the loop itself has no platform code.

mod dry_run;
mod virtual_device;
mod window_focus;

use dry_run::DryRunDispatcher;
use virtual_device::VirtualDevice;
use window_focus::WindowFocuser;

use crate::config::DispatchConfig;
use crate::error::Result;
use crate::events::{KeyCombo, VirtualKeyEvent};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Trait for dispatchers of trigger combos
#[async_trait::async_trait]
pub trait ActionDispatcher: Send + Sync {
    /// Нажать комбинацию. Ошибка означает пропущенный сигнал, а не остановку.
    async fn dispatch(&self, combo: &KeyCombo) -> Result<()>;

    /// Вывести окно с заголовком, содержащим `hint`, на передний план.
    /// Возвращает `false`, если окно не найдено или фокус не удался.
    async fn focus_window(&self, _hint: &str) -> bool {
        false
    }
}

/// Отправка через виртуальную клавиатуру uinput
pub struct UinputDispatcher {
    device: VirtualDevice,
    focuser: WindowFocuser,
    key_hold: Duration,
    focus_settle: Duration,
}

impl UinputDispatcher {
    pub fn new(config: &DispatchConfig) -> Result<Self> {
        Ok(Self {
            device: VirtualDevice::new(&config.device_name)?,
            focuser: WindowFocuser::new(),
            key_hold: Duration::from_millis(config.key_hold_ms),
            focus_settle: Duration::from_millis(config.focus_settle_ms),
        })
    }
}

#[async_trait::async_trait]
impl ActionDispatcher for UinputDispatcher {
    async fn dispatch(&self, combo: &KeyCombo) -> Result<()> {
        info!("Отправка комбинации {} ({} клавиш)", combo, combo.len());

        let presses: Vec<_> = combo.press_order().map(VirtualKeyEvent::press).collect();
        if let Err(e) = self.device.send_events(&presses) {
            // Не оставляем залипших клавиш после частичного нажатия
            let releases: Vec<_> = combo.release_order().map(VirtualKeyEvent::release).collect();
            if let Err(release_err) = self.device.send_events(&releases) {
                warn!("Не удалось отпустить клавиши после ошибки: {}", release_err);
            }
            return Err(e);
        }

        tokio::time::sleep(self.key_hold).await;

        let releases: Vec<_> = combo.release_order().map(VirtualKeyEvent::release).collect();
        self.device.send_events(&releases)
    }

    async fn focus_window(&self, hint: &str) -> bool {
        let focuser = self.focuser.clone();
        let hint_owned = hint.to_string();
        let focused = tokio::task::spawn_blocking(move || focuser.focus(&hint_owned)).await;

        match focused {
            Ok(Ok(window)) => {
                info!("Окно {} выведено на передний план", window);
                tokio::time::sleep(self.focus_settle).await;
                true
            }
            Ok(Err(e)) => {
                warn!("Не удалось сфокусировать окно '{}': {}", hint, e);
                false
            }
            Err(e) => {
                warn!("Задача фокусировки окна прервана: {}", e);
                false
            }
        }
    }
}

/// Factory function to create an appropriate dispatcher based on the dry_run flag
pub fn create_dispatcher(config: &DispatchConfig, dry_run: bool) -> Result<Arc<dyn ActionDispatcher>> {
    if dry_run {
        Ok(Arc::new(DryRunDispatcher::new()))
    } else {
        Ok(Arc::new(UinputDispatcher::new(config)?))
    }
}
