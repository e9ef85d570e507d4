use super::ActionDispatcher;
use crate::error::Result;
use crate::events::KeyCombo;
use tracing::info;

pub struct DryRunDispatcher;

impl DryRunDispatcher {
    pub fn new() -> Self {
        info!("Dry-run режим - комбинации только логируются");
        Self
    }
}

impl Default for DryRunDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl ActionDispatcher for DryRunDispatcher {
    async fn dispatch(&self, combo: &KeyCombo) -> Result<()> {
        let keys: Vec<String> = combo.press_order().map(|k| k.to_string()).collect();
        info!("[DRY RUN] Нажатие комбинации {} (порядок: {:?})", combo, keys);
        Ok(())
    }

    async fn focus_window(&self, hint: &str) -> bool {
        info!("[DRY RUN] Фокусировка окна '{}'", hint);
        true
    }
}
