use super::{Region, ScreenCapturer};
use crate::error::Result;
use crate::watch_error;
use std::path::Path;
use tracing::info;

/// Сохранить регион экрана в файл, чтобы затем использовать его как шаблон.
///
/// Формат файла определяется по расширению (`.png`, `.jpg`, `.bmp`).
pub async fn save_region(capturer: &dyn ScreenCapturer, region: Region, out: &Path) -> Result<(u32, u32)> {
    let frame = capturer.capture(Some(region)).await?;
    if let Some(parent) = out.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    frame
        .save(out)
        .map_err(|e| watch_error!(internal, "Не удалось сохранить {:?}: {}", out, e))?;

    info!("Сохранён шаблон {:?} из региона {}", out, region);
    Ok(frame.dimensions())
}
