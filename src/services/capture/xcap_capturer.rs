use super::{crop_to_region, Frame, Region, ScreenCapturer};
use crate::error::Result;
use crate::watch_error;
use image::{DynamicImage, RgbaImage};
use tracing::debug;
use xcap::Monitor;

/// Захват основного дисплея через xcap
pub struct XcapCapturer;

impl XcapCapturer {
    pub fn new() -> Self {
        Self
    }

    fn capture_blocking(region: Option<Region>) -> Result<Frame> {
        let monitors = Monitor::all()
            .map_err(|e| watch_error!(capture, "Не удалось получить список мониторов: {}", e))?;

        let primary = monitors
            .iter()
            .position(|m| m.is_primary().unwrap_or(false))
            .unwrap_or(0);
        let monitor = monitors
            .into_iter()
            .nth(primary)
            .ok_or_else(|| watch_error!(capture, "Мониторы не обнаружены"))?;

        let origin = (
            monitor.x().map_err(|e| watch_error!(capture, "Нет координат монитора: {}", e))?,
            monitor.y().map_err(|e| watch_error!(capture, "Нет координат монитора: {}", e))?,
        );

        let shot = monitor
            .capture_image()
            .map_err(|e| watch_error!(capture, "Не удалось сделать снимок экрана: {}", e))?;
        let (width, height) = shot.dimensions();
        let rgba = RgbaImage::from_raw(width, height, shot.into_raw())
            .ok_or_else(|| watch_error!(capture, "Снимок экрана повреждён ({}x{})", width, height))?;
        let screen = DynamicImage::ImageRgba8(rgba).to_rgb8();

        debug!("Снимок основного дисплея {}x{} с началом {:?}", width, height, origin);

        match region {
            Some(region) => crop_to_region(&screen, origin, region),
            None => Ok(screen),
        }
    }
}

impl Default for XcapCapturer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl ScreenCapturer for XcapCapturer {
    async fn capture(&self, region: Option<Region>) -> Result<Frame> {
        tokio::task::spawn_blocking(move || Self::capture_blocking(region))
            .await
            .map_err(|e| watch_error!(capture, "Задача захвата прервана: {}", e))?
    }
}
