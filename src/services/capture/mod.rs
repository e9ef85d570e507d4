//! ScreenCapturer service: responsibility and boundaries
//!
//! This module is responsible ONLY for turning a screen rectangle into an RGB
//! pixel buffer of exactly the requested size. It knows nothing about templates,
//! thresholds or keys.

mod snapshot;
mod xcap_capturer;

pub use snapshot::save_region;
pub use xcap_capturer::XcapCapturer;

use crate::error::{Result, WatchError};
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Захваченный кадр: height×width×3, RGB, 8 бит на канал
pub type Frame = RgbImage;

/// Прямоугольник захвата в экранных координатах
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Region {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Region {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Result<Self> {
        let region = Self { x, y, width, height };
        region.validate()?;
        Ok(region)
    }

    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return WatchError::config(format!(
                "Размеры региона должны быть положительными: {}x{}",
                self.width, self.height
            ));
        }
        Ok(())
    }
}

impl FromStr for Region {
    type Err = WatchError;

    /// Разбор строки `x,y,w,h`
    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<i64> = s
            .split(',')
            .map(|p| p.trim().parse::<i64>())
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| WatchError::Config(format!("Неверный формат региона '{}': {} (ожидается x,y,w,h)", s, e)))?;

        let &[x, y, w, h] = parts.as_slice() else {
            return WatchError::config(format!("Регион '{}' должен содержать 4 числа x,y,w,h", s));
        };

        if w <= 0 || h <= 0 {
            return WatchError::config(format!("Размеры региона должны быть положительными: '{}'", s));
        }

        let to_i32 = |v: i64| i32::try_from(v).map_err(|_| WatchError::Config(format!("Координата вне диапазона: {}", v)));
        let to_u32 = |v: i64| u32::try_from(v).map_err(|_| WatchError::Config(format!("Размер вне диапазона: {}", v)));

        Region::new(to_i32(x)?, to_i32(y)?, to_u32(w)?, to_u32(h)?)
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{},{},{})", self.x, self.y, self.width, self.height)
    }
}

/// Trait for screen capturers
#[async_trait::async_trait]
pub trait ScreenCapturer: Send + Sync {
    /// Захватить регион (или весь основной дисплей при `None`).
    ///
    /// Размер возвращённого кадра совпадает с регионом; если регион
    /// недоступен, возвращается `WatchError::Capture`.
    async fn capture(&self, region: Option<Region>) -> Result<Frame>;
}

/// Вырезать регион из снимка дисплея, начало которого находится в `origin`
pub fn crop_to_region(screen: &Frame, origin: (i32, i32), region: Region) -> Result<Frame> {
    region.validate()?;

    let local_x = i64::from(region.x) - i64::from(origin.0);
    let local_y = i64::from(region.y) - i64::from(origin.1);
    let right = local_x + i64::from(region.width);
    let bottom = local_y + i64::from(region.height);

    if local_x < 0 || local_y < 0 || right > i64::from(screen.width()) || bottom > i64::from(screen.height()) {
        return Err(crate::watch_error!(
            capture,
            "Регион {} выходит за пределы дисплея {}x{} с началом ({},{})",
            region,
            screen.width(),
            screen.height(),
            origin.0,
            origin.1
        ));
    }

    Ok(image::imageops::crop_imm(screen, local_x as u32, local_y as u32, region.width, region.height).to_image())
}
