//! TemplateMatcher: multi-scale search of one template inside a captured frame.
//!
//! The template and its resized copies are built once per loop and never
//! change afterwards; `find` is a pure function of the frame. The frame
//! pyramid is built once per `find` and shared by every scale.

mod ncc;
mod resize;

use crate::debug_if_enabled;
use crate::error::{Result, WatchError};
use crate::services::capture::Frame;
use crate::watch_error;
use image::RgbImage;
use ncc::{best_match, CompiledTemplate, FramePyramid};
use resize::{resize_for_scale, scaled_size, MAX_TEMPLATE_SIDE};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use tracing::{info, warn};

/// Минимальный размер стороны шаблона после масштабирования
pub const MIN_TEMPLATE_SIZE: u32 = 8;

/// Набор масштабов шаблона. Порядок влияет только на выбор среди равных оценок.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f64>", into = "Vec<f64>")]
pub struct ScaleSet(Vec<f64>);

impl ScaleSet {
    pub fn new(scales: Vec<f64>) -> Result<Self> {
        if scales.is_empty() {
            return WatchError::config("Набор масштабов пуст");
        }
        if let Some(bad) = scales.iter().find(|s| !s.is_finite() || **s <= 0.0) {
            return WatchError::config(format!("Масштаб должен быть положительным числом: {}", bad));
        }
        Ok(Self(scales))
    }

    pub fn iter(&self) -> impl Iterator<Item = f64> + '_ {
        self.0.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl Default for ScaleSet {
    fn default() -> Self {
        Self(vec![1.0, 0.9, 1.1])
    }
}

impl TryFrom<Vec<f64>> for ScaleSet {
    type Error = WatchError;

    fn try_from(scales: Vec<f64>) -> Result<Self> {
        Self::new(scales)
    }
}

impl From<ScaleSet> for Vec<f64> {
    fn from(scales: ScaleSet) -> Self {
        scales.0
    }
}

impl FromStr for ScaleSet {
    type Err = WatchError;

    /// Разбор строки `1.0,0.9,1.1`
    fn from_str(s: &str) -> Result<Self> {
        let scales = s
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(|p| {
                p.parse::<f64>()
                    .map_err(|e| WatchError::Config(format!("Неверный масштаб '{}': {}", p, e)))
            })
            .collect::<Result<Vec<_>>>()?;
        Self::new(scales)
    }
}

impl fmt::Display for ScaleSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|s| s.to_string()).collect();
        write!(f, "[{}]", parts.join(", "))
    }
}

/// Результат одного опроса. Живёт только в пределах итерации.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchResult {
    pub found: bool,
    /// Лучшая оценка в [-1, 1]; -1, если ни один масштаб не был проверен
    pub score: f64,
    /// Левый верхний угол в координатах кадра
    pub location: (u32, u32),
    pub size: (u32, u32),
    pub scale: f64,
    /// Сколько масштабов реально участвовало в поиске
    pub evaluated: usize,
}

impl MatchResult {
    fn nothing_evaluated() -> Self {
        Self {
            found: false,
            score: -1.0,
            location: (0, 0),
            size: (0, 0),
            scale: 0.0,
            evaluated: 0,
        }
    }
}

impl fmt::Display for MatchResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "score={:.3} scale={} rect=({},{},{},{})",
            self.score, self.scale, self.location.0, self.location.1, self.size.0, self.size.1
        )
    }
}

struct ScaledTemplate {
    scale: f64,
    size: (u32, u32),
    compiled: CompiledTemplate,
}

pub struct TemplateMatcher {
    original_size: (u32, u32),
    scaled: Vec<ScaledTemplate>,
    threshold: f64,
}

impl TemplateMatcher {
    /// Загрузить шаблон из файла. Нечитаемый или пустой шаблон фатален.
    pub fn from_path(path: &Path, scales: &ScaleSet, threshold: f64, min_size: u32) -> Result<Self> {
        let template = image::open(path)
            .map_err(|source| WatchError::TemplateLoad {
                path: path.to_path_buf(),
                source,
            })?
            .to_rgb8();

        info!("Шаблон {:?} загружен: {}x{}", path, template.width(), template.height());
        Self::new(template, scales, threshold, min_size)
    }

    pub fn new(template: RgbImage, scales: &ScaleSet, threshold: f64, min_size: u32) -> Result<Self> {
        if template.width() == 0 || template.height() == 0 {
            return WatchError::config("Шаблон пуст");
        }
        if !(threshold > 0.0 && threshold <= 1.0) {
            return WatchError::config(format!("Порог должен быть в (0, 1]: {}", threshold));
        }

        let original_size = template.dimensions();
        let mut scaled = Vec::with_capacity(scales.len());
        for scale in scales.iter() {
            let Some((w, h)) = scaled_size(original_size, scale) else {
                return WatchError::config(format!(
                    "Масштаб {} даёт шаблон больше {}px по стороне ({}x{} исходно)",
                    scale, MAX_TEMPLATE_SIDE, original_size.0, original_size.1
                ));
            };
            if w < min_size || h < min_size {
                debug_if_enabled!("Масштаб {} пропущен: {}x{} меньше {}px", scale, w, h, min_size);
                continue;
            }
            let resized = resize_for_scale(&template, w, h, scale);
            let compiled = CompiledTemplate::new(&resized);
            if compiled.is_flat() {
                warn!("Шаблон в масштабе {} не содержит контраста и не даст совпадений", scale);
            }
            scaled.push(ScaledTemplate {
                scale,
                size: (w, h),
                compiled,
            });
        }

        if scaled.is_empty() {
            warn!(
                "Ни один масштаб из {} не даёт шаблон не меньше {}px: совпадений не будет",
                scales, min_size
            );
        }

        Ok(Self {
            original_size,
            scaled,
            threshold,
        })
    }

    pub fn original_size(&self) -> (u32, u32) {
        self.original_size
    }

    /// Масштабы, которые реально участвуют в поиске
    pub fn active_scales(&self) -> Vec<f64> {
        self.scaled.iter().map(|s| s.scale).collect()
    }

    /// Перебрать все масштабы и сравнить лучшую оценку с порогом
    pub fn find(&self, frame: &Frame) -> Result<MatchResult> {
        if frame.width() == 0 || frame.height() == 0 {
            return Err(watch_error!(matching, "Пустой кадр {}x{}", frame.width(), frame.height()));
        }

        let depth = self.scaled.iter().map(|s| s.compiled.depth()).max().unwrap_or(1);
        let pyramid = FramePyramid::new(frame, depth);

        let mut best = MatchResult::nothing_evaluated();
        for candidate in &self.scaled {
            let Some(corr) = best_match(&pyramid, &candidate.compiled) else {
                debug_if_enabled!(
                    "Масштаб {} пропущен: шаблон {:?} больше кадра {:?}",
                    candidate.scale,
                    candidate.size,
                    frame.dimensions()
                );
                continue;
            };

            best.evaluated += 1;
            if corr.score > best.score {
                best.score = corr.score;
                best.location = (corr.x, corr.y);
                best.size = candidate.size;
                best.scale = candidate.scale;
            }
        }

        if !best.score.is_finite() {
            return Err(watch_error!(matching, "Некорректная оценка корреляции: {}", best.score));
        }

        best.found = best.evaluated > 0 && best.score >= self.threshold;
        Ok(best)
    }
}
