//! Нормированная взаимная корреляция с вычитанием среднего (CCOEFF_NORMED)
//! по трём каналам сразу.
//!
//! `R(u,v) = Σ T'·I' / sqrt(Σ T'² · Σ I'²)`, где `T'`/`I'` центрированы по
//! каждому каналу. Суммы окна берутся из интегральных изображений, числитель
//! считается построчными скалярными произведениями.
//!
//! Поиск идёт от грубого к точному: шаблон и кадр уменьшаются вдвое до тех
//! пор, пока сторона шаблона не меньше `COARSE_MIN_SIDE`. На самом грубом
//! уровне кадр просматривается целиком, лучшие `CANDIDATES` позиций
//! уточняются на каждом следующем уровне в окне `±REFINE_RADIUS`. Маленькие
//! шаблоны, для которых пирамиды нет, ищутся полным перебором.

use super::resize::halve;
use image::RgbImage;
use rayon::prelude::*;
use std::ops::RangeInclusive;

/// Окна с дисперсией ниже порога считаются плоскими и получают 0
const FLAT_VARIANCE_EPS: f64 = 1e-3;

/// Минимальная сторона шаблона на грубом уровне
const COARSE_MIN_SIDE: u32 = 8;

/// Сколько раз шаблон можно уменьшить вдвое
const MAX_PYRAMID_LEVELS: usize = 4;

/// Число позиций грубого уровня, которые уточняются
const CANDIDATES: usize = 16;

/// Окно уточнения вокруг удвоенной позиции кандидата
const REFINE_RADIUS: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Correlation {
    pub score: f64,
    pub x: u32,
    pub y: u32,
}

impl Correlation {
    /// Больше оценка; при равенстве раньше в построчном обходе
    fn beats(&self, other: &Correlation) -> bool {
        self.score > other.score || (self.score == other.score && (self.y, self.x) < (other.y, other.x))
    }
}

/// Центрированный шаблон одного уровня
struct PreparedTemplate {
    width: usize,
    height: usize,
    centered: Vec<f32>,
    norm: f64,
}

impl PreparedTemplate {
    fn new(template: &RgbImage) -> Self {
        let (w, h) = template.dimensions();
        let n = (w as usize * h as usize).max(1) as f64;
        let raw = template.as_raw();

        let mut means = [0f64; 3];
        for px in raw.chunks_exact(3) {
            for c in 0..3 {
                means[c] += f64::from(px[c]);
            }
        }
        means.iter_mut().for_each(|m| *m /= n);

        let centered: Vec<f32> = raw
            .chunks_exact(3)
            .flat_map(|px| (0..3).map(move |c| (f64::from(px[c]) - means[c]) as f32))
            .collect();
        let norm = centered.iter().map(|&v| f64::from(v) * f64::from(v)).sum();

        Self {
            width: w as usize,
            height: h as usize,
            centered,
            norm,
        }
    }

    fn is_flat(&self) -> bool {
        self.norm <= FLAT_VARIANCE_EPS
    }
}

/// Шаблон одного масштаба вместе с его уменьшенными копиями.
/// `levels[0]` всегда полный размер.
pub struct CompiledTemplate {
    levels: Vec<PreparedTemplate>,
}

impl CompiledTemplate {
    pub fn new(template: &RgbImage) -> Self {
        let mut levels = vec![PreparedTemplate::new(template)];
        let mut current: Option<RgbImage> = None;

        while levels.len() <= MAX_PYRAMID_LEVELS {
            let src = current.as_ref().unwrap_or(template);
            if src.width() / 2 < COARSE_MIN_SIDE || src.height() / 2 < COARSE_MIN_SIDE {
                break;
            }
            let next = halve(src);
            let prepared = PreparedTemplate::new(&next);
            // Мелкая текстура может усредниться в ровный цвет
            if prepared.is_flat() {
                break;
            }
            levels.push(prepared);
            current = Some(next);
        }

        Self { levels }
    }

    /// Шаблон без контраста ничего не различает
    pub fn is_flat(&self) -> bool {
        self.levels[0].is_flat()
    }

    /// Число уровней пирамиды, включая полный размер
    pub fn depth(&self) -> usize {
        self.levels.len()
    }
}

/// Интегральные изображения суммы и суммы квадратов по каналам
struct IntegralImages {
    stride: usize,
    sum: Vec<[f64; 3]>,
    sq_sum: Vec<[f64; 3]>,
}

impl IntegralImages {
    fn new(image: &RgbImage) -> Self {
        let (w, h) = (image.width() as usize, image.height() as usize);
        let stride = w + 1;
        let mut sum = vec![[0f64; 3]; stride * (h + 1)];
        let mut sq_sum = vec![[0f64; 3]; stride * (h + 1)];
        let raw = image.as_raw();

        for y in 0..h {
            let mut row_sum = [0f64; 3];
            let mut row_sq = [0f64; 3];
            for x in 0..w {
                let base = (y * w + x) * 3;
                for c in 0..3 {
                    let v = f64::from(raw[base + c]);
                    row_sum[c] += v;
                    row_sq[c] += v * v;
                }
                let idx = (y + 1) * stride + x + 1;
                let above = y * stride + x + 1;
                for c in 0..3 {
                    sum[idx][c] = sum[above][c] + row_sum[c];
                    sq_sum[idx][c] = sq_sum[above][c] + row_sq[c];
                }
            }
        }

        Self { stride, sum, sq_sum }
    }

    /// Σ_c (Σ I² − (Σ I)² / n) для окна w×h в точке (x, y)
    fn window_variance(&self, x: usize, y: usize, w: usize, h: usize) -> f64 {
        let n = (w * h) as f64;
        let a = y * self.stride + x;
        let b = y * self.stride + x + w;
        let c = (y + h) * self.stride + x;
        let d = (y + h) * self.stride + x + w;

        (0..3)
            .map(|ch| {
                let s = self.sum[d][ch] - self.sum[b][ch] - self.sum[c][ch] + self.sum[a][ch];
                let sq = self.sq_sum[d][ch] - self.sq_sum[b][ch] - self.sq_sum[c][ch] + self.sq_sum[a][ch];
                sq - s * s / n
            })
            .sum::<f64>()
            .max(0.0)
    }
}

/// Один уровень кадра, подготовленный к корреляции
struct SearchImage {
    width: usize,
    height: usize,
    pixels: Vec<f32>,
    integrals: IntegralImages,
}

impl SearchImage {
    fn new(image: &RgbImage) -> Self {
        Self {
            width: image.width() as usize,
            height: image.height() as usize,
            pixels: image.as_raw().iter().map(|&v| f32::from(v)).collect(),
            integrals: IntegralImages::new(image),
        }
    }

    /// Диапазоны допустимых левых верхних углов для шаблона
    fn positions(&self, template: &PreparedTemplate) -> Option<(usize, usize)> {
        if template.width == 0 || template.height == 0 {
            return None;
        }
        Some((
            self.width.checked_sub(template.width)?,
            self.height.checked_sub(template.height)?,
        ))
    }

    fn score_at(&self, template: &PreparedTemplate, u: usize, v: usize) -> f64 {
        let row_len = template.width * 3;
        let mut numerator = 0f64;
        for ty in 0..template.height {
            let start = ((v + ty) * self.width + u) * 3;
            let window = &self.pixels[start..start + row_len];
            let tpl = &template.centered[ty * row_len..(ty + 1) * row_len];
            let dot: f32 = window.iter().zip(tpl).map(|(a, b)| a * b).sum();
            numerator += f64::from(dot);
        }

        let variance = self
            .integrals
            .window_variance(u, v, template.width, template.height);
        if template.is_flat() || variance <= FLAT_VARIANCE_EPS {
            0.0
        } else {
            (numerator / (template.norm * variance).sqrt()).clamp(-1.0, 1.0)
        }
    }

    /// Лучшая позиция в прямоугольнике углов; строки параллельно
    fn scan(
        &self,
        template: &PreparedTemplate,
        xs: RangeInclusive<usize>,
        ys: RangeInclusive<usize>,
    ) -> Option<Correlation> {
        ys.into_par_iter()
            .map(|v| {
                let mut best = Correlation {
                    score: f64::NEG_INFINITY,
                    x: 0,
                    y: v as u32,
                };
                for u in xs.clone() {
                    let score = self.score_at(template, u, v);
                    if score > best.score {
                        best = Correlation {
                            score,
                            x: u as u32,
                            y: v as u32,
                        };
                    }
                }
                best
            })
            .collect::<Vec<_>>()
            .into_iter()
            .fold(None, |acc: Option<Correlation>, row| match acc {
                Some(current) if current.score >= row.score => Some(current),
                _ => Some(row),
            })
    }

    /// Все оценки уровня и отбор лучших разнесённых позиций
    fn candidates(&self, template: &PreparedTemplate, max_x: usize, max_y: usize) -> Vec<Correlation> {
        let cols = max_x + 1;
        let scores: Vec<f64> = (0..=max_y)
            .into_par_iter()
            .flat_map_iter(|v| (0..cols).map(move |u| self.score_at(template, u, v)))
            .collect();

        let by_rank = |a: &usize, b: &usize| scores[*b].total_cmp(&scores[*a]).then(a.cmp(b));
        let mut order: Vec<usize> = (0..scores.len()).collect();
        let shortlist = CANDIDATES * 16;
        if order.len() > shortlist {
            order.select_nth_unstable_by(shortlist, by_rank);
            order.truncate(shortlist);
        }
        order.sort_unstable_by(by_rank);

        let mut picked: Vec<Correlation> = Vec::with_capacity(CANDIDATES);
        for idx in order {
            let (x, y) = ((idx % cols) as u32, (idx / cols) as u32);
            let near = picked
                .iter()
                .any(|p| p.x.abs_diff(x) as usize <= REFINE_RADIUS && p.y.abs_diff(y) as usize <= REFINE_RADIUS);
            if near {
                continue;
            }
            picked.push(Correlation {
                score: scores[idx],
                x,
                y,
            });
            if picked.len() == CANDIDATES {
                break;
            }
        }
        picked
    }
}

/// Пирамида кадра. Строится один раз на кадр и общая для всех масштабов.
pub struct FramePyramid {
    levels: Vec<SearchImage>,
}

impl FramePyramid {
    pub fn new(frame: &RgbImage, depth: usize) -> Self {
        let mut levels = Vec::with_capacity(depth.max(1));
        levels.push(SearchImage::new(frame));
        let mut current: Option<RgbImage> = None;

        while levels.len() < depth {
            let src = current.as_ref().unwrap_or(frame);
            if src.width() < 2 || src.height() < 2 {
                break;
            }
            let next = halve(src);
            levels.push(SearchImage::new(&next));
            current = Some(next);
        }

        Self { levels }
    }
}

/// Найти позицию максимума корреляции шаблона в кадре.
///
/// Возвращает `None`, если шаблон не помещается в кадр. При равенстве
/// оценок побеждает первая позиция в порядке построчного обхода.
pub fn best_match(frame: &FramePyramid, template: &CompiledTemplate) -> Option<Correlation> {
    let full = &frame.levels[0];
    let base = &template.levels[0];
    let (max_x, max_y) = full.positions(base)?;

    if base.is_flat() {
        return Some(Correlation { score: 0.0, x: 0, y: 0 });
    }

    let top = template.levels.len().min(frame.levels.len()) - 1;
    let coarse = (top > 0)
        .then(|| {
            let (cx, cy) = frame.levels[top].positions(&template.levels[top])?;
            Some(frame.levels[top].candidates(&template.levels[top], cx, cy))
        })
        .flatten();
    let Some(mut candidates) = coarse else {
        return full.scan(base, 0..=max_x, 0..=max_y);
    };

    for level in (0..top).rev() {
        let image = &frame.levels[level];
        let tpl = &template.levels[level];
        let Some((lx, ly)) = image.positions(tpl) else {
            return full.scan(base, 0..=max_x, 0..=max_y);
        };
        candidates = candidates
            .iter()
            .filter_map(|c| {
                let cx = (c.x as usize * 2).min(lx);
                let cy = (c.y as usize * 2).min(ly);
                image.scan(
                    tpl,
                    cx.saturating_sub(REFINE_RADIUS)..=(cx + REFINE_RADIUS).min(lx),
                    cy.saturating_sub(REFINE_RADIUS)..=(cy + REFINE_RADIUS).min(ly),
                )
            })
            .collect();
    }

    candidates
        .into_iter()
        .reduce(|best, c| if c.beats(&best) { c } else { best })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::matcher::tests::noise;
    use image::Rgb;

    fn search(frame: &RgbImage, template: &RgbImage) -> Option<Correlation> {
        let compiled = CompiledTemplate::new(template);
        best_match(&FramePyramid::new(frame, compiled.depth()), &compiled)
    }

    /// Плавная «экранная» картинка: градиенты и прямоугольники
    fn screen_like(width: u32, height: u32) -> RgbImage {
        RgbImage::from_fn(width, height, |x, y| {
            let panel = (x / 97 + y / 61) % 3;
            let base = [(x % 256) as u8, (y % 256) as u8, (40 + panel * 60) as u8];
            if (x + 3 * y) % 173 < 9 {
                Rgb([250, 250, 250])
            } else {
                Rgb(base)
            }
        })
    }

    #[test]
    fn test_exact_patch_scores_one_at_its_location() {
        let frame = noise(64, 48, 7);
        let patch = image::imageops::crop_imm(&frame, 23, 11, 16, 12).to_image();

        let found = search(&frame, &patch).unwrap();
        assert_eq!((found.x, found.y), (23, 11));
        assert!((found.score - 1.0).abs() < 1e-4, "score = {}", found.score);
    }

    #[test]
    fn test_score_is_invariant_to_brightness_shift() {
        let frame = noise(40, 40, 3);
        let patch = image::imageops::crop_imm(&frame, 5, 9, 12, 12).to_image();
        let brighter = RgbImage::from_fn(12, 12, |x, y| {
            let p = patch.get_pixel(x, y);
            Rgb(p.0.map(|v| (v / 2) + 60))
        });

        let found = search(&frame, &brighter).unwrap();
        assert_eq!((found.x, found.y), (5, 9));
        assert!(found.score > 0.95);
    }

    #[test]
    fn test_template_larger_than_frame() {
        let frame = noise(10, 10, 1);
        let template = noise(12, 4, 2);
        assert!(search(&frame, &template).is_none());
    }

    #[test]
    fn test_flat_template_or_window_scores_zero() {
        let frame = RgbImage::from_pixel(20, 20, Rgb([90, 90, 90]));
        let flat = RgbImage::from_pixel(8, 8, Rgb([200, 10, 10]));
        assert!(CompiledTemplate::new(&flat).is_flat());

        let found = search(&frame, &flat).unwrap();
        assert_eq!(found.score, 0.0);
        assert_eq!((found.x, found.y), (0, 0));

        let textured = noise(8, 8, 11);
        let found = search(&frame, &textured).unwrap();
        assert_eq!(found.score, 0.0);
    }

    #[test]
    fn test_colour_distinguishes_identical_shapes() {
        // Одинаковые стрелки: красная слева, синяя справа
        let arrow = |x: u32, y: u32| y >= x.abs_diff(5) && y < 9;
        let mut frame = RgbImage::from_pixel(40, 12, Rgb([128, 128, 128]));
        for y in 0..10 {
            for x in 0..11 {
                if arrow(x, y) {
                    frame.put_pixel(2 + x, 1 + y, Rgb([250, 128, 128]));
                    frame.put_pixel(25 + x, 1 + y, Rgb([128, 128, 250]));
                }
            }
        }
        let red_template = image::imageops::crop_imm(&frame, 2, 1, 11, 10).to_image();

        let found = search(&frame, &red_template).unwrap();
        assert_eq!((found.x, found.y), (2, 1));
        assert!(found.score > 0.99);
    }

    #[test]
    fn test_pyramid_depth_follows_template_size() {
        assert_eq!(CompiledTemplate::new(&noise(16, 12, 1)).depth(), 1);
        assert_eq!(CompiledTemplate::new(&noise(24, 24, 1)).depth(), 2);
        assert_eq!(CompiledTemplate::new(&noise(64, 48, 1)).depth(), 3);
        assert_eq!(CompiledTemplate::new(&noise(1000, 1000, 1)).depth(), MAX_PYRAMID_LEVELS + 1);

        // Шахматка 1px усредняется в серый и дальше не уменьшается
        let checker = RgbImage::from_fn(64, 64, |x, y| {
            if (x + y) % 2 == 0 {
                Rgb([0, 0, 0])
            } else {
                Rgb([200, 200, 200])
            }
        });
        assert_eq!(CompiledTemplate::new(&checker).depth(), 1);

        let pyramid = FramePyramid::new(&noise(100, 60, 2), 3);
        let sizes: Vec<(usize, usize)> = pyramid.levels.iter().map(|l| (l.width, l.height)).collect();
        assert_eq!(sizes, vec![(100, 60), (50, 30), (25, 15)]);
    }

    #[test]
    fn test_coarse_to_fine_finds_unaligned_patch() {
        let frame = noise(400, 300, 21);
        // Смещение не кратно 4: грубый уровень видит шаблон со сдвигом фазы
        let patch = image::imageops::crop_imm(&frame, 123, 77, 64, 48).to_image();
        assert_eq!(CompiledTemplate::new(&patch).depth(), 3);

        let found = search(&frame, &patch).unwrap();
        assert_eq!((found.x, found.y), (123, 77));
        assert!((found.score - 1.0).abs() < 1e-4, "score = {}", found.score);
    }

    #[test]
    fn test_coarse_to_fine_agrees_with_full_scan_on_screen_content() {
        let frame = screen_like(480, 270);
        let template = image::imageops::crop_imm(&frame, 201, 133, 56, 40).to_image();
        let compiled = CompiledTemplate::new(&template);
        assert!(compiled.depth() > 1);

        let pyramid = FramePyramid::new(&frame, compiled.depth());
        let fast = best_match(&pyramid, &compiled).unwrap();
        let base = &compiled.levels[0];
        let (max_x, max_y) = pyramid.levels[0].positions(base).unwrap();
        let full = pyramid.levels[0].scan(base, 0..=max_x, 0..=max_y).unwrap();

        assert!((fast.score - full.score).abs() < 1e-9);
        assert!(fast.score > 0.999);
    }

    #[test]
    fn test_candidates_are_spread_and_ranked() {
        let frame = noise(80, 60, 5);
        let template = image::imageops::crop_imm(&frame, 30, 20, 16, 16).to_image();
        let image = SearchImage::new(&frame);
        let prepared = PreparedTemplate::new(&template);
        let (max_x, max_y) = image.positions(&prepared).unwrap();

        let picked = image.candidates(&prepared, max_x, max_y);
        assert_eq!(picked.len(), CANDIDATES);
        assert_eq!((picked[0].x, picked[0].y), (30, 20));
        assert!(picked.windows(2).all(|w| w[0].score >= w[1].score));
        for (i, a) in picked.iter().enumerate() {
            for b in &picked[i + 1..] {
                let far = a.x.abs_diff(b.x) as usize > REFINE_RADIUS || a.y.abs_diff(b.y) as usize > REFINE_RADIUS;
                assert!(far);
            }
        }
    }
}
