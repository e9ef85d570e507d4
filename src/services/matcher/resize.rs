use image::imageops::{self, FilterType};
use image::RgbImage;

/// Верхняя граница стороны шаблона после масштабирования (больше любого монитора)
pub const MAX_TEMPLATE_SIDE: u32 = 16_384;

/// Размер шаблона после масштабирования: `round(w·s) × round(h·s)`.
/// `None`, если хотя бы одна сторона превышает `MAX_TEMPLATE_SIDE`.
pub fn scaled_size(original: (u32, u32), scale: f64) -> Option<(u32, u32)> {
    let side = |len: u32| {
        let v = (f64::from(len) * scale).round().max(0.0);
        (v <= f64::from(MAX_TEMPLATE_SIDE)).then_some(v as u32)
    };
    Some((side(original.0)?, side(original.1)?))
}

/// Масштабировать шаблон: усреднение по площади при уменьшении,
/// кубическая интерполяция (Catmull-Rom) при увеличении.
pub fn resize_for_scale(src: &RgbImage, width: u32, height: u32, scale: f64) -> RgbImage {
    if src.dimensions() == (width, height) {
        return src.clone();
    }
    if scale < 1.0 {
        area_resize(src, width, height)
    } else {
        imageops::resize(src, width, height, FilterType::CatmullRom)
    }
}

/// Веса покрытия: для каждого выходного пикселя список (индекс источника, доля)
fn area_weights(src_len: u32, dst_len: u32) -> Vec<Vec<(usize, f32)>> {
    let ratio = f64::from(src_len) / f64::from(dst_len);
    (0..dst_len)
        .map(|i| {
            let start = f64::from(i) * ratio;
            let end = (f64::from(i + 1) * ratio).min(f64::from(src_len));
            let mut taps = Vec::with_capacity(ratio.ceil() as usize + 1);
            let mut j = start.floor() as usize;
            while (j as f64) < end && j < src_len as usize {
                let overlap = end.min(j as f64 + 1.0) - start.max(j as f64);
                if overlap > 1e-9 {
                    taps.push((j, overlap as f32));
                }
                j += 1;
            }
            let total: f32 = taps.iter().map(|(_, w)| w).sum();
            for tap in &mut taps {
                tap.1 /= total;
            }
            taps
        })
        .collect()
}

/// Точное усреднение по площади (аналог INTER_AREA), раздельно по осям
pub fn area_resize(src: &RgbImage, width: u32, height: u32) -> RgbImage {
    let (src_w, src_h) = src.dimensions();
    if width == 0 || height == 0 || src_w == 0 || src_h == 0 {
        return RgbImage::new(width, height);
    }

    let x_taps = area_weights(src_w, width);
    let y_taps = area_weights(src_h, height);
    let raw = src.as_raw();
    let dst_w = width as usize;

    // Горизонтальный проход: src_h строк × width столбцов
    let mut horizontal = vec![0f32; src_h as usize * dst_w * 3];
    for y in 0..src_h as usize {
        let src_row = &raw[y * src_w as usize * 3..(y + 1) * src_w as usize * 3];
        let dst_row = &mut horizontal[y * dst_w * 3..(y + 1) * dst_w * 3];
        for (x, taps) in x_taps.iter().enumerate() {
            for &(j, weight) in taps {
                for c in 0..3 {
                    dst_row[x * 3 + c] += weight * f32::from(src_row[j * 3 + c]);
                }
            }
        }
    }

    RgbImage::from_fn(width, height, |x, y| {
        let mut acc = [0f32; 3];
        for &(j, weight) in &y_taps[y as usize] {
            let base = (j * dst_w + x as usize) * 3;
            for c in 0..3 {
                acc[c] += weight * horizontal[base + c];
            }
        }
        image::Rgb(acc.map(|v| v.round().clamp(0.0, 255.0) as u8))
    })
}

/// Уменьшить вдвое усреднением блоков 2×2; нечётные край и низ отбрасываются
pub fn halve(src: &RgbImage) -> RgbImage {
    let (w, h) = (src.width() / 2, src.height() / 2);
    RgbImage::from_fn(w, h, |x, y| {
        let (sx, sy) = (x * 2, y * 2);
        let block = [
            src.get_pixel(sx, sy),
            src.get_pixel(sx + 1, sy),
            src.get_pixel(sx, sy + 1),
            src.get_pixel(sx + 1, sy + 1),
        ];
        image::Rgb(std::array::from_fn(|c| {
            let sum: u16 = block.iter().map(|p| u16::from(p[c])).sum();
            ((sum + 2) / 4) as u8
        }))
    })
}
