use image::{GrayImage, Luma, Rgba, RgbaImage};

pub fn clamp_i32(value: i32, min_value: i32, max_value: i32) -> i32 {
    value.max(min_value).min(max_value)
}

pub fn blend_pixel(dst: Rgba<u8>, src: Rgba<u8>) -> Rgba<u8> {
    let a = f64::from(src[3]) / 255.0;
    if a <= 0.0 {
        return dst;
    }
    let inv = 1.0 - a;
    let channel = |d: u8, s: u8| {
        (f64::from(d) * inv + f64::from(s) * a)
            .round()
            .clamp(0.0, 255.0) as u8
    };
    let out_a = (f64::from(dst[3]) * inv + f64::from(src[3]))
        .round()
        .clamp(0.0, 255.0) as u8;
    if dst[3] == 0 {
        return Rgba([src[0], src[1], src[2], out_a]);
    }
    Rgba([
        channel(dst[0], src[0]),
        channel(dst[1], src[1]),
        channel(dst[2], src[2]),
        out_a,
    ])
}

/// Blends `color` scaled by an 8-bit coverage value.
pub fn blend_coverage(img: &mut RgbaImage, x: i32, y: i32, color: Rgba<u8>, coverage: u8) {
    if coverage == 0 || x < 0 || y < 0 || x >= img.width() as i32 || y >= img.height() as i32 {
        return;
    }
    let alpha = (u16::from(color[3]) * u16::from(coverage) / 255) as u8;
    let dst = *img.get_pixel(x as u32, y as u32);
    img.put_pixel(
        x as u32,
        y as u32,
        blend_pixel(dst, Rgba([color[0], color[1], color[2], alpha])),
    );
}

pub fn draw_disc(img: &mut RgbaImage, cx: f64, cy: f64, radius: f64, color: Rgba<u8>) {
    if img.width() == 0 || img.height() == 0 {
        return;
    }
    if radius <= 0.1 {
        let x = cx.round() as i32;
        let y = cy.round() as i32;
        if x >= 0 && y >= 0 && x < img.width() as i32 && y < img.height() as i32 {
            let dst = *img.get_pixel(x as u32, y as u32);
            img.put_pixel(x as u32, y as u32, blend_pixel(dst, color));
        }
        return;
    }
    let min_x = clamp_i32((cx - radius).floor() as i32, 0, img.width() as i32 - 1);
    let max_x = clamp_i32((cx + radius).ceil() as i32, 0, img.width() as i32 - 1);
    let min_y = clamp_i32((cy - radius).floor() as i32, 0, img.height() as i32 - 1);
    let max_y = clamp_i32((cy + radius).ceil() as i32, 0, img.height() as i32 - 1);
    let r2 = radius * radius;
    for y in min_y..=max_y {
        for x in min_x..=max_x {
            let dx = f64::from(x) - cx;
            let dy = f64::from(y) - cy;
            if dx * dx + dy * dy <= r2 {
                let dst = *img.get_pixel(x as u32, y as u32);
                img.put_pixel(x as u32, y as u32, blend_pixel(dst, color));
            }
        }
    }
}

/// Darkens a grayscale canvas inside a disc, keeping the darker value per pixel.
pub fn stamp_disc_luma(img: &mut GrayImage, cx: i32, cy: i32, radius: i32, value: u8) {
    let (w, h) = (i64::from(img.width()), i64::from(img.height()));
    let (cx, cy, radius) = (i64::from(cx), i64::from(cy), i64::from(radius.max(0)));
    if w == 0 || h == 0 || cx + radius < 0 || cy + radius < 0 || cx - radius >= w || cy - radius >= h {
        return;
    }
    let r2 = radius * radius;
    for y in (cy - radius).max(0)..=(cy + radius).min(h - 1) {
        let dy = y - cy;
        for x in (cx - radius).max(0)..=(cx + radius).min(w - 1) {
            let dx = x - cx;
            if (dx * dx).saturating_add(dy * dy) <= r2 {
                let px = img.get_pixel_mut(x as u32, y as u32);
                if px[0] > value {
                    *px = Luma([value]);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opaque_source_replaces_destination() {
        let out = blend_pixel(Rgba([255, 255, 255, 255]), Rgba([10, 20, 30, 255]));
        assert_eq!(out, Rgba([10, 20, 30, 255]));
    }

    #[test]
    fn blending_onto_transparent_keeps_source_color() {
        let out = blend_pixel(Rgba([0, 0, 0, 0]), Rgba([200, 100, 50, 128]));
        assert_eq!(&out.0[..3], &[200, 100, 50]);
        assert_eq!(out[3], 128);
    }

    #[test]
    fn luma_disc_stays_inside_canvas() {
        let mut img = GrayImage::from_pixel(10, 10, Luma([255]));
        stamp_disc_luma(&mut img, 0, 0, 3, 0);
        assert_eq!(img.get_pixel(0, 0)[0], 0);
        assert_eq!(img.get_pixel(3, 0)[0], 0);
        assert_eq!(img.get_pixel(3, 3)[0], 255);
    }

    #[test]
    fn huge_luma_disc_covers_canvas_without_overflow() {
        let mut img = GrayImage::from_pixel(6, 4, Luma([255]));
        stamp_disc_luma(&mut img, 2, 2, i32::MAX, 0);
        assert!(img.pixels().all(|p| p[0] == 0));

        let mut far = GrayImage::from_pixel(6, 4, Luma([255]));
        stamp_disc_luma(&mut far, i32::MIN, i32::MIN, 5, 0);
        assert!(far.pixels().all(|p| p[0] == 255));
    }
}
