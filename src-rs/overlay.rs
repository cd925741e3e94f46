use crate::annotations::BoundingBox;
use anyhow::{Context, Result};
use image::{DynamicImage, Rgba, RgbaImage};
use std::path::{Path, PathBuf};

pub const OVERLAY_SUFFIX: &str = "_bbox";
const BOX_COLOR: Rgba<u8> = Rgba([255, 0, 0, 255]);
const BOX_THICKNESS: i64 = 2;

/// `shot.png` -> `shot_bbox.png`, next to the input.
pub fn overlay_path_for(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("screenshot");
    let ext = path.extension().and_then(|s| s.to_str()).unwrap_or("png");
    let parent = path.parent().unwrap_or_else(|| Path::new(""));
    parent.join(format!("{stem}{OVERLAY_SUFFIX}.{ext}"))
}

/// Draws `bbox` onto a copy of the image at `image_path` and returns the
/// path of the copy. The input file is not modified.
pub fn render_bounding_box(image_path: &Path, bbox: &BoundingBox) -> Result<PathBuf> {
    let source = image::open(image_path)
        .with_context(|| format!("failed to open screenshot: {}", image_path.display()))?;
    let keep_alpha = source.color().has_alpha();

    let mut rendered = source.to_rgba8();
    let (top_left, bottom_right) = bbox.pixel_corners();
    draw_box_outline(&mut rendered, top_left, bottom_right, BOX_COLOR, BOX_THICKNESS);

    let output = DynamicImage::ImageRgba8(rendered);
    let output = if keep_alpha {
        output
    } else {
        DynamicImage::ImageRgb8(output.to_rgb8())
    };

    let output_path = overlay_path_for(image_path);
    output
        .save(&output_path)
        .with_context(|| format!("failed to save overlay image: {}", output_path.display()))?;
    Ok(output_path)
}

/// Strokes the rectangle between two inclusive corners, growing inward by
/// `thickness` pixels. Anything outside the image is clipped.
fn draw_box_outline(
    img: &mut RgbaImage,
    (ax, ay): (i64, i64),
    (bx, by): (i64, i64),
    color: Rgba<u8>,
    thickness: i64,
) {
    let (img_w, img_h) = (i64::from(img.width()), i64::from(img.height()));
    if img_w == 0 || img_h == 0 {
        return;
    }
    let thickness = thickness.max(1);
    // Edges further out than the stroke never reach the image; pulling them
    // in keeps the arithmetic below in range for saturated corners.
    let clamp_x = |v: i64| v.clamp(-thickness, img_w - 1 + thickness);
    let clamp_y = |v: i64| v.clamp(-thickness, img_h - 1 + thickness);
    let (x0, x1) = (clamp_x(ax.min(bx)), clamp_x(ax.max(bx)));
    let (y0, y1) = (clamp_y(ay.min(by)), clamp_y(ay.max(by)));

    for t in 0..thickness {
        let (left, right) = (x0 + t, x1 - t);
        let (top, bottom) = (y0 + t, y1 - t);
        if left > right || top > bottom {
            break;
        }

        for x in left.max(0)..=right.min(img_w - 1) {
            put_clipped(img, x, top, color);
            put_clipped(img, x, bottom, color);
        }
        for y in top.max(0)..=bottom.min(img_h - 1) {
            put_clipped(img, left, y, color);
            put_clipped(img, right, y, color);
        }
    }
}

fn put_clipped(img: &mut RgbaImage, x: i64, y: i64, color: Rgba<u8>) {
    if x < 0 || y < 0 || x >= i64::from(img.width()) || y >= i64::from(img.height()) {
        return;
    }
    img.put_pixel(x as u32, y as u32, color);
}
