//! Caption overlay for generated images.
//!
//! Draws a darkened band along the bottom edge and renders the terse prompt
//! into it with a built-in 5x7 pixel font, so annotation needs no font
//! files and stays byte-deterministic.

use anyhow::Context;
use image::RgbaImage;
use std::io::Cursor;

const GLYPH_W: u32 = 5;
const GLYPH_H: u32 = 7;
const SCALE: u32 = 2;
const PAD: u32 = 8;

/// Overlay `caption` onto PNG `bytes`, returning the annotated PNG.
///
/// An empty input is a credential-less placeholder and passes through
/// unchanged; real bytes that fail to decode are an error.
pub fn annotate(bytes: &[u8], caption: &str) -> anyhow::Result<Vec<u8>> {
    if bytes.is_empty() {
        return Ok(Vec::new());
    }
    let mut img = image::load_from_memory(bytes)
        .context("Failed to decode generated image")?
        .to_rgba8();
    let (width, height) = img.dimensions();
    let band_height = (GLYPH_H * SCALE + PAD * 2).min(height);

    darken_band(&mut img, band_height);
    draw_caption(&mut img, caption, band_height);

    let mut out = Vec::new();
    image::DynamicImage::ImageRgba8(img)
        .write_to(&mut Cursor::new(&mut out), image::ImageFormat::Png)
        .context("Failed to encode annotated image")?;
    tracing::debug!(width, height, caption, "annotated image");
    Ok(out)
}

fn darken_band(img: &mut RgbaImage, band_height: u32) {
    let (width, height) = img.dimensions();
    for y in height - band_height..height {
        for x in 0..width {
            let px = img.get_pixel_mut(x, y);
            for channel in &mut px.0[..3] {
                *channel = (*channel as u16 * 35 / 100) as u8;
            }
        }
    }
}

fn draw_caption(img: &mut RgbaImage, caption: &str, band_height: u32) {
    let (width, height) = img.dimensions();
    let top = height - band_height + PAD.min(band_height);
    let advance = (GLYPH_W + 1) * SCALE;
    let mut x = PAD;
    for c in caption.to_ascii_uppercase().chars() {
        if x + GLYPH_W * SCALE + PAD > width {
            break;
        }
        if let Some(rows) = glyph(c) {
            for (dy, row) in rows.iter().enumerate() {
                for dx in 0..GLYPH_W {
                    // Bit 4 is the leftmost column.
                    if row >> (GLYPH_W - 1 - dx) & 1 == 1 {
                        fill_cell(img, x + dx * SCALE, top + dy as u32 * SCALE);
                    }
                }
            }
        }
        x += advance;
    }
}

fn fill_cell(img: &mut RgbaImage, x: u32, y: u32) {
    let (width, height) = img.dimensions();
    for dy in 0..SCALE {
        for dx in 0..SCALE {
            let (px, py) = (x + dx, y + dy);
            if px < width && py < height {
                img.put_pixel(px, py, image::Rgba([235, 235, 225, 255]));
            }
        }
    }
}

/// 5x7 glyph as seven 5-bit row masks. Unknown characters render as blanks.
fn glyph(c: char) -> Option<[u8; 7]> {
    let rows = match c {
        'A' => [0x0E, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
        'B' => [0x1E, 0x11, 0x11, 0x1E, 0x11, 0x11, 0x1E],
        'C' => [0x0E, 0x11, 0x10, 0x10, 0x10, 0x11, 0x0E],
        'D' => [0x1E, 0x11, 0x11, 0x11, 0x11, 0x11, 0x1E],
        'E' => [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x1F],
        'F' => [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x10],
        'G' => [0x0E, 0x11, 0x10, 0x17, 0x11, 0x11, 0x0F],
        'H' => [0x11, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
        'I' => [0x0E, 0x04, 0x04, 0x04, 0x04, 0x04, 0x0E],
        'J' => [0x07, 0x02, 0x02, 0x02, 0x02, 0x12, 0x0C],
        'K' => [0x11, 0x12, 0x14, 0x18, 0x14, 0x12, 0x11],
        'L' => [0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x1F],
        'M' => [0x11, 0x1B, 0x15, 0x15, 0x11, 0x11, 0x11],
        'N' => [0x11, 0x11, 0x19, 0x15, 0x13, 0x11, 0x11],
        'O' => [0x0E, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
        'P' => [0x1E, 0x11, 0x11, 0x1E, 0x10, 0x10, 0x10],
        'Q' => [0x0E, 0x11, 0x11, 0x11, 0x15, 0x12, 0x0D],
        'R' => [0x1E, 0x11, 0x11, 0x1E, 0x14, 0x12, 0x11],
        'S' => [0x0F, 0x10, 0x10, 0x0E, 0x01, 0x01, 0x1E],
        'T' => [0x1F, 0x04, 0x04, 0x04, 0x04, 0x04, 0x04],
        'U' => [0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
        'V' => [0x11, 0x11, 0x11, 0x11, 0x11, 0x0A, 0x04],
        'W' => [0x11, 0x11, 0x11, 0x15, 0x15, 0x15, 0x0A],
        'X' => [0x11, 0x11, 0x0A, 0x04, 0x0A, 0x11, 0x11],
        'Y' => [0x11, 0x11, 0x0A, 0x04, 0x04, 0x04, 0x04],
        'Z' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x10, 0x1F],
        '0' => [0x0E, 0x11, 0x13, 0x15, 0x19, 0x11, 0x0E],
        '1' => [0x04, 0x0C, 0x04, 0x04, 0x04, 0x04, 0x0E],
        '2' => [0x0E, 0x11, 0x01, 0x02, 0x04, 0x08, 0x1F],
        '3' => [0x1F, 0x02, 0x04, 0x02, 0x01, 0x11, 0x0E],
        '4' => [0x02, 0x06, 0x0A, 0x12, 0x1F, 0x02, 0x02],
        '5' => [0x1F, 0x10, 0x1E, 0x01, 0x01, 0x11, 0x0E],
        '6' => [0x06, 0x08, 0x10, 0x1E, 0x11, 0x11, 0x0E],
        '7' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x08, 0x08],
        '8' => [0x0E, 0x11, 0x11, 0x0E, 0x11, 0x11, 0x0E],
        '9' => [0x0E, 0x11, 0x11, 0x0F, 0x01, 0x02, 0x0C],
        '-' => [0x00, 0x00, 0x00, 0x1F, 0x00, 0x00, 0x00],
        '.' => [0x00, 0x00, 0x00, 0x00, 0x00, 0x0C, 0x0C],
        _ => return None,
    };
    Some(rows)
}
