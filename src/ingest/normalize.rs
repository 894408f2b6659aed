use anyhow::{anyhow, Result};

/// Pixel layouts delivered by capture drivers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PixelFormat {
    Rgb24,
    /// Packed 4:2:2, Y0 U Y1 V.
    Yuyv,
    /// Planar Y followed by interleaved UV at quarter resolution.
    Nv12,
}

/// Convert a driver buffer into packed RGB8.
pub fn normalize_to_rgb(
    pixels: &[u8],
    width: u32,
    height: u32,
    format: PixelFormat,
) -> Result<Vec<u8>> {
    let w = width as usize;
    let h = height as usize;
    let area = w
        .checked_mul(h)
        .ok_or_else(|| anyhow!("frame dimensions {}x{} overflow", width, height))?;
    match format {
        PixelFormat::Rgb24 => {
            let expected = area * 3;
            if pixels.len() < expected {
                return Err(anyhow!(
                    "RGB frame length mismatch: expected {}, got {}",
                    expected,
                    pixels.len()
                ));
            }
            // Some drivers pad the mapped buffer; keep exactly one frame.
            Ok(pixels[..expected].to_vec())
        }
        PixelFormat::Yuyv => yuyv_to_rgb(pixels, w, h, area),
        PixelFormat::Nv12 => nv12_to_rgb(pixels, w, h, area),
    }
}

fn yuyv_to_rgb(pixels: &[u8], w: usize, h: usize, area: usize) -> Result<Vec<u8>> {
    if w % 2 != 0 {
        return Err(anyhow!("YUYV frames need an even width, got {}", w));
    }
    let expected = area * 2;
    if pixels.len() < expected {
        return Err(anyhow!(
            "YUYV frame length mismatch: expected {}, got {}",
            expected,
            pixels.len()
        ));
    }

    let mut rgb = Vec::with_capacity(area * 3);
    for chunk in pixels[..expected].chunks_exact(4) {
        let (y0, u, y1, v) = (chunk[0], chunk[1], chunk[2], chunk[3]);
        rgb.extend_from_slice(&yuv_to_rgb(y0, u, v));
        rgb.extend_from_slice(&yuv_to_rgb(y1, u, v));
    }
    debug_assert_eq!(rgb.len(), w * h * 3);
    Ok(rgb)
}

fn nv12_to_rgb(pixels: &[u8], w: usize, h: usize, y_plane: usize) -> Result<Vec<u8>> {
    let expected = y_plane + y_plane / 2;
    if pixels.len() < expected {
        return Err(anyhow!(
            "NV12 frame length mismatch: expected {}, got {}",
            expected,
            pixels.len()
        ));
    }

    let mut rgb = vec![0u8; y_plane * 3];
    for j in 0..h {
        for i in 0..w {
            let y = pixels[j * w + i];
            let uv_index = y_plane + (j / 2) * w + (i / 2) * 2;
            let offset = (j * w + i) * 3;
            rgb[offset..offset + 3]
                .copy_from_slice(&yuv_to_rgb(y, pixels[uv_index], pixels[uv_index + 1]));
        }
    }
    Ok(rgb)
}

fn yuv_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let y = y as f32;
    let u = u as f32 - 128.0;
    let v = v as f32 - 128.0;
    [
        clamp_to_u8(y + 1.402_f32 * v),
        clamp_to_u8(y - 0.344_136_f32 * u - 0.714_136_f32 * v),
        clamp_to_u8(y + 1.772_f32 * u),
    ]
}

fn clamp_to_u8(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}
