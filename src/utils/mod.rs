pub mod export;
pub mod summary;

use burn::prelude::*;
use image::{Rgb, RgbImage, imageops::FilterType};
use imageproc::{
    drawing::{draw_filled_rect_mut, draw_line_segment_mut},
    rect::Rect,
};

use crate::error::{Error, Result};
use crate::model::constants::{CELL_SCALE, INPUT_CHANNELS, PALETTE};
use crate::model::data::RoomChannels;

/// Flattened `[c, h, w]` values of the first sample of a batch.
pub fn first_sample<B: Backend>(batch: &Tensor<B, 4>) -> Result<(Vec<f32>, [usize; 3])> {
    let [_, c, h, w] = batch.dims();
    let data = batch
        .clone()
        .slice([0..1, 0..c, 0..h, 0..w])
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| Error::Data(format!("{e:?}")))?;
    Ok((data, [c, h, w]))
}

/// Color layout in `[-1, 1]`, channel-major, back to an RGB image scaled up
/// by [`CELL_SCALE`].
pub fn layout_to_image(data: &[f32], height: usize, width: usize) -> Option<RgbImage> {
    let plane = height * width;
    if data.len() != INPUT_CHANNELS * plane {
        return None;
    }

    let image = RgbImage::from_fn(width as u32, height as u32, |x, y| {
        let i = y as usize * width + x as usize;
        // Reversing the normalization: (val + 1.0) * 127.5
        let channel = |c: usize| ((data[c * plane + i] + 1.0) * 127.5).clamp(0.0, 255.0) as u8;
        Rgb([channel(0), channel(1), channel(2)])
    });

    Some(image::imageops::resize(
        &image,
        width as u32 * CELL_SCALE,
        height as u32 * CELL_SCALE,
        FilterType::Nearest,
    ))
}

/// Room grid to an image: each cell takes the color of its most likely
/// category, and occupied cells get a tick pointing along their rotation.
pub fn room_to_image(
    data: &[f32],
    channels: RoomChannels,
    height: usize,
    width: usize,
) -> Option<RgbImage> {
    let plane = height * width;
    if data.len() != channels.total() * plane {
        return None;
    }

    let scale = CELL_SCALE as f32;
    let mut image = RgbImage::new(width as u32 * CELL_SCALE, height as u32 * CELL_SCALE);
    for y in 0..height {
        for x in 0..width {
            let i = y * width + x;
            let category = (0..channels.categories)
                .max_by(|&a, &b| data[a * plane + i].total_cmp(&data[b * plane + i]))
                .unwrap_or(0);
            let cell = Rect::at(x as i32 * CELL_SCALE as i32, y as i32 * CELL_SCALE as i32)
                .of_size(CELL_SCALE, CELL_SCALE);
            draw_filled_rect_mut(&mut image, cell, Rgb(PALETTE[category % PALETTE.len()]));

            if category != 0 && channels.rotations >= 2 {
                let cos = data[channels.categories * plane + i];
                let sin = data[(channels.categories + 1) * plane + i];
                let center = ((x as f32 + 0.5) * scale, (y as f32 + 0.5) * scale);
                let tip = (
                    center.0 + cos * scale * 0.5,
                    center.1 - sin * scale * 0.5,
                );
                draw_line_segment_mut(&mut image, center, tip, Rgb([0, 0, 0]));
            }
        }
    }
    Some(image)
}
