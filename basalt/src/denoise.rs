use crate::error::DenoiseError;
use crate::maths::*;
use log::info;
use rayon::prelude::*;

/// Planar-interleaved RGB float image handed to a denoiser.
#[derive(Debug, Clone, PartialEq)]
pub struct DenoiseImage {
    pub size: UVec2,
    pub hdr: bool,
    pub rgb: Vec<f32>,
}

impl DenoiseImage {
    pub fn new(size: UVec2, hdr: bool, rgb: Vec<f32>) -> Self {
        assert_eq!(rgb.len(), 3 * (size.x as usize) * (size.y as usize));
        Self { size, hdr, rgb }
    }

    pub fn texel(&self, x: u32, y: u32) -> [f32; 3] {
        let i = 3 * (y * self.size.x + x) as usize;
        [self.rgb[i], self.rgb[i + 1], self.rgb[i + 2]]
    }
}

pub fn rgb_from_rgba(rgba: &[f32], size: UVec2) -> Vec<f32> {
    let texel_count = (size.x as usize) * (size.y as usize);
    assert_eq!(rgba.len(), 4 * texel_count);
    let mut rgb = Vec::with_capacity(3 * texel_count);
    for texel in rgba.chunks_exact(4) {
        rgb.extend_from_slice(&texel[..3]);
    }
    rgb
}

pub fn rgba_from_rgb(rgb: &[f32], size: UVec2) -> Vec<f32> {
    let texel_count = (size.x as usize) * (size.y as usize);
    assert_eq!(rgb.len(), 3 * texel_count);
    let mut rgba = Vec::with_capacity(4 * texel_count);
    for texel in rgb.chunks_exact(3) {
        rgba.extend_from_slice(texel);
        rgba.push(1.0);
    }
    rgba
}

/// Removes noise from a float image of a fixed size.
pub trait Denoiser {
    fn size(&self) -> UVec2;
    fn denoise(&mut self, image: &DenoiseImage) -> Result<DenoiseImage, DenoiseError>;
}

/// Builds a denoiser for an image size.
pub type DenoiserFactory = Box<dyn FnMut(UVec2) -> Result<Box<dyn Denoiser>, DenoiseError>>;

/// Converts between the lightmap's RGBA texels and the denoiser's RGB, keeping one filter
/// alive until the image size changes.
pub struct DenoiserAdapter {
    factory: DenoiserFactory,
    filter: Option<Box<dyn Denoiser>>,
}

impl DenoiserAdapter {
    pub fn new(factory: DenoiserFactory) -> Self {
        Self { factory, filter: None }
    }

    pub fn with_median() -> Self {
        Self::new(Box::new(|size: UVec2| -> Result<Box<dyn Denoiser>, DenoiseError> {
            Ok(Box::new(MedianDenoiser::new(size)))
        }))
    }

    /// Returns denoised RGBA texels with alpha set to one.
    pub fn denoise_rgba(&mut self, rgba: &[f32], size: UVec2) -> Result<Vec<f32>, DenoiseError> {
        let filter = match &mut self.filter {
            Some(filter) if filter.size() == size => filter,
            slot => {
                info!("creating denoise filter for {}x{}", size.x, size.y);
                slot.insert((self.factory)(size)?)
            }
        };
        let input = DenoiseImage::new(size, true, rgb_from_rgba(rgba, size));
        let output = filter.denoise(&input)?;
        if output.size != size {
            return Err(DenoiseError::Filter {
                width: size.x,
                height: size.y,
                reason: format!("output size {}x{} does not match input", output.size.x, output.size.y),
            });
        }
        Ok(rgba_from_rgb(&output.rgb, size))
    }
}

/// 3x3 per-channel median filter.
pub struct MedianDenoiser {
    size: UVec2,
}

impl MedianDenoiser {
    pub const RADIUS: i32 = 1;

    pub fn new(size: UVec2) -> Self {
        Self { size }
    }
}

impl Denoiser for MedianDenoiser {
    fn size(&self) -> UVec2 {
        self.size
    }

    fn denoise(&mut self, image: &DenoiseImage) -> Result<DenoiseImage, DenoiseError> {
        if image.size != self.size {
            return Err(DenoiseError::Filter {
                width: image.size.x,
                height: image.size.y,
                reason: format!("filter was created for {}x{}", self.size.x, self.size.y),
            });
        }
        let width = self.size.x as i32;
        let height = self.size.y as i32;
        let mut rgb = vec![0.0f32; image.rgb.len()];
        rgb.par_chunks_mut(3 * width as usize)
            .enumerate()
            .for_each(|(y, row)| {
                let y = y as i32;
                let mut window = Vec::with_capacity(9);
                for x in 0..width {
                    for c in 0..3 {
                        window.clear();
                        for dy in -Self::RADIUS..=Self::RADIUS {
                            for dx in -Self::RADIUS..=Self::RADIUS {
                                let sx = (x + dx).clamp(0, width - 1) as u32;
                                let sy = (y + dy).clamp(0, height - 1) as u32;
                                window.push(image.texel(sx, sy)[c]);
                            }
                        }
                        window.sort_by(|a, b| a.total_cmp(b));
                        row[(3 * x + c as i32) as usize] = window[window.len() / 2];
                    }
                }
            });
        Ok(DenoiseImage::new(self.size, image.hdr, rgb))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    #[test]
    fn channel_conversion_sets_alpha() {
        let size = UVec2::new(2, 1);
        let rgba = [1.0, 2.0, 3.0, 0.25, 4.0, 5.0, 6.0, 0.5];
        let rgb = rgb_from_rgba(&rgba, size);
        assert_eq!(rgb, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        assert_eq!(rgba_from_rgb(&rgb, size), vec![1.0, 2.0, 3.0, 1.0, 4.0, 5.0, 6.0, 1.0]);
    }

    #[test]
    #[should_panic]
    fn channel_mismatch_panics() {
        rgb_from_rgba(&[0.0; 12], UVec2::new(2, 2));
    }

    #[test]
    fn median_removes_fireflies() {
        let size = UVec2::new(5, 4);
        let mut rgb = vec![0.5; 3 * 20];
        let firefly = 3 * (2 * 5 + 2);
        rgb[firefly..firefly + 3].copy_from_slice(&[100.0, 50.0, 25.0]);
        let image = DenoiseImage::new(size, true, rgb);
        let output = MedianDenoiser::new(size).denoise(&image).unwrap();
        assert!(output.rgb.iter().all(|&c| c == 0.5));
        assert!(output.hdr);
    }

    #[test]
    fn filter_is_recreated_on_resize() {
        let created = Arc::new(AtomicUsize::new(0));
        let counter = created.clone();
        let mut adapter = DenoiserAdapter::new(Box::new(move |size: UVec2| -> Result<Box<dyn Denoiser>, DenoiseError> {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(MedianDenoiser::new(size)))
        }));
        let small = UVec2::new(2, 2);
        let large = UVec2::new(4, 2);
        adapter.denoise_rgba(&[0.0; 16], small).unwrap();
        adapter.denoise_rgba(&[0.0; 16], small).unwrap();
        assert_eq!(created.load(Ordering::SeqCst), 1);
        let out = adapter.denoise_rgba(&[0.0; 32], large).unwrap();
        assert_eq!(created.load(Ordering::SeqCst), 2);
        assert!(out.chunks(4).all(|t| t[3] == 1.0));
    }

    #[test]
    fn factory_errors_propagate() {
        let mut adapter = DenoiserAdapter::new(Box::new(|size: UVec2| -> Result<Box<dyn Denoiser>, DenoiseError> {
            Err(DenoiseError::Filter {
                width: size.x,
                height: size.y,
                reason: "device lost".into(),
            })
        }));
        assert!(matches!(
            adapter.denoise_rgba(&[0.0; 4], UVec2::new(1, 1)),
            Err(DenoiseError::Filter { width: 1, height: 1, .. })
        ));
    }
}
