//! Image optimization backed by the content-addressed [`ImageCache`].

use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use image::codecs::gif::{GifDecoder, GifEncoder, Repeat};
use image::codecs::jpeg::JpegEncoder;
use image::{AnimationDecoder, ImageFormat};
use quick_xml::events::Event;
use quick_xml::{Reader, Writer};
use rayon::prelude::*;

use crate::config::{ImagesConfig, Layout};
use crate::image_cache::ImageCache;
use crate::sources;
use crate::tasks::PipelineError;

/// Glob of optimizable images, relative to the images directory.
pub const IMAGE_PATTERN: &str = "**/*.{png,jpg,jpeg,gif,svg}";

/// Supported image kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    Png,
    Jpeg,
    Gif,
    Svg,
}

impl ImageKind {
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "png" => Some(Self::Png),
            "jpg" | "jpeg" => Some(Self::Jpeg),
            "gif" => Some(Self::Gif),
            "svg" => Some(Self::Svg),
            _ => None,
        }
    }
}

/// Outcome of one run of the image task.
#[derive(Debug, Default)]
pub struct ImageReport {
    pub written: Vec<PathBuf>,
    pub cache_hits: usize,
    pub cache_misses: usize,
}

/// Format-specific optimizers with fixed settings.
#[derive(Debug, Clone)]
pub struct ImageOptimizer {
    png_level: u8,
    jpeg_quality: u8,
}

impl ImageOptimizer {
    pub fn new(config: &ImagesConfig) -> Self {
        Self {
            png_level: config.png_level,
            jpeg_quality: config.jpeg_quality,
        }
    }

    /// Fingerprint of the settings that affect `kind`'s output.
    pub fn params(&self, kind: ImageKind) -> String {
        match kind {
            ImageKind::Png => format!("png:{}", self.png_level),
            ImageKind::Jpeg => format!("jpeg:{}", self.jpeg_quality),
            ImageKind::Gif => "gif".to_string(),
            ImageKind::Svg => "svg".to_string(),
        }
    }

    /// Optimize `source`, keeping the original when optimization does not shrink it.
    pub fn optimize(&self, kind: ImageKind, source: &[u8]) -> Result<Vec<u8>, String> {
        let optimized = match kind {
            ImageKind::Png => self.optimize_png(source)?,
            ImageKind::Jpeg => self.optimize_jpeg(source)?,
            ImageKind::Gif => optimize_gif(source)?,
            ImageKind::Svg => optimize_svg(source)?,
        };

        if optimized.len() < source.len() {
            Ok(optimized)
        } else {
            Ok(source.to_vec())
        }
    }

    fn optimize_png(&self, source: &[u8]) -> Result<Vec<u8>, String> {
        let options = oxipng::Options::from_preset(self.png_level);
        oxipng::optimize_from_memory(source, &options).map_err(|e| e.to_string())
    }

    fn optimize_jpeg(&self, source: &[u8]) -> Result<Vec<u8>, String> {
        let image = image::load_from_memory_with_format(source, ImageFormat::Jpeg)
            .map_err(|e| e.to_string())?;

        let mut out = Vec::with_capacity(source.len());
        let encoder = JpegEncoder::new_with_quality(&mut out, self.jpeg_quality);
        image.write_with_encoder(encoder).map_err(|e| e.to_string())?;
        Ok(out)
    }
}

fn optimize_gif(source: &[u8]) -> Result<Vec<u8>, String> {
    let decoder = GifDecoder::new(Cursor::new(source)).map_err(|e| e.to_string())?;
    let frames = decoder
        .into_frames()
        .collect_frames()
        .map_err(|e| e.to_string())?;

    let mut out = Vec::with_capacity(source.len());
    {
        let mut encoder = GifEncoder::new(&mut out);
        encoder
            .set_repeat(Repeat::Infinite)
            .map_err(|e| e.to_string())?;
        encoder.encode_frames(frames).map_err(|e| e.to_string())?;
    }
    Ok(out)
}

/// Drop comments and whitespace-only text from an SVG document.
///
/// Text with any visible character is written untouched, so spacing inside
/// `<text>` and `<tspan>` survives.
fn optimize_svg(source: &[u8]) -> Result<Vec<u8>, String> {
    let mut reader = Reader::from_reader(source);
    let mut writer = Writer::new(Vec::with_capacity(source.len()));

    loop {
        match reader.read_event() {
            Ok(Event::Eof) => break,
            Ok(Event::Comment(_)) => {}
            Ok(Event::Text(text)) if text.iter().all(u8::is_ascii_whitespace) => {}
            Ok(event) => writer.write_event(event).map_err(|e| e.to_string())?,
            Err(e) => {
                return Err(format!(
                    "XML parse error at position {}: {}",
                    reader.error_position(),
                    e
                ))
            }
        }
    }

    Ok(writer.into_inner())
}

/// Resolve one image through the cache. Returns the bytes and whether it was a hit.
fn process_image(
    path: &Path,
    kind: ImageKind,
    optimizer: &ImageOptimizer,
    cache: &ImageCache,
) -> Result<(Vec<u8>, bool), PipelineError> {
    let source =
        fs::read(path).map_err(|e| PipelineError::ReadError(format!("{}: {}", path.display(), e)))?;
    let key = ImageCache::key(&source, &optimizer.params(kind));

    let cached = cache
        .get(&key)
        .map_err(|e| PipelineError::ReadError(format!("image cache: {}", e)))?;
    if let Some(bytes) = cached {
        return Ok((bytes, true));
    }

    let optimized = optimizer
        .optimize(kind, &source)
        .map_err(|message| PipelineError::ImageError {
            path: path.display().to_string(),
            message,
        })?;

    cache
        .put(&key, &optimized)
        .map_err(|e| PipelineError::WriteError(format!("image cache: {}", e)))?;

    Ok((optimized, false))
}

/// Optimize every image into `assets/images`, preserving directory structure.
pub fn optimize_images(
    layout: &Layout,
    optimizer: &ImageOptimizer,
    cache: &ImageCache,
) -> Result<ImageReport, PipelineError> {
    let images_dir = layout.images_dir();
    let out_dir = layout.images_out();
    let files = sources::collect(&images_dir, IMAGE_PATTERN)?;

    let results: Vec<Result<(PathBuf, bool), PipelineError>> = files
        .par_iter()
        .filter_map(|path| ImageKind::from_path(path).map(|kind| (path, kind)))
        .map(|(path, kind)| {
            let (bytes, hit) = process_image(path, kind, optimizer, cache)?;

            let target = out_dir.join(sources::relative(path, &images_dir));
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).map_err(|e| PipelineError::WriteError(e.to_string()))?;
            }
            fs::write(&target, bytes).map_err(|e| PipelineError::WriteError(e.to_string()))?;

            Ok((target, hit))
        })
        .collect();

    let mut report = ImageReport::default();
    for result in results {
        let (target, hit) = result?;
        if hit {
            report.cache_hits += 1;
        } else {
            report.cache_misses += 1;
        }
        report.written.push(target);
    }

    tracing::debug!(
        "Images: {} optimized, {} from cache",
        report.cache_misses,
        report.cache_hits
    );

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PathsConfig;
    use image::{DynamicImage, Frame, Rgb, RgbImage, Rgba, RgbaImage};
    use tempfile::tempdir;

    fn png_bytes() -> Vec<u8> {
        let img = RgbImage::from_fn(32, 32, |x, y| Rgb([(x * 8) as u8, (y * 8) as u8, 128]));
        let mut buf = Vec::new();
        DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .unwrap();
        buf
    }

    fn noisy_rgb() -> RgbImage {
        RgbImage::from_fn(64, 64, |x, y| {
            Rgb([
                ((x * 37 + y * 91) % 256) as u8,
                ((x * y) % 256) as u8,
                ((x + y * 13) % 256) as u8,
            ])
        })
    }

    fn jpeg_bytes(quality: u8) -> Vec<u8> {
        let mut buf = Vec::new();
        let encoder = JpegEncoder::new_with_quality(&mut buf, quality);
        DynamicImage::ImageRgb8(noisy_rgb())
            .write_with_encoder(encoder)
            .unwrap();
        buf
    }

    fn gif_bytes() -> Vec<u8> {
        let frames = [[255u8, 0, 0, 255], [0, 0, 255, 255]].map(|color| {
            Frame::new(RgbaImage::from_fn(16, 16, |x, _| {
                if x % 2 == 0 {
                    Rgba(color)
                } else {
                    Rgba([255, 255, 255, 255])
                }
            }))
        });

        let mut buf = Vec::new();
        {
            let mut encoder = GifEncoder::new(&mut buf);
            encoder.encode_frames(frames).unwrap();
        }
        buf
    }

    fn optimizer_with_quality(jpeg_quality: u8) -> ImageOptimizer {
        ImageOptimizer::new(&ImagesConfig {
            jpeg_quality,
            ..ImagesConfig::default()
        })
    }

    fn setup() -> (tempfile::TempDir, Layout, ImageCache, ImageOptimizer) {
        let temp = tempdir().unwrap();
        let layout = Layout::new(temp.path(), &PathsConfig::default());
        let cache = ImageCache::new(layout.image_cache_dir());
        let optimizer = ImageOptimizer::new(&ImagesConfig::default());
        (temp, layout, cache, optimizer)
    }

    #[test]
    fn detects_kinds() {
        assert_eq!(ImageKind::from_path(Path::new("a/b.PNG")), Some(ImageKind::Png));
        assert_eq!(ImageKind::from_path(Path::new("b.jpeg")), Some(ImageKind::Jpeg));
        assert_eq!(ImageKind::from_path(Path::new("b.webp")), None);
    }

    #[test]
    fn strips_svg_comments() {
        let svg = b"<svg xmlns=\"http://www.w3.org/2000/svg\">\n  <!-- editor junk -->\n  <rect width=\"10\" height=\"10\"/>\n</svg>\n";

        let out = optimize_svg(svg).unwrap();
        let out = String::from_utf8(out).unwrap();

        assert!(!out.contains("editor junk"));
        assert!(out.contains("<rect width=\"10\" height=\"10\"/>"));
    }

    #[test]
    fn keeps_whitespace_inside_svg_text() {
        let svg = b"<svg>\n  <text x=\"0\">Hello  world <tspan> and more</tspan></text>\n</svg>";

        let out = String::from_utf8(optimize_svg(svg).unwrap()).unwrap();

        assert_eq!(
            out,
            "<svg><text x=\"0\">Hello  world <tspan> and more</tspan></text></svg>"
        );
    }

    #[test]
    fn reencodes_jpeg_at_configured_quality() {
        let source = jpeg_bytes(100);

        let out = optimizer_with_quality(60)
            .optimize(ImageKind::Jpeg, &source)
            .unwrap();

        assert!(out.len() < source.len());
        let decoded = image::load_from_memory_with_format(&out, ImageFormat::Jpeg).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (64, 64));
    }

    #[test]
    fn keeps_jpeg_source_when_reencode_is_larger() {
        let source = jpeg_bytes(10);

        let out = optimizer_with_quality(100)
            .optimize(ImageKind::Jpeg, &source)
            .unwrap();

        assert_eq!(out, source);
    }

    #[test]
    fn reencodes_gif_keeping_every_frame() {
        let source = gif_bytes();

        let reencoded = optimize_gif(&source).unwrap();
        let frames = GifDecoder::new(Cursor::new(&reencoded))
            .unwrap()
            .into_frames()
            .collect_frames()
            .unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].buffer().dimensions(), (16, 16));

        let out = ImageOptimizer::new(&ImagesConfig::default())
            .optimize(ImageKind::Gif, &source)
            .unwrap();
        if reencoded.len() < source.len() {
            assert_eq!(out, reencoded);
        } else {
            assert_eq!(out, source);
        }
    }

    #[test]
    fn never_grows_output() {
        let optimizer = ImageOptimizer::new(&ImagesConfig::default());
        let source = png_bytes();

        let out = optimizer.optimize(ImageKind::Png, &source).unwrap();

        assert!(out.len() <= source.len());
    }

    #[test]
    fn second_run_hits_cache_with_identical_bytes() {
        let (_temp, layout, cache, optimizer) = setup();
        fs::create_dir_all(layout.images_dir().join("photos")).unwrap();
        fs::write(layout.images_dir().join("photos/grid.png"), png_bytes()).unwrap();

        let first = optimize_images(&layout, &optimizer, &cache).unwrap();
        let target = layout.images_out().join("photos/grid.png");
        let first_bytes = fs::read(&target).unwrap();

        fs::remove_dir_all(&layout.output).unwrap();
        let second = optimize_images(&layout, &optimizer, &cache).unwrap();

        assert_eq!((first.cache_misses, first.cache_hits), (1, 0));
        assert_eq!((second.cache_misses, second.cache_hits), (0, 1));
        assert_eq!(fs::read(&target).unwrap(), first_bytes);
    }

    #[test]
    fn cache_hit_skips_optimizer() {
        let (_temp, layout, cache, optimizer) = setup();
        let source = png_bytes();
        fs::create_dir_all(layout.images_dir()).unwrap();
        fs::write(layout.images_dir().join("logo.png"), &source).unwrap();

        let key = ImageCache::key(&source, &optimizer.params(ImageKind::Png));
        cache.put(&key, b"cached-bytes").unwrap();

        let report = optimize_images(&layout, &optimizer, &cache).unwrap();

        assert_eq!(report.cache_hits, 1);
        assert_eq!(
            fs::read(layout.images_out().join("logo.png")).unwrap(),
            b"cached-bytes"
        );
    }

    #[test]
    fn corrupt_image_fails_task() {
        let (_temp, layout, cache, optimizer) = setup();
        fs::create_dir_all(layout.images_dir()).unwrap();
        fs::write(layout.images_dir().join("broken.jpg"), b"not a jpeg").unwrap();

        let err = optimize_images(&layout, &optimizer, &cache).unwrap_err();
        assert!(matches!(err, PipelineError::ImageError { .. }));
    }
}
