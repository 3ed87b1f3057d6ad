pub mod image_helper {
    use crate::core_modules::yolo_label::YoloLabel;
    use crate::error::{Result, ValidationError};
    use image::{ImageEncoder, Rgb, RgbImage};
    use imageproc::drawing::draw_hollow_rect_mut;
    use imageproc::rect::Rect;
    use std::path::Path;

    const PALETTE: [Rgb<u8>; 8] = [
        Rgb([230, 25, 75]),
        Rgb([60, 180, 75]),
        Rgb([255, 225, 25]),
        Rgb([0, 130, 200]),
        Rgb([245, 130, 48]),
        Rgb([145, 30, 180]),
        Rgb([70, 240, 240]),
        Rgb([240, 50, 230]),
    ];

    /// Box outline width in pixels.
    const LINE_WIDTH: u32 = 2;

    /// Writes `image` as PNG regardless of the extension of `path`.
    pub fn save_png(image: &RgbImage, path: &Path) -> Result<(), image::error::ImageError> {
        let output = std::fs::File::create(path)?;
        let encoder = image::codecs::png::PngEncoder::new(std::io::BufWriter::new(output));

        encoder.write_image(image.as_raw(), image.width(), image.height(), image::ExtendedColorType::Rgb8)?;

        Ok(())
    }

    /// Writes `image` in the format implied by the extension of `path`.
    pub fn save_image(image: &RgbImage, path: &Path) -> Result<(), image::error::ImageError> {
        image.save(path)
    }

    pub fn class_color(class_id: usize) -> Rgb<u8> {
        PALETTE[class_id % PALETTE.len()]
    }

    /// A copy of `image` with every box of `label` outlined in its class colour.
    pub fn render_preview(image: &RgbImage, label: &YoloLabel, classes: &[String]) -> Result<RgbImage, ValidationError> {
        // fails on ids with no name before anything is drawn
        label.class_names(classes)?;

        let mut preview = image.clone();
        for entry in label.entries() {
            let bbox = entry.bbox;
            let color = class_color(entry.class_id);
            for inset in 0..LINE_WIDTH {
                if bbox.width() <= 2 * inset || bbox.height() <= 2 * inset {
                    break;
                }
                let rect = Rect::at((bbox.left() + inset) as i32, (bbox.top() + inset) as i32)
                    .of_size(bbox.width() - 2 * inset, bbox.height() - 2 * inset);
                draw_hollow_rect_mut(&mut preview, rect, color);
            }
        }
        Ok(preview)
    }

    pub fn save_labeled_image(image: &RgbImage, label: &YoloLabel, classes: &[String], path: &Path) -> Result<()> {
        let preview = render_preview(image, label, classes)?;
        save_image(&preview, path)?;
        Ok(())
    }
}
