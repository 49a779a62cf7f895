use egui::{Color32, Context, TextureOptions};
use image::RgbImage;
use std::sync::Arc;

use crate::scene::{MaterialKind, SceneGraph, Texture};
use crate::ui::InstantCameraApp;

/// The print as the renderer sees it: the uploaded map plus the tint its
/// material asks for
pub struct PrintTexture {
    pub source: Arc<Texture>,
    pub handle: egui::TextureHandle,
    pub tint: Color32,
}

impl InstantCameraApp {
    pub fn update_preview_texture(&mut self, ctx: &Context, image: &RgbImage) {
        // Skip frames that would flash white
        if image.width() == 0 || image.height() == 0 {
            return;
        }

        let size = [image.width() as usize, image.height() as usize];
        let pixels = image.as_flat_samples();
        let color_image = egui::ColorImage::from_rgb(size, pixels.as_slice());

        match &mut self.preview_texture {
            Some(texture) if texture.size() == size => {
                texture.set(color_image, TextureOptions::LINEAR);
            }
            _ => {
                self.preview_texture =
                    Some(ctx.load_texture("camera_preview", color_image, TextureOptions::LINEAR));
            }
        }
    }

    /// Follow whatever material currently sits in the print slot, re-uploading
    /// only when its map changed
    pub fn sync_print_texture(&mut self, ctx: &Context) {
        let settings = self.booth.animator().settings();
        let Some((map, tint)) = slot_map(self.booth.scene(), &settings.target_mesh, &settings.material_slot) else {
            self.print_texture = None;
            return;
        };

        if let Some(current) = self.print_texture.as_mut() {
            if Arc::ptr_eq(&current.source, &map) {
                current.tint = tint;
                return;
            }
        }

        // Scene textures are stored bottom row first
        let rgba = map.to_display_rgba();
        let size = [rgba.width() as usize, rgba.height() as usize];
        let pixels = rgba.as_flat_samples();
        let color_image = egui::ColorImage::from_rgba_unmultiplied(size, pixels.as_slice());

        let handle = ctx.load_texture(map.label(), color_image, TextureOptions::LINEAR);
        log::debug!("Uploaded print texture {}x{}", size[0], size[1]);
        self.print_texture = Some(PrintTexture { source: map, handle, tint });
    }
}

/// The photo map bound to `mesh`/`slot`, if that slot holds a photo material
pub fn slot_map(scene: &SceneGraph, mesh: &str, slot: &str) -> Option<(Arc<Texture>, Color32)> {
    let material = scene.find_mesh(mesh)?.material(slot)?;
    if material.kind != MaterialKind::Matcap {
        return None;
    }
    let map = material.map.clone()?;

    let tint = if material.tone_mapped {
        let [r, g, b, a] = material.color;
        Color32::from_rgba_unmultiplied(r, g, b, a)
    } else {
        Color32::WHITE
    };
    Some((map, tint))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::builtin_polaroid;
    use crate::scene::{PrintSource, TextureBinding};
    use image::{Rgba, RgbaImage};

    #[test]
    fn test_slot_map_follows_material_swap() {
        let mut scene = builtin_polaroid().unwrap().scene;
        assert!(slot_map(&scene, "Plane_1", "Image").is_none());

        let photo = Arc::new(Texture::from_engine_rows("photo", RgbaImage::from_pixel(4, 4, Rgba([1, 2, 3, 255]))));
        scene.apply_binding(&TextureBinding {
            mesh: "Plane_1".to_string(),
            slot: "Image".to_string(),
            texture: photo.clone(),
            source: PrintSource::Still,
        });

        let (map, tint) = slot_map(&scene, "Plane_1", "Image").unwrap();
        assert!(Arc::ptr_eq(&map, &photo));
        assert_eq!(tint, Color32::WHITE);
        assert!(slot_map(&scene, "Plane_1", "Frame").is_none());
        assert!(slot_map(&scene, "Missing", "Image").is_none());
    }
}
