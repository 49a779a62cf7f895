use std::time::Instant;
use eframe::egui;

use crate::booth::PhotoBooth;
use crate::print_animator::PrintAnimationState;
use crate::scene::SceneGraph;
use crate::texture::PrintTexture;

// ============================================================================
// CONSTANTS FOR UI STYLING
// ============================================================================
const UI_PADDING: f32 = 20.0;
const BODY_WIDTH: f32 = 360.0;
const BODY_HEIGHT: f32 = 240.0;
const CARD_WIDTH: f32 = 240.0;
// Scene units to screen points for the eject offset
const POINTS_PER_UNIT: f32 = 220.0;

// ============================================================================
// MAIN APP STRUCT
// ============================================================================

pub struct InstantCameraApp {
    pub booth: PhotoBooth,

    // Textures
    pub preview_texture: Option<egui::TextureHandle>,
    pub print_texture: Option<PrintTexture>,
    pub last_preview_update: Option<Instant>,

    // Exit mechanism for kiosk mode
    pub exit_tap_count: u32,
    pub exit_tap_last_time: Option<Instant>,
}

// ============================================================================
// INITIALIZATION
// ============================================================================

impl InstantCameraApp {
    pub fn new(booth: PhotoBooth) -> Self {
        Self {
            booth,
            preview_texture: None,
            print_texture: None,
            last_preview_update: None,
            exit_tap_count: 0,
            exit_tap_last_time: None,
        }
    }
}

// ============================================================================
// MAIN UPDATE LOOP
// ============================================================================

impl eframe::App for InstantCameraApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        // ESC key to exit (for debugging in kiosk mode with keyboard)
        if ctx.input(|i| i.key_pressed(egui::Key::Escape)) {
            ctx.send_viewport_cmd(egui::ViewportCommand::Close);
        }

        // Hidden exit area for touchscreen (top-left corner, tap 5 times within 3 seconds)
        egui::Area::new("exit_area")
            .fixed_pos(egui::pos2(0.0, 0.0))
            .order(egui::Order::Foreground)
            .show(ctx, |ui| {
                let (_rect, response) = ui.allocate_exact_size(egui::vec2(50.0, 50.0), egui::Sense::click());
                if response.clicked() {
                    let now = Instant::now();
                    if let Some(last_time) = self.exit_tap_last_time {
                        if now.duration_since(last_time).as_secs() > 3 {
                            self.exit_tap_count = 0;
                        }
                    }
                    self.exit_tap_count += 1;
                    self.exit_tap_last_time = Some(now);
                    if self.exit_tap_count >= 5 {
                        ctx.send_viewport_cmd(egui::ViewportCommand::Close);
                    }
                }
            });

        self.booth.poll();

        if self.booth.camera_visible() {
            self.update_camera_preview(ctx);
        } else {
            self.preview_texture = None;
        }
        self.sync_print_texture(ctx);

        self.render_ui(ctx);

        if self.booth.needs_animation_frames() {
            ctx.request_repaint();
        }
    }
}

impl InstantCameraApp {
    fn update_camera_preview(&mut self, ctx: &egui::Context) {
        let now = Instant::now();
        let should_update = match self.last_preview_update {
            None => true,
            Some(last) => now.duration_since(last) >= std::time::Duration::from_millis(33),
        };
        if !should_update {
            return;
        }

        let Some(frame) = self.booth.preview_frame() else {
            return;
        };
        // Clone out of the borrow so the texture can be updated
        let pixels = frame.pixels.clone();
        self.update_preview_texture(ctx, &pixels);
        self.last_preview_update = Some(now);
    }

    fn render_ui(&mut self, ctx: &egui::Context) {
        egui::CentralPanel::default()
            .frame(egui::Frame::none())
            .show(ctx, |ui| {
                let full_rect = ui.max_rect();
                ui.painter().rect_filled(full_rect, 0.0, egui::Color32::from_rgb(40, 40, 40));

                self.render_polaroid(ui, full_rect);

                if self.booth.camera_visible() {
                    self.render_camera_panel(ctx, full_rect);
                } else {
                    self.render_take_photo_button(ctx, full_rect);
                }

                self.render_error_banner(ctx);
            });
    }

    fn render_error_banner(&mut self, ctx: &egui::Context) {
        let Some(message) = self.booth.last_error() else {
            return;
        };

        egui::Area::new("error_banner")
            .anchor(egui::Align2::CENTER_TOP, egui::vec2(0.0, UI_PADDING * 3.0))
            .order(egui::Order::Tooltip)
            .show(ctx, |ui| {
                egui::Frame::none()
                    .fill(egui::Color32::from_rgb(180, 40, 40))
                    .rounding(8.0)
                    .inner_margin(egui::Margin::symmetric(20.0, 15.0))
                    .show(ui, |ui| {
                        ui.label(egui::RichText::new(message).color(egui::Color32::WHITE).size(20.0));
                    });
            });
    }
}

// ============================================================================
// POLAROID RENDERING
// ============================================================================

impl InstantCameraApp {
    fn render_polaroid(&mut self, ui: &mut egui::Ui, rect: egui::Rect) {
        let scene = self.booth.scene();
        let target_mesh = &self.booth.animator().settings().target_mesh;
        let shell = mesh_color(scene, "Camera_Body", "Shell", [236, 232, 224, 255]);
        let slot = mesh_color(scene, "Camera_Body", "Slot", [24, 24, 24, 255]);
        let frame = mesh_color(scene, target_mesh, "Frame", [250, 250, 245, 255]);

        let body_rect = egui::Rect::from_center_size(
            egui::pos2(rect.center().x, rect.min.y + UI_PADDING * 2.0 + BODY_HEIGHT / 2.0),
            egui::vec2(BODY_WIDTH, BODY_HEIGHT),
        );
        let slot_rect = egui::Rect::from_center_size(
            egui::pos2(body_rect.center().x, body_rect.max.y - 24.0),
            egui::vec2(CARD_WIDTH + 20.0, 10.0),
        );

        // The card starts tucked behind the body and slides down out of the slot
        let drop = print_offset(scene, target_mesh).map(|y| -y * POINTS_PER_UNIT);
        if let (Some(drop), Some(print)) = (drop, &self.print_texture) {
            let card_height = CARD_WIDTH * 1.2;
            let card_rect = egui::Rect::from_min_size(
                egui::pos2(slot_rect.center().x - CARD_WIDTH / 2.0, slot_rect.center().y - card_height + drop),
                egui::vec2(CARD_WIDTH, card_height),
            );
            let painter = ui.painter();
            painter.rect_filled(card_rect.translate(egui::vec2(3.0, 3.0)), 4.0, egui::Color32::from_black_alpha(80));
            painter.rect_filled(card_rect, 4.0, frame);

            let margin = CARD_WIDTH * 0.06;
            let image_rect = egui::Rect::from_min_size(
                card_rect.min + egui::vec2(margin, margin),
                egui::vec2(CARD_WIDTH - margin * 2.0, CARD_WIDTH - margin * 2.0),
            );
            painter.image(
                print.handle.id(),
                image_rect,
                egui::Rect::from_min_max(egui::pos2(0.0, 0.0), egui::pos2(1.0, 1.0)),
                print.tint,
            );

            // Handwritten-style date on the bottom strip
            if let Some(still) = self.booth.captured_image() {
                let caption = still.captured_at().format("%d.%m.%Y %H:%M").to_string();
                painter.text(
                    egui::pos2(card_rect.center().x, (image_rect.max.y + card_rect.max.y) / 2.0),
                    egui::Align2::CENTER_CENTER,
                    caption,
                    egui::FontId::proportional(16.0),
                    egui::Color32::from_rgb(60, 60, 70),
                );
            }
        }

        let painter = ui.painter();
        painter.rect_filled(body_rect, 24.0, shell);
        painter.rect_filled(slot_rect, 4.0, slot);
        painter.circle(
            egui::pos2(body_rect.center().x, body_rect.center().y - 16.0),
            64.0,
            egui::Color32::from_rgb(30, 30, 36),
            egui::Stroke::new(6.0, egui::Color32::from_rgb(90, 90, 100)),
        );

        if self.booth.print_state() == PrintAnimationState::Loading {
            let spinner_rect = egui::Rect::from_center_size(
                egui::pos2(body_rect.center().x, body_rect.center().y - 16.0),
                egui::vec2(32.0, 32.0),
            );
            ui.allocate_ui_at_rect(spinner_rect, |ui| {
                ui.add(egui::Spinner::new().size(32.0));
            });
        }
    }
}

// ============================================================================
// CAMERA PANEL & BUTTONS
// ============================================================================

impl InstantCameraApp {
    fn render_take_photo_button(&mut self, ctx: &egui::Context, screen_rect: egui::Rect) {
        const BUTTON_RADIUS: f32 = 80.0;
        const SPACING: f32 = 20.0;

        let center = egui::pos2(
            screen_rect.max.x - BUTTON_RADIUS - SPACING,
            screen_rect.max.y - BUTTON_RADIUS - SPACING,
        );

        egui::Area::new("take_photo_btn")
            .fixed_pos(center - egui::vec2(BUTTON_RADIUS, BUTTON_RADIUS))
            .order(egui::Order::Foreground)
            .show(ctx, |ui| {
                if self.circular_button(ui, BUTTON_RADIUS, "Take Photo") {
                    self.booth.start_capture();
                }
            });
    }

    fn render_camera_panel(&mut self, ctx: &egui::Context, screen_rect: egui::Rect) {
        const LARGE_BUTTON_RADIUS: f32 = 80.0;
        const SMALL_BUTTON_RADIUS: f32 = 50.0;
        const SPACING: f32 = 20.0;

        let panel_rect = screen_rect.shrink(UI_PADDING * 2.0);

        egui::Area::new("camera_panel")
            .fixed_pos(panel_rect.min)
            .order(egui::Order::Middle)
            .show(ctx, |ui| {
                let (rect, _) = ui.allocate_exact_size(panel_rect.size(), egui::Sense::hover());
                ui.painter().rect_filled(rect, 12.0, egui::Color32::from_rgb(16, 16, 20));

                match &self.preview_texture {
                    Some(texture) if self.booth.camera_live() => {
                        let display_size = fit_image_in_rect(texture.size_vec2(), rect.size());
                        let centered_rect = center_rect_in_rect(display_size, rect);
                        ui.allocate_ui_at_rect(centered_rect, |ui| {
                            ui.add(egui::Image::new(texture).fit_to_exact_size(display_size));
                        });
                    }
                    _ => {
                        ui.allocate_ui_at_rect(rect, |ui| {
                            ui.centered_and_justified(|ui| {
                                ui.add(egui::Spinner::new().size(48.0));
                            });
                        });
                    }
                }
            });

        let capture_center = egui::pos2(
            panel_rect.max.x - LARGE_BUTTON_RADIUS - SPACING,
            panel_rect.max.y - LARGE_BUTTON_RADIUS - SPACING,
        );
        let flip_center = egui::pos2(
            panel_rect.max.x - SMALL_BUTTON_RADIUS - SPACING,
            capture_center.y - LARGE_BUTTON_RADIUS - SMALL_BUTTON_RADIUS - SPACING,
        );

        egui::Area::new("capture_btn")
            .fixed_pos(capture_center - egui::vec2(LARGE_BUTTON_RADIUS, LARGE_BUTTON_RADIUS))
            .order(egui::Order::Foreground)
            .show(ctx, |ui| {
                if self.circular_button(ui, LARGE_BUTTON_RADIUS, "Capture Photo") {
                    // Failures are surfaced through the error banner
                    let _ = self.booth.take_still();
                }
            });

        egui::Area::new("flip_btn")
            .fixed_pos(flip_center - egui::vec2(SMALL_BUTTON_RADIUS, SMALL_BUTTON_RADIUS))
            .order(egui::Order::Foreground)
            .show(ctx, |ui| {
                let label = format!("Flip\n({})", self.booth.facing().opposite());
                if self.circular_button(ui, SMALL_BUTTON_RADIUS, &label) && !self.booth.flip_camera() {
                    log::debug!("Flip ignored while the camera is switching");
                }
            });
    }

    // ============================================================================
    // CIRCULAR BUTTON HELPER
    // ============================================================================

    fn circular_button(&self, ui: &mut egui::Ui, radius: f32, text: &str) -> bool {
        let base_fill = egui::Color32::from_rgba_unmultiplied(70, 70, 80, 180);
        let size = egui::vec2(radius * 2.0, radius * 2.0);
        let (rect, response) = ui.allocate_exact_size(size, egui::Sense::click());

        if ui.is_rect_visible(rect) {
            let painter = ui.painter();
            let center = rect.center();

            let (fill_color, stroke_color) = if response.is_pointer_button_down_on() {
                let r = base_fill.r().saturating_sub(30);
                let g = base_fill.g().saturating_sub(30);
                let b = base_fill.b().saturating_sub(30);
                (egui::Color32::from_rgb(r, g, b), egui::Color32::from_rgb(120, 120, 130))
            } else if response.hovered() {
                let r = base_fill.r().saturating_add(20);
                let g = base_fill.g().saturating_add(20);
                let b = base_fill.b().saturating_add(20);
                (egui::Color32::from_rgb(r, g, b), egui::Color32::from_rgb(150, 150, 160))
            } else {
                (base_fill, egui::Color32::from_rgb(100, 100, 110))
            };

            painter.circle(
                center + egui::vec2(3.0, 3.0),
                radius,
                egui::Color32::from_black_alpha(80),
                egui::Stroke::NONE,
            );
            painter.circle(center, radius, fill_color, egui::Stroke::new(3.0, stroke_color));

            let font_id = egui::FontId::proportional(radius / 4.0);
            let galley = painter.layout_no_wrap(text.to_string(), font_id, egui::Color32::WHITE);
            painter.galley(center - galley.size() / 2.0, galley);

            if response.hovered() {
                ui.ctx().set_cursor_icon(egui::CursorIcon::PointingHand);
            }
        }

        response.clicked()
    }
}

// ============================================================================
// HELPERS
// ============================================================================

fn mesh_color(scene: &SceneGraph, mesh: &str, slot: &str, default: [u8; 4]) -> egui::Color32 {
    let [r, g, b, a] = scene
        .find_mesh(mesh)
        .and_then(|m| m.material(slot))
        .map(|m| m.color)
        .unwrap_or(default);
    egui::Color32::from_rgba_unmultiplied(r, g, b, a)
}

/// Vertical offset of the node carrying the print mesh
fn print_offset(scene: &SceneGraph, mesh: &str) -> Option<f32> {
    let mut offset = None;
    scene.traverse(&mut |node| {
        if node.mesh.as_ref().is_some_and(|m| m.name == mesh) {
            offset = Some(node.translation.y);
        }
    });
    offset
}

fn fit_image_in_rect(image_size: egui::Vec2, container_size: egui::Vec2) -> egui::Vec2 {
    let scale = (container_size.x / image_size.x).min(container_size.y / image_size.y);
    image_size * scale
}

fn center_rect_in_rect(content_size: egui::Vec2, container: egui::Rect) -> egui::Rect {
    let offset = (container.size() - content_size) * 0.5;
    egui::Rect::from_min_size(container.min + offset, content_size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::builtin_polaroid;

    #[test]
    fn test_print_offset_follows_plane_node() {
        let mut loaded = builtin_polaroid().unwrap();
        assert_eq!(print_offset(&loaded.scene, "Plane_1"), Some(0.0));

        loaded.scene.find_node_mut("Plane").unwrap().translation.y = -0.5;
        assert_eq!(print_offset(&loaded.scene, "Plane_1"), Some(-0.5));
        assert_eq!(print_offset(&loaded.scene, "Missing"), None);
    }

    #[test]
    fn test_mesh_color_falls_back() {
        let loaded = builtin_polaroid().unwrap();
        let shell = mesh_color(&loaded.scene, "Camera_Body", "Shell", [0, 0, 0, 255]);
        assert_eq!(shell, egui::Color32::from_rgba_unmultiplied(236, 232, 224, 255));
        let missing = mesh_color(&loaded.scene, "Camera_Body", "Lens", [1, 2, 3, 255]);
        assert_eq!(missing, egui::Color32::from_rgba_unmultiplied(1, 2, 3, 255));
    }

    #[test]
    fn test_fit_image_in_rect() {
        let size = fit_image_in_rect(egui::vec2(640.0, 480.0), egui::vec2(320.0, 320.0));
        assert_eq!(size, egui::vec2(320.0, 240.0));
    }
}
