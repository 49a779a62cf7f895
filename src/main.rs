use anyhow::Result;
use eframe::egui;
use log::info;
use std::time::Duration;
use tokio::runtime::Handle;

mod animation;
mod assets;
mod booth;
mod camera;
mod camera_controller;
mod compositor;
mod config;
mod errors;
mod print_animator;
mod scene;
mod shutter;
mod texture;
mod ui;

use crate::booth::PhotoBooth;
use crate::camera_controller::CameraCaptureController;
use crate::compositor::PhotoCompositor;
use crate::config::Config;
use crate::print_animator::{PrintAnimator, PrintSettings};
use crate::ui::InstantCameraApp;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    info!("📷 Starting Instant Camera");

    // Load configuration
    let config = Config::load()?;
    config.validate()?;
    info!("Configuration loaded: {}x{} display", config.display.width, config.display.height);

    // Camera
    let backend = camera::backend_from_config(&config.camera).await;
    let facing = camera::preferred_facing(&config.camera);
    let camera = CameraCaptureController::new(
        backend,
        facing,
        Duration::from_millis(config.camera.flip_settle_ms),
        Handle::current(),
    );

    // Print scene
    let loaded = match &config.paths.scene_file {
        Some(path) => assets::load_scene(path)?,
        None => assets::builtin_polaroid()?,
    };
    let fallback = print_animator::load_fallback(&config.print)?;
    let animator = PrintAnimator::new(
        loaded,
        PrintSettings::from_config(&config.print),
        fallback,
        Handle::current(),
    );

    let (shutter, _shutter_thread) = shutter::spawn(config.paths.shutter_sound.clone());
    let booth = PhotoBooth::new(camera, PhotoCompositor::new(), animator, Some(shutter));

    let size = [config.display.width as f32, config.display.height as f32];
    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size(size)
            .with_min_inner_size(size)
            .with_decorations(!config.display.fullscreen)
            .with_fullscreen(config.display.fullscreen),
        ..Default::default()
    };

    info!("Launching GUI application...");

    eframe::run_native(
        "Instant Camera",
        options,
        Box::new(|cc| {
            setup_touch_style(&cc.egui_ctx);
            Box::new(InstantCameraApp::new(booth))
        }),
    )
    .map_err(|e| anyhow::anyhow!("Failed to run application: {}", e))?;

    info!("Application shut down gracefully");
    Ok(())
}

fn setup_touch_style(ctx: &egui::Context) {
    let mut style = (*ctx.style()).clone();

    // Larger UI elements for touch interaction
    style.spacing.button_padding = egui::vec2(16.0, 12.0);
    style.spacing.item_spacing = egui::vec2(12.0, 8.0);
    style.spacing.window_margin = egui::Margin::same(16.0);

    style.text_styles.insert(
        egui::TextStyle::Button,
        egui::FontId::new(18.0, egui::FontFamily::Proportional),
    );
    style.text_styles.insert(
        egui::TextStyle::Body,
        egui::FontId::new(16.0, egui::FontFamily::Proportional),
    );

    ctx.set_style(style);
}
