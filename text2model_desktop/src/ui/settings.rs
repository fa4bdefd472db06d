use eframe::egui;
use text2model_core::settings::{IMAGES_PER_ROW_RANGE, IMAGE_COUNT_RANGE, UI_IMAGE_SIZE_RANGE};
use text2model_core::Settings;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingsAction {
    Save,
    Load,
}

/// Foldout with every editable setting. Returns the button pressed, if any.
pub fn render_settings(ui: &mut egui::Ui, settings: &mut Settings) -> Option<SettingsAction> {
    let mut action = None;

    egui::CollapsingHeader::new("Settings")
        .default_open(false)
        .show(ui, |ui| {
            egui::ScrollArea::vertical()
                .id_salt("settings_scroll")
                .max_height(240.0)
                .show(ui, |ui| {
                    ui.label(egui::RichText::new("OpenAI API Settings").strong());
                    labeled(ui, "API Key", |ui| {
                        ui.add(egui::TextEdit::singleline(&mut settings.api_key).password(true));
                    });
                    labeled(ui, "Organization ID", |ui| {
                        ui.text_edit_singleline(&mut settings.organization_id);
                    });
                    labeled(ui, "Project ID", |ui| {
                        ui.text_edit_singleline(&mut settings.project_id);
                    });
                    labeled(ui, "API URL", |ui| {
                        ui.text_edit_singleline(&mut settings.api_base_url);
                    });
                    labeled(ui, "Model", |ui| {
                        ui.text_edit_singleline(&mut settings.image_model);
                    });
                    ui.add_space(10.0);

                    ui.label(egui::RichText::new("Image Generation Settings").strong());
                    let (min, max) = IMAGE_COUNT_RANGE;
                    ui.add(egui::Slider::new(&mut settings.image_count, min..=max).text("Image Count"));
                    labeled(ui, "Image Size", |ui| {
                        ui.text_edit_singleline(&mut settings.image_size)
                            .on_hover_text("Size of generated images (e.g. 1024x1024)");
                    });
                    labeled(ui, "Temp Directory", |ui| {
                        ui.text_edit_singleline(&mut settings.temp_dir);
                    });
                    ui.add_space(10.0);

                    ui.label(egui::RichText::new("Python Settings").strong());
                    labeled(ui, "Python Path", |ui| {
                        ui.text_edit_singleline(&mut settings.interpreter);
                        browse_file(ui, &mut settings.interpreter);
                    });
                    labeled(ui, "Python Script", |ui| {
                        ui.text_edit_singleline(&mut settings.script_path);
                        browse_file(ui, &mut settings.script_path);
                    });
                    labeled(ui, "Models Folder", |ui| {
                        ui.text_edit_singleline(&mut settings.models_folder);
                        if ui.small_button("…").clicked() {
                            if let Some(path) = rfd::FileDialog::new().pick_folder() {
                                settings.models_folder = path.display().to_string();
                            }
                        }
                    });
                    labeled(ui, "Output OBJ Name", |ui| {
                        ui.text_edit_singleline(&mut settings.output_name);
                    });
                    labeled(ui, "Mesh timeout (s)", |ui| {
                        ui.add(egui::DragValue::new(&mut settings.mesh_timeout_secs).range(0..=86_400));
                        ui.label("0 waits forever");
                    });
                    ui.add_space(10.0);

                    ui.label(egui::RichText::new("UI Settings").strong());
                    let (min, max) = IMAGES_PER_ROW_RANGE;
                    ui.add(egui::Slider::new(&mut settings.images_per_row, min..=max).text("Images Per Row"));
                    let (min, max) = UI_IMAGE_SIZE_RANGE;
                    ui.add(egui::Slider::new(&mut settings.ui_image_size, min..=max).text("UI Image Size"));
                });

            ui.add_space(5.0);
            ui.horizontal(|ui| {
                if ui.button("💾 Save Settings").clicked() {
                    action = Some(SettingsAction::Save);
                }
                if ui.button("Load Saved Settings").clicked() {
                    action = Some(SettingsAction::Load);
                }
            });
        });

    action
}

fn labeled(ui: &mut egui::Ui, label: &str, add_contents: impl FnOnce(&mut egui::Ui)) {
    ui.horizontal(|ui| {
        ui.add_sized([130.0, 18.0], egui::Label::new(label));
        add_contents(ui);
    });
}

fn browse_file(ui: &mut egui::Ui, target: &mut String) {
    if ui.small_button("…").clicked() {
        if let Some(path) = rfd::FileDialog::new().pick_file() {
            *target = path.display().to_string();
        }
    }
}
