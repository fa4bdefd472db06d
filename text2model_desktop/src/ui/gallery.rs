use eframe::egui;

/// Thumbnail grid with single selection. Returns the index clicked this
/// frame.
pub fn render_gallery(
    ui: &mut egui::Ui,
    textures: &[egui::TextureHandle],
    selected: Option<usize>,
    per_row: usize,
    thumb_size: f32,
) -> Option<usize> {
    let mut clicked = None;
    let per_row = per_row.max(1);

    egui::ScrollArea::both()
        .id_salt("gallery_scroll")
        .max_height(thumb_size + 120.0)
        .show(ui, |ui| {
            egui::Grid::new("gallery_grid").spacing([8.0, 8.0]).show(ui, |ui| {
                for (index, texture) in textures.iter().enumerate() {
                    let image = egui::Image::new(texture).fit_to_exact_size(egui::vec2(thumb_size, thumb_size));
                    let response = ui
                        .add(egui::ImageButton::new(image).selected(selected == Some(index)))
                        .on_hover_text(format!("generated_{index}.png"));
                    if response.clicked() {
                        clicked = Some(index);
                    }
                    if (index + 1) % per_row == 0 {
                        ui.end_row();
                    }
                }
            });
        });

    clicked
}
