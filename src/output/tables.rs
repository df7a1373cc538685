use comfy_table::modifiers::UTF8_ROUND_CORNERS;
use comfy_table::presets::UTF8_FULL;
use comfy_table::{Cell, Color as TableColor, ContentArrangement, Table};

use crate::monitor::BuildOutcome;

/// Table and cell creation helpers
pub fn create_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

pub fn create_cyan_header(labels: &[&str]) -> Vec<Cell> {
    labels
        .iter()
        .map(|label| Cell::new(*label).fg(TableColor::Cyan))
        .collect()
}

pub fn color_coded_outcome_cell(outcome: &BuildOutcome) -> Cell {
    match outcome {
        BuildOutcome::Success => Cell::new(outcome.result()).fg(TableColor::Green),
        BuildOutcome::Failed { .. } => Cell::new(outcome.result()).fg(TableColor::Red),
        BuildOutcome::Error(_) => Cell::new(outcome.result()).fg(TableColor::Yellow),
    }
}
