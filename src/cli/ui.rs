use crate::core::model::{Field, Provenance};
use comfy_table::modifiers::UTF8_ROUND_CORNERS;
use comfy_table::presets::UTF8_FULL;
use comfy_table::{Attribute, Cell, CellAlignment, Color, ContentArrangement, Table};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};

/// Defines different styles for text elements.
pub enum StyleType {
    Title,
    TotalLabel,
    TotalValue,
    Error,
    Warning,
    Subtle,
}

/// Applies a consistent style to a string.
pub fn style_text(text: &str, style_type: StyleType) -> String {
    let styled = match style_type {
        StyleType::Title => style(text).bold().underlined(),
        StyleType::TotalLabel => style(text).bold(),
        StyleType::TotalValue => style(text).green().bold(),
        StyleType::Error => style(text).red(),
        StyleType::Warning => style(text).yellow(),
        StyleType::Subtle => style(text).dim(),
    };
    styled.to_string()
}

/// Creates a new `comfy_table::Table` with standard styling.
pub fn new_styled_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

/// Creates a styled header cell for a table.
pub fn header_cell(text: &str) -> Cell {
    Cell::new(text)
        .fg(Color::Cyan)
        .add_attribute(Attribute::Bold)
}

/// Formats an `Option<T>` into a `Cell`. `None` is displayed as "N/A".
pub fn format_optional_cell<T>(value: Option<T>, format_fn: impl Fn(T) -> String) -> Cell {
    value.map_or(
        Cell::new("N/A")
            .fg(Color::DarkGrey)
            .set_alignment(CellAlignment::Right),
        |v| Cell::new(format_fn(v)).set_alignment(CellAlignment::Right),
    )
}

/// Renders a field coloured by provenance. Estimates show their confidence.
pub fn field_cell(field: &Field, format_fn: impl Fn(f64) -> String) -> Cell {
    let Some(value) = field.value else {
        let color = if field.provenance == Provenance::Observed {
            // Disputed between sources
            Color::Red
        } else {
            Color::DarkGrey
        };
        return Cell::new("N/A").fg(color).set_alignment(CellAlignment::Right);
    };
    let cell = match field.provenance {
        Provenance::Observed => Cell::new(format_fn(value)),
        Provenance::CarriedForward => Cell::new(format_fn(value)).fg(Color::DarkGrey),
        Provenance::Estimated => {
            Cell::new(format!("{} ~{:.2}", format_fn(value), field.confidence)).fg(Color::Yellow)
        }
    };
    cell.set_alignment(CellAlignment::Right)
}

/// Creates a cell for a premium/discount percentage with color coding.
pub fn premium_cell(premium: Option<f64>) -> Cell {
    match premium {
        Some(p) if p >= 0.0 => Cell::new(format!("{p:.2}%"))
            .fg(Color::Green)
            .set_alignment(CellAlignment::Right),
        Some(p) => Cell::new(format!("{p:.2}%"))
            .fg(Color::Red)
            .set_alignment(CellAlignment::Right),
        None => format_optional_cell(None::<f64>, |_| String::new()),
    }
}

/// Creates a count cell, highlighted when non-zero.
pub fn count_cell(count: usize, color: Color) -> Cell {
    let cell = Cell::new(count).set_alignment(CellAlignment::Right);
    if count > 0 { cell.fg(color) } else { cell }
}

/// Creates a new `indicatif::ProgressBar` with standard styling.
pub fn new_progress_bar(len: u64, with_message: bool) -> ProgressBar {
    let template = if with_message {
        "{spinner:.green} {msg} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})"
    } else {
        "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})"
    };

    let pb = ProgressBar::new(len);
    pb.set_style(
        ProgressStyle::default_bar()
            .template(template)
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
    );
    pb
}

/// Prints a separator line matching the terminal width.
pub fn print_separator() {
    let term_width = console::Term::stdout()
        .size_checked()
        .map(|(_, w)| w as usize)
        .unwrap_or(80);
    println!("\n{}", "\u{2500}".repeat(term_width));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_cell_marks_estimates() {
        let cell = field_cell(&Field::estimated(Some(25.0), 0.43), |v| format!("{v:.2}"));
        assert_eq!(cell.content(), "25.00 ~0.43");
        let cell = field_cell(&Field::observed(25.0), |v| format!("{v:.2}"));
        assert_eq!(cell.content(), "25.00");
        let cell = field_cell(&Field::missing(), |v| format!("{v:.2}"));
        assert_eq!(cell.content(), "N/A");
    }

    #[test]
    fn test_premium_cell() {
        assert_eq!(premium_cell(Some(0.5)).content(), "0.50%");
        assert_eq!(premium_cell(Some(-1.25)).content(), "-1.25%");
        assert_eq!(premium_cell(None).content(), "N/A");
    }
}
