use crate::core::model::{ExpenseStatus, ReportStatus};
use comfy_table::modifiers::UTF8_ROUND_CORNERS;
use comfy_table::presets::UTF8_FULL;
use comfy_table::{Attribute, Cell, CellAlignment, Color, ContentArrangement, Table};
use console::style;

/// Defines different styles for text elements.
pub enum StyleType {
    Title,
    TotalLabel,
    TotalValue,
    Warning,
    Subtle,
}

/// Applies a consistent style to a string.
pub fn style_text(text: &str, style_type: StyleType) -> String {
    let styled = match style_type {
        StyleType::Title => style(text).bold().underlined(),
        StyleType::TotalLabel => style(text).bold(),
        StyleType::TotalValue => style(text).green().bold(),
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

/// Right-aligned amount with two decimals.
pub fn amount_cell(amount: f64, currency: &str) -> Cell {
    Cell::new(format!("{amount:.2} {currency}")).set_alignment(CellAlignment::Right)
}

/// Text cell that shows "-" when empty.
pub fn optional_text_cell(text: &str) -> Cell {
    if text.is_empty() {
        Cell::new("-").fg(Color::DarkGrey)
    } else {
        Cell::new(text)
    }
}

pub fn report_status_cell(status: ReportStatus) -> Cell {
    let color = match status {
        ReportStatus::Draft => Color::Yellow,
        ReportStatus::Submitted => Color::Blue,
        ReportStatus::Approved => Color::Green,
    };
    Cell::new(status.to_string()).fg(color)
}

pub fn expense_status_cell(status: ExpenseStatus) -> Cell {
    let color = match status {
        ExpenseStatus::Pending => Color::Yellow,
        ExpenseStatus::Approved => Color::Green,
        ExpenseStatus::Rejected => Color::Red,
    };
    Cell::new(status.to_string()).fg(color)
}

/// "Page 2 of 5 (42 total)" footer for paged listings.
pub fn page_footer(page: u32, per_page: u32, total: u64) -> String {
    let pages = total.div_ceil(u64::from(per_page.max(1))).max(1);
    style_text(
        &format!("Page {page} of {pages} ({total} total)"),
        StyleType::Subtle,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_footer_counts_pages() {
        console::set_colors_enabled(false);
        assert_eq!(page_footer(1, 10, 0), "Page 1 of 1 (0 total)");
        assert_eq!(page_footer(2, 10, 21), "Page 2 of 3 (21 total)");
    }
}
