use super::ui;
use crate::core::model::{ExpenseReport, Page, Pagination, ReportQuery, UserId};
use crate::{App, ReportCommand};
use anyhow::Result;
use comfy_table::Cell;

fn total_text(report: &ExpenseReport, currency: &str) -> String {
    let total = format!("{:.2} {}", report.total, currency);
    if report.approximate {
        format!("~{total}")
    } else {
        total
    }
}

pub fn render_report(report: &ExpenseReport, currency: &str) -> String {
    let mut table = ui::new_styled_table();
    table.set_header(vec![ui::header_cell("Field"), ui::header_cell("Value")]);
    table.add_row(vec![Cell::new("Id"), Cell::new(report.id)]);
    table.add_row(vec![Cell::new("Status"), ui::report_status_cell(report.status)]);
    let expense_ids: Vec<String> = report.expense_ids.iter().map(|id| id.to_string()).collect();
    table.add_row(vec![
        Cell::new("Expenses"),
        ui::optional_text_cell(&expense_ids.join(", ")),
    ]);
    table.add_row(vec![
        Cell::new("Updated"),
        Cell::new(report.updated_at.format("%Y-%m-%d %H:%M")),
    ]);

    let mut output = format!(
        "Report: {}\n\n{}",
        ui::style_text(&report.title, ui::StyleType::Title),
        table
    );
    output.push_str(&format!(
        "\n\nTotal ({}): {}",
        ui::style_text(currency, ui::StyleType::TotalLabel),
        ui::style_text(&total_text(report, currency), ui::StyleType::TotalValue)
    ));
    if report.approximate {
        output.push_str(&format!(
            "\n{}",
            ui::style_text(
                "Some amounts could not be converted and were added as-is.",
                ui::StyleType::Warning
            )
        ));
    }
    output
}

pub fn render_reports(page: &Page<ExpenseReport>, currency: &str) -> String {
    let mut table = ui::new_styled_table();
    table.set_header(vec![
        ui::header_cell("Id"),
        ui::header_cell("Title"),
        ui::header_cell("Status"),
        ui::header_cell("Expenses"),
        ui::header_cell(&format!("Total ({currency})")),
    ]);

    for report in &page.items {
        table.add_row(vec![
            Cell::new(report.id),
            Cell::new(&report.title),
            ui::report_status_cell(report.status),
            Cell::new(report.expense_ids.len()),
            Cell::new(total_text(report, currency))
                .set_alignment(comfy_table::CellAlignment::Right),
        ]);
    }

    format!(
        "{}\n\n{}\n{}",
        ui::style_text("Expense reports", ui::StyleType::Title),
        table,
        ui::page_footer(page.page, page.per_page, page.total)
    )
}

pub async fn run(app: &App, acting_user: UserId, command: ReportCommand) -> Result<String> {
    let reports = &app.reports;
    let report = match command {
        ReportCommand::Create { title } => reports.create_report(acting_user, &title).await?,
        ReportCommand::Add { id, expenses } => {
            reports.add_expenses(id, acting_user, &expenses).await?
        }
        ReportCommand::Remove { id, expenses } => {
            reports.remove_expenses(id, acting_user, &expenses).await?
        }
        ReportCommand::Submit { id } => reports.submit_report(id, acting_user).await?,
        ReportCommand::Show { id } => reports.view_report(id, acting_user).await?,
        ReportCommand::List {
            status,
            page,
            per_page,
        } => {
            let page = reports
                .list_reports(acting_user, &ReportQuery { status }, Pagination { page, per_page })
                .await?;
            return Ok(render_reports(&page, &app.currency));
        }
        ReportCommand::Delete { id } => {
            reports.delete_report(id, acting_user).await?;
            return Ok(format!("Deleted expense report {id}"));
        }
    };
    Ok(render_report(&report, &app.currency))
}
