use super::ui;
use crate::core::model::{Expense, ExpenseQuery, NewExpense, Page, Pagination, UserId};
use crate::{App, ExpenseCommand};
use anyhow::Result;
use comfy_table::Cell;

pub fn render_expenses(page: &Page<Expense>) -> String {
    let mut table = ui::new_styled_table();
    table.set_header(vec![
        ui::header_cell("Id"),
        ui::header_cell("Date"),
        ui::header_cell("Category"),
        ui::header_cell("Amount"),
        ui::header_cell("Status"),
        ui::header_cell("Description"),
    ]);

    for expense in &page.items {
        table.add_row(vec![
            Cell::new(expense.id),
            Cell::new(expense.created_at.format("%Y-%m-%d")),
            Cell::new(expense.category),
            ui::amount_cell(expense.amount, &expense.currency),
            ui::expense_status_cell(expense.status),
            ui::optional_text_cell(&expense.description),
        ]);
    }

    format!(
        "{}\n\n{}\n{}",
        ui::style_text("Expenses", ui::StyleType::Title),
        table,
        ui::page_footer(page.page, page.per_page, page.total)
    )
}

fn render_expense(expense: &Expense) -> String {
    render_expenses(&Page {
        items: vec![expense.clone()],
        page: 1,
        per_page: 1,
        total: 1,
    })
}

pub async fn run(app: &App, acting_user: UserId, command: ExpenseCommand) -> Result<String> {
    let output = match command {
        ExpenseCommand::Add {
            amount,
            currency,
            category,
            description,
            receipt,
        } => {
            let expense = NewExpense {
                amount,
                currency,
                category,
                description,
                receipt,
            };
            render_expense(&app.expenses.create_expense(acting_user, &expense).await?)
        }
        ExpenseCommand::List {
            category,
            status,
            page,
            per_page,
        } => {
            let query = ExpenseQuery { category, status };
            let page = app
                .expenses
                .list_expenses(acting_user, &query, Pagination { page, per_page })
                .await?;
            render_expenses(&page)
        }
        ExpenseCommand::Update { id, update } => {
            render_expense(&app.expenses.update_expense(id, acting_user, &update).await?)
        }
        ExpenseCommand::Delete { id } => {
            app.expenses.delete_expense(id, acting_user).await?;
            format!("Deleted expense {id}")
        }
    };
    Ok(output)
}
