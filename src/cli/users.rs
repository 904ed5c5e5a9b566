use super::ui;
use crate::core::model::{User, UserId};
use crate::{App, UserCommand};
use anyhow::Result;
use comfy_table::Cell;

pub fn render_user(user: &User) -> String {
    let mut table = ui::new_styled_table();
    table.set_header(vec![ui::header_cell("Field"), ui::header_cell("Value")]);
    table.add_row(vec![Cell::new("Id"), Cell::new(user.id)]);
    table.add_row(vec![Cell::new("Name"), Cell::new(&user.name)]);
    table.add_row(vec![Cell::new("Email"), Cell::new(&user.email)]);
    table.add_row(vec![
        Cell::new("Created"),
        Cell::new(user.created_at.format("%Y-%m-%d %H:%M")),
    ]);

    format!(
        "User: {}\n\n{}",
        ui::style_text(&user.name, ui::StyleType::Title),
        table
    )
}

/// Registers a user. This is the only command that runs without an acting user.
pub async fn add(app: &App, name: &str, email: &str) -> Result<String> {
    let user = app.users.create_user(name, email).await?;
    Ok(render_user(&user))
}

pub async fn run(app: &App, acting_user: UserId, command: UserCommand) -> Result<String> {
    let user = match command {
        UserCommand::Add { name, email } => return add(app, &name, &email).await,
        UserCommand::Show { id } => app.users.get_user(id.unwrap_or(acting_user)).await?,
        UserCommand::Rename { name } => {
            app.users
                .rename_user(acting_user, acting_user, &name)
                .await?
        }
    };
    Ok(render_user(&user))
}
