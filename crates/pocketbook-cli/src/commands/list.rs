use crate::commands::common::{
    expense_to_list_item, format_expense_lines, parse_date, parse_date_end, ExpenseListItem, Store,
};
use crate::error::CliError;

pub async fn run_list(
    store: &Store,
    from: Option<&str>,
    to: Option<&str>,
    limit: usize,
    as_json: bool,
) -> Result<(), CliError> {
    let start = from.map(parse_date).transpose()?;
    let end = to.map(parse_date_end).transpose()?;

    let mut expenses = store.load_expenses(start, end).await?;
    expenses.truncate(limit);

    if as_json {
        let items = expenses
            .iter()
            .map(expense_to_list_item)
            .collect::<Vec<ExpenseListItem>>();
        println!("{}", serde_json::to_string_pretty(&items)?);
    } else if expenses.is_empty() {
        println!("No expenses recorded.");
    } else {
        for line in format_expense_lines(&expenses) {
            println!("{line}");
        }
    }

    Ok(())
}
