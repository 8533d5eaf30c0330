use chrono::Utc;
use pocketbook_core::models::{Category, ExpenseKind, PaymentMethod};
use pocketbook_core::ExpenseFields;

use crate::commands::common::{parse_date, parse_field, Store};
use crate::error::CliError;

pub struct AddArgs<'a> {
    pub amount: f64,
    pub description: &'a [String],
    pub category: &'a str,
    pub kind: &'a str,
    pub payment: &'a str,
    pub date: Option<&'a str>,
}

pub async fn run_add(store: &Store, user: &str, args: AddArgs<'_>) -> Result<(), CliError> {
    let date = match args.date {
        Some(raw) => parse_date(raw)?,
        None => Utc::now(),
    };

    let fields = ExpenseFields {
        user_id: user.to_string(),
        date,
        category: parse_field::<Category>(args.category)?,
        kind: parse_field::<ExpenseKind>(args.kind)?,
        payment_method: parse_field::<PaymentMethod>(args.payment)?,
        description: args.description.join(" "),
        amount: args.amount,
    };

    let expense = store.add_expense(fields)?;
    println!("{}", expense.id);
    Ok(())
}
