use pocketbook_core::models::{Category, ExpenseKind, PaymentMethod};

use crate::commands::common::{parse_date, parse_field, resolve_expense, Store};
use crate::error::CliError;

pub struct UpdateArgs<'a> {
    pub amount: Option<f64>,
    pub description: Option<&'a str>,
    pub category: Option<&'a str>,
    pub kind: Option<&'a str>,
    pub payment: Option<&'a str>,
    pub date: Option<&'a str>,
}

pub async fn run_update(store: &Store, id: &str, args: UpdateArgs<'_>) -> Result<(), CliError> {
    let current = resolve_expense(store, id)?;
    let mut fields = current.fields();

    if let Some(amount) = args.amount {
        fields.amount = amount;
    }
    if let Some(description) = args.description {
        fields.description = description.to_string();
    }
    if let Some(category) = args.category {
        fields.category = parse_field::<Category>(category)?;
    }
    if let Some(kind) = args.kind {
        fields.kind = parse_field::<ExpenseKind>(kind)?;
    }
    if let Some(payment) = args.payment {
        fields.payment_method = parse_field::<PaymentMethod>(payment)?;
    }
    if let Some(date) = args.date {
        fields.date = parse_date(date)?;
    }

    let updated = store.update_expense(&current.id, fields)?;
    println!("Updated {}", updated.id);
    Ok(())
}
