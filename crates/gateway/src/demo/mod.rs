//! The four services of the demo graph, seeded with sample data.
//!
//! * `accounts` owns `User`.
//! * `products` owns `Product`.
//! * `inventory` extends `Product` with stock and shipping information.
//! * `reviews` owns `Review` and extends both `User` and `Product` with their reviews.

use displaydoc::Display;
use federation::DeclarationError;
use federation::ResolutionError;
use federation::Service;
use federation::StoreError;
use json_ext::Object;
use json_ext::Value;
use thiserror::Error;

pub mod accounts;
pub mod inventory;
pub mod products;
pub mod reviews;

/// Errors raised while a demo service starts.
#[derive(Error, Display, Debug, Clone, PartialEq, Eq)]
pub enum DemoError {
    /// {0}
    Declaration(#[from] DeclarationError),

    /// Could not seed the sample data: {0}
    Seed(#[from] StoreError),
}

/// Every demo service, in composition order.
pub fn services() -> Result<Vec<Service>, DemoError> {
    Ok(vec![
        accounts::service()?,
        products::service()?,
        inventory::service()?,
        reviews::service()?,
    ])
}

/// Read the `input` argument of a mutation, keeping only `fields`.
///
/// Every listed field must be present and non-null.
pub(crate) fn input(
    mutation: &str,
    arguments: &Object,
    fields: &[&str],
) -> Result<Object, ResolutionError> {
    let invalid = |reason: String| ResolutionError::Resolver {
        target: mutation.to_string(),
        reason,
    };
    let input = match arguments.get("input") {
        Some(Value::Object(input)) => input,
        _ => return Err(invalid("argument 'input' must be an object".to_string())),
    };
    fields
        .iter()
        .map(|field| match input.get(*field) {
            None | Some(Value::Null) => Err(invalid(format!("input field '{field}' is required"))),
            Some(value) => Ok((field.to_string(), value.clone())),
        })
        .collect()
}
