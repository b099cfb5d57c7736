use thiserror::Error;

/// Rejected input, detected before anything is written.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("One or more tags do not exist")]
    UnknownTag,
    #[error("Ingredient amount must be a positive whole number (got '{amount}')")]
    InvalidAmount { amount: String },
    #[error("A recipe needs at least one ingredient")]
    NoIngredients,
    #[error("One or more ingredients do not exist")]
    UnknownIngredient,
    #[error("Both tags and ingredients are required")]
    MissingFields,
    #[error("Invalid {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },
}

impl ValidationError {
    pub(crate) fn invalid_field(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            field,
            reason: reason.into(),
        }
    }
}

/// A cart, favorite or follow action that conflicts with the current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RelationError {
    #[error("Recipe is already in favorites")]
    AlreadyFavorited,
    #[error("Recipe is not in favorites")]
    NotFavorited,
    #[error("Recipe is already in the shopping cart")]
    AlreadyInCart,
    #[error("Recipe is not in the shopping cart")]
    NotInCart,
    #[error("Users cannot subscribe to themselves")]
    SelfFollow,
    #[error("Already subscribed to this author")]
    AlreadyFollowing,
    #[error("Not subscribed to this author")]
    NotFollowing,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{entity} {id} not found")]
pub struct NotFound {
    pub entity: &'static str,
    pub id: i64,
}

impl NotFound {
    #[must_use]
    pub fn new(entity: &'static str, id: i64) -> Self {
        Self { entity, id }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Only the author can change recipe {recipe_id}")]
pub struct PermissionDenied {
    pub recipe_id: i64,
}
