use serde::{Deserialize, Serialize};

macro_rules! integer_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(i64);

        impl $name {
            /// Wraps a raw database identifier.
            pub const fn new(id: i64) -> Self {
                Self(id)
            }

            /// Returns the raw database identifier.
            pub const fn as_i64(&self) -> i64 {
                self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(id: i64) -> Self {
                Self(id)
            }
        }

        impl From<$name> for i64 {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

integer_id!(
    /// Internal identifier of a payment transaction.
    ///
    /// This is the id the payment contract embeds in every `PaymentReceived`
    /// event, so it is the primary correlation key between chain and store.
    TransactionId
);

integer_id!(
    /// Identifier of a shopping cart.
    CartId
);

integer_id!(
    /// Identifier of a catalog product.
    ProductId
);

integer_id!(
    /// Identifier of a user profile (cart owner).
    UserId
);

integer_id!(
    /// Identifier of a materialized order line.
    OrderItemId
);
