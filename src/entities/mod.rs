pub mod commerce;
pub mod order;
pub mod order_item;
pub mod payment_intent;

pub use order::{Actor, OrderStatus, PaymentMethod, PaymentStatus};
pub use order_item::{ItemStatus, ProductSnapshot, ReturnRequestStatus};
pub use payment_intent::IntentPurpose;
