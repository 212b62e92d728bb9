// Catalog, cart and checkout
pub mod commerce;

// Stock and cart mutations shared by placement, retry and the lifecycle engine
pub mod inventory;

// Order placement, payment retry and post-placement lifecycle
pub mod order_placement;
pub mod order_status;
pub mod orders;
pub mod payment_retry;

// Payments and wallet
pub mod payment_gateway;
pub mod payment_intents;
pub mod payments;
pub mod wallet;
