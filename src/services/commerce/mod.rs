/// Commerce services: catalog resolution, cart, prescriptions, coupons and checkout
pub mod cart_service;
pub mod catalog;
pub mod checkout_service;
pub mod coupon_service;
pub mod prescription_service;
pub mod pricing_service;

// Re-export services for convenience
pub use cart_service::CartService;
pub use checkout_service::CheckoutService;
pub use coupon_service::CouponService;
pub use prescription_service::PrescriptionService;
