/// Commerce entities module
pub mod address;
pub mod brand;
pub mod cart;
pub mod cart_item;
pub mod category;
pub mod coupon;
pub mod coupon_usage;
pub mod prescription;
pub mod product;
pub mod product_variant;
pub mod wallet;
pub mod wallet_transaction;

// Re-export entities
pub use address::{AddressSnapshot, Entity as Address, Model as AddressModel};
pub use brand::{Entity as Brand, Model as BrandModel};
pub use cart::{Entity as Cart, Model as CartModel};
pub use cart_item::{Entity as CartItem, Model as CartItemModel};
pub use category::{Entity as Category, Model as CategoryModel};
pub use coupon::{AppliedCoupon, CouponStatus, Entity as Coupon, Model as CouponModel};
pub use coupon_usage::{Entity as CouponUsage, Model as CouponUsageModel};
pub use prescription::{Entity as Prescription, Model as PrescriptionModel, PrescriptionStatus};
pub use product::{Entity as Product, Model as ProductModel};
pub use product_variant::{Entity as ProductVariant, Model as ProductVariantModel};
pub use wallet::{Entity as Wallet, Model as WalletModel};
pub use wallet_transaction::{
    Direction, Entity as WalletTransaction, LedgerSource, LedgerStatus,
    Model as WalletTransactionModel,
};
