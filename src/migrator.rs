use sea_orm_migration::prelude::*;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240101_000001_create_catalog_tables::Migration),
            Box::new(m20240101_000002_create_cart_tables::Migration),
            Box::new(m20240101_000003_create_customer_tables::Migration),
            Box::new(m20240101_000004_create_coupon_tables::Migration),
            Box::new(m20240101_000005_create_wallet_tables::Migration),
            Box::new(m20240101_000006_create_order_tables::Migration),
            Box::new(m20240101_000007_create_payment_intent_tables::Migration),
        ]
    }
}

fn money(col: impl IntoIden) -> ColumnDef {
    ColumnDef::new(col)
        .decimal_len(16, 4)
        .not_null()
        .default(0)
        .to_owned()
}

fn timestamp(col: impl IntoIden) -> ColumnDef {
    ColumnDef::new(col)
        .timestamp_with_time_zone()
        .not_null()
        .to_owned()
}

fn nullable_timestamp(col: impl IntoIden) -> ColumnDef {
    ColumnDef::new(col)
        .timestamp_with_time_zone()
        .null()
        .to_owned()
}

mod m20240101_000001_create_catalog_tables {
    use super::{money, timestamp};
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000001_create_catalog_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Brands::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Brands::Id).uuid().not_null().primary_key())
                        .col(ColumnDef::new(Brands::Name).string().not_null())
                        .col(
                            ColumnDef::new(Brands::IsListed)
                                .boolean()
                                .not_null()
                                .default(true),
                        )
                        .col(timestamp(Brands::CreatedAt))
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(Categories::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(Categories::Id)
                                .uuid()
                                .not_null()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(Categories::Name).string().not_null())
                        .col(
                            ColumnDef::new(Categories::IsListed)
                                .boolean()
                                .not_null()
                                .default(true),
                        )
                        .col(money(Categories::Discount))
                        .col(
                            ColumnDef::new(Categories::DiscountActive)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(timestamp(Categories::CreatedAt))
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(Products::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Products::Id).uuid().not_null().primary_key())
                        .col(ColumnDef::new(Products::Name).string().not_null())
                        .col(ColumnDef::new(Products::Description).text().null())
                        .col(ColumnDef::new(Products::BrandId).uuid().not_null())
                        .col(ColumnDef::new(Products::CategoryId).uuid().not_null())
                        .col(timestamp(Products::CreatedAt))
                        .col(timestamp(Products::UpdatedAt))
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_products_brand")
                                .from(Products::Table, Products::BrandId)
                                .to(Brands::Table, Brands::Id),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_products_category")
                                .from(Products::Table, Products::CategoryId)
                                .to(Categories::Table, Categories::Id),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(ProductVariants::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(ProductVariants::Id)
                                .uuid()
                                .not_null()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(ProductVariants::ProductId).uuid().not_null())
                        .col(
                            ColumnDef::new(ProductVariants::Position)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(ProductVariants::QuantityReceived)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(ProductVariants::Stock)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(money(ProductVariants::RegularPrice))
                        .col(money(ProductVariants::Discount))
                        .col(
                            ColumnDef::new(ProductVariants::DiscountActive)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(
                            ColumnDef::new(ProductVariants::IsListed)
                                .boolean()
                                .not_null()
                                .default(true),
                        )
                        .col(
                            ColumnDef::new(ProductVariants::RequiresPrescription)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(
                            ColumnDef::new(ProductVariants::Uom)
                                .integer()
                                .not_null()
                                .default(1),
                        )
                        .col(ColumnDef::new(ProductVariants::Attributes).json().not_null())
                        .col(ColumnDef::new(ProductVariants::Ingredients).json().not_null())
                        .col(ColumnDef::new(ProductVariants::Images).json().not_null())
                        .col(timestamp(ProductVariants::CreatedAt))
                        .col(timestamp(ProductVariants::UpdatedAt))
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_product_variants_product")
                                .from(ProductVariants::Table, ProductVariants::ProductId)
                                .to(Products::Table, Products::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_product_variants_product_id")
                        .table(ProductVariants::Table)
                        .col(ProductVariants::ProductId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(ProductVariants::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Products::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Categories::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Brands::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub enum Brands {
        Table,
        Id,
        Name,
        IsListed,
        CreatedAt,
    }

    #[derive(DeriveIden)]
    pub enum Categories {
        Table,
        Id,
        Name,
        IsListed,
        Discount,
        DiscountActive,
        CreatedAt,
    }

    #[derive(DeriveIden)]
    pub enum Products {
        Table,
        Id,
        Name,
        Description,
        BrandId,
        CategoryId,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    pub enum ProductVariants {
        Table,
        Id,
        ProductId,
        Position,
        QuantityReceived,
        Stock,
        RegularPrice,
        Discount,
        DiscountActive,
        IsListed,
        RequiresPrescription,
        Uom,
        Attributes,
        Ingredients,
        Images,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240101_000002_create_cart_tables {
    use super::{money, timestamp};
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000002_create_cart_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Carts::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Carts::Id).uuid().not_null().primary_key())
                        .col(ColumnDef::new(Carts::UserId).uuid().not_null().unique_key())
                        .col(money(Carts::Total))
                        .col(timestamp(Carts::CreatedAt))
                        .col(timestamp(Carts::UpdatedAt))
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(CartItems::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(CartItems::Id).uuid().not_null().primary_key())
                        .col(ColumnDef::new(CartItems::CartId).uuid().not_null())
                        .col(ColumnDef::new(CartItems::ProductId).uuid().not_null())
                        .col(ColumnDef::new(CartItems::VariantId).uuid().not_null())
                        .col(
                            ColumnDef::new(CartItems::Quantity)
                                .integer()
                                .not_null()
                                .default(1),
                        )
                        .col(money(CartItems::Subtotal))
                        .col(timestamp(CartItems::CreatedAt))
                        .col(timestamp(CartItems::UpdatedAt))
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_cart_items_cart")
                                .from(CartItems::Table, CartItems::CartId)
                                .to(Carts::Table, Carts::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_cart_items_cart_variant")
                        .table(CartItems::Table)
                        .col(CartItems::CartId)
                        .col(CartItems::VariantId)
                        .unique()
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(CartItems::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Carts::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Carts {
        Table,
        Id,
        UserId,
        Total,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum CartItems {
        Table,
        Id,
        CartId,
        ProductId,
        VariantId,
        Quantity,
        Subtotal,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240101_000003_create_customer_tables {
    use super::timestamp;
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000003_create_customer_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Addresses::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Addresses::Id).uuid().not_null().primary_key())
                        .col(ColumnDef::new(Addresses::UserId).uuid().not_null())
                        .col(ColumnDef::new(Addresses::FullName).string().not_null())
                        .col(ColumnDef::new(Addresses::Phone).string().not_null())
                        .col(ColumnDef::new(Addresses::Line1).string().not_null())
                        .col(ColumnDef::new(Addresses::Line2).string().null())
                        .col(ColumnDef::new(Addresses::City).string().not_null())
                        .col(ColumnDef::new(Addresses::State).string().not_null())
                        .col(ColumnDef::new(Addresses::PostalCode).string().not_null())
                        .col(ColumnDef::new(Addresses::Country).string().not_null())
                        .col(timestamp(Addresses::CreatedAt))
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(Prescriptions::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(Prescriptions::Id)
                                .uuid()
                                .not_null()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(Prescriptions::UserId).uuid().not_null())
                        .col(ColumnDef::new(Prescriptions::ProductId).uuid().not_null())
                        .col(ColumnDef::new(Prescriptions::VariantId).uuid().not_null())
                        .col(ColumnDef::new(Prescriptions::DoctorName).string().not_null())
                        .col(ColumnDef::new(Prescriptions::PatientName).string().not_null())
                        .col(ColumnDef::new(Prescriptions::ImageUrls).json().not_null())
                        .col(ColumnDef::new(Prescriptions::Uom).integer().not_null())
                        .col(
                            ColumnDef::new(Prescriptions::UsedUom)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(Prescriptions::Status)
                                .string_len(20)
                                .not_null()
                                .default("pending"),
                        )
                        .col(timestamp(Prescriptions::PrescriptionDate))
                        .col(timestamp(Prescriptions::ExpiryDate))
                        .col(timestamp(Prescriptions::CreatedAt))
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_prescriptions_user_variant")
                        .table(Prescriptions::Table)
                        .col(Prescriptions::UserId)
                        .col(Prescriptions::ProductId)
                        .col(Prescriptions::VariantId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Prescriptions::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Addresses::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Addresses {
        Table,
        Id,
        UserId,
        FullName,
        Phone,
        Line1,
        Line2,
        City,
        State,
        PostalCode,
        Country,
        CreatedAt,
    }

    #[derive(DeriveIden)]
    enum Prescriptions {
        Table,
        Id,
        UserId,
        ProductId,
        VariantId,
        DoctorName,
        PatientName,
        ImageUrls,
        Uom,
        UsedUom,
        Status,
        PrescriptionDate,
        ExpiryDate,
        CreatedAt,
    }
}

mod m20240101_000004_create_coupon_tables {
    use super::{money, timestamp};
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000004_create_coupon_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Coupons::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Coupons::Id).uuid().not_null().primary_key())
                        .col(ColumnDef::new(Coupons::Code).string().not_null().unique_key())
                        .col(money(Coupons::Discount))
                        .col(money(Coupons::MinPurchase))
                        .col(
                            ColumnDef::new(Coupons::UsageLimit)
                                .integer()
                                .not_null()
                                .default(1),
                        )
                        .col(timestamp(Coupons::StartDate))
                        .col(timestamp(Coupons::ExpiryDate))
                        .col(
                            ColumnDef::new(Coupons::Status)
                                .string_len(20)
                                .not_null()
                                .default("upcoming"),
                        )
                        .col(timestamp(Coupons::CreatedAt))
                        .col(timestamp(Coupons::UpdatedAt))
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(CouponUsages::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(CouponUsages::Id)
                                .uuid()
                                .not_null()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(CouponUsages::CouponId).uuid().not_null())
                        .col(ColumnDef::new(CouponUsages::UserId).uuid().not_null())
                        .col(
                            ColumnDef::new(CouponUsages::UsageCount)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_coupon_usages_coupon")
                                .from(CouponUsages::Table, CouponUsages::CouponId)
                                .to(Coupons::Table, Coupons::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_coupon_usages_coupon_user")
                        .table(CouponUsages::Table)
                        .col(CouponUsages::CouponId)
                        .col(CouponUsages::UserId)
                        .unique()
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(CouponUsages::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Coupons::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Coupons {
        Table,
        Id,
        Code,
        Discount,
        MinPurchase,
        UsageLimit,
        StartDate,
        ExpiryDate,
        Status,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum CouponUsages {
        Table,
        Id,
        CouponId,
        UserId,
        UsageCount,
    }
}

mod m20240101_000005_create_wallet_tables {
    use super::{money, timestamp};
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000005_create_wallet_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Wallets::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Wallets::Id).uuid().not_null().primary_key())
                        .col(ColumnDef::new(Wallets::UserId).uuid().not_null().unique_key())
                        .col(money(Wallets::Balance))
                        .col(money(Wallets::TotalCredits))
                        .col(money(Wallets::MoneyAdded))
                        .col(money(Wallets::TotalSpent))
                        .col(timestamp(Wallets::CreatedAt))
                        .col(timestamp(Wallets::UpdatedAt))
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(WalletTransactions::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(WalletTransactions::Id)
                                .uuid()
                                .not_null()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(WalletTransactions::WalletId).uuid().not_null())
                        .col(
                            ColumnDef::new(WalletTransactions::Direction)
                                .string_len(10)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(WalletTransactions::Status)
                                .string_len(10)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(WalletTransactions::Source)
                                .string_len(20)
                                .not_null(),
                        )
                        .col(ColumnDef::new(WalletTransactions::PaymentMethod).string().null())
                        .col(money(WalletTransactions::Amount))
                        .col(ColumnDef::new(WalletTransactions::OrderId).uuid().null())
                        .col(
                            ColumnDef::new(WalletTransactions::ExternalTransactionId)
                                .string()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(WalletTransactions::Description)
                                .string()
                                .not_null(),
                        )
                        .col(timestamp(WalletTransactions::CreatedAt))
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_wallet_transactions_wallet")
                                .from(WalletTransactions::Table, WalletTransactions::WalletId)
                                .to(Wallets::Table, Wallets::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_wallet_transactions_wallet_id")
                        .table(WalletTransactions::Table)
                        .col(WalletTransactions::WalletId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(WalletTransactions::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Wallets::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Wallets {
        Table,
        Id,
        UserId,
        Balance,
        TotalCredits,
        MoneyAdded,
        TotalSpent,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum WalletTransactions {
        Table,
        Id,
        WalletId,
        Direction,
        Status,
        Source,
        PaymentMethod,
        Amount,
        OrderId,
        ExternalTransactionId,
        Description,
        CreatedAt,
    }
}

mod m20240101_000006_create_order_tables {
    use super::{money, nullable_timestamp, timestamp};
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000006_create_order_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Orders::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Orders::Id).uuid().not_null().primary_key())
                        .col(
                            ColumnDef::new(Orders::OrderNumber)
                                .string_len(40)
                                .not_null()
                                .unique_key(),
                        )
                        .col(ColumnDef::new(Orders::UserId).uuid().not_null())
                        .col(ColumnDef::new(Orders::ShippingAddress).json().not_null())
                        .col(ColumnDef::new(Orders::PaymentMethod).string_len(20).not_null())
                        .col(ColumnDef::new(Orders::PaymentStatus).string_len(20).not_null())
                        .col(ColumnDef::new(Orders::OrderStatus).string_len(20).not_null())
                        .col(money(Orders::Subtotal))
                        .col(money(Orders::DeliveryFee))
                        .col(money(Orders::Discount))
                        .col(money(Orders::TotalAmount))
                        .col(ColumnDef::new(Orders::Coupon).json().null())
                        .col(ColumnDef::new(Orders::GatewayOrderId).string().null())
                        .col(ColumnDef::new(Orders::GatewayPaymentId).string().null())
                        .col(ColumnDef::new(Orders::FailureReason).string().null())
                        .col(timestamp(Orders::EstimatedDelivery))
                        .col(nullable_timestamp(Orders::DeliveredAt))
                        .col(nullable_timestamp(Orders::CancelledAt))
                        .col(ColumnDef::new(Orders::CancelledBy).string_len(10).null())
                        .col(ColumnDef::new(Orders::CancellationReason).string().null())
                        .col(nullable_timestamp(Orders::ReturnedAt))
                        .col(timestamp(Orders::CreatedAt))
                        .col(timestamp(Orders::UpdatedAt))
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_orders_user_id")
                        .table(Orders::Table)
                        .col(Orders::UserId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(OrderItems::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(OrderItems::Id).uuid().not_null().primary_key())
                        .col(ColumnDef::new(OrderItems::OrderId).uuid().not_null())
                        .col(ColumnDef::new(OrderItems::ProductId).uuid().not_null())
                        .col(ColumnDef::new(OrderItems::VariantId).uuid().not_null())
                        .col(ColumnDef::new(OrderItems::Quantity).integer().not_null())
                        .col(money(OrderItems::UnitPrice))
                        .col(money(OrderItems::TotalPrice))
                        .col(money(OrderItems::DiscountShare))
                        .col(money(OrderItems::FinalPrice))
                        .col(ColumnDef::new(OrderItems::ProductSnapshot).json().not_null())
                        .col(
                            ColumnDef::new(OrderItems::Status)
                                .string_len(20)
                                .not_null()
                                .default("active"),
                        )
                        .col(
                            ColumnDef::new(OrderItems::ReturnRequestStatus)
                                .string_len(20)
                                .null(),
                        )
                        .col(ColumnDef::new(OrderItems::ReturnReason).string().null())
                        .col(ColumnDef::new(OrderItems::ReturnRejectionReason).string().null())
                        .col(nullable_timestamp(OrderItems::ReturnRequestedAt))
                        .col(nullable_timestamp(OrderItems::ReturnedAt))
                        .col(ColumnDef::new(OrderItems::ReturnedBy).string_len(10).null())
                        .col(nullable_timestamp(OrderItems::CancelledAt))
                        .col(ColumnDef::new(OrderItems::CancelledBy).string_len(10).null())
                        .col(ColumnDef::new(OrderItems::CancellationReason).string().null())
                        .col(timestamp(OrderItems::CreatedAt))
                        .col(timestamp(OrderItems::UpdatedAt))
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_order_items_order")
                                .from(OrderItems::Table, OrderItems::OrderId)
                                .to(Orders::Table, Orders::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_order_items_order_id")
                        .table(OrderItems::Table)
                        .col(OrderItems::OrderId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(OrderItems::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Orders::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Orders {
        Table,
        Id,
        OrderNumber,
        UserId,
        ShippingAddress,
        PaymentMethod,
        PaymentStatus,
        OrderStatus,
        Subtotal,
        DeliveryFee,
        Discount,
        TotalAmount,
        Coupon,
        GatewayOrderId,
        GatewayPaymentId,
        FailureReason,
        EstimatedDelivery,
        DeliveredAt,
        CancelledAt,
        CancelledBy,
        CancellationReason,
        ReturnedAt,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum OrderItems {
        Table,
        Id,
        OrderId,
        ProductId,
        VariantId,
        Quantity,
        UnitPrice,
        TotalPrice,
        DiscountShare,
        FinalPrice,
        ProductSnapshot,
        Status,
        ReturnRequestStatus,
        ReturnReason,
        ReturnRejectionReason,
        ReturnRequestedAt,
        ReturnedAt,
        ReturnedBy,
        CancelledAt,
        CancelledBy,
        CancellationReason,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240101_000007_create_payment_intent_tables {
    use super::{money, nullable_timestamp, timestamp};
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000007_create_payment_intent_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(PaymentIntents::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(PaymentIntents::Id)
                                .uuid()
                                .not_null()
                                .primary_key(),
                        )
                        .col(
                            ColumnDef::new(PaymentIntents::GatewayOrderId)
                                .string()
                                .not_null()
                                .unique_key(),
                        )
                        .col(ColumnDef::new(PaymentIntents::UserId).uuid().not_null())
                        .col(
                            ColumnDef::new(PaymentIntents::Purpose)
                                .string_len(20)
                                .not_null(),
                        )
                        .col(money(PaymentIntents::Amount))
                        .col(
                            ColumnDef::new(PaymentIntents::Currency)
                                .string_len(3)
                                .not_null(),
                        )
                        .col(ColumnDef::new(PaymentIntents::GatewayPaymentId).string().null())
                        .col(ColumnDef::new(PaymentIntents::OrderId).uuid().null())
                        .col(nullable_timestamp(PaymentIntents::ConsumedAt))
                        .col(timestamp(PaymentIntents::CreatedAt))
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_payment_intents_gateway_payment_id")
                        .table(PaymentIntents::Table)
                        .col(PaymentIntents::GatewayPaymentId)
                        .unique()
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_orders_gateway_payment_id")
                        .table(Orders::Table)
                        .col(Orders::GatewayPaymentId)
                        .unique()
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_wallet_transactions_external_id")
                        .table(WalletTransactions::Table)
                        .col(WalletTransactions::ExternalTransactionId)
                        .unique()
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_index(
                    Index::drop()
                        .name("idx_wallet_transactions_external_id")
                        .table(WalletTransactions::Table)
                        .to_owned(),
                )
                .await?;
            manager
                .drop_index(
                    Index::drop()
                        .name("idx_orders_gateway_payment_id")
                        .table(Orders::Table)
                        .to_owned(),
                )
                .await?;
            manager
                .drop_table(Table::drop().table(PaymentIntents::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum PaymentIntents {
        Table,
        Id,
        GatewayOrderId,
        UserId,
        Purpose,
        Amount,
        Currency,
        GatewayPaymentId,
        OrderId,
        ConsumedAt,
        CreatedAt,
    }

    #[derive(DeriveIden)]
    enum Orders {
        Table,
        GatewayPaymentId,
    }

    #[derive(DeriveIden)]
    enum WalletTransactions {
        Table,
        ExternalTransactionId,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::commerce::{wallet, Wallet};
    use chrono::Utc;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use sea_orm::{ActiveModelTrait, Database, EntityTrait, Set};
    use uuid::Uuid;

    #[tokio::test]
    async fn schema_applies_on_sqlite_and_keeps_money_scale() {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        Migrator::up(&db, None).await.unwrap();

        let now = Utc::now();
        let id = Uuid::new_v4();
        wallet::ActiveModel {
            id: Set(id),
            user_id: Set(Uuid::new_v4()),
            balance: Set(dec!(123456789.1234)),
            total_credits: Set(dec!(123456789.1234)),
            money_added: Set(Decimal::ZERO),
            total_spent: Set(Decimal::ZERO),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&db)
        .await
        .unwrap();

        let stored = Wallet::find_by_id(id).one(&db).await.unwrap().unwrap();
        assert_eq!(stored.balance, dec!(123456789.1234));
    }
}
