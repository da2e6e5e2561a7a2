use sea_orm_migration::prelude::*;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240601_000001_create_packages_table::Migration),
            Box::new(m20240601_000002_create_coupons_table::Migration),
            Box::new(m20240601_000003_create_orders_table::Migration),
            Box::new(m20240601_000004_create_coupon_usages_table::Migration),
            Box::new(m20240601_000005_create_payments_table::Migration),
        ]
    }
}

mod m20240601_000001_create_packages_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000001_create_packages_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Packages::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Packages::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Packages::Name).string().not_null())
                        .col(ColumnDef::new(Packages::Price).big_integer().not_null())
                        .col(
                            ColumnDef::new(Packages::IsActive)
                                .boolean()
                                .not_null()
                                .default(true),
                        )
                        .col(
                            ColumnDef::new(Packages::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Packages::UpdatedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Packages::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Packages {
        Table,
        Id,
        Name,
        Price,
        IsActive,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240601_000002_create_coupons_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000002_create_coupons_table"
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
                        .col(ColumnDef::new(Coupons::Id).uuid().primary_key().not_null())
                        .col(
                            ColumnDef::new(Coupons::Code)
                                .string_len(64)
                                .not_null()
                                .unique_key(),
                        )
                        .col(ColumnDef::new(Coupons::DiscountType).string_len(32).not_null())
                        .col(ColumnDef::new(Coupons::Value).big_integer().not_null())
                        .col(
                            ColumnDef::new(Coupons::MinimumAmount)
                                .big_integer()
                                .not_null()
                                .default(0),
                        )
                        .col(ColumnDef::new(Coupons::MaximumDiscount).big_integer().null())
                        .col(ColumnDef::new(Coupons::UsageLimit).integer().null())
                        .col(
                            ColumnDef::new(Coupons::UsageCount)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(ColumnDef::new(Coupons::UserLimit).integer().null())
                        .col(
                            ColumnDef::new(Coupons::StartsAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(Coupons::ExpiresAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(ColumnDef::new(Coupons::ApplicablePackages).json().null())
                        .col(ColumnDef::new(Coupons::ApplicableUsers).json().null())
                        .col(
                            ColumnDef::new(Coupons::IsActive)
                                .boolean()
                                .not_null()
                                .default(true),
                        )
                        .col(
                            ColumnDef::new(Coupons::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Coupons::UpdatedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
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
        DiscountType,
        Value,
        MinimumAmount,
        MaximumDiscount,
        UsageLimit,
        UsageCount,
        UserLimit,
        StartsAt,
        ExpiresAt,
        ApplicablePackages,
        ApplicableUsers,
        IsActive,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240601_000003_create_orders_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000003_create_orders_table"
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
                        .col(ColumnDef::new(Orders::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Orders::UserId).uuid().not_null())
                        .col(ColumnDef::new(Orders::PackageId).uuid().not_null())
                        .col(ColumnDef::new(Orders::TotalPrice).big_integer().not_null())
                        .col(
                            ColumnDef::new(Orders::UniquePrice)
                                .big_integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(Orders::DiscountAmount)
                                .big_integer()
                                .not_null()
                                .default(0),
                        )
                        .col(ColumnDef::new(Orders::CouponId).uuid().null())
                        .col(ColumnDef::new(Orders::PaymentType).string_len(32).null())
                        .col(ColumnDef::new(Orders::Status).string_len(32).not_null())
                        .col(
                            ColumnDef::new(Orders::IsPaid)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(
                            ColumnDef::new(Orders::PaidAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(Orders::IsVoid)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(
                            ColumnDef::new(Orders::VoidAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(Orders::ExpiredAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(ColumnDef::new(Orders::ExternalTransactionId).string().null())
                        .col(
                            ColumnDef::new(Orders::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Orders::UpdatedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
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
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_orders_status")
                        .table(Orders::Table)
                        .col(Orders::Status)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Orders::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Orders {
        Table,
        Id,
        UserId,
        PackageId,
        TotalPrice,
        UniquePrice,
        DiscountAmount,
        CouponId,
        PaymentType,
        Status,
        IsPaid,
        PaidAt,
        IsVoid,
        VoidAt,
        ExpiredAt,
        ExternalTransactionId,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240601_000004_create_coupon_usages_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000004_create_coupon_usages_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(CouponUsages::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(CouponUsages::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(CouponUsages::CouponId).uuid().not_null())
                        .col(ColumnDef::new(CouponUsages::UserId).uuid().not_null())
                        // one usage per order, whatever the coupon
                        .col(
                            ColumnDef::new(CouponUsages::OrderId)
                                .uuid()
                                .not_null()
                                .unique_key(),
                        )
                        .col(
                            ColumnDef::new(CouponUsages::DiscountAmount)
                                .big_integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(CouponUsages::OrderAmount)
                                .big_integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(CouponUsages::UsedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
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
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(CouponUsages::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum CouponUsages {
        Table,
        Id,
        CouponId,
        UserId,
        OrderId,
        DiscountAmount,
        OrderAmount,
        UsedAt,
    }
}

mod m20240601_000005_create_payments_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000005_create_payments_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Payments::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Payments::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Payments::OrderId).uuid().not_null())
                        .col(ColumnDef::new(Payments::PaymentMethod).string_len(32).not_null())
                        .col(ColumnDef::new(Payments::PaymentChannel).string().null())
                        .col(ColumnDef::new(Payments::GatewaySource).string_len(32).not_null())
                        .col(ColumnDef::new(Payments::PaymentStatus).string_len(32).not_null())
                        .col(ColumnDef::new(Payments::TransactionType).string_len(32).not_null())
                        .col(ColumnDef::new(Payments::Amount).big_integer().not_null())
                        .col(ColumnDef::new(Payments::Currency).string_len(3).not_null())
                        .col(
                            ColumnDef::new(Payments::CorrelationId)
                                .string_len(64)
                                .not_null()
                                .unique_key(),
                        )
                        .col(ColumnDef::new(Payments::GatewayReference).string().null())
                        .col(ColumnDef::new(Payments::PaymentUrl).text().null())
                        .col(ColumnDef::new(Payments::CallbackResponse).json().null())
                        .col(
                            ColumnDef::new(Payments::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Payments::UpdatedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_payments_order_id")
                        .table(Payments::Table)
                        .col(Payments::OrderId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_payments_gateway_reference")
                        .table(Payments::Table)
                        .col(Payments::GatewayReference)
                        .to_owned(),
                )
                .await?;

            // At most one settled payment per order. Partial indexes are not
            // expressible through the index builder.
            manager
                .get_connection()
                .execute_unprepared(
                    "CREATE UNIQUE INDEX IF NOT EXISTS uq_payments_settled_order \
                     ON payments (order_id) WHERE payment_status = 'settlement'",
                )
                .await?;

            Ok(())
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Payments::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Payments {
        Table,
        Id,
        OrderId,
        PaymentMethod,
        PaymentChannel,
        GatewaySource,
        PaymentStatus,
        TransactionType,
        Amount,
        Currency,
        CorrelationId,
        GatewayReference,
        PaymentUrl,
        CallbackResponse,
        CreatedAt,
        UpdatedAt,
    }
}
