use crate::{
    db::with_transaction,
    entities::{
        commerce::{
            wallet, wallet_transaction, Direction, LedgerSource, LedgerStatus, Wallet,
            WalletModel, WalletTransaction, WalletTransactionModel,
        },
        IntentPurpose,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        payment_gateway::{GatewayProof, PaymentGateway},
        payment_intents::{self, GatewayIntent},
    },
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection,
    EntityTrait, QueryFilter, QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;
use validator::Validate;

#[derive(Clone)]
pub struct WalletService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
    gateway: Arc<dyn PaymentGateway>,
    currency: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletView {
    pub balance: Decimal,
    pub total_credits: Decimal,
    pub money_added: Decimal,
    pub total_spent: Decimal,
    pub transactions: Vec<WalletTransactionModel>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopUpIntentInput {
    pub amount: Decimal,
}

/// Proof of a completed top-up payment. The credited amount is the one the
/// top-up intent was created for.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AddMoneyInput {
    #[serde(flatten)]
    #[validate]
    pub proof: GatewayProof,
}

/// Ledger entry to append alongside a balance change.
#[derive(Debug, Clone)]
pub struct LedgerEntry {
    pub source: LedgerSource,
    pub amount: Decimal,
    pub order_id: Option<Uuid>,
    pub payment_method: Option<String>,
    pub external_transaction_id: Option<String>,
    pub description: String,
}

impl WalletService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        gateway: Arc<dyn PaymentGateway>,
        currency: String,
    ) -> Self {
        Self {
            db,
            event_sender,
            gateway,
            currency,
        }
    }

    pub async fn get_or_create<C: ConnectionTrait>(
        conn: &C,
        user_id: Uuid,
    ) -> Result<WalletModel, ServiceError> {
        if let Some(existing) = Wallet::find()
            .filter(wallet::Column::UserId.eq(user_id))
            .one(conn)
            .await?
        {
            return Ok(existing);
        }

        let now = Utc::now();
        Ok(wallet::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            balance: Set(Decimal::ZERO),
            total_credits: Set(Decimal::ZERO),
            money_added: Set(Decimal::ZERO),
            total_spent: Set(Decimal::ZERO),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(conn)
        .await?)
    }

    pub async fn balance<C: ConnectionTrait>(
        conn: &C,
        user_id: Uuid,
    ) -> Result<Decimal, ServiceError> {
        Ok(Wallet::find()
            .filter(wallet::Column::UserId.eq(user_id))
            .one(conn)
            .await?
            .map(|w| w.balance)
            .unwrap_or(Decimal::ZERO))
    }

    /// Balance and ledger, newest entries first.
    #[instrument(skip(self))]
    pub async fn get_wallet(&self, user_id: Uuid) -> Result<WalletView, ServiceError> {
        let db = &*self.db;
        let w = Self::get_or_create(db, user_id).await?;
        let transactions = WalletTransaction::find()
            .filter(wallet_transaction::Column::WalletId.eq(w.id))
            .order_by_desc(wallet_transaction::Column::CreatedAt)
            .all(db)
            .await?;

        Ok(WalletView {
            balance: w.balance,
            total_credits: w.total_credits,
            money_added: w.money_added,
            total_spent: w.total_spent,
            transactions,
        })
    }

    /// Opens a gateway payment for a wallet top-up of `amount`.
    #[instrument(skip(self, input), fields(amount = %input.amount))]
    pub async fn create_top_up_intent(
        &self,
        user_id: Uuid,
        input: TopUpIntentInput,
    ) -> Result<GatewayIntent, ServiceError> {
        if input.amount <= Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "Amount must be greater than zero".into(),
            ));
        }
        payment_intents::create_intent(
            &*self.db,
            &*self.gateway,
            user_id,
            IntentPurpose::WalletTopUp,
            input.amount,
            &self.currency,
        )
        .await
    }

    /// Credits a verified top-up payment with the amount of its intent.
    #[instrument(skip(self, input), fields(gateway_order_id = %input.proof.gateway_order_id))]
    pub async fn add_money(
        &self,
        user_id: Uuid,
        input: AddMoneyInput,
    ) -> Result<WalletView, ServiceError> {
        input.validate()?;
        if !self.gateway.verify_signature(&input.proof) {
            return Err(ServiceError::payment_verification(
                "Payment signature mismatch",
            ));
        }

        let proof = input.proof;
        let amount = with_transaction(&self.db, move |txn| {
            Box::pin(async move {
                let intent = payment_intents::find_open(
                    txn,
                    user_id,
                    IntentPurpose::WalletTopUp,
                    &proof,
                    None,
                )
                .await?;
                payment_intents::consume(txn, &proof, None).await?;

                Self::credit(
                    txn,
                    user_id,
                    LedgerEntry {
                        source: LedgerSource::AddMoney,
                        amount: intent.amount,
                        order_id: None,
                        payment_method: Some("gateway".into()),
                        external_transaction_id: Some(proof.gateway_payment_id.clone()),
                        description: "Money added to wallet".into(),
                    },
                )
                .await?;
                Ok(intent.amount)
            })
        })
        .await?;

        info!(%user_id, %amount, "Wallet topped up");
        self.event_sender
            .send_or_log(Event::WalletCredited {
                user_id,
                amount,
                source: "add_money".into(),
            })
            .await;

        self.get_wallet(user_id).await
    }

    /// Credits the wallet and appends the matching ledger entry.
    pub async fn credit<C: ConnectionTrait>(
        conn: &C,
        user_id: Uuid,
        entry: LedgerEntry,
    ) -> Result<(), ServiceError> {
        let w = Self::get_or_create(conn, user_id).await?;

        let mut update = Wallet::update_many()
            .col_expr(
                wallet::Column::Balance,
                Expr::col(wallet::Column::Balance).add(entry.amount),
            )
            .col_expr(
                wallet::Column::TotalCredits,
                Expr::col(wallet::Column::TotalCredits).add(entry.amount),
            )
            .col_expr(wallet::Column::UpdatedAt, Expr::value(Utc::now()));
        if entry.source == LedgerSource::AddMoney {
            update = update.col_expr(
                wallet::Column::MoneyAdded,
                Expr::col(wallet::Column::MoneyAdded).add(entry.amount),
            );
        }
        update
            .filter(wallet::Column::Id.eq(w.id))
            .exec(conn)
            .await?;

        Self::append_ledger(conn, w.id, Direction::Credit, entry).await
    }

    /// Debits the wallet, refusing to take the balance below zero.
    pub async fn debit<C: ConnectionTrait>(
        conn: &C,
        user_id: Uuid,
        entry: LedgerEntry,
    ) -> Result<(), ServiceError> {
        let w = Wallet::find()
            .filter(wallet::Column::UserId.eq(user_id))
            .one(conn)
            .await?
            .ok_or_else(|| {
                ServiceError::InsufficientWalletBalance("Your wallet has no balance".into())
            })?;

        let result = Wallet::update_many()
            .col_expr(
                wallet::Column::Balance,
                Expr::col(wallet::Column::Balance).sub(entry.amount),
            )
            .col_expr(
                wallet::Column::TotalSpent,
                Expr::col(wallet::Column::TotalSpent).add(entry.amount),
            )
            .col_expr(wallet::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(wallet::Column::Id.eq(w.id))
            .filter(wallet::Column::Balance.gte(entry.amount))
            .exec(conn)
            .await?;

        if result.rows_affected == 0 {
            return Err(ServiceError::InsufficientWalletBalance(format!(
                "Wallet balance {} is less than {}",
                w.balance.normalize(),
                entry.amount.normalize()
            )));
        }

        Self::append_ledger(conn, w.id, Direction::Debit, entry).await
    }

    async fn append_ledger<C: ConnectionTrait>(
        conn: &C,
        wallet_id: Uuid,
        direction: Direction,
        entry: LedgerEntry,
    ) -> Result<(), ServiceError> {
        wallet_transaction::ActiveModel {
            id: Set(Uuid::new_v4()),
            wallet_id: Set(wallet_id),
            direction: Set(direction),
            status: Set(LedgerStatus::Success),
            source: Set(entry.source),
            payment_method: Set(entry.payment_method),
            amount: Set(entry.amount),
            order_id: Set(entry.order_id),
            external_transaction_id: Set(entry.external_transaction_id),
            description: Set(entry.description),
            created_at: Set(Utc::now()),
        }
        .insert(conn)
        .await?;
        Ok(())
    }
}
