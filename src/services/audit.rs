use chrono::Utc;
use sea_orm::{ActiveModelTrait, ConnectionTrait, Set};
use tracing::debug;
use uuid::Uuid;

use crate::entities::{audit_log, order_status_history};
use crate::errors::ServiceError;
use crate::models::status::OrderStatus;

/// One field-level diff for the audit log.
#[derive(Debug, Clone)]
pub struct FieldChange {
    pub field_name: String,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
}

impl FieldChange {
    pub fn new(
        field_name: impl Into<String>,
        old_value: Option<String>,
        new_value: Option<String>,
    ) -> Self {
        Self {
            field_name: field_name.into(),
            old_value,
            new_value,
        }
    }
}

/// Append-only recorder for audit-log and status-history entries.
///
/// All methods take the caller's connection so entries commit or roll back
/// together with the primary mutation.
#[derive(Clone, Default)]
pub struct AuditService;

impl AuditService {
    pub fn new() -> Self {
        Self
    }

    /// Appends one audit entry for a field-level change.
    pub async fn record_change<C: ConnectionTrait>(
        &self,
        conn: &C,
        order_id: Uuid,
        order_line_id: Option<Uuid>,
        user_id: &str,
        action_type: &str,
        change: FieldChange,
        reason: Option<&str>,
    ) -> Result<(), ServiceError> {
        let entry = audit_log::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(order_id),
            order_line_id: Set(order_line_id),
            user_id: Set(user_id.to_string()),
            action_type: Set(action_type.to_string()),
            field_name: Set(Some(change.field_name.clone())),
            old_value: Set(change.old_value),
            new_value: Set(change.new_value),
            reason: Set(reason.map(str::to_string)),
            created_at: Set(Utc::now()),
        };
        entry.insert(conn).await?;
        debug!(%order_id, field = %change.field_name, action = action_type, "Audit entry recorded");
        Ok(())
    }

    /// Appends one audit entry per logically distinct field change.
    pub async fn record_changes<C: ConnectionTrait>(
        &self,
        conn: &C,
        order_id: Uuid,
        order_line_id: Option<Uuid>,
        user_id: &str,
        action_type: &str,
        changes: Vec<FieldChange>,
        reason: Option<&str>,
    ) -> Result<(), ServiceError> {
        for change in changes {
            self.record_change(conn, order_id, order_line_id, user_id, action_type, change, reason)
                .await?;
        }
        Ok(())
    }

    /// Appends one audit entry for an action with no single-field diff
    /// (cancellation cascades, restores).
    pub async fn record_action<C: ConnectionTrait>(
        &self,
        conn: &C,
        order_id: Uuid,
        order_line_id: Option<Uuid>,
        user_id: &str,
        action_type: &str,
        reason: Option<&str>,
    ) -> Result<(), ServiceError> {
        let entry = audit_log::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(order_id),
            order_line_id: Set(order_line_id),
            user_id: Set(user_id.to_string()),
            action_type: Set(action_type.to_string()),
            field_name: Set(None),
            old_value: Set(None),
            new_value: Set(None),
            reason: Set(reason.map(str::to_string)),
            created_at: Set(Utc::now()),
        };
        entry.insert(conn).await?;
        Ok(())
    }

    /// Appends one status-history entry for a status transition.
    pub async fn record_status<C: ConnectionTrait>(
        &self,
        conn: &C,
        order_id: Uuid,
        status: OrderStatus,
        changed_by: &str,
        notes: Option<&str>,
    ) -> Result<(), ServiceError> {
        let entry = order_status_history::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(order_id),
            status_code: Set(status.code().to_string()),
            changed_by: Set(changed_by.to_string()),
            notes: Set(notes.map(str::to_string)),
            created_at: Set(Utc::now()),
        };
        entry.insert(conn).await?;
        debug!(%order_id, status = status.code(), "Status history recorded");
        Ok(())
    }
}
