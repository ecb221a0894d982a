use serde::{Deserialize, Serialize};
use strum::EnumIter;
use thiserror::Error;

/// Order lifecycle status, stored as a two-digit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumIter)]
pub enum OrderStatus {
    /// '01' — intake still assembling the order
    New,
    /// '02' — under human review
    UnderReview,
    /// '03' — reviewed, at least one change made
    ReviewedWithChanges,
    /// '04' — posted, ERP upload in process
    UploadInProcess,
    /// '05' — ERP accepted and assigned an order number (terminal success)
    UploadSuccessful,
    /// '06' — cancelled (terminal negative, restorable)
    Cancelled,
}

impl OrderStatus {
    pub fn code(&self) -> &'static str {
        match self {
            OrderStatus::New => "01",
            OrderStatus::UnderReview => "02",
            OrderStatus::ReviewedWithChanges => "03",
            OrderStatus::UploadInProcess => "04",
            OrderStatus::UploadSuccessful => "05",
            OrderStatus::Cancelled => "06",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "01" => Some(OrderStatus::New),
            "02" => Some(OrderStatus::UnderReview),
            "03" => Some(OrderStatus::ReviewedWithChanges),
            "04" => Some(OrderStatus::UploadInProcess),
            "05" => Some(OrderStatus::UploadSuccessful),
            "06" => Some(OrderStatus::Cancelled),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            OrderStatus::New => "New",
            OrderStatus::UnderReview => "Under Review",
            OrderStatus::ReviewedWithChanges => "Reviewed With Changes",
            OrderStatus::UploadInProcess => "Upload In Process",
            OrderStatus::UploadSuccessful => "Upload Successful",
            OrderStatus::Cancelled => "Cancelled",
        }
    }

    /// No edits of any kind are allowed once the order reaches these states.
    pub fn is_locked_for_editing(&self) -> bool {
        matches!(
            self,
            OrderStatus::UploadInProcess | OrderStatus::UploadSuccessful | OrderStatus::Cancelled
        )
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.code(), self.label())
    }
}

/// Actions the lifecycle state machine evaluates.
///
/// `Mutation` covers every qualifying edit: line added/cancelled/restored,
/// price applied/reverted, header or line field edited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderAction {
    Mutation,
    AddLine,
    Post,
    Cancel,
    Restore,
    RecordErpNumber,
}

impl OrderAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderAction::Mutation => "mutation",
            OrderAction::AddLine => "add_line",
            OrderAction::Post => "post",
            OrderAction::Cancel => "cancel",
            OrderAction::Restore => "restore",
            OrderAction::RecordErpNumber => "record_erp_number",
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("action '{}' is not allowed in status '{from}'", action.as_str())]
pub struct TransitionDenied {
    pub from: OrderStatus,
    pub action: OrderAction,
}

/// The single transition table for the order lifecycle.
///
/// `Ok(Some(next))` means the action is allowed and moves the order to
/// `next`; `Ok(None)` means the action is allowed with no status change.
/// Data-dependent guards (ERP number already assigned, restore-reason length)
/// are enforced by the lifecycle service, not here.
pub fn transition(
    from: OrderStatus,
    action: OrderAction,
) -> Result<Option<OrderStatus>, TransitionDenied> {
    use OrderAction::*;
    use OrderStatus::*;

    match (from, action) {
        // Qualifying mutations flip 02 to 03 exactly once; in 01 the order is
        // still being assembled, in 03 the flag is already set.
        (New, Mutation) => Ok(None),
        (UnderReview, Mutation) => Ok(Some(ReviewedWithChanges)),
        (ReviewedWithChanges, Mutation) => Ok(None),

        // Add line is itself a qualifying mutation.
        (New, AddLine) => Ok(None),
        (UnderReview, AddLine) => Ok(Some(ReviewedWithChanges)),
        (ReviewedWithChanges, AddLine) => Ok(None),

        (UnderReview, Post) | (ReviewedWithChanges, Post) => Ok(Some(UploadInProcess)),

        (New, Cancel) | (UnderReview, Cancel) | (ReviewedWithChanges, Cancel) => {
            Ok(Some(Cancelled))
        }

        // The only backward transition.
        (Cancelled, Restore) => Ok(Some(UnderReview)),

        (UploadInProcess, RecordErpNumber) => Ok(Some(UploadSuccessful)),

        _ => Err(TransitionDenied { from, action }),
    }
}
