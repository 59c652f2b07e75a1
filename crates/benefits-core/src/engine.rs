use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{BenefitsError, BenefitsResult};
use crate::models::{
    ApprovalAction, ApprovalRecord, CancellationRecord, RequestSnapshot, RequestStatus,
    RequestType,
};
use crate::notify::{Notification, NotificationDispatcher};
use crate::storage::{WorkflowStore, WorkflowTx};
use crate::workflow::{
    authorize_approver, ensure_awaiting, ensure_cancellable, policy_for, validate_comment,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionCommand {
    pub request_type: RequestType,
    pub request_id: Uuid,
    pub actor_id: String,
    pub action: ApprovalAction,
    pub comment: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DecisionReceipt {
    pub request_type: RequestType,
    pub request_id: Uuid,
    pub status: RequestStatus,
    pub current_approval_level: i32,
    pub approval_record_id: Uuid,
    pub notified: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancellationCommand {
    pub request_type: RequestType,
    pub request_id: Uuid,
    pub employee_id: String,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CancellationReceipt {
    pub request_type: RequestType,
    pub request_id: Uuid,
    pub status: RequestStatus,
    pub cancellation_id: Uuid,
    pub notified: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApprovalTrail {
    pub request: RequestSnapshot,
    pub approvals: Vec<ApprovalRecord>,
    pub cancellations: Vec<CancellationRecord>,
}

/// Sequential approval chain over every request type.
pub struct ApprovalEngine<S, N> {
    store: S,
    notifier: N,
}

impl<S, N> ApprovalEngine<S, N>
where
    S: WorkflowStore,
    N: NotificationDispatcher,
{
    pub fn new(store: S, notifier: N) -> Self {
        Self { store, notifier }
    }

    /// Records one approver's decision and moves the request along its chain.
    ///
    /// The approval record, the request update and any final-approval side effect are
    /// committed together. Notifications go out only after the commit and never fail the
    /// decision.
    pub async fn decide(&self, command: DecisionCommand) -> BenefitsResult<DecisionReceipt> {
        let policy = policy_for(command.request_type);
        let mut tx = self.store.begin().await?;

        let approver = authorize_approver(
            tx.approver(&command.actor_id).await?,
            &command.actor_id,
        )?;
        let comment = validate_comment(command.action, command.comment.as_deref())?;

        let request = tx
            .lock_request(command.request_type, command.request_id)
            .await?
            .ok_or_else(|| {
                BenefitsError::NotFound(format!(
                    "{} request {}",
                    command.request_type.as_str(),
                    command.request_id
                ))
            })?;
        ensure_awaiting(&request, &approver)?;

        if tx
            .approval_exists(request.request_type, request.id, approver.numeric_level)
            .await?
        {
            return Err(BenefitsError::Conflict(format!(
                "level {} already decided this request",
                approver.numeric_level
            )));
        }

        let transition = policy.transition(request.current_approval_level, command.action);
        let decided_at = Utc::now();
        let record = ApprovalRecord {
            id: Uuid::new_v4(),
            request_type: request.request_type,
            request_id: request.id,
            approval_level: approver.numeric_level,
            approver_id: approver.employee_id.clone(),
            status: command.action.decision_status(),
            comment: comment.clone(),
            decided_at,
        };

        tx.insert_approval(&record).await?;
        tx.update_request_state(
            request.request_type,
            request.id,
            transition.status,
            transition.level,
            decided_at,
        )
        .await?;

        if transition.final_approval {
            let plan = policy.effect.plan(&request, &approver, decided_at)?;
            tx.apply_effect(request.request_type, request.id, &plan)
                .await?;
            info!(
                "{} effect planned for {} request {}",
                policy.effect.name(),
                request.request_type.as_str(),
                request.id
            );
        }

        tx.commit().await?;

        info!(
            "{} request {} {} at level {} by {}; now {} at level {}",
            request.request_type.as_str(),
            request.id,
            record.status.as_str(),
            record.approval_level,
            record.approver_id,
            transition.status.as_str(),
            transition.level
        );

        let mut notifications = Vec::new();
        if transition.status != RequestStatus::Pending {
            notifications.push(Notification::DecisionReached {
                request_type: request.request_type,
                request_id: request.id,
                employee_id: request.employee_id.clone(),
                status: transition.status,
                decided_by: approver.employee_id.clone(),
                comment,
            });
        } else if transition.level > request.current_approval_level {
            notifications.push(Notification::AwaitingApproval {
                request_type: request.request_type,
                request_id: request.id,
                approval_level: transition.level,
            });
        }
        let notified = self.notify_all(&notifications).await;

        Ok(DecisionReceipt {
            request_type: request.request_type,
            request_id: request.id,
            status: transition.status,
            current_approval_level: transition.level,
            approval_record_id: record.id,
            notified,
        })
    }

    /// Employee withdrawal of their own request. Written as a cancellation record, never as
    /// an approver decision.
    pub async fn cancel(
        &self,
        command: CancellationCommand,
    ) -> BenefitsResult<CancellationReceipt> {
        let policy = policy_for(command.request_type);
        let mut tx = self.store.begin().await?;

        let request = tx
            .lock_request(command.request_type, command.request_id)
            .await?
            .ok_or_else(|| {
                BenefitsError::NotFound(format!(
                    "{} request {}",
                    command.request_type.as_str(),
                    command.request_id
                ))
            })?;
        ensure_cancellable(policy, &request, &command.employee_id)?;

        let cancelled_at = Utc::now();
        let record = CancellationRecord {
            id: Uuid::new_v4(),
            request_type: request.request_type,
            request_id: request.id,
            cancelled_by: command.employee_id.clone(),
            level_at_cancellation: request.current_approval_level,
            previous_status: request.status,
            reason: command
                .reason
                .as_deref()
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_string),
            cancelled_at,
        };

        tx.insert_cancellation(&record).await?;
        tx.update_request_state(
            request.request_type,
            request.id,
            RequestStatus::Cancelled,
            request.current_approval_level,
            cancelled_at,
        )
        .await?;
        tx.commit().await?;

        info!(
            "{} request {} cancelled by {} (was {})",
            request.request_type.as_str(),
            request.id,
            record.cancelled_by,
            request.status.as_str()
        );

        let mut notifications = Vec::new();
        if request.status == RequestStatus::Pending {
            notifications.push(Notification::RequestWithdrawn {
                request_type: request.request_type,
                request_id: request.id,
                employee_id: request.employee_id.clone(),
                approval_level: request.current_approval_level,
            });
        }
        let notified = self.notify_all(&notifications).await;

        Ok(CancellationReceipt {
            request_type: request.request_type,
            request_id: request.id,
            status: RequestStatus::Cancelled,
            cancellation_id: record.id,
            notified,
        })
    }

    pub async fn approval_trail(
        &self,
        request_type: RequestType,
        request_id: Uuid,
    ) -> BenefitsResult<ApprovalTrail> {
        let mut tx = self.store.begin().await?;
        let request = tx
            .read_request(request_type, request_id)
            .await?
            .ok_or_else(|| {
                BenefitsError::NotFound(format!("{} request {request_id}", request_type.as_str()))
            })?;
        let approvals = tx.approvals(request_type, request_id).await?;
        let cancellations = tx.cancellations(request_type, request_id).await?;
        tx.commit().await?;

        Ok(ApprovalTrail {
            request,
            approvals,
            cancellations,
        })
    }

    async fn notify_all(&self, notifications: &[Notification]) -> bool {
        let mut delivered = false;
        for notification in notifications {
            match self.notifier.dispatch(notification).await {
                Ok(()) => delivered = true,
                Err(err) => warn!("notification dispatch failed: {err:#}"),
            }
        }
        delivered
    }
}
