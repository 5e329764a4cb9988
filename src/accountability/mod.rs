//! Four-perspective task sign-off.
//!
//! Every unit of work carries one record tracking the decisions of four
//! fixed perspectives: product, dev, qa, and the AI agent. A veto by
//! any perspective is a hard stop no autonomy level can override. Each
//! sign-off recomputes the blocked state, whether work may proceed
//! under the current AI mode, and a 0-100 risk score, then persists the
//! record and an immutable receipt in one transaction.

pub mod ai_mode;

pub use ai_mode::{
    assess_complexity, mode_for_risk_score, should_escalate, AiMode, AiModeEngine,
    ComplexityAssessment, ModeThresholds,
};

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::broadcast;
use tracing::info;

use crate::db::accountability::{self as task_db, TaskRow};
use crate::db::StoreDb;
use crate::error::CoreError;
use crate::events::Envelope;

/// The four fixed sign-off perspectives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Perspective {
    Product,
    Dev,
    Qa,
    AiAgent,
}

impl Perspective {
    /// Iteration order used when looking for the first veto
    pub const ALL: [Perspective; 4] = [
        Perspective::Product,
        Perspective::Dev,
        Perspective::Qa,
        Perspective::AiAgent,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Perspective::Product => "product",
            Perspective::Dev => "dev",
            Perspective::Qa => "qa",
            Perspective::AiAgent => "ai_agent",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "product" => Some(Perspective::Product),
            "dev" => Some(Perspective::Dev),
            "qa" => Some(Perspective::Qa),
            "ai_agent" => Some(Perspective::AiAgent),
            _ => None,
        }
    }
}

/// Per-perspective decision state. Approved and vetoed are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignOffStatus {
    Pending,
    Approved,
    Vetoed,
}

impl SignOffStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignOffStatus::Pending => "pending",
            SignOffStatus::Approved => "approved",
            SignOffStatus::Vetoed => "vetoed",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "approved" => SignOffStatus::Approved,
            "vetoed" => SignOffStatus::Vetoed,
            _ => SignOffStatus::Pending,
        }
    }
}

/// Decision state of one human perspective
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerspectiveState {
    pub status: SignOffStatus,
    pub signed_by: Option<String>,
    pub signed_at: Option<String>,
    pub notes: Option<String>,
    pub veto_reason: Option<String>,
}

impl Default for PerspectiveState {
    fn default() -> Self {
        Self {
            status: SignOffStatus::Pending,
            signed_by: None,
            signed_at: None,
            notes: None,
            veto_reason: None,
        }
    }
}

/// The AI perspective carries its autonomy mode and a confidence level
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AiPerspectiveState {
    pub status: SignOffStatus,
    pub signed_by: Option<String>,
    pub signed_at: Option<String>,
    pub notes: Option<String>,
    pub veto_reason: Option<String>,
    pub mode: AiMode,
    pub confidence: Option<f64>,
}

impl Default for AiPerspectiveState {
    fn default() -> Self {
        Self {
            status: SignOffStatus::Pending,
            signed_by: None,
            signed_at: None,
            notes: None,
            veto_reason: None,
            // Most conservative mode until evaluated otherwise
            mode: AiMode::Consultative,
            confidence: None,
        }
    }
}

/// Fixed set of perspectives; named fields keep the blocked and
/// can-proceed computations exhaustive at compile time
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FourPerspectives {
    pub product: PerspectiveState,
    pub dev: PerspectiveState,
    pub qa: PerspectiveState,
    pub ai_agent: AiPerspectiveState,
}

impl FourPerspectives {
    pub fn new() -> Self {
        Self {
            product: PerspectiveState::default(),
            dev: PerspectiveState::default(),
            qa: PerspectiveState::default(),
            ai_agent: AiPerspectiveState::default(),
        }
    }

    pub fn status_of(&self, perspective: Perspective) -> SignOffStatus {
        match perspective {
            Perspective::Product => self.product.status,
            Perspective::Dev => self.dev.status,
            Perspective::Qa => self.qa.status,
            Perspective::AiAgent => self.ai_agent.status,
        }
    }

    fn veto_reason_of(&self, perspective: Perspective) -> Option<String> {
        match perspective {
            Perspective::Product => self.product.veto_reason.clone(),
            Perspective::Dev => self.dev.veto_reason.clone(),
            Perspective::Qa => self.qa.veto_reason.clone(),
            Perspective::AiAgent => self.ai_agent.veto_reason.clone(),
        }
    }

    /// First vetoing perspective in fixed iteration order
    pub fn first_veto(&self) -> Option<Perspective> {
        Perspective::ALL
            .into_iter()
            .find(|p| self.status_of(*p) == SignOffStatus::Vetoed)
    }
}

impl Default for FourPerspectives {
    fn default() -> Self {
        Self::new()
    }
}

/// Immutable record of one sign-off decision
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignOffReceipt {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub task_id: String,
    pub perspective: Perspective,
    pub decision: SignOffStatus,
    pub signed_by: String,
    pub timestamp: String,
    pub notes: Option<String>,
}

/// Parameters of one sign-off
#[derive(Debug, Clone)]
pub struct SignOff {
    pub perspective: Perspective,
    pub decision: SignOffStatus,
    pub signed_by: String,
    pub notes: Option<String>,
    /// AI perspective only
    pub confidence: Option<f64>,
}

pub struct AccountabilityEngine {
    db: Arc<StoreDb>,
    events: Option<broadcast::Sender<Envelope>>,
}

impl AccountabilityEngine {
    pub fn new(db: Arc<StoreDb>) -> Self {
        Self { db, events: None }
    }

    /// Attach a channel for sign-off and block/unblock notices
    pub fn with_events(mut self, events: broadcast::Sender<Envelope>) -> Self {
        self.events = Some(events);
        self
    }

    fn emit(&self, event_type: &str, data: serde_json::Value) {
        if let Some(tx) = &self.events {
            // Send fails only with zero subscribers
            let _ = tx.send(Envelope::new(
                event_type,
                data,
                Some("accountability".to_string()),
            ));
        }
    }

    /// Scaffold a pending four-perspective record for a unit of work
    pub fn create_task(&self, task_id: &str, slug: &str) -> Result<TaskRow, CoreError> {
        self.db.with_conn(|conn| {
            task_db::insert_task(conn, task_id, slug, &FourPerspectives::new())?;
            info!(task_id, slug, "Created accountability record");
            task_db::get_task(conn, task_id)?
                .ok_or_else(|| CoreError::TaskNotFound(task_id.to_string()))
        })
    }

    pub fn get_task(&self, task_id: &str) -> Result<TaskRow, CoreError> {
        self.db.with_conn(|conn| {
            task_db::get_task(conn, task_id)?
                .ok_or_else(|| CoreError::TaskNotFound(task_id.to_string()))
        })
    }

    pub fn list_tasks(&self) -> Result<Vec<TaskRow>, CoreError> {
        self.db.with_conn(task_db::list_tasks)
    }

    pub fn complete_task(&self, task_id: &str) -> Result<TaskRow, CoreError> {
        self.db.with_conn(|conn| {
            if !task_db::set_completed(conn, task_id)? {
                return Err(CoreError::TaskNotFound(task_id.to_string()));
            }
            task_db::get_task(conn, task_id)?
                .ok_or_else(|| CoreError::TaskNotFound(task_id.to_string()))
        })
    }

    pub fn receipts_for(&self, task_id: &str) -> Result<Vec<SignOffReceipt>, CoreError> {
        self.db.with_conn(|conn| task_db::receipts_for(conn, task_id))
    }

    /// Record one perspective's decision and recompute the task state.
    /// Fully applies or fully rejects; the record update and the receipt
    /// share one transaction.
    pub fn record_sign_off(&self, task_id: &str, sign_off: SignOff) -> Result<TaskRow, CoreError> {
        if sign_off.decision == SignOffStatus::Pending {
            return Err(CoreError::Internal(
                "sign-off decision must be approved or vetoed".to_string(),
            ));
        }

        let (task, was_blocked) = self.db.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let mut task = task_db::get_task(&tx, task_id)?
                .ok_or_else(|| CoreError::TaskNotFound(task_id.to_string()))?;
            let was_blocked = task.blocked;

            if task.perspectives.status_of(sign_off.perspective) != SignOffStatus::Pending {
                return Err(CoreError::AlreadySignedOff(format!(
                    "{} on task {}",
                    sign_off.perspective.as_str(),
                    task_id
                )));
            }

            let now = chrono::Utc::now().to_rfc3339();
            apply_decision(&mut task.perspectives, &sign_off, &now);

            task.blocked_by = task.perspectives.first_veto();
            task.blocked = task.blocked_by.is_some();
            task.blocked_reason = task
                .blocked_by
                .and_then(|p| task.perspectives.veto_reason_of(p));
            task.can_proceed = compute_can_proceed(&task.perspectives, task.blocked);
            task.risk_score = compute_risk_score(&task.perspectives, task.can_proceed);

            task_db::update_task(&tx, &task)?;
            task_db::insert_receipt(
                &tx,
                &SignOffReceipt {
                    id: None,
                    task_id: task_id.to_string(),
                    perspective: sign_off.perspective,
                    decision: sign_off.decision,
                    signed_by: sign_off.signed_by.clone(),
                    timestamp: now,
                    notes: sign_off.notes.clone(),
                },
            )?;

            tx.commit()?;

            info!(
                task_id,
                perspective = sign_off.perspective.as_str(),
                decision = sign_off.decision.as_str(),
                risk_score = task.risk_score,
                can_proceed = task.can_proceed,
                "Recorded sign-off"
            );
            Ok((task, was_blocked))
        })?;

        self.emit(
            "sign_off_recorded",
            json!({
                "taskId": task.task_id,
                "perspective": sign_off.perspective.as_str(),
                "decision": sign_off.decision.as_str(),
                "signedBy": sign_off.signed_by,
                "riskScore": task.risk_score,
                "canProceed": task.can_proceed,
                "blocked": task.blocked,
            }),
        );
        if task.blocked != was_blocked {
            if task.blocked {
                self.emit(
                    "task_blocked",
                    json!({
                        "taskId": task.task_id,
                        "blockedBy": task.blocked_by.map(|p| p.as_str()),
                        "reason": task.blocked_reason,
                    }),
                );
            } else {
                self.emit("task_unblocked", json!({ "taskId": task.task_id }));
            }
        }

        Ok(task)
    }
}

fn apply_decision(perspectives: &mut FourPerspectives, sign_off: &SignOff, now: &str) {
    let veto_reason = if sign_off.decision == SignOffStatus::Vetoed {
        sign_off.notes.clone()
    } else {
        None
    };

    match sign_off.perspective {
        Perspective::AiAgent => {
            let state = &mut perspectives.ai_agent;
            state.status = sign_off.decision;
            state.signed_by = Some(sign_off.signed_by.clone());
            state.signed_at = Some(now.to_string());
            state.notes = sign_off.notes.clone();
            state.veto_reason = veto_reason;
            if sign_off.confidence.is_some() {
                state.confidence = sign_off.confidence;
            }
        }
        human => {
            let state = match human {
                Perspective::Product => &mut perspectives.product,
                Perspective::Dev => &mut perspectives.dev,
                _ => &mut perspectives.qa,
            };
            state.status = sign_off.decision;
            state.signed_by = Some(sign_off.signed_by.clone());
            state.signed_at = Some(now.to_string());
            state.notes = sign_off.notes.clone();
            state.veto_reason = veto_reason;
        }
    }
}

/// Whether work may proceed under the current AI mode. A veto blocks
/// regardless of mode.
fn compute_can_proceed(p: &FourPerspectives, blocked: bool) -> bool {
    if blocked {
        return false;
    }
    let ai_approved = p.ai_agent.status == SignOffStatus::Approved;
    match p.ai_agent.mode {
        AiMode::Delegated => ai_approved,
        AiMode::Collaborative => {
            ai_approved
                && [&p.product, &p.dev, &p.qa]
                    .iter()
                    .any(|s| s.status == SignOffStatus::Approved)
        }
        AiMode::Consultative => {
            ai_approved
                && [&p.product, &p.dev, &p.qa]
                    .iter()
                    .all(|s| s.status == SignOffStatus::Approved)
        }
    }
}

/// Additive risk heuristic, clamped to 0-100. The weights are a fixed
/// contract; tests pin them.
fn compute_risk_score(p: &FourPerspectives, can_proceed: bool) -> i64 {
    let humans = [p.product.status, p.dev.status, p.qa.status];
    let human_vetoes = humans
        .iter()
        .filter(|s| **s == SignOffStatus::Vetoed)
        .count() as i64;
    let human_approvals = humans
        .iter()
        .filter(|s| **s == SignOffStatus::Approved)
        .count() as i64;

    let mut score: i64 = 50;

    // Mixed human approvals and vetoes
    if human_approvals > 0 && human_vetoes > 0 {
        score += 20;
    }
    // Multiple human vetoes count each veto
    if human_vetoes > 1 {
        score += 10 * human_vetoes;
    }
    // AI approving over a human veto
    if p.ai_agent.status == SignOffStatus::Approved && human_vetoes > 0 {
        score += 10;
    }
    // Any veto at all
    if human_vetoes > 0 || p.ai_agent.status == SignOffStatus::Vetoed {
        score += 30;
    }
    if can_proceed {
        score -= 20;
    }

    score.clamp(0, 100)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> AccountabilityEngine {
        AccountabilityEngine::new(Arc::new(StoreDb::open_in_memory().unwrap()))
    }

    fn approve(perspective: Perspective, signed_by: &str) -> SignOff {
        SignOff {
            perspective,
            decision: SignOffStatus::Approved,
            signed_by: signed_by.to_string(),
            notes: None,
            confidence: None,
        }
    }

    fn veto(perspective: Perspective, signed_by: &str, reason: &str) -> SignOff {
        SignOff {
            perspective,
            decision: SignOffStatus::Vetoed,
            signed_by: signed_by.to_string(),
            notes: Some(reason.to_string()),
            confidence: None,
        }
    }

    #[test]
    fn test_all_four_approvals_in_consultative_mode() {
        let engine = engine();
        engine.create_task("t-1", "add-endpoint").unwrap();

        engine.record_sign_off("t-1", approve(Perspective::Product, "ana")).unwrap();
        engine.record_sign_off("t-1", approve(Perspective::Dev, "ben")).unwrap();
        engine.record_sign_off("t-1", approve(Perspective::Qa, "kim")).unwrap();
        let task = engine
            .record_sign_off(
                "t-1",
                SignOff {
                    confidence: Some(0.9),
                    ..approve(Perspective::AiAgent, "agent")
                },
            )
            .unwrap();

        assert!(task.can_proceed);
        assert!(!task.blocked);
        // Baseline 50 minus the can-proceed credit
        assert_eq!(task.risk_score, 30);
        assert_eq!(task.perspectives.ai_agent.confidence, Some(0.9));
    }

    #[test]
    fn test_veto_dominates_every_mode() {
        let engine = engine();
        engine.create_task("t-1", "risky-change").unwrap();
        engine
            .record_sign_off("t-1", veto(Perspective::Qa, "kim", "no test coverage"))
            .unwrap();

        let task = engine.get_task("t-1").unwrap();
        assert!(task.blocked);
        assert_eq!(task.blocked_by, Some(Perspective::Qa));
        assert_eq!(task.blocked_reason.as_deref(), Some("no test coverage"));
        assert!(!task.can_proceed);
        // Base 50 + 30 for the veto
        assert_eq!(task.risk_score, 80);
    }

    #[test]
    fn test_blocked_by_first_in_iteration_order() {
        let engine = engine();
        engine.create_task("t-1", "x").unwrap();
        engine
            .record_sign_off("t-1", veto(Perspective::Qa, "kim", "a"))
            .unwrap();
        let task = engine
            .record_sign_off("t-1", veto(Perspective::Product, "ana", "b"))
            .unwrap();

        assert_eq!(task.blocked_by, Some(Perspective::Product));
    }

    #[test]
    fn test_mixed_human_decisions_raise_risk() {
        let engine = engine();
        engine.create_task("t-1", "x").unwrap();
        engine.record_sign_off("t-1", approve(Perspective::Product, "ana")).unwrap();
        let task = engine
            .record_sign_off("t-1", veto(Perspective::Dev, "ben", "wrong approach"))
            .unwrap();

        // 50 + 20 mixed + 30 veto
        assert_eq!(task.risk_score, 100);
    }

    #[test]
    fn test_ai_approval_over_human_veto_raises_risk() {
        let engine = engine();
        engine.create_task("t-1", "x").unwrap();
        engine
            .record_sign_off("t-1", veto(Perspective::Qa, "kim", "regression"))
            .unwrap();
        let task = engine
            .record_sign_off("t-1", approve(Perspective::AiAgent, "agent"))
            .unwrap();

        // 50 + 10 AI-over-veto + 30 veto
        assert_eq!(task.risk_score, 90);
        assert!(!task.can_proceed);
    }

    #[test]
    fn test_delegated_mode_needs_only_ai_approval() {
        let engine = engine();
        let db = engine.db.clone();
        engine.create_task("t-1", "x").unwrap();

        // Force the stored mode to delegated
        db.with_conn(|conn| {
            let mut task = task_db::get_task(conn, "t-1")?.unwrap();
            task.perspectives.ai_agent.mode = AiMode::Delegated;
            task_db::update_task(conn, &task)
        })
        .unwrap();

        let task = engine
            .record_sign_off("t-1", approve(Perspective::AiAgent, "agent"))
            .unwrap();
        assert!(task.can_proceed);
    }

    #[test]
    fn test_sign_off_is_terminal() {
        let engine = engine();
        engine.create_task("t-1", "x").unwrap();
        engine.record_sign_off("t-1", approve(Perspective::Dev, "ben")).unwrap();

        let again = engine.record_sign_off("t-1", veto(Perspective::Dev, "ben", "changed my mind"));
        assert!(matches!(again, Err(CoreError::AlreadySignedOff(_))));
    }

    #[test]
    fn test_unknown_task_writes_nothing() {
        let engine = engine();
        let err = engine.record_sign_off("missing", approve(Perspective::Product, "ana"));
        assert!(matches!(err, Err(CoreError::TaskNotFound(_))));
        assert!(engine.receipts_for("missing").unwrap().is_empty());
    }

    #[test]
    fn test_receipt_written_with_update() {
        let engine = engine();
        engine.create_task("t-1", "x").unwrap();
        engine.record_sign_off("t-1", approve(Perspective::Product, "ana")).unwrap();

        let receipts = engine.receipts_for("t-1").unwrap();
        assert_eq!(receipts.len(), 1);
        assert_eq!(receipts[0].signed_by, "ana");
        assert_eq!(receipts[0].decision, SignOffStatus::Approved);
    }
}
