//! AI autonomy mode state machine.
//!
//! Three modes ordered by oversight. Automatic evaluation only ever
//! moves toward more oversight; demotion is a manual transition.

use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::broadcast;
use tracing::info;

use crate::config::AutonomyConfig;
use crate::db::accountability::{self as task_db, AiModeTransition};
use crate::db::StoreDb;
use crate::error::CoreError;
use crate::events::Envelope;

use super::{FourPerspectives, SignOffStatus};

/// Autonomy mode of the AI perspective
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AiMode {
    Delegated,
    Collaborative,
    Consultative,
}

impl AiMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AiMode::Delegated => "delegated",
            AiMode::Collaborative => "collaborative",
            AiMode::Consultative => "consultative",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "delegated" => AiMode::Delegated,
            "collaborative" => AiMode::Collaborative,
            _ => AiMode::Consultative,
        }
    }

    /// Ordering for escalation checks. Higher means more oversight.
    pub fn oversight_rank(&self) -> u8 {
        match self {
            AiMode::Delegated => 0,
            AiMode::Collaborative => 1,
            AiMode::Consultative => 2,
        }
    }
}

/// Risk thresholds for mode selection
#[derive(Debug, Clone, Copy)]
pub struct ModeThresholds {
    pub consultative: u8,
    pub collaborative: u8,
}

impl Default for ModeThresholds {
    fn default() -> Self {
        Self {
            consultative: 70,
            collaborative: 40,
        }
    }
}

impl From<&AutonomyConfig> for ModeThresholds {
    fn from(config: &AutonomyConfig) -> Self {
        Self {
            consultative: config.consultative_threshold,
            collaborative: config.collaborative_threshold,
        }
    }
}

/// Risk-based target mode
pub fn mode_for_risk_score(score: i64, thresholds: ModeThresholds) -> AiMode {
    if score >= thresholds.consultative as i64 {
        AiMode::Consultative
    } else if score >= thresholds.collaborative as i64 {
        AiMode::Collaborative
    } else {
        AiMode::Delegated
    }
}

/// A delegated AI must escalate when humans veto or disagree
pub fn should_escalate(perspectives: &FourPerspectives, current: AiMode) -> bool {
    if current != AiMode::Delegated {
        return false;
    }
    let humans = [
        perspectives.product.status,
        perspectives.dev.status,
        perspectives.qa.status,
    ];
    // Human disagreement always involves at least one veto, so a veto
    // check covers both escalation conditions
    humans.iter().any(|s| *s == SignOffStatus::Vetoed)
}

/// Outcome of an automatic mode evaluation
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModeEvaluation {
    pub task_id: String,
    pub previous_mode: AiMode,
    pub mode: AiMode,
    pub changed: bool,
    pub risk_score: i64,
}

pub struct AiModeEngine {
    db: std::sync::Arc<StoreDb>,
    thresholds: ModeThresholds,
    events: Option<broadcast::Sender<Envelope>>,
}

impl AiModeEngine {
    pub fn new(db: std::sync::Arc<StoreDb>, thresholds: ModeThresholds) -> Self {
        Self {
            db,
            thresholds,
            events: None,
        }
    }

    /// Attach a channel for mode-change notices
    pub fn with_events(mut self, events: broadcast::Sender<Envelope>) -> Self {
        self.events = Some(events);
        self
    }

    fn emit_mode_change(&self, eval: &ModeEvaluation, reason: &str, triggered_by: &str) {
        if let Some(tx) = &self.events {
            // Send fails only with zero subscribers
            let _ = tx.send(Envelope::new(
                "ai_mode_changed",
                json!({
                    "taskId": eval.task_id,
                    "from": eval.previous_mode.as_str(),
                    "to": eval.mode.as_str(),
                    "reason": reason,
                    "triggeredBy": triggered_by,
                    "riskScore": eval.risk_score,
                }),
                Some("ai_mode".to_string()),
            ));
        }
    }

    /// Evaluate the stored task against its risk score and escalate if
    /// needed. Never demotes; demotion goes through `transition_mode`
    /// with a manual trigger.
    pub fn auto_evaluate_mode(&self, task_id: &str) -> Result<ModeEvaluation, CoreError> {
        let eval = self.db.with_conn(|conn| {
            let task = task_db::get_task(conn, task_id)?
                .ok_or_else(|| CoreError::TaskNotFound(task_id.to_string()))?;
            let current = task.perspectives.ai_agent.mode;

            let mut target = mode_for_risk_score(task.risk_score, self.thresholds);
            if should_escalate(&task.perspectives, current)
                && target.oversight_rank() < AiMode::Collaborative.oversight_rank()
            {
                target = AiMode::Collaborative;
            }

            // Escalation only
            if target.oversight_rank() <= current.oversight_rank() {
                return Ok(ModeEvaluation {
                    task_id: task_id.to_string(),
                    previous_mode: current,
                    mode: current,
                    changed: false,
                    risk_score: task.risk_score,
                });
            }

            let risk_score = task.risk_score;
            apply_transition(
                conn,
                task,
                target,
                &format!("risk score {}", risk_score),
                "automatic",
            )?;

            Ok(ModeEvaluation {
                task_id: task_id.to_string(),
                previous_mode: current,
                mode: target,
                changed: true,
                risk_score,
            })
        })?;

        if eval.changed {
            self.emit_mode_change(
                &eval,
                &format!("risk score {}", eval.risk_score),
                "automatic",
            );
        }
        Ok(eval)
    }

    /// Explicit mode change, in either direction. Always appends a
    /// transition row.
    pub fn transition_mode(
        &self,
        task_id: &str,
        to: AiMode,
        reason: &str,
        triggered_by: &str,
    ) -> Result<ModeEvaluation, CoreError> {
        let eval = self.db.with_conn(|conn| {
            let task = task_db::get_task(conn, task_id)?
                .ok_or_else(|| CoreError::TaskNotFound(task_id.to_string()))?;
            let current = task.perspectives.ai_agent.mode;
            let risk_score = task.risk_score;

            if to == current {
                return Ok(ModeEvaluation {
                    task_id: task_id.to_string(),
                    previous_mode: current,
                    mode: current,
                    changed: false,
                    risk_score,
                });
            }

            apply_transition(conn, task, to, reason, triggered_by)?;

            Ok(ModeEvaluation {
                task_id: task_id.to_string(),
                previous_mode: current,
                mode: to,
                changed: true,
                risk_score,
            })
        })?;

        if eval.changed {
            self.emit_mode_change(&eval, reason, triggered_by);
        }
        Ok(eval)
    }

    pub fn transitions_for(&self, task_id: &str) -> Result<Vec<AiModeTransition>, CoreError> {
        self.db.with_conn(|conn| task_db::transitions_for(conn, task_id))
    }

    pub fn thresholds(&self) -> ModeThresholds {
        self.thresholds
    }
}

fn apply_transition(
    conn: &rusqlite::Connection,
    mut task: task_db::TaskRow,
    to: AiMode,
    reason: &str,
    triggered_by: &str,
) -> Result<(), CoreError> {
    let from = task.perspectives.ai_agent.mode;
    info!(
        task_id = %task.task_id,
        from = from.as_str(),
        to = to.as_str(),
        triggered_by,
        "AI mode transition"
    );

    task.perspectives.ai_agent.mode = to;
    task_db::update_task(conn, &task)?;
    task_db::insert_transition(
        conn,
        &AiModeTransition {
            id: None,
            task_id: task.task_id.clone(),
            from_mode: from,
            to_mode: to,
            reason: reason.to_string(),
            triggered_by: triggered_by.to_string(),
            risk_score: Some(task.risk_score),
            timestamp: chrono::Utc::now().to_rfc3339(),
        },
    )
}

/// Complexity assessment for a planned task. Pure heuristic; reads and
/// writes nothing.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComplexityAssessment {
    pub complexity: u8,
    pub factors: Vec<String>,
    /// Hours, clamped 1-40
    pub estimated_effort: u8,
    /// 0-100
    pub uncertainty: u8,
    pub recommended_mode: AiMode,
}

const HEAVY_KEYWORDS: [&str; 4] = ["migration", "security", "breaking", "concurrency"];
const MODERATE_KEYWORDS: [&str; 4] = ["auth", "refactor", "integration", "performance"];

pub fn assess_complexity(
    slug: &str,
    tier: u8,
    arc: Option<&str>,
    description: Option<&str>,
    thresholds: ModeThresholds,
) -> ComplexityAssessment {
    let mut score: i64 = match tier {
        0 | 1 => 10,
        2 => 30,
        3 => 55,
        _ => 75,
    };
    let mut factors = vec![format!("tier {}", tier)];

    if let Some(arc) = arc {
        score += 10;
        factors.push(format!("part of arc {}", arc));
    }

    let haystack = format!("{} {}", slug, description.unwrap_or("")).to_lowercase();
    for kw in HEAVY_KEYWORDS {
        if haystack.contains(kw) {
            score += 15;
            factors.push(format!("keyword: {}", kw));
        }
    }
    for kw in MODERATE_KEYWORDS {
        if haystack.contains(kw) {
            score += 10;
            factors.push(format!("keyword: {}", kw));
        }
    }

    let complexity = score.clamp(0, 100) as u8;
    let estimated_effort = ((complexity as i64 * 40 / 100).max(1)).min(40) as u8;
    let uncertainty = if description.is_none() {
        (complexity as i64 + 20).clamp(0, 100) as u8
    } else {
        complexity
    };

    ComplexityAssessment {
        complexity,
        factors,
        estimated_effort,
        uncertainty,
        recommended_mode: mode_for_risk_score(complexity as i64, thresholds),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_for_risk_score_thresholds() {
        let t = ModeThresholds::default();
        assert_eq!(mode_for_risk_score(0, t), AiMode::Delegated);
        assert_eq!(mode_for_risk_score(39, t), AiMode::Delegated);
        assert_eq!(mode_for_risk_score(40, t), AiMode::Collaborative);
        assert_eq!(mode_for_risk_score(69, t), AiMode::Collaborative);
        assert_eq!(mode_for_risk_score(70, t), AiMode::Consultative);
        assert_eq!(mode_for_risk_score(100, t), AiMode::Consultative);
    }

    #[test]
    fn test_should_escalate_only_from_delegated() {
        let mut p = FourPerspectives::new();
        p.qa.status = SignOffStatus::Vetoed;

        assert!(should_escalate(&p, AiMode::Delegated));
        assert!(!should_escalate(&p, AiMode::Collaborative));
        assert!(!should_escalate(&p, AiMode::Consultative));
    }

    #[test]
    fn test_no_escalation_without_veto() {
        let mut p = FourPerspectives::new();
        p.product.status = SignOffStatus::Approved;
        p.dev.status = SignOffStatus::Approved;
        assert!(!should_escalate(&p, AiMode::Delegated));
    }

    #[test]
    fn test_assess_complexity_heavy_keywords() {
        let t = ModeThresholds::default();
        let a = assess_complexity(
            "db-migration-security-pass",
            3,
            Some("hardening"),
            Some("schema migration with security review"),
            t,
        );
        // 55 + 10 (arc) + 15 + 15 = 95
        assert_eq!(a.complexity, 95);
        assert_eq!(a.recommended_mode, AiMode::Consultative);
        assert_eq!(a.estimated_effort, 38);
        assert_eq!(a.uncertainty, 95);
    }

    #[test]
    fn test_assess_complexity_trivial() {
        let t = ModeThresholds::default();
        let a = assess_complexity("fix-typo", 1, None, None, t);
        assert_eq!(a.complexity, 10);
        assert_eq!(a.estimated_effort, 4);
        assert_eq!(a.uncertainty, 30);
        assert_eq!(a.recommended_mode, AiMode::Delegated);
    }
}
