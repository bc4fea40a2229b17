//! Error Resolver
//!
//! Chooses a fix for an error and hands it to the `FixApplicator`. Also
//! runs bulk resolutions and keeps the session's resolution history.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use cascade_resolver_core::{
    Change, ErrorFix, EstimatedImpact, FixConfidence, ResolutionResult, UnifiedError,
};

use super::applicator::FixApplicator;
use crate::utils::error::AppError;
use crate::utils::paths::normalize_relative;

/// Partition items so that any two whose file sets overlap, directly or
/// through other items, land in the same group. Groups keep insertion order.
fn group_by_files<T>(items: Vec<(BTreeSet<String>, T)>) -> Vec<Vec<T>> {
    let mut groups: Vec<(BTreeSet<String>, Vec<T>)> = Vec::new();
    for (files, item) in items {
        let mut merged_files = files;
        let mut merged_items = Vec::new();
        let mut i = 0;
        while i < groups.len() {
            if groups[i].0.is_disjoint(&merged_files) {
                i += 1;
            } else {
                let (files, items) = groups.remove(i);
                merged_files.extend(files);
                merged_items.extend(items);
            }
        }
        merged_items.push(item);
        groups.push((merged_files, merged_items));
    }
    groups.into_iter().map(|(_, items)| items).collect()
}

fn best<'a>(fixes: impl IntoIterator<Item = &'a ErrorFix>) -> Option<&'a ErrorFix> {
    fixes.into_iter().fold(None, |best: Option<&ErrorFix>, fix| match best {
        Some(current) if current.confidence >= fix.confidence => Some(current),
        _ => Some(fix),
    })
}

/// Highest-confidence fix; ties go to the first listed.
pub fn select_fix(fixes: &[ErrorFix]) -> Option<&ErrorFix> {
    best(fixes)
}

/// At least one fix is high confidence and needs no user input.
pub fn can_resolve_error(error: &UnifiedError) -> bool {
    error.fixes.iter().any(ErrorFix::is_auto_applicable)
}

/// The fix an automatic resolution applies: the selection rule restricted
/// to fixes that need no user input.
fn fix_to_apply(error: &UnifiedError) -> Option<&ErrorFix> {
    if !can_resolve_error(error) {
        return None;
    }
    best(error.fixes.iter().filter(|f| !f.requires_user_input))
}

/// What resolving an error would do. Nothing is written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolutionPreview {
    pub error_id: String,
    pub can_auto_resolve: bool,
    pub fix_id: Option<String>,
    pub fix_title: Option<String>,
    pub confidence: Option<FixConfidence>,
    pub requires_user_input: bool,
    pub estimated_impact: Option<EstimatedImpact>,
    pub changes: Vec<Change>,
    pub files: Vec<String>,
}

/// Aggregate numbers over the resolution history.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResolutionStats {
    pub total_attempts: usize,
    pub successful_fixes: usize,
    pub failed_fixes: usize,
    pub success_rate: f64,
}

/// One history entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolutionRecord {
    pub result: ResolutionResult,
    pub recorded_at: DateTime<Utc>,
}

/// Outcome of a bulk resolution. `results` follows the input order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BulkResolution {
    pub total_errors: usize,
    pub fixable_errors: usize,
    pub fixed_errors: usize,
    pub failed_fixes: usize,
    pub results: Vec<ResolutionResult>,
    pub cancelled: bool,
}

/// An error id paired with the error it names, if it exists.
#[derive(Debug, Clone)]
pub struct ResolutionTarget {
    pub error_id: String,
    pub error: Option<UnifiedError>,
}

impl ResolutionTarget {
    pub fn new(error_id: impl Into<String>, error: Option<UnifiedError>) -> Self {
        Self {
            error_id: error_id.into(),
            error,
        }
    }
}

pub struct ErrorResolver {
    applicator: FixApplicator,
    history: Mutex<Vec<ResolutionRecord>>,
}

impl ErrorResolver {
    pub fn new(applicator: FixApplicator) -> Self {
        Self {
            applicator,
            history: Mutex::new(Vec::new()),
        }
    }

    pub fn preview_resolution(&self, error: &UnifiedError) -> ResolutionPreview {
        let can_auto_resolve = can_resolve_error(error);
        let fix = fix_to_apply(error).or_else(|| select_fix(&error.fixes));
        ResolutionPreview {
            error_id: error.id.clone(),
            can_auto_resolve,
            fix_id: fix.map(|f| f.id.clone()),
            fix_title: fix.map(|f| f.title.clone()),
            confidence: fix.map(|f| f.confidence),
            requires_user_input: fix.map_or(false, |f| f.requires_user_input),
            estimated_impact: fix.map(|f| f.estimated_impact),
            changes: fix.map(|f| f.changes.clone()).unwrap_or_default(),
            files: fix
                .map(|f| f.files().into_iter().map(String::from).collect())
                .unwrap_or_default(),
        }
    }

    /// Resolve one error. Unknown ids and errors without an auto-applicable
    /// fix yield a failed result.
    pub async fn resolve_error(
        &self,
        error_id: &str,
        error: Option<&UnifiedError>,
        cancel: &CancellationToken,
    ) -> ResolutionResult {
        let result = match error {
            None => ResolutionResult::not_found(error_id),
            Some(error) => self.attempt(error, cancel).await,
        };
        self.record(&result);
        result
    }

    async fn attempt(&self, error: &UnifiedError, cancel: &CancellationToken) -> ResolutionResult {
        match fix_to_apply(error) {
            Some(fix) => self.applicator.apply(&error.id, fix, cancel).await,
            None if error.fixes.is_empty() => {
                ResolutionResult::failed(&error.id, "No fixes are available for this error")
            }
            None => ResolutionResult::failed(
                &error.id,
                "No high-confidence fix that can be applied without user input",
            ),
        }
    }

    /// Resolve many errors independently. With `auto_fixable_only`, errors
    /// without an auto-applicable fix are skipped and produce no result;
    /// `max_fixes` caps the number of attempts. Fixes on the same file run
    /// bottom-up; distinct files run concurrently.
    pub async fn resolve_errors(
        &self,
        targets: Vec<ResolutionTarget>,
        max_fixes: Option<usize>,
        auto_fixable_only: bool,
        cancel: &CancellationToken,
    ) -> BulkResolution {
        let total_errors = targets.len();
        let fixable_errors = targets
            .iter()
            .filter(|t| t.error.as_ref().map_or(false, can_resolve_error))
            .count();

        let mut attempted: Vec<ResolutionTarget> = targets
            .into_iter()
            .filter(|t| !auto_fixable_only || t.error.as_ref().map_or(true, can_resolve_error))
            .collect();
        if let Some(max) = max_fixes {
            attempted.truncate(max);
        }

        // Fixes sharing any file run in one group; unknown ids and errors
        // without a fix are answered immediately.
        let mut slots: Vec<Option<ResolutionResult>> = vec![None; attempted.len()];
        let mut planned: Vec<(BTreeSet<String>, (usize, &UnifiedError, &ErrorFix))> = Vec::new();
        for (index, target) in attempted.iter().enumerate() {
            match &target.error {
                None => slots[index] = Some(ResolutionResult::not_found(&target.error_id)),
                Some(error) => match fix_to_apply(error) {
                    Some(fix) => {
                        let files = fix
                            .files()
                            .into_iter()
                            .map(|f| normalize_relative(Path::new(f)))
                            .collect();
                        planned.push((files, (index, error, fix)));
                    }
                    None => {
                        let message = if error.fixes.is_empty() {
                            "No fixes are available for this error"
                        } else {
                            "No high-confidence fix that can be applied without user input"
                        };
                        slots[index] = Some(ResolutionResult::failed(&error.id, message));
                    }
                },
            }
        }

        let runs = group_by_files(planned).into_iter().map(|mut group| {
            // Bottom-up; line-less changes (imports) last
            group.sort_by_key(|(index, _, fix)| {
                let line = fix.changes.iter().filter_map(Change::line).max().unwrap_or(0);
                (std::cmp::Reverse(line), *index)
            });
            self.run_group(group, cancel)
        });
        let mut cancelled = false;
        for group in join_all(runs).await {
            for (index, result, was_cancelled) in group {
                cancelled |= was_cancelled;
                slots[index] = Some(result);
            }
        }

        let results: Vec<ResolutionResult> = slots
            .into_iter()
            .zip(attempted.iter())
            .map(|(slot, target)| {
                slot.unwrap_or_else(|| ResolutionResult::failed(&target.error_id, "Not attempted"))
            })
            .collect();
        for result in &results {
            self.record(result);
        }

        let fixed_errors = results.iter().filter(|r| r.success).count();
        let failed_fixes = results.len() - fixed_errors;
        info!(
            total = total_errors,
            attempted = results.len(),
            fixed = fixed_errors,
            failed = failed_fixes,
            "Bulk resolution finished"
        );
        BulkResolution {
            total_errors,
            fixable_errors,
            fixed_errors,
            failed_fixes,
            results,
            cancelled,
        }
    }

    async fn run_group(
        &self,
        group: Vec<(usize, &UnifiedError, &ErrorFix)>,
        cancel: &CancellationToken,
    ) -> Vec<(usize, ResolutionResult, bool)> {
        let mut out = Vec::with_capacity(group.len());
        let mut applied: Vec<&[Change]> = Vec::new();
        for (index, error, fix) in group {
            if cancel.is_cancelled() {
                let skipped = AppError::cancelled("not attempted").to_string();
                out.push((index, ResolutionResult::failed(&error.id, skipped), true));
                continue;
            }
            // Two reports of the same problem share one edit
            if applied.contains(&fix.changes.as_slice()) {
                debug!(error_id = %error.id, fix = %fix.id, "Identical fix already applied in this run");
                out.push((
                    index,
                    ResolutionResult::succeeded(
                        &error.id,
                        fix.id.clone(),
                        Vec::new(),
                        "Already resolved by an identical fix in this run",
                    ),
                    false,
                ));
                continue;
            }
            let result = self.applicator.apply(&error.id, fix, cancel).await;
            if result.success {
                applied.push(fix.changes.as_slice());
            }
            out.push((index, result, false));
        }
        out
    }

    fn record(&self, result: &ResolutionResult) {
        let mut history = self.history.lock().unwrap_or_else(|e| e.into_inner());
        history.push(ResolutionRecord {
            result: result.clone(),
            recorded_at: Utc::now(),
        });
    }

    pub fn history(&self) -> Vec<ResolutionRecord> {
        self.history.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn stats(&self) -> ResolutionStats {
        let history = self.history.lock().unwrap_or_else(|e| e.into_inner());
        let total_attempts = history.len();
        let successful_fixes = history.iter().filter(|r| r.result.success).count();
        let failed_fixes = total_attempts - successful_fixes;
        let success_rate = if total_attempts == 0 {
            0.0
        } else {
            successful_fixes as f64 / total_attempts as f64
        };
        ResolutionStats {
            total_attempts,
            successful_fixes,
            failed_fixes,
            success_rate,
        }
    }

    pub fn clear_history(&self) {
        self.history.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }
}
