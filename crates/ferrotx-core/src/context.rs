//! Per-request operation context: identity, language negotiation, deadline,
//! recursion tracking, and the diagnostic trail.
//!
//! One context is built at the gateway per request. Sub-evaluations (value
//! set imports, supplement lookups) receive a `copy()` that shares the
//! request id and deadline but owns its diagnostic buffer.

use crate::issue::{TxIssue, TxResult};
use crate::lang::LanguagePreferences;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Default per-request deadline.
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct OperationContext {
    request_id: String,
    languages: LanguagePreferences,
    started: Instant,
    deadline: Instant,
    /// ValueSet urls currently under evaluation, outermost first.
    context_stack: Vec<String>,
    timings: Vec<(String, Duration)>,
    notes: Vec<String>,
}

impl OperationContext {
    pub fn new(languages: LanguagePreferences, deadline: Duration) -> Self {
        let now = Instant::now();
        Self {
            request_id: Uuid::new_v4().to_string(),
            languages,
            started: now,
            deadline: now + deadline,
            context_stack: Vec::new(),
            timings: Vec::new(),
            notes: Vec::new(),
        }
    }

    /// Context with an externally supplied request id (e.g. the inbound
    /// `x-request-id` header).
    pub fn with_request_id(
        request_id: impl Into<String>,
        languages: LanguagePreferences,
        deadline: Duration,
    ) -> Self {
        let mut ctx = Self::new(languages, deadline);
        ctx.request_id = request_id.into();
        ctx
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn languages(&self) -> &LanguagePreferences {
        &self.languages
    }

    /// Replace the language context (explicit displayLanguage wins over the
    /// Accept-Language header).
    pub fn set_languages(&mut self, languages: LanguagePreferences) {
        self.languages = languages;
    }

    /// The only legal way to hand a context to a sub-evaluation: same
    /// request id and deadline, inherited recursion stack, fresh diagnostics.
    pub fn copy(&self) -> Self {
        Self {
            request_id: self.request_id.clone(),
            languages: self.languages.clone(),
            started: self.started,
            deadline: self.deadline,
            context_stack: self.context_stack.clone(),
            timings: Vec::new(),
            notes: Vec::new(),
        }
    }

    /// Check the deadline at a named place. Raises `too-costly` once the
    /// monotonic clock passes it.
    pub fn dead_check(&self, place: &str) -> TxResult<()> {
        if Instant::now() >= self.deadline {
            Err(TxIssue::too_costly(format!(
                "Operation deadline exceeded at {place}"
            )))
        } else {
            Ok(())
        }
    }

    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// Enter a ValueSet evaluation. Re-entry for the same url is a circular
    /// reference and fails `business-rule` with the cycle path.
    pub fn see_context(&mut self, url: &str) -> TxResult<()> {
        if self.context_stack.iter().any(|u| u == url) {
            return Err(TxIssue::circular_reference(&self.context_stack, url));
        }
        self.context_stack.push(url.to_string());
        Ok(())
    }

    /// Leave a ValueSet evaluation entered with `see_context`.
    pub fn leave_context(&mut self, url: &str) {
        if let Some(pos) = self.context_stack.iter().rposition(|u| u == url) {
            self.context_stack.remove(pos);
        }
    }

    pub fn context_stack(&self) -> &[String] {
        &self.context_stack
    }

    /// Record a phase marker with the elapsed time since request start.
    pub fn mark(&mut self, phase: impl Into<String>) {
        self.timings.push((phase.into(), self.started.elapsed()));
    }

    pub fn timings(&self) -> &[(String, Duration)] {
        &self.timings
    }

    /// Append a diagnostic note, surfaced when diagnostics are requested.
    pub fn note(&mut self, message: impl Into<String>) {
        self.notes.push(message.into());
    }

    pub fn notes(&self) -> &[String] {
        &self.notes
    }
}

impl Default for OperationContext {
    fn default() -> Self {
        Self::new(LanguagePreferences::default(), DEFAULT_DEADLINE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copy_shares_id_and_deadline() {
        let mut ctx = OperationContext::default();
        ctx.see_context("http://example.org/vs/outer").unwrap();
        let child = ctx.copy();
        assert_eq!(child.request_id(), ctx.request_id());
        assert_eq!(child.context_stack(), ctx.context_stack());
        assert!(child.notes().is_empty());
    }

    #[test]
    fn cycle_detection_reports_path() {
        let mut ctx = OperationContext::default();
        ctx.see_context("http://example.org/vs/a").unwrap();
        ctx.see_context("http://example.org/vs/b").unwrap();
        let err = ctx.see_context("http://example.org/vs/a").unwrap_err();
        assert_eq!(err.code, crate::issue::IssueType::BusinessRule);
        assert!(err.diagnostics.contains("vs/a"));
        assert!(err.diagnostics.contains("vs/b"));
    }

    #[test]
    fn leave_context_allows_reentry() {
        let mut ctx = OperationContext::default();
        ctx.see_context("http://example.org/vs/a").unwrap();
        ctx.leave_context("http://example.org/vs/a");
        assert!(ctx.see_context("http://example.org/vs/a").is_ok());
    }

    #[test]
    fn expired_deadline_raises_too_costly() {
        let ctx = OperationContext::new(LanguagePreferences::default(), Duration::ZERO);
        let err = ctx.dead_check("include phase").unwrap_err();
        assert_eq!(err.code, crate::issue::IssueType::TooCostly);
        assert!(err.diagnostics.contains("include phase"));
    }
}
