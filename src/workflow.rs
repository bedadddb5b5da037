//! Billable-operation workflow: ledger admission, rate windows, the upstream
//! call, then the post-hoc debit.

use crate::error::Error;
use crate::ledger::{DebitSource, UsageService};
use crate::rate_limit::LimiterSet;
use crate::storage::Storage;
use std::sync::Arc;
use thiserror::Error as ThisError;
use tracing::{error, info};

/// The image-generation collaborator. Opaque inputs in, image handle or failure out.
pub trait ImageGenerator {
    type Output;
    type Error: std::error::Error + 'static;

    fn generate(&mut self, inputs: &[String]) -> std::result::Result<Self::Output, Self::Error>;
}

#[derive(ThisError, Debug)]
pub enum GateError<E: std::error::Error + 'static> {
    /// Denied before the upstream call (rate or usage limit) or a storage failure.
    #[error(transparent)]
    Gate(#[from] Error),

    /// Upstream generation failed; nothing was debited.
    #[error("Upstream generation failed: {0}")]
    Upstream(#[source] E),
}

impl<E: std::error::Error + 'static> GateError<E> {
    /// The gate error, if this is not an upstream failure.
    pub fn gate_error(&self) -> Option<&Error> {
        match self {
            GateError::Gate(e) => Some(e),
            GateError::Upstream(_) => None,
        }
    }
}

/// A successful run.
#[derive(Debug)]
pub struct GateOutcome<T> {
    pub output: T,
    /// The debit. An error here is logged and must be investigated, but the
    /// generated output is still delivered.
    pub debit: crate::error::Result<DebitSource>,
}

/// Composes the usage ledger and the rate windows around one upstream call.
pub struct Gate<S> {
    usage: Arc<UsageService<S>>,
    limiters: LimiterSet<S>,
}

impl<S: Storage> Gate<S> {
    pub fn new(usage: Arc<UsageService<S>>, limiters: LimiterSet<S>) -> Self {
        Gate { usage, limiters }
    }

    pub fn usage(&self) -> &UsageService<S> {
        &self.usage
    }

    pub fn limiters(&self) -> &LimiterSet<S> {
        &self.limiters
    }

    /// Run one billable generation for `user_id`.
    ///
    /// Order: ledger admission, all rate windows (consumed only if all admit),
    /// the generator, then one debit. A denial never reaches the generator; a
    /// generator failure never debits.
    pub fn run<G: ImageGenerator>(
        &self,
        user_id: &str,
        action_kind: &str,
        related_item_id: Option<&str>,
        inputs: &[String],
        generator: &mut G,
    ) -> Result<GateOutcome<G::Output>, GateError<G::Error>> {
        self.usage.ensure_can_consume(user_id)?;
        self.limiters.check_all_limits()?;

        let output = generator.generate(inputs).map_err(|e| {
            info!(user_id, action_kind, error = %e, "upstream generation failed, no debit");
            GateError::Upstream(e)
        })?;

        let debit = self.usage.consume(user_id, action_kind, related_item_id);
        if let Err(e) = &debit {
            error!(user_id, action_kind, error = %e, "debit failed after successful generation");
        }
        Ok(GateOutcome { output, debit })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::ErrorKind;
    use crate::ledger::PlanCatalog;
    use crate::rate_limit::RateLimitConfig;
    use crate::storage::MemoryStorage;
    use std::fmt;
    use std::time::Duration;

    #[derive(Debug)]
    struct UpstreamDown;

    impl fmt::Display for UpstreamDown {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "upstream unavailable")
        }
    }

    impl std::error::Error for UpstreamDown {}

    struct FakeGenerator {
        calls: u32,
        fail: bool,
    }

    impl ImageGenerator for FakeGenerator {
        type Output = String;
        type Error = UpstreamDown;

        fn generate(&mut self, inputs: &[String]) -> Result<String, UpstreamDown> {
            self.calls += 1;
            if self.fail {
                return Err(UpstreamDown);
            }
            Ok(format!("img_{}_{}", self.calls, inputs.len()))
        }
    }

    /// Generator that refunds a credit purchase while "generating", so the
    /// credits that admitted the run are gone by debit time.
    struct RefundingGenerator {
        usage: Arc<UsageService<MemoryStorage>>,
        user_id: String,
        payment_id: String,
    }

    impl ImageGenerator for RefundingGenerator {
        type Output = String;
        type Error = UpstreamDown;

        fn generate(&mut self, _inputs: &[String]) -> Result<String, UpstreamDown> {
            self.usage
                .refund_payment(&self.user_id, &self.payment_id)
                .unwrap();
            Ok("img_refunded".to_string())
        }
    }

    fn gate_with_usage(
        max_per_minute: u32,
    ) -> (Gate<MemoryStorage>, Arc<UsageService<MemoryStorage>>) {
        let storage = Arc::new(MemoryStorage::new());
        let clock: Arc<dyn crate::clock::Clock> = Arc::new(ManualClock::new(1_760_529_600_000));
        let usage = Arc::new(UsageService::new(
            Arc::clone(&storage),
            Arc::clone(&clock),
            PlanCatalog::default(),
        ));
        let limiters = LimiterSet::from_configs(
            vec![RateLimitConfig::new("minute", max_per_minute, Duration::from_secs(60)).unwrap()],
            storage,
            clock,
        );
        (Gate::new(Arc::clone(&usage), limiters), usage)
    }

    fn gate(max_per_minute: u32) -> Gate<MemoryStorage> {
        gate_with_usage(max_per_minute).0
    }

    fn inputs() -> Vec<String> {
        vec!["person.jpg".to_string(), "garment.jpg".to_string()]
    }

    #[test]
    fn test_run_debits_on_success() {
        let gate = gate(10);
        let mut generator = FakeGenerator { calls: 0, fail: false };
        let outcome = gate
            .run("alice", "try-on", Some("look_1"), &inputs(), &mut generator)
            .unwrap();
        assert_eq!(outcome.output, "img_1_2");
        assert_eq!(outcome.debit.unwrap(), DebitSource::Quota);
        assert_eq!(gate.usage().get_ledger("alice").unwrap().usage.used, 1);
    }

    #[test]
    fn test_upstream_failure_does_not_debit() {
        let gate = gate(10);
        let mut generator = FakeGenerator { calls: 0, fail: true };
        let err = gate
            .run("alice", "try-on", None, &inputs(), &mut generator)
            .unwrap_err();
        assert!(matches!(err, GateError::Upstream(_)));
        assert!(err.gate_error().is_none());
        assert_eq!(gate.usage().get_ledger("alice").unwrap().usage.used, 0);
    }

    #[test]
    fn test_usage_limit_blocks_before_upstream() {
        let gate = gate(10);
        let mut generator = FakeGenerator { calls: 0, fail: false };
        for _ in 0..3 {
            gate.run("alice", "try-on", None, &inputs(), &mut generator).unwrap();
        }
        let err = gate
            .run("alice", "try-on", None, &inputs(), &mut generator)
            .unwrap_err();
        assert_eq!(err.gate_error().map(Error::kind), Some(ErrorKind::UsageLimit));
        assert_eq!(generator.calls, 3);
        // Rate windows untouched by the denied attempt
        assert_eq!(gate.limiters().stats().unwrap()[0].1.used, 3);
    }

    #[test]
    fn test_rate_limit_blocks_before_upstream() {
        let gate = gate(1);
        let mut generator = FakeGenerator { calls: 0, fail: false };
        gate.run("alice", "try-on", None, &inputs(), &mut generator).unwrap();
        let err = gate
            .run("bob", "try-on", None, &inputs(), &mut generator)
            .unwrap_err();
        assert_eq!(err.gate_error().map(Error::kind), Some(ErrorKind::RateLimit));
        assert_eq!(generator.calls, 1);
        assert_eq!(gate.usage().get_ledger("bob").unwrap().usage.used, 0);
    }

    #[test]
    fn test_debit_failure_still_delivers_output() {
        let (gate, usage) = gate_with_usage(10);
        for _ in 0..3 {
            usage.consume("alice", "try-on", None).unwrap();
        }
        usage.add_credit_grant("alice", 2, 59, Some("pay_1")).unwrap();

        let mut generator = RefundingGenerator {
            usage: Arc::clone(&usage),
            user_id: "alice".to_string(),
            payment_id: "pay_1".to_string(),
        };
        let outcome = gate
            .run("alice", "try-on", None, &inputs(), &mut generator)
            .unwrap();

        assert_eq!(outcome.output, "img_refunded");
        assert!(matches!(
            outcome.debit,
            Err(Error::LedgerInvariantViolation { used: 3, limit: 3, .. })
        ));
        let ledger = usage.get_ledger("alice").unwrap();
        assert_eq!(ledger.usage.used, 3);
        assert_eq!(ledger.usage.history.len(), 3);
    }
}
