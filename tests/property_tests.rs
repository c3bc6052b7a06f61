//! Property-Based Tests for depbuild
//!
//! These tests verify:
//! - Completion record bookkeeping (idempotent marking, no duplicates)
//! - Step decision rules
//! - Archive re-fetch rule
//! - Template and egg name handling

use proptest::prelude::*;

use depbuild::builder::egg::normalize_egg_name;
use depbuild::fetch::needs_fetch;
use depbuild::pipeline::{decide, SkipReason, StepDecision};
use depbuild::template::{substitute, Substitutions};
use depbuild::{CompletionRecord, StepCode, StepRegistry};

// =============================================================================
// Completion Record Property Tests
// =============================================================================

fn unit_key_strategy() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9_]{0,12}"
}

fn project_code_strategy() -> impl Strategy<Value = StepCode> {
    prop::sample::select(StepRegistry::PROJECT.codes().chars().collect::<Vec<_>>())
        .prop_map(StepCode::new)
}

proptest! {
    /// Marking is idempotent and the record never holds a code twice
    #[test]
    fn mark_done_is_idempotent(
        unit in unit_key_strategy(),
        codes in prop::collection::vec(project_code_strategy(), 0..30),
    ) {
        let mut record = CompletionRecord::new();
        for code in &codes {
            record.mark_done(&unit, *code);
            prop_assert!(record.is_done(&unit, *code));
            prop_assert!(!record.mark_done(&unit, *code));
        }

        let done = record.done_steps(&unit);
        let mut seen: Vec<char> = done.chars().collect();
        seen.sort_unstable();
        seen.dedup();
        prop_assert_eq!(seen.len(), done.chars().count());
        for code in &codes {
            prop_assert!(done.contains(code.as_char()));
        }
    }

    /// Units never share entries
    #[test]
    fn units_are_independent(
        first in unit_key_strategy(),
        second in unit_key_strategy(),
        code in project_code_strategy(),
    ) {
        prop_assume!(first != second);
        let mut record = CompletionRecord::new();
        record.mark_done(&first, code);
        prop_assert!(!record.is_done(&second, code));
        prop_assert_eq!(record.done_steps(&second), "");
    }

    /// The record survives its JSON form
    #[test]
    fn record_json_roundtrip(
        entries in prop::collection::vec((unit_key_strategy(), project_code_strategy()), 0..20),
    ) {
        let mut record = CompletionRecord::new();
        for (unit, code) in &entries {
            record.mark_done(unit, *code);
        }
        let json = serde_json::to_string(&record).expect("Should serialize");
        let parsed: CompletionRecord = serde_json::from_str(&json).expect("Should parse");
        prop_assert_eq!(record, parsed);
    }
}

// =============================================================================
// Step Decision Property Tests
// =============================================================================

proptest! {
    /// Unsupported steps never run, whatever else holds
    #[test]
    fn unsupported_never_runs(
        index in 0usize..9,
        done in any::<bool>(),
        forced in any::<bool>(),
        selected in any::<bool>(),
    ) {
        let step = &StepRegistry::PROJECT.steps()[index];
        prop_assert_eq!(
            decide(step, false, done, forced, selected),
            StepDecision::Skip(SkipReason::Unsupported)
        );
    }

    /// Supported non-skippable steps always run
    #[test]
    fn non_skippable_always_runs(
        done in any::<bool>(),
        forced in any::<bool>(),
        selected in any::<bool>(),
    ) {
        for step in StepRegistry::PROJECT.steps().iter().filter(|s| !s.skippable) {
            prop_assert_eq!(decide(step, true, done, forced, selected), StepDecision::Run);
        }
    }

    /// A selected skippable step runs exactly when it is not done or forced
    #[test]
    fn skippable_runs_when_pending_or_forced(
        index in 0usize..4,
        done in any::<bool>(),
        forced in any::<bool>(),
    ) {
        let step = &StepRegistry::EGG.steps()[index];
        prop_assume!(step.skippable);
        let runs = decide(step, true, done, forced, true) == StepDecision::Run;
        prop_assert_eq!(runs, !done || forced);
    }
}

// =============================================================================
// Fetch Rule Property Tests
// =============================================================================

proptest! {
    /// An archive at least as large as the remote one is never fetched again
    #[test]
    fn complete_archive_is_kept(remote in 0u64..1 << 40, extra in 0u64..1024) {
        prop_assert!(!needs_fetch(Some(remote + extra), Some(remote)));
    }

    /// A shorter local archive is always fetched again
    #[test]
    fn partial_archive_is_refetched(remote in 1u64..1 << 40, missing in 1u64..1024) {
        let local = remote.saturating_sub(missing);
        prop_assert!(needs_fetch(Some(local), Some(remote)));
    }

    /// A missing archive is always fetched
    #[test]
    fn missing_archive_is_fetched(remote in prop::option::of(0u64..1 << 40)) {
        prop_assert!(needs_fetch(None, remote));
    }
}

// =============================================================================
// Template and Egg Name Property Tests
// =============================================================================

proptest! {
    /// Text without `$` comes back unchanged
    #[test]
    fn dollar_free_text_is_unchanged(text in "[^$]{0,200}") {
        let out = substitute(&text, &Substitutions::new()).expect("Should substitute");
        prop_assert_eq!(out, text);
    }

    /// `$$` always renders as a single dollar
    #[test]
    fn escaped_dollar_renders_once(prefix in "[a-z ]{0,20}", suffix in "[a-z ]{0,20}") {
        let template = format!("{}$${}", prefix, suffix);
        let out = substitute(&template, &Substitutions::new()).expect("Should substitute");
        prop_assert_eq!(out, format!("{}${}", prefix, suffix));
    }

    /// Keeping both tags leaves the egg name alone
    #[test]
    fn dependent_egg_name_is_kept(
        name in "[a-oq-z][a-z0-9]{0,10}",
        version in "[0-9]{1,2}\\.[0-9]{1,2}",
    ) {
        let file = format!("{}-{}-py3.11-linux-x86_64.egg", name, version);
        prop_assert_eq!(normalize_egg_name(&file, true, true), file);
    }

    /// Dropping both tags leaves name and version
    #[test]
    fn independent_egg_name_is_stripped(
        name in "[a-oq-z][a-z0-9]{0,10}",
        version in "[0-9]{1,2}\\.[0-9]{1,2}",
    ) {
        let file = format!("{}-{}-py3.11-linux-x86_64.egg", name, version);
        prop_assert_eq!(
            normalize_egg_name(&file, false, false),
            format!("{}-{}.egg", name, version)
        );
    }
}
