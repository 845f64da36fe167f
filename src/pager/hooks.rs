//! Caller-supplied callbacks run after local mutations.

use std::sync::Arc;

/// What the caller should do once a local mutation has been applied.
#[must_use]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AfterMutation {
  #[default]
  Nothing,
  /// The current page should be fetched again, e.g. because the server
  /// computes fields the optimistic copy lacks.
  RefetchCurrentPage,
}

/// Identifies the cache a hook fires for.
#[derive(Debug, Clone, Copy)]
pub struct HookContext<'a> {
  pub entity_key: &'a str,
  pub org_id: &'a str,
}

/// Runs after `add_entity`, with the added entity.
pub type AddHook<T> = Arc<dyn Fn(&HookContext<'_>, &T) -> AfterMutation + Send + Sync>;

/// Runs after `remove_entity`, with the removed id.
pub type RemoveHook = Arc<dyn Fn(&HookContext<'_>, &str) -> AfterMutation + Send + Sync>;
