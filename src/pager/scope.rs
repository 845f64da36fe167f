//! Tenant scope of a paginated cache.

/// Organization the cache reads and writes for.
///
/// `Unresolved` means the tenant is not known yet (typically during startup)
/// and makes fetches quiet no-ops. `Failed` means the lookup went wrong and
/// makes fetches return an error instead, so the two cases can be told apart.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum OrgScope {
  #[default]
  Unresolved,
  Resolved(String),
  Failed(String),
}

impl OrgScope {
  /// Resolved scope for a non-empty id; an empty id is treated as unresolved.
  pub fn resolved(org_id: impl Into<String>) -> Self {
    let org_id = org_id.into();
    if org_id.trim().is_empty() {
      OrgScope::Unresolved
    } else {
      OrgScope::Resolved(org_id)
    }
  }

  pub fn from_option(org_id: Option<String>) -> Self {
    org_id.map(Self::resolved).unwrap_or_default()
  }

  pub fn org_id(&self) -> Option<&str> {
    match self {
      OrgScope::Resolved(id) => Some(id),
      _ => None,
    }
  }

  pub fn is_resolved(&self) -> bool {
    matches!(self, OrgScope::Resolved(_))
  }
}
