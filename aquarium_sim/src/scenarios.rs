//! Fault scenarios for DST.

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioId {
    /// AQ-001: One session claims an empty tank
    SoloClaim,

    /// AQ-002: Several sessions race for an empty tank
    ContestedClaim,

    /// AQ-003: The same race on a store with compare-and-swap
    ContestedClaimCas,

    /// AQ-004: The owner disappears without handoff
    OwnerCrash,

    /// AQ-005: The owner is cut off the store, then comes back
    OwnerPartition,

    /// AQ-006: Followers under an owner that never publishes
    ColdFollower,

    /// AQ-007: Failing writes, jitter and listener errors
    FlakyStore,

    /// AQ-008: Purchases append fish while sessions run
    Purchase,

    /// AQ-009: Fish removed and added continuously
    CatalogChurn,
}

impl ScenarioId {
    /// Returns a list of all scenarios.
    pub fn all() -> Vec<ScenarioId> {
        vec![
            ScenarioId::SoloClaim,
            ScenarioId::ContestedClaim,
            ScenarioId::ContestedClaimCas,
            ScenarioId::OwnerCrash,
            ScenarioId::OwnerPartition,
            ScenarioId::ColdFollower,
            ScenarioId::FlakyStore,
            ScenarioId::Purchase,
            ScenarioId::CatalogChurn,
        ]
    }

    /// Returns the scenario name.
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::SoloClaim => "solo_claim",
            ScenarioId::ContestedClaim => "contested_claim",
            ScenarioId::ContestedClaimCas => "contested_claim_cas",
            ScenarioId::OwnerCrash => "owner_crash",
            ScenarioId::OwnerPartition => "owner_partition",
            ScenarioId::ColdFollower => "cold_follower",
            ScenarioId::FlakyStore => "flaky_store",
            ScenarioId::Purchase => "purchase",
            ScenarioId::CatalogChurn => "catalog_churn",
        }
    }

    /// Returns a description of the scenario.
    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::SoloClaim => "Single session claims within a second and publishes at most every 100ms",
            ScenarioId::ContestedClaim => "All sessions start together without CAS, verify a single owner settles",
            ScenarioId::ContestedClaimCas => "All sessions start together with CAS, verify no two owners ever",
            ScenarioId::OwnerCrash => "Owner killed at 5s, verify takeover only after the heartbeat goes stale",
            ScenarioId::OwnerPartition => "Owner disconnected for 20s, verify takeover and relinquish on reconnect",
            ScenarioId::ColdFollower => "Owner never publishes, followers hold catalog positions at rest",
            ScenarioId::FlakyStore => "30% write failures + 50ms jitter + listener errors, no crash",
            ScenarioId::Purchase => "Two purchases mid-run reach every session and get published",
            ScenarioId::CatalogChurn => "Removals and purchases keep every session in step with the catalog",
        }
    }

    /// Shortest run that can exercise the scenario (seconds).
    pub fn min_duration(&self) -> f64 {
        match self {
            ScenarioId::OwnerCrash => 30.0,
            ScenarioId::OwnerPartition => 40.0,
            ScenarioId::ColdFollower => 8.0,
            ScenarioId::Purchase | ScenarioId::CatalogChurn => 12.0,
            _ => 5.0,
        }
    }

    /// Fewest sessions the scenario needs.
    pub fn min_sessions(&self) -> usize {
        match self {
            ScenarioId::SoloClaim => 1,
            _ => 2,
        }
    }
}

impl std::fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for ScenarioId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "solo_claim" | "soloclaim" | "aq-001" => Ok(ScenarioId::SoloClaim),
            "contested_claim" | "contestedclaim" | "aq-002" => Ok(ScenarioId::ContestedClaim),
            "contested_claim_cas" | "contestedclaimcas" | "aq-003" => Ok(ScenarioId::ContestedClaimCas),
            "owner_crash" | "ownercrash" | "aq-004" => Ok(ScenarioId::OwnerCrash),
            "owner_partition" | "ownerpartition" | "aq-005" => Ok(ScenarioId::OwnerPartition),
            "cold_follower" | "coldfollower" | "aq-006" => Ok(ScenarioId::ColdFollower),
            "flaky_store" | "flakystore" | "aq-007" => Ok(ScenarioId::FlakyStore),
            "purchase" | "aq-008" => Ok(ScenarioId::Purchase),
            "catalog_churn" | "catalogchurn" | "aq-009" => Ok(ScenarioId::CatalogChurn),
            _ => Err(format!("Unknown scenario: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_parse_back() {
        for scenario in ScenarioId::all() {
            assert_eq!(scenario.name().parse::<ScenarioId>(), Ok(scenario));
        }
        assert_eq!("AQ-004".parse::<ScenarioId>(), Ok(ScenarioId::OwnerCrash));
        assert!("split_brain".parse::<ScenarioId>().is_err());
    }
}
