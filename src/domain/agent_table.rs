//! The "agent name" is data, not code (design note): a table of
//! `{phase, orderIndex, functionName, displayName, isCritical}`, iterated by
//! the analysis coordinator instead of being hard-coded per phase.

use crate::domain::models::PhaseName;

#[derive(Debug, Clone)]
pub struct AgentDef {
    pub display_name: String,
    pub function_name: String,
    pub phase: PhaseName,
    pub is_critical: bool,
}

fn def(display_name: &str, function_name: &str, phase: PhaseName, is_critical: bool) -> AgentDef {
    AgentDef {
        display_name: display_name.to_string(),
        function_name: function_name.to_string(),
        phase,
        is_critical,
    }
}

pub fn analysis_phase_agents() -> Vec<AgentDef> {
    vec![
        def("Macro", "macroAnalyst", PhaseName::Analysis, false),
        def("Market", "marketAnalyst", PhaseName::Analysis, true),
        def("News", "newsAnalyst", PhaseName::Analysis, false),
        def("Social", "socialAnalyst", PhaseName::Analysis, false),
        def("Fundamentals", "fundamentalsAnalyst", PhaseName::Analysis, false),
    ]
}

/// Bull/Bear alternate for `rounds` debate rounds, then Research Manager runs once.
pub fn research_phase_agents(rounds: u32) -> Vec<AgentDef> {
    let mut agents = Vec::new();
    for round in 1..=rounds.max(1) {
        agents.push(def(
            &format!("Bull (round {round})"),
            "bullResearcher",
            PhaseName::Research,
            false,
        ));
        agents.push(def(
            &format!("Bear (round {round})"),
            "bearResearcher",
            PhaseName::Research,
            false,
        ));
    }
    agents.push(def("Research Manager", "researchManager", PhaseName::Research, false));
    agents
}

pub fn trading_phase_agents() -> Vec<AgentDef> {
    vec![def("Trader", "trader", PhaseName::Trading, true)]
}

pub fn risk_phase_agents() -> Vec<AgentDef> {
    vec![
        def("Risky", "riskyAnalyst", PhaseName::Risk, false),
        def("Safe", "safeAnalyst", PhaseName::Risk, false),
        def("Neutral", "neutralAnalyst", PhaseName::Risk, false),
        def("Risk Manager", "riskManager", PhaseName::Risk, true),
    ]
}

/// Skipped entirely (empty) when the analysis is running as part of a rebalance.
pub fn portfolio_phase_agents(in_rebalance: bool) -> Vec<AgentDef> {
    if in_rebalance {
        Vec::new()
    } else {
        vec![def(
            "Analysis Portfolio Manager",
            "analysisPortfolioManager",
            PhaseName::Portfolio,
            true,
        )]
    }
}

pub fn agents_for_phase(phase: PhaseName, debate_rounds: u32, in_rebalance: bool) -> Vec<AgentDef> {
    match phase {
        PhaseName::Analysis => analysis_phase_agents(),
        PhaseName::Research => research_phase_agents(debate_rounds),
        PhaseName::Trading => trading_phase_agents(),
        PhaseName::Risk => risk_phase_agents(),
        PhaseName::Portfolio => portfolio_phase_agents(in_rebalance),
    }
}

/// Whether a named agent in a phase is safety-critical, looked up from the
/// same table `agents_for_phase` builds run steps from — keeps this keyed by
/// phase+in_rebalance instead of drifting into a separately maintained list.
pub fn is_critical(phase: PhaseName, display_name: &str, in_rebalance: bool) -> bool {
    agents_for_phase(phase, 1, in_rebalance).into_iter().any(|def| def.is_critical && def.display_name == display_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn research_phase_has_manager_last() {
        let agents = research_phase_agents(2);
        assert_eq!(agents.len(), 5); // 2 rounds * (Bull+Bear) + manager
        assert_eq!(agents.last().unwrap().display_name, "Research Manager");
    }

    #[test]
    fn portfolio_phase_empty_inside_rebalance() {
        assert!(portfolio_phase_agents(true).is_empty());
        assert_eq!(portfolio_phase_agents(false).len(), 1);
    }

    #[test]
    fn critical_agents_match_spec() {
        let critical: Vec<&str> = analysis_phase_agents()
            .into_iter()
            .chain(trading_phase_agents())
            .chain(risk_phase_agents())
            .filter(|a| a.is_critical)
            .map(|a| Box::leak(a.display_name.into_boxed_str()) as &str)
            .collect();
        assert!(critical.contains(&"Market"));
        assert!(critical.contains(&"Trader"));
        assert!(critical.contains(&"Risk Manager"));
    }

    #[test]
    fn portfolio_manager_critical_only_outside_rebalance() {
        assert!(is_critical(PhaseName::Portfolio, "Analysis Portfolio Manager", false));
        assert!(!is_critical(PhaseName::Portfolio, "Analysis Portfolio Manager", true));
    }
}
