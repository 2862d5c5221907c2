//! Sales-methodology weighting.
//!
//! `classify` turns meeting signals plus stored relationship context into a
//! `CallContext`; `compute_methodology_weights` blends six frameworks from a
//! fixed base distribution with additive adjustments, then clamps and
//! renormalizes so the weights always sum to 1.0. The top three frameworks
//! drive section emphasis and the generation instructions.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::db::{DbAccount, DbOpportunity};

use super::constants::{LARGE_DEAL_VALUE, SMALL_DEAL_VALUE};
use super::signals::MeetingSignals;

// ---------------------------------------------------------------------------
// Frameworks
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Methodology {
    Spin,
    Meddic,
    Bant,
    Challenger,
    Sandler,
    SolutionSelling,
}

impl Methodology {
    pub const ALL: [Methodology; 6] = [
        Methodology::Spin,
        Methodology::Meddic,
        Methodology::Bant,
        Methodology::Challenger,
        Methodology::Sandler,
        Methodology::SolutionSelling,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Methodology::Spin => "SPIN Selling",
            Methodology::Meddic => "MEDDIC",
            Methodology::Bant => "BANT",
            Methodology::Challenger => "Challenger Sale",
            Methodology::Sandler => "Sandler",
            Methodology::SolutionSelling => "Solution Selling",
        }
    }

    pub fn guidance(&self) -> &'static str {
        match self {
            Methodology::Spin => {
                "Ask situation, problem, implication and need-payoff questions before pitching."
            }
            Methodology::Meddic => {
                "Confirm metrics, economic buyer, decision criteria, decision process, pain and champion."
            }
            Methodology::Bant => "Qualify budget, authority, need and timeline explicitly.",
            Methodology::Challenger => {
                "Lead with a commercial insight that reframes how they see the problem."
            }
            Methodology::Sandler => {
                "Set an up-front contract for the call and let them articulate the pain."
            }
            Methodology::SolutionSelling => {
                "Map each stated pain to a concrete capability and the value it delivers."
            }
        }
    }

    /// Generic sheet section this framework pushes to the fore.
    pub fn emphasized_section(&self) -> &'static str {
        match self {
            Methodology::Spin | Methodology::Sandler => "discovery_questions",
            Methodology::Meddic | Methodology::Bant => "objectives",
            Methodology::Challenger => "next_steps",
            Methodology::SolutionSelling => "suggested_agenda",
        }
    }
}

// ---------------------------------------------------------------------------
// Call context
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallType {
    Discovery,
    Demo,
    Proposal,
    Negotiation,
    Closing,
    Followup,
}

impl CallType {
    pub const ALL: [CallType; 6] = [
        CallType::Discovery,
        CallType::Demo,
        CallType::Proposal,
        CallType::Negotiation,
        CallType::Closing,
        CallType::Followup,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CallType::Discovery => "discovery",
            CallType::Demo => "demo",
            CallType::Proposal => "proposal",
            CallType::Negotiation => "negotiation",
            CallType::Closing => "closing",
            CallType::Followup => "followup",
        }
    }

    fn keywords(&self) -> &'static [&'static str] {
        match self {
            CallType::Discovery => &["discovery", "intro", "introduction", "initial", "exploratory"],
            CallType::Demo => &["demo", "demonstration", "walkthrough"],
            CallType::Proposal => &["proposal", "pricing", "quote", "sow"],
            CallType::Negotiation => &["negotiation", "negotiate", "contract", "terms", "redline"],
            CallType::Closing => &["close", "closing", "signature", "sign-off", "final"],
            CallType::Followup => &["follow-up", "followup", "follow up", "check-in", "sync"],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DealStage {
    Prospecting,
    Qualifying,
    Developing,
    Proposing,
    Negotiating,
    Closed,
}

impl DealStage {
    pub const ALL: [DealStage; 6] = [
        DealStage::Prospecting,
        DealStage::Qualifying,
        DealStage::Developing,
        DealStage::Proposing,
        DealStage::Negotiating,
        DealStage::Closed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DealStage::Prospecting => "prospecting",
            DealStage::Qualifying => "qualifying",
            DealStage::Developing => "developing",
            DealStage::Proposing => "proposing",
            DealStage::Negotiating => "negotiating",
            DealStage::Closed => "closed",
        }
    }

    /// Map a CRM stage label ("Needs Analysis", "Proposal/Price Quote", ...).
    pub fn from_crm_label(label: &str) -> Self {
        let label = label.to_lowercase();
        if label.starts_with("closed") {
            DealStage::Closed
        } else if label.contains("negotiat") {
            DealStage::Negotiating
        } else if label.contains("proposal") || label.contains("quote") {
            DealStage::Proposing
        } else if label.contains("needs analysis")
            || label.contains("value proposition")
            || label.contains("decision")
            || label.contains("perception")
            || label.contains("develop")
        {
            DealStage::Developing
        } else if label.contains("qualif") {
            DealStage::Qualifying
        } else {
            DealStage::Prospecting
        }
    }

    /// Call type assumed when the title carries no keyword.
    pub fn default_call_type(&self) -> CallType {
        match self {
            DealStage::Prospecting | DealStage::Qualifying => CallType::Discovery,
            DealStage::Developing => CallType::Demo,
            DealStage::Proposing => CallType::Proposal,
            DealStage::Negotiating => CallType::Negotiation,
            DealStage::Closed => CallType::Followup,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CompanySize {
    Smb,
    MidMarket,
    Enterprise,
}

impl CompanySize {
    pub fn from_employees(count: Option<i64>) -> Self {
        match count {
            Some(n) if n < 50 => CompanySize::Smb,
            Some(n) if n < 1000 => CompanySize::MidMarket,
            Some(_) => CompanySize::Enterprise,
            None => CompanySize::MidMarket,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SalesCycle {
    Short,
    Medium,
    Long,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    Low,
    Medium,
    High,
}

/// Derived per generation call; never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallContext {
    pub call_type: CallType,
    pub deal_stage: DealStage,
    pub deal_value: Option<f64>,
    pub industry: Option<String>,
    pub company_size: CompanySize,
    pub sales_cycle: SalesCycle,
    pub complexity: Complexity,
    pub is_new_business: bool,
}

/// Relationship context available for classification.
#[derive(Debug, Clone, Default)]
pub struct StoredContext {
    pub account: Option<DbAccount>,
    /// Open opportunities first.
    pub opportunities: Vec<DbOpportunity>,
    pub contact_count: usize,
}

fn call_type_patterns() -> &'static Vec<(CallType, Regex)> {
    static RE: OnceLock<Vec<(CallType, Regex)>> = OnceLock::new();
    RE.get_or_init(|| {
        CallType::ALL
            .iter()
            .map(|ct| {
                let alternatives: Vec<String> =
                    ct.keywords().iter().map(|k| regex::escape(k)).collect();
                let pattern = format!(r"(?i)\b(?:{})\b", alternatives.join("|"));
                (*ct, Regex::new(&pattern).unwrap())
            })
            .collect()
    })
}

/// Whole-word keyword classification of a title, first match in priority order.
pub fn call_type_from_title(title: &str) -> Option<CallType> {
    call_type_patterns()
        .iter()
        .find(|(_, re)| re.is_match(title))
        .map(|(ct, _)| *ct)
}

/// Derive the call context from the meeting and whatever is on record.
pub fn classify(signals: &MeetingSignals, stored: &StoredContext) -> CallContext {
    let primary = stored.opportunities.iter().find(|o| o.is_open());
    let deal_stage = match primary {
        Some(opp) => opp
            .stage
            .as_deref()
            .map(DealStage::from_crm_label)
            .unwrap_or(DealStage::Prospecting),
        None if stored.opportunities.iter().any(|o| o.is_closed_won()) => DealStage::Closed,
        None => DealStage::Prospecting,
    };
    let call_type =
        call_type_from_title(&signals.title).unwrap_or_else(|| deal_stage.default_call_type());
    let deal_value = primary.and_then(|o| o.amount);

    let account = stored.account.as_ref();
    let company_size = CompanySize::from_employees(account.and_then(|a| a.employee_count));

    let sales_cycle = match (company_size, deal_value) {
        (CompanySize::Enterprise, _) => SalesCycle::Long,
        (_, Some(v)) if v >= LARGE_DEAL_VALUE => SalesCycle::Long,
        (CompanySize::Smb, _) => SalesCycle::Short,
        (_, Some(v)) if v < SMALL_DEAL_VALUE => SalesCycle::Short,
        _ => SalesCycle::Medium,
    };

    let complexity = if company_size == CompanySize::Enterprise || stored.contact_count >= 5 {
        Complexity::High
    } else if company_size == CompanySize::Smb && stored.contact_count <= 1 {
        Complexity::Low
    } else {
        Complexity::Medium
    };

    let is_new_business =
        account.is_none() || !stored.opportunities.iter().any(|o| o.is_closed_won());

    CallContext {
        call_type,
        deal_stage,
        deal_value,
        industry: account.and_then(|a| a.industry.clone()),
        company_size,
        sales_cycle,
        complexity,
        is_new_business,
    }
}

// ---------------------------------------------------------------------------
// Weights
// ---------------------------------------------------------------------------

/// Six non-negative weights summing to 1.0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MethodologyWeights {
    pub spin: f64,
    pub meddic: f64,
    pub bant: f64,
    pub challenger: f64,
    pub sandler: f64,
    pub solution_selling: f64,
}

impl MethodologyWeights {
    /// Starting distribution before adjustments.
    pub const BASE: MethodologyWeights = MethodologyWeights {
        spin: 0.20,
        meddic: 0.20,
        bant: 0.15,
        challenger: 0.15,
        sandler: 0.15,
        solution_selling: 0.15,
    };

    pub fn get(&self, m: Methodology) -> f64 {
        match m {
            Methodology::Spin => self.spin,
            Methodology::Meddic => self.meddic,
            Methodology::Bant => self.bant,
            Methodology::Challenger => self.challenger,
            Methodology::Sandler => self.sandler,
            Methodology::SolutionSelling => self.solution_selling,
        }
    }

    fn slot(&mut self, m: Methodology) -> &mut f64 {
        match m {
            Methodology::Spin => &mut self.spin,
            Methodology::Meddic => &mut self.meddic,
            Methodology::Bant => &mut self.bant,
            Methodology::Challenger => &mut self.challenger,
            Methodology::Sandler => &mut self.sandler,
            Methodology::SolutionSelling => &mut self.solution_selling,
        }
    }

    fn adjust(&mut self, deltas: &[(Methodology, f64)]) {
        for (m, delta) in deltas {
            *self.slot(*m) += delta;
        }
    }

    pub fn sum(&self) -> f64 {
        Methodology::ALL.iter().map(|m| self.get(*m)).sum()
    }

    /// Clamp to non-negative and rescale to sum to 1.0. An all-zero vector
    /// falls back to the base distribution.
    pub fn normalized(mut self) -> Self {
        for m in Methodology::ALL {
            let w = self.slot(m);
            if !w.is_finite() || *w < 0.0 {
                *w = 0.0;
            }
        }
        let total = self.sum();
        if total <= f64::EPSILON {
            return Self::BASE;
        }
        for m in Methodology::ALL {
            *self.slot(m) /= total;
        }
        self
    }

    /// All frameworks, heaviest first; ties keep declaration order.
    pub fn ranked(&self) -> Vec<(Methodology, f64)> {
        let mut ranked: Vec<(Methodology, f64)> =
            Methodology::ALL.iter().map(|m| (*m, self.get(*m))).collect();
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        ranked
    }

    pub fn top(&self, n: usize) -> Vec<Methodology> {
        self.ranked().into_iter().take(n).map(|(m, _)| m).collect()
    }
}

/// Blend the frameworks for a call context.
pub fn compute_methodology_weights(context: &CallContext) -> MethodologyWeights {
    use Methodology::*;

    let mut weights = MethodologyWeights::BASE;

    let by_call_type: &[(Methodology, f64)] = match context.call_type {
        CallType::Discovery => &[
            (Spin, 0.15),
            (Sandler, 0.10),
            (Bant, 0.05),
            (Meddic, -0.05),
            (Challenger, -0.05),
        ],
        CallType::Demo => &[(SolutionSelling, 0.15), (Challenger, 0.05), (Spin, 0.05)],
        CallType::Proposal => &[(Meddic, 0.15), (Bant, 0.10), (Challenger, 0.05), (Spin, -0.05)],
        CallType::Negotiation => &[
            (Meddic, 0.10),
            (Bant, 0.10),
            (Challenger, 0.10),
            (Sandler, 0.05),
            (Spin, -0.10),
        ],
        CallType::Closing => &[(Meddic, 0.15), (Challenger, 0.10), (Bant, 0.05), (Spin, -0.10)],
        CallType::Followup => &[(Sandler, 0.10), (SolutionSelling, 0.05)],
    };
    weights.adjust(by_call_type);

    match context.deal_value {
        Some(v) if v >= LARGE_DEAL_VALUE => weights.adjust(&[(Meddic, 0.10), (SolutionSelling, 0.05)]),
        Some(v) if v < SMALL_DEAL_VALUE => weights.adjust(&[(Bant, 0.05), (Meddic, -0.05)]),
        _ => {}
    }

    match context.complexity {
        Complexity::High => weights.adjust(&[(Meddic, 0.10), (SolutionSelling, 0.05)]),
        Complexity::Low => weights.adjust(&[(Bant, 0.05)]),
        Complexity::Medium => {}
    }

    if context.is_new_business {
        weights.adjust(&[(Challenger, 0.05), (Spin, 0.05)]);
    } else {
        weights.adjust(&[(Sandler, 0.05), (SolutionSelling, 0.05)]);
    }

    weights.normalized()
}

// ---------------------------------------------------------------------------
// Plan
// ---------------------------------------------------------------------------

/// Classification, weights and the instructions handed to generation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MethodologyPlan {
    pub context: CallContext,
    pub weights: MethodologyWeights,
    pub top: Vec<Methodology>,
    pub instructions: String,
}

impl MethodologyPlan {
    /// Section ids emphasized by the top frameworks, in rank order.
    pub fn emphasized_sections(&self) -> Vec<&'static str> {
        let mut sections = Vec::new();
        for m in &self.top {
            let id = m.emphasized_section();
            if !sections.contains(&id) {
                sections.push(id);
            }
        }
        sections
    }
}

pub fn plan_methodology(signals: &MeetingSignals, stored: &StoredContext) -> MethodologyPlan {
    let context = classify(signals, stored);
    let weights = compute_methodology_weights(&context);
    let top = weights.top(3);
    let instructions = render_instructions(&context, &weights);
    MethodologyPlan {
        context,
        weights,
        top,
        instructions,
    }
}

/// Human-readable generation instructions naming the top three frameworks.
pub fn render_instructions(context: &CallContext, weights: &MethodologyWeights) -> String {
    let mut out = format!(
        "This is a {} call at the {} stage ({} business). Blend these frameworks:\n",
        context.call_type.as_str(),
        context.deal_stage.as_str(),
        if context.is_new_business { "new" } else { "existing" }
    );
    for (rank, (m, w)) in weights.ranked().into_iter().take(3).enumerate() {
        out.push_str(&format!(
            "{}. {} ({:.0}%): {}\n",
            rank + 1,
            m.label(),
            w * 100.0,
            m.guidance()
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_utils::{sample_account, sample_opportunity};
    use crate::prepare::signals::extract_signals;
    use crate::types::MeetingRecord;

    fn signals(title: &str) -> MeetingSignals {
        extract_signals(&MeetingRecord {
            title: Some(title.into()),
            ..Default::default()
        })
    }

    fn context(call_type: CallType) -> CallContext {
        CallContext {
            call_type,
            deal_stage: DealStage::Prospecting,
            deal_value: None,
            industry: None,
            company_size: CompanySize::MidMarket,
            sales_cycle: SalesCycle::Medium,
            complexity: Complexity::Medium,
            is_new_business: true,
        }
    }

    #[test]
    fn test_weights_sum_to_one_for_every_context() {
        let values = [None, Some(5_000.0), Some(50_000.0), Some(250_000.0)];
        let complexities = [Complexity::Low, Complexity::Medium, Complexity::High];
        for call_type in CallType::ALL {
            for stage in DealStage::ALL {
                for value in values {
                    for complexity in complexities {
                        for is_new_business in [true, false] {
                            let ctx = CallContext {
                                deal_stage: stage,
                                deal_value: value,
                                complexity,
                                is_new_business,
                                ..context(call_type)
                            };
                            let w = compute_methodology_weights(&ctx);
                            assert!((w.sum() - 1.0).abs() < 1e-9, "{:?} sums to {}", ctx, w.sum());
                            for m in Methodology::ALL {
                                assert!(w.get(m) >= 0.0);
                            }
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn test_discovery_favors_question_frameworks() {
        let w = compute_methodology_weights(&context(CallType::Discovery));
        assert_eq!(w.top(1), vec![Methodology::Spin]);
        assert!(w.sandler > w.meddic);
    }

    #[test]
    fn test_proposal_and_negotiation_favor_qualification() {
        for call_type in [CallType::Proposal, CallType::Negotiation] {
            let ctx = CallContext {
                deal_value: Some(150_000.0),
                complexity: Complexity::High,
                ..context(call_type)
            };
            let w = compute_methodology_weights(&ctx);
            assert_eq!(w.top(1), vec![Methodology::Meddic]);
            assert!(w.top(3).contains(&Methodology::Bant) || w.top(3).contains(&Methodology::Challenger));
        }
    }

    #[test]
    fn test_normalized_clamps_negatives_and_handles_zero() {
        let raw = MethodologyWeights {
            spin: -0.5,
            meddic: 0.5,
            bant: 0.5,
            challenger: 0.0,
            sandler: 0.0,
            solution_selling: 0.0,
        };
        let n = raw.normalized();
        assert_eq!(n.spin, 0.0);
        assert!((n.meddic - 0.5).abs() < 1e-9);

        let zero = MethodologyWeights {
            spin: 0.0,
            meddic: 0.0,
            bant: 0.0,
            challenger: 0.0,
            sandler: 0.0,
            solution_selling: 0.0,
        };
        assert_eq!(zero.normalized(), MethodologyWeights::BASE);
    }

    #[test]
    fn test_call_type_keywords_are_whole_word() {
        assert_eq!(call_type_from_title("Acme Corp — Discovery"), Some(CallType::Discovery));
        assert_eq!(call_type_from_title("Product DEMO for Globex"), Some(CallType::Demo));
        assert_eq!(call_type_from_title("Contract redlines"), Some(CallType::Negotiation));
        assert_eq!(call_type_from_title("Weekly follow-up"), Some(CallType::Followup));
        assert_eq!(call_type_from_title("Q3 follow up"), Some(CallType::Followup));
        // "closet" and "syncing" must not trigger closing / followup
        assert_eq!(call_type_from_title("Closet design syncing"), None);
    }

    #[test]
    fn test_classify_falls_back_to_stage_and_defaults() {
        let stored = StoredContext {
            account: Some(sample_account("a1", "Acme", None)),
            opportunities: vec![sample_opportunity("o1", "a1", "Falcon", "Proposal/Price Quote", Some(120_000.0))],
            contact_count: 2,
        };
        let ctx = classify(&signals("Acme weekly"), &stored);
        assert_eq!(ctx.deal_stage, DealStage::Proposing);
        assert_eq!(ctx.call_type, CallType::Proposal);
        assert_eq!(ctx.deal_value, Some(120_000.0));
        assert_eq!(ctx.company_size, CompanySize::MidMarket);
        assert_eq!(ctx.sales_cycle, SalesCycle::Long);
        assert_eq!(ctx.industry.as_deref(), Some("Manufacturing"));
        assert!(ctx.is_new_business);

        let empty = classify(&signals("Hello"), &StoredContext::default());
        assert_eq!(empty.call_type, CallType::Discovery);
        assert_eq!(empty.company_size, CompanySize::MidMarket);
        assert_eq!(empty.complexity, Complexity::Medium);
        assert!(empty.is_new_business);
    }

    #[test]
    fn test_existing_business_detected_from_closed_won() {
        let stored = StoredContext {
            account: Some(sample_account("a1", "Acme", None)),
            opportunities: vec![sample_opportunity("o1", "a1", "Year one", "Closed Won", Some(40_000.0))],
            contact_count: 1,
        };
        let ctx = classify(&signals("Acme check-in"), &stored);
        assert!(!ctx.is_new_business);
        assert_eq!(ctx.deal_stage, DealStage::Closed);
        assert_eq!(ctx.call_type, CallType::Followup);
    }

    #[test]
    fn test_crm_stage_labels() {
        assert_eq!(DealStage::from_crm_label("Needs Analysis"), DealStage::Developing);
        assert_eq!(DealStage::from_crm_label("Qualification"), DealStage::Qualifying);
        assert_eq!(DealStage::from_crm_label("Negotiation/Review"), DealStage::Negotiating);
        assert_eq!(DealStage::from_crm_label("Closed Lost"), DealStage::Closed);
        assert_eq!(DealStage::from_crm_label("Something custom"), DealStage::Prospecting);
    }

    #[test]
    fn test_plan_instructions_and_emphasis() {
        let plan = plan_methodology(&signals("Intro call"), &StoredContext::default());
        assert_eq!(plan.top.len(), 3);
        assert!(plan.instructions.contains("SPIN Selling"));
        assert!(plan.instructions.starts_with("This is a discovery call"));
        assert_eq!(plan.emphasized_sections()[0], "discovery_questions");
    }
}
