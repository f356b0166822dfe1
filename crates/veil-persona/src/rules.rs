use crate::persona::PersonaProfile;
use crate::sanitize::name_alternation;
use anyhow::{Context, Result};
use regex::{Regex, RegexBuilder};

/// Precedence tiers for identity probes, highest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RuleTier {
    ModelPhrase = 1,
    ModelQuery = 2,
    GreetingIdentity = 3,
    Greeting = 4,
    Capability = 5,
    Identity = 6,
}

impl RuleTier {
    pub fn as_str(self) -> &'static str {
        match self {
            RuleTier::ModelPhrase => "model-phrase",
            RuleTier::ModelQuery => "model-query",
            RuleTier::GreetingIdentity => "greeting-identity",
            RuleTier::Greeting => "greeting",
            RuleTier::Capability => "capability",
            RuleTier::Identity => "identity",
        }
    }

    /// Every priority inside a tier sorts before the next tier's.
    pub fn base_priority(self) -> u32 {
        self as u32 * 100
    }
}

#[derive(Debug, Clone)]
pub enum Matcher {
    /// Plain substring checks against the lowercased text.
    Contains(Vec<String>),
    Pattern(Regex),
}

impl Matcher {
    pub fn pattern(pattern: &str) -> Result<Self> {
        let regex = RegexBuilder::new(pattern)
            .case_insensitive(true)
            .dot_matches_new_line(true)
            .build()
            .with_context(|| format!("invalid interception pattern: {pattern}"))?;
        Ok(Matcher::Pattern(regex))
    }

    pub fn contains(phrases: &[&str]) -> Self {
        Matcher::Contains(phrases.iter().map(|p| p.to_lowercase()).collect())
    }

    fn is_match(&self, normalized: &str) -> bool {
        match self {
            Matcher::Contains(phrases) => phrases.iter().any(|p| normalized.contains(p.as_str())),
            Matcher::Pattern(regex) => regex.is_match(normalized),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseTemplate {
    Identity,
    GreetingIdentity,
    Architecture,
    Capabilities,
}

impl ResponseTemplate {
    pub fn render(self, persona: &PersonaProfile) -> String {
        match self {
            ResponseTemplate::Identity => persona.identity_statement(),
            ResponseTemplate::GreetingIdentity => {
                format!("{} How can I help you today?", persona.greeting())
            }
            ResponseTemplate::Architecture => format!(
                "{} Details of my architecture and training are proprietary to {}.",
                persona.identity_statement(),
                persona.creator
            ),
            ResponseTemplate::Capabilities => format!(
                "{} I can help you write, review, and debug code, explain technical concepts, and plan software projects.",
                persona.identity_statement()
            ),
        }
    }
}

#[derive(Debug, Clone)]
pub struct InterceptionRule {
    pub name: String,
    pub tier: RuleTier,
    pub priority: u32,
    pub matcher: Matcher,
    pub template: ResponseTemplate,
}

impl InterceptionRule {
    pub fn new(name: &str, tier: RuleTier, matcher: Matcher, template: ResponseTemplate) -> Self {
        Self {
            name: name.to_string(),
            tier,
            priority: tier.base_priority(),
            matcher,
            template,
        }
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    pub fn matches(&self, content: &str) -> bool {
        self.matcher.is_match(&normalize(content))
    }

    pub fn respond(&self, persona: &PersonaProfile) -> String {
        self.template.render(persona)
    }
}

/// Rules in evaluation order. Sorting is stable, so equal priorities keep
/// their list order.
#[derive(Debug, Clone)]
pub struct RuleSet {
    rules: Vec<InterceptionRule>,
}

impl RuleSet {
    pub fn new(mut rules: Vec<InterceptionRule>) -> Self {
        rules.sort_by_key(|rule| rule.priority);
        Self { rules }
    }

    pub fn builtin(vendor_denylist: &[String]) -> Result<Self> {
        Ok(Self::new(builtin_rules(vendor_denylist)?))
    }

    pub fn rules(&self) -> &[InterceptionRule] {
        &self.rules
    }

    /// First rule (by priority) that matches anywhere in `content`.
    pub fn classify(&self, content: &str) -> Option<&InterceptionRule> {
        let normalized = normalize(content);
        self.rules
            .iter()
            .find(|rule| rule.matcher.is_match(&normalized))
    }
}

/// Lowercase, straight apostrophes, single spaces.
fn normalize(content: &str) -> String {
    content
        .replace(['’', '‘'], "'")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

const GREETING_WORDS: &str = r"(?:hi|hello|hey|hiya|greetings|howdy|yo|good\s+(?:morning|afternoon|evening))";

fn builtin_rules(vendor_denylist: &[String]) -> Result<Vec<InterceptionRule>> {
    use ResponseTemplate as T;
    use RuleTier::*;

    let mut rules = vec![
        InterceptionRule::new(
            "which-model-phrase",
            ModelPhrase,
            Matcher::contains(&[
                "which model are you",
                "what model are you",
                "which model is this",
                "what model is this",
                "which model is that",
                "what model do you use",
                "which model do you use",
                "what model is being used",
                "which model is being used",
                "what model powers you",
                "which model powers you",
                "which ai model are you",
                "what ai model are you",
                "which llm are you",
                "what llm are you",
            ]),
            T::Identity,
        ),
        InterceptionRule::new(
            "model-version-query",
            ModelQuery,
            Matcher::pattern(
                r"\b(?:what|which)\s+(?:\w+\s+){0,2}?(?:model|llm|version|engine)\s+(?:are|is|do|does)\s+(?:you|this|it)\b",
            )?,
            T::Identity,
        ),
        InterceptionRule::new(
            "model-behind-query",
            ModelQuery,
            Matcher::pattern(
                r"\b(?:what|which)\s+(?:\w+\s+){0,2}?(?:model|llm|engine)\s+(?:powers|runs|drives|is\s+behind|is\s+powering)\b",
            )?,
            T::Identity,
        )
        .with_priority(ModelQuery.base_priority() + 1),
        InterceptionRule::new(
            "your-model-query",
            ModelQuery,
            Matcher::pattern(
                r"\bwhat(?:'s|\s+is)\s+your\s+(?:underlying\s+|base\s+)?(?:model|model\s+name|version|llm)\b",
            )?,
            T::Identity,
        )
        .with_priority(ModelQuery.base_priority() + 2),
        InterceptionRule::new(
            "greeting-who-are-you",
            GreetingIdentity,
            Matcher::pattern(&format!(
                r"^\s*{GREETING_WORDS}\b.*\b(?:who|what)\s+are\s+you\b"
            ))?,
            T::GreetingIdentity,
        ),
        InterceptionRule::new(
            "greeting-introduce-yourself",
            GreetingIdentity,
            Matcher::pattern(&format!(
                r"^\s*{GREETING_WORDS}\b.*\b(?:introduce\s+yourself|your\s+name)\b"
            ))?,
            T::GreetingIdentity,
        )
        .with_priority(GreetingIdentity.base_priority() + 1),
        InterceptionRule::new(
            "bare-greeting",
            Greeting,
            Matcher::pattern(&format!(
                r"^\s*{GREETING_WORDS}(?:\s+there)?\s*[!.?,]*\s*$"
            ))?,
            T::GreetingIdentity,
        ),
        InterceptionRule::new(
            "architecture-training",
            Capability,
            Matcher::pattern(
                r"\b(?:how\s+(?:were|was|are)\s+you\s+(?:trained|built|made|created|developed)|what(?:'s|\s+is)\s+your\s+(?:architecture|training(?:\s+data)?|parameter\s+count|knowledge\s+cutoff)|how\s+many\s+parameters\s+do\s+you|what\s+(?:data|datasets?)\s+(?:were|was)\s+you\s+trained)\b",
            )?,
            T::Architecture,
        ),
        InterceptionRule::new(
            "self-description",
            Capability,
            Matcher::pattern(r"\b(?:tell\s+me\s+about\s+yourself|describe\s+yourself|introduce\s+yourself)\b")?,
            T::Capabilities,
        )
        .with_priority(Capability.base_priority() + 1),
        InterceptionRule::new(
            "capabilities",
            Capability,
            Matcher::pattern(
                r"\b(?:what\s+can\s+you\s+do|what\s+are\s+your\s+(?:capabilities|abilities|limitations)|what\s+are\s+you\s+capable\s+of)\b",
            )?,
            T::Capabilities,
        )
        .with_priority(Capability.base_priority() + 2),
        InterceptionRule::new(
            "who-are-you",
            Identity,
            Matcher::pattern(r"\b(?:who|what)\s+(?:are|r)\s+(?:you|u)\b")?,
            T::Identity,
        ),
        InterceptionRule::new(
            "who-made-you",
            Identity,
            Matcher::pattern(
                r"\b(?:who\s+(?:made|created|built|developed|trained|owns)\s+you|what(?:'s|\s+is)\s+your\s+name|who\s+am\s+i\s+(?:talking|speaking|chatting)\s+(?:to|with))\b",
            )?,
            T::Identity,
        )
        .with_priority(Identity.base_priority() + 1),
        InterceptionRule::new(
            "are-you-ai",
            Identity,
            Matcher::pattern(r"\bare\s+you\s+(?:an?\s+)?(?:ai|bot|robot|human|chatbot|real\s+person)\b")?,
            T::Identity,
        )
        .with_priority(Identity.base_priority() + 2),
    ];

    if let Some(names) = name_alternation(vendor_denylist) {
        rules.push(
            InterceptionRule::new(
                "are-you-vendor-model",
                ModelQuery,
                Matcher::pattern(&format!(
                    r"\b(?:are\s+you|is\s+this)\s+(?:based\s+on\s+|built\s+on\s+|powered\s+by\s+|running\s+on\s+|using\s+)?(?:an?\s+)?{names}"
                ))?,
                T::Identity,
            )
            .with_priority(ModelQuery.base_priority() + 3),
        );
    }

    Ok(rules)
}
