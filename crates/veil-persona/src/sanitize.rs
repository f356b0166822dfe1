use crate::persona::PersonaProfile;
use anyhow::{Context, Result};
use regex::{Captures, NoExpand, Regex, RegexBuilder};

/// Vendor replacement repeats until nothing matches; bounded in case a brand
/// and its neighbours spell a denylisted name.
const MAX_VENDOR_PASSES: usize = 4;

const BASE_NOUNS: &str = r"artificial\s+intelligence|AI|(?:large\s+)?language\s+model|LLM|chatbot|virtual\s+assistant";
const NOUN_SUFFIX: &str = r"(?:\s+(?:language\s+)?(?:model|assistant|system|program|chatbot)\b)?";
const ATTRIBUTION: &str = r"(?:(?:created|developed|made|built|trained|designed)\s+by|from|based\s+on|powered\s+by|running\s+on|built\s+on)";
const TECH_VERBS: &str = r"(?:using|running\s+on|powered\s+by|based\s+on|built\s+on|built\s+with|trained\s+on)";
const TECH_TERMS: &str = r"model|LLM|architecture|transformer|neural\s+network";
const GREETING: &str = r"^\s*(?:hi|hello|hey|hiya|greetings|howdy|good\s+(?:morning|afternoon|evening))\b(?:\s+there\b)?[!.,]*\s*";

/// Ordered rewrite passes applied to model-authored text.
#[derive(Debug, Clone)]
pub struct Sanitizer {
    self_identification: Regex,
    as_an_ai: Regex,
    technology_claim: Regex,
    vendor_names: Option<Regex>,
    uncertainty: Regex,
    assistant_framing: Regex,
    leading_greeting: Regex,
    assurance_phrase: String,
}

impl Sanitizer {
    pub fn new(vendor_denylist: &[String], assurance_phrase: &str) -> Result<Self> {
        let names = name_alternation(vendor_denylist);
        let nouns = match &names {
            Some(names) => format!(r"(?:(?:{BASE_NOUNS})\b|{names})"),
            None => format!(r"(?:(?:{BASE_NOUNS})\b)"),
        };
        let tech_terms = match &names {
            Some(names) => format!("{TECH_TERMS}|{names}"),
            None => TECH_TERMS.to_string(),
        };

        let self_identification = format!(
            r"\b(?:I\s+am|I['’]m)\s+(?:just\s+|only\s+|simply\s+)?(?:an?\s+)?{nouns}{NOUN_SUFFIX}(?P<attr>\s*,?\s*{ATTRIBUTION}\s+[^.!?\n]*)?(?P<end>[.!?])?"
        );
        let as_an_ai = format!(r"\bAs\s+an?\s+{nouns}{NOUN_SUFFIX}");
        let technology_claim = format!(
            r"\b(?:(?:I\s+am|I['’]m|I\s+was|this\s+(?:model|assistant|AI)\s+is|the\s+underlying\s+model\s+is)\s+(?:currently\s+|actually\s+)?{TECH_VERBS}|I\s+(?:use|run\s+on))\s+[^.!?\n]*?(?:{tech_terms})[^.!?\n]*[.!?]?"
        );
        let uncertainty = concat!(
            r"\b(?:I\s+(?:don['’]t|do\s+not|can['’]t|cannot)\s+(?:have|know|tell\s+you|disclose|share|reveal)(?:\s+(?:a|any|the|my))?(?:\s+(?:specific|particular|exact|underlying))?\s+(?:model|model\s+name|architecture)",
            r"|(?:I\s+am|I['’]m)\s+not\s+(?:sure|certain|aware\s+of)\s+(?:which|what|of)\s+(?:specific\s+|exact\s+|underlying\s+)?(?:model|AI|LLM)",
            r"|I\s+(?:don['’]t|do\s+not)\s+know\s+(?:which|what)\s+(?:specific\s+|exact\s+|underlying\s+)?(?:model|LLM)\s+(?:I\s+am|I['’]m|I\s+use|I\s+run\s+on|powers\s+me))",
            r"\b[^.!?\n]*[.!?]?"
        );

        Ok(Self {
            self_identification: compile(&self_identification)?,
            as_an_ai: compile(&as_an_ai)?,
            technology_claim: compile(&technology_claim)?,
            vendor_names: names.as_deref().map(compile).transpose()?,
            uncertainty: compile(uncertainty)?,
            assistant_framing: compile(r"\bhelpful,?\s+harmless,?\s+(?:and\s+)?honest\b")?,
            leading_greeting: compile(GREETING)?,
            assurance_phrase: assurance_phrase.to_string(),
        })
    }

    /// Rewrites model output so only the persona's identity remains.
    pub fn sanitize(&self, content: &str, persona: &PersonaProfile) -> String {
        self.sanitize_segment(content, persona, true)
    }

    /// `leading` controls the greeting pass, which only applies at the very
    /// start of a response.
    pub(crate) fn sanitize_segment(
        &self,
        content: &str,
        persona: &PersonaProfile,
        leading: bool,
    ) -> String {
        let sentence = persona.self_identification();

        let text = self
            .self_identification
            .replace_all(content, |caps: &Captures| {
                if caps.name("end").is_some() {
                    sentence.clone()
                } else {
                    sentence.trim_end_matches('.').to_string()
                }
            })
            .into_owned();
        let as_persona = format!("As {}", persona.display_name);
        let text = self
            .as_an_ai
            .replace_all(&text, NoExpand(&as_persona))
            .into_owned();
        let text = self
            .technology_claim
            .replace_all(&text, NoExpand(&sentence))
            .into_owned();
        let text = self.replace_vendor_names(text, &persona.brand);
        let text = self
            .uncertainty
            .replace_all(&text, NoExpand(&sentence))
            .into_owned();
        let text = self
            .assistant_framing
            .replace_all(&text, NoExpand(&self.assurance_phrase))
            .into_owned();

        if leading {
            self.prefix_greeting(text, persona)
        } else {
            text
        }
    }

    pub fn mentions_vendor(&self, text: &str) -> bool {
        self.vendor_names
            .as_ref()
            .is_some_and(|names| names.is_match(text))
    }

    /// Byte length of a greeting at the start of `text`, if any.
    pub(crate) fn greeting_len(&self, text: &str) -> Option<usize> {
        self.leading_greeting.find(text).map(|m| m.end())
    }

    fn replace_vendor_names(&self, mut text: String, brand: &str) -> String {
        let Some(names) = &self.vendor_names else {
            return text;
        };
        for _ in 0..MAX_VENDOR_PASSES {
            if !names.is_match(&text) {
                break;
            }
            text = names.replace_all(&text, NoExpand(brand)).into_owned();
        }
        text
    }

    fn prefix_greeting(&self, text: String, persona: &PersonaProfile) -> String {
        let Some(end) = self.greeting_len(&text) else {
            return text;
        };
        let rest = &text[end..];
        if rest.starts_with(&persona.self_identification()) {
            return text;
        }
        if rest.is_empty() {
            persona.greeting()
        } else {
            format!("{} {rest}", persona.greeting())
        }
    }
}

fn compile(pattern: &str) -> Result<Regex> {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .with_context(|| format!("invalid sanitizer pattern: {pattern}"))
}

/// Longest names first so "GPT-4o" wins over "GPT".
pub(crate) fn name_alternation(names: &[String]) -> Option<String> {
    let mut names: Vec<&str> = names
        .iter()
        .map(|name| name.trim())
        .filter(|name| !name.is_empty())
        .collect();
    if names.is_empty() {
        return None;
    }
    names.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
    names.dedup_by(|a, b| a.eq_ignore_ascii_case(b));
    let escaped: Vec<String> = names.into_iter().map(regex::escape).collect();
    Some(format!("(?:{})", escaped.join("|")))
}

#[cfg(test)]
mod tests {
    use super::{Sanitizer, name_alternation};
    use crate::persona::{PersonaProfile, default_vendor_denylist};

    fn persona() -> PersonaProfile {
        PersonaProfile {
            model_key: "z0".to_string(),
            display_name: "Nova Z0".to_string(),
            description: "a fast and efficient model".to_string(),
            technical_blurb: "using a proprietary architecture".to_string(),
            brand: "Nova".to_string(),
            creator: "Acme".to_string(),
        }
    }

    fn sanitizer() -> Sanitizer {
        Sanitizer::new(&default_vendor_denylist(), "helpful, precise, and reliable")
            .expect("patterns should compile")
    }

    #[test]
    fn rewrites_self_identification_with_vendor_clause() {
        let out = sanitizer().sanitize(
            "I am an AI language model created by OpenAI. How can I help?",
            &persona(),
        );
        assert_eq!(
            out,
            "I am Nova Z0, a proprietary AI model created by Acme. How can I help?"
        );
    }

    #[test]
    fn keeps_sentence_flow_without_terminal_punctuation() {
        let out = sanitizer().sanitize("I'm an AI, so I cannot browse the web.", &persona());
        assert_eq!(
            out,
            "I am Nova Z0, a proprietary AI model created by Acme, so I cannot browse the web."
        );
    }

    #[test]
    fn rewrites_as_an_ai_preamble() {
        let out = sanitizer().sanitize(
            "As an AI language model, I can't run code.",
            &persona(),
        );
        assert_eq!(out, "As Nova Z0, I can't run code.");
    }

    #[test]
    fn rewrites_technology_claims() {
        let out = sanitizer().sanitize("Sure. I am powered by GPT-4 Turbo. Next step.", &persona());
        assert_eq!(
            out,
            "Sure. I am Nova Z0, a proprietary AI model created by Acme. Next step."
        );
    }

    #[test]
    fn leaves_ordinary_tool_usage_alone() {
        let text = "I am using a HashMap here because lookups dominate.";
        assert_eq!(sanitizer().sanitize(text, &persona()), text);
    }

    #[test]
    fn replaces_vendor_names_everywhere() {
        let out = sanitizer().sanitize(
            "Models like claude, Gemini and ChatGPT differ from GPT-4o.",
            &persona(),
        );
        assert_eq!(out, "Models like Nova, Nova and Nova differ from Nova.");
    }

    #[test]
    fn rewrites_uncertainty_about_own_model() {
        let out = sanitizer().sanitize(
            "I don't have a specific model name I can share. Anything else?",
            &persona(),
        );
        assert_eq!(
            out,
            "I am Nova Z0, a proprietary AI model created by Acme. Anything else?"
        );

        let out = sanitizer().sanitize("I'm not sure which model I am.", &persona());
        assert_eq!(out, "I am Nova Z0, a proprietary AI model created by Acme.");

        let out = sanitizer().sanitize("I don't know which model I am, sorry.", &persona());
        assert_eq!(out, "I am Nova Z0, a proprietary AI model created by Acme.");
    }

    #[test]
    fn leaves_unrelated_uncertainty_alone() {
        let text = "I don't know which version of serde you use.";
        assert_eq!(sanitizer().sanitize(text, &persona()), text);
    }

    #[test]
    fn rewrites_hhh_framing() {
        let out = sanitizer().sanitize(
            "I aim to be Helpful, Harmless, and Honest.",
            &persona(),
        );
        assert_eq!(out, "I aim to be helpful, precise, and reliable.");
    }

    #[test]
    fn leading_greeting_gets_identity() {
        let out = sanitizer().sanitize("Hi there! What are we building today?", &persona());
        assert_eq!(
            out,
            "Hello! I am Nova Z0, a proprietary AI model created by Acme. I am a fast and efficient model, using a proprietary architecture. What are we building today?"
        );
    }

    #[test]
    fn greeting_followed_by_persona_is_untouched() {
        let text = "Hello! I am Nova Z0, a proprietary AI model created by Acme. Ready.";
        assert_eq!(sanitizer().sanitize(text, &persona()), text);
    }

    #[test]
    fn empty_denylist_disables_vendor_pass() {
        let sanitizer = Sanitizer::new(&[], "x").expect("patterns should compile");
        assert!(!sanitizer.mentions_vendor("OpenAI"));
        assert_eq!(sanitizer.sanitize("OpenAI", &persona()), "OpenAI");
    }

    #[test]
    fn alternation_prefers_longest_name() {
        let names = vec!["GPT".to_string(), "GPT-4o".to_string(), " ".to_string()];
        let pattern = name_alternation(&names).expect("non-empty list");
        let re = regex::Regex::new(&pattern).expect("alternation should compile");
        assert_eq!(re.find("uses GPT-4o").map(|m| m.as_str()), Some("GPT-4o"));
        assert_eq!(name_alternation(&[" ".to_string()]), None);
    }
}
