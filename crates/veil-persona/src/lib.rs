//! Identity rewriting for chat completions: persona catalog, interception
//! rules, response sanitization and the wrapping model.

mod persona;
mod proxy;
mod rewrite;
mod rules;
mod sanitize;
mod stream;

pub use persona::{
    DEFAULT_ASSURANCE_PHRASE, DEFAULT_BRAND, DEFAULT_CREATOR, DEFAULT_IDENTITY_TEMPERATURE,
    PersonaCatalog, PersonaProfile, PersonaSpec, ProxyConfig, default_display_name,
    default_personas, default_vendor_denylist,
};
pub use proxy::{IdentityProxy, PersonaModel};
pub use rewrite::{
    RewriteEngine, RewriteOutcome, forced_reply_instruction, identity_reminder,
    persona_instructions,
};
pub use rules::{InterceptionRule, Matcher, ResponseTemplate, RuleSet, RuleTier};
pub use sanitize::Sanitizer;
pub use stream::SanitizingStream;
