use anyhow::{Result, anyhow};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use veil_llm::{
    ChatChunk, ChatMessage, ChatStream, Credentials, GenerateOptions, GenerateResponse,
    LanguageModel, ModelFactory, ProxyError, Role, collect_stream,
};
use veil_persona::{IdentityProxy, PersonaSpec, ProxyConfig, RuleTier, forced_reply_instruction};

const FORCED_PREFIX: &str = "The user is asking about your identity.";

struct StubModel {
    upstream: String,
    chunks: Vec<String>,
    fail: Option<String>,
    seen: Arc<Mutex<Vec<GenerateOptions>>>,
}

impl LanguageModel for StubModel {
    fn provider(&self) -> &str {
        "stub"
    }

    fn model_id(&self) -> &str {
        &self.upstream
    }

    fn generate(&self, options: &GenerateOptions) -> Result<GenerateResponse> {
        self.seen
            .lock()
            .expect("lock should work")
            .push(options.clone());
        if let Some(message) = &self.fail {
            return Err(anyhow!("{message}"));
        }
        // Follows a forced-answer instruction when one is present.
        let content = options
            .messages
            .iter()
            .find(|m| m.role == Role::System && m.content.starts_with(FORCED_PREFIX))
            .and_then(|m| m.content.split_once('\n').map(|(_, answer)| answer.to_string()))
            .unwrap_or_else(|| self.chunks.concat());
        Ok(GenerateResponse {
            content,
            model: self.upstream.clone(),
            finish_reason: Some("stop".to_string()),
        })
    }

    fn stream(&self, options: &GenerateOptions) -> Result<ChatStream> {
        self.seen
            .lock()
            .expect("lock should work")
            .push(options.clone());
        let chunks: Vec<Result<ChatChunk>> = self
            .chunks
            .iter()
            .map(|c| Ok(ChatChunk::text(c.as_str())))
            .collect();
        Ok(Box::new(chunks.into_iter()))
    }
}

#[derive(Default)]
struct StubFactory {
    calls: AtomicUsize,
    requires_key: bool,
    chunks: Vec<String>,
    fail: Option<String>,
    seen: Arc<Mutex<Vec<GenerateOptions>>>,
}

impl StubFactory {
    fn replying(chunks: &[&str]) -> Self {
        Self {
            chunks: chunks.iter().map(|c| c.to_string()).collect(),
            ..Self::default()
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn last_request(&self) -> GenerateOptions {
        self.seen
            .lock()
            .expect("lock should work")
            .last()
            .cloned()
            .expect("a request should have been sent")
    }
}

impl ModelFactory for StubFactory {
    type Model = StubModel;

    fn provider_name(&self) -> &str {
        "stub"
    }

    fn requires_api_key(&self) -> bool {
        self.requires_key
    }

    fn create(&self, _credentials: &Credentials, upstream_model: &str) -> Result<StubModel> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(StubModel {
            upstream: upstream_model.to_string(),
            chunks: self.chunks.clone(),
            fail: self.fail.clone(),
            seen: Arc::clone(&self.seen),
        })
    }
}

fn z0_config() -> ProxyConfig {
    ProxyConfig {
        brand: "Nova".to_string(),
        creator: "Acme".to_string(),
        personas: vec![
            PersonaSpec::new(
                "z0",
                "a fast and efficient model",
                "using a proprietary architecture",
                "gpt-4o-mini",
            )
            .with_display_name("Nova Z0"),
        ],
        ..ProxyConfig::default()
    }
}

fn user(content: &str) -> GenerateOptions {
    GenerateOptions::from_messages(vec![ChatMessage::user(content)])
}

#[test]
fn every_key_reports_its_persona() {
    let proxy = IdentityProxy::new(&ProxyConfig::default()).expect("default config is valid");
    let factory = StubFactory::replying(&["ok"]);

    for key in proxy.catalog().keys() {
        let model = proxy
            .create_persona_model(&key, &factory, &Credentials::default())
            .expect("mapped key should resolve");
        let persona = proxy.persona(&key).expect("mapped key");
        assert_eq!(model.provider(), persona.display_name);
        assert_eq!(model.model_id(), persona.display_name);
        assert_eq!(model.persona(), persona);
    }
    assert_eq!(factory.calls(), proxy.catalog().keys().len());
}

#[test]
fn generate_reports_display_name() {
    let proxy = IdentityProxy::new(&ProxyConfig::default()).expect("default config is valid");
    let factory = StubFactory::replying(&["ok"]);
    let model = proxy
        .create_persona_model("ultimate", &factory, &Credentials::default())
        .expect("mapped key should resolve");

    let response = model.generate(&user("sum a list")).expect("generate should work");
    assert_eq!(response.model, "Nova Ultimate");
    assert_eq!(response.content, "ok");
}

#[test]
fn model_phrase_forces_identical_instruction() {
    let proxy = IdentityProxy::new(&z0_config()).expect("config is valid");
    let factory = StubFactory::replying(&["ignored"]);
    let model = proxy
        .create_persona_model("z0", &factory, &Credentials::default())
        .expect("mapped key should resolve");
    let statement = model.persona().identity_statement();

    let mut forced = Vec::new();
    for prompt in ["What model are you?", "which model is this", "WHAT MODEL ARE YOU"] {
        let response = model.generate(&user(prompt)).expect("generate should work");
        assert_eq!(response.content, statement);
        let request = factory.last_request();
        let instruction = request
            .messages
            .iter()
            .find(|m| m.content.starts_with(FORCED_PREFIX))
            .expect("probe should be replaced")
            .clone();
        forced.push(instruction);
    }
    assert!(forced.iter().all(|m| m == &forced[0]));
    assert_eq!(forced[0].content, forced_reply_instruction(&statement));
}

#[test]
fn greeting_with_model_question_answers_the_model_question() {
    let proxy = IdentityProxy::new(&z0_config()).expect("config is valid");
    let rule = proxy
        .engine()
        .classify("Hey, which model are you?")
        .expect("probe should match");
    assert!(rule.tier < RuleTier::GreetingIdentity, "got {}", rule.name);
}

#[test]
fn greeting_identity_scenario() {
    let proxy = IdentityProxy::new(&z0_config()).expect("config is valid");
    let factory = StubFactory::replying(&["unused"]);
    let model = proxy
        .create_persona_model("z0", &factory, &Credentials::default())
        .expect("mapped key should resolve");

    let response = model
        .generate(&user("Hi there, who are you?"))
        .expect("generate should work");
    assert!(
        response.content.starts_with(
            "Hello! I am Nova Z0, a proprietary AI model created by Acme. I am a fast and efficient model, using a proprietary architecture."
        ),
        "{}",
        response.content
    );
}

#[test]
fn disobedient_greeting_still_carries_identity() {
    let proxy = IdentityProxy::new(&z0_config()).expect("config is valid");
    let factory = StubFactory::replying(&["Hi there! How can I help?"]);
    let model = proxy
        .create_persona_model("z0", &factory, &Credentials::default())
        .expect("mapped key should resolve");

    let response = model
        .generate(&user("please help me with my loop"))
        .expect("generate should work");
    assert_eq!(
        response.content,
        "Hello! I am Nova Z0, a proprietary AI model created by Acme. I am a fast and efficient model, using a proprietary architecture. How can I help?"
    );
}

fn assert_stable_and_vendor_free(proxy: &IdentityProxy, text: &str) {
    let engine = proxy.engine();
    let persona = proxy.persona("z0").expect("mapped");
    let once = engine.sanitize_response(text, persona);
    let twice = engine.sanitize_response(&once, persona);
    assert_eq!(once, twice, "not idempotent for {text:?}");
    assert!(
        !engine.sanitizer().mentions_vendor(&once),
        "vendor survived in {once:?}"
    );
}

#[test]
fn sanitization_is_idempotent_and_removes_vendors() {
    let proxy = IdentityProxy::new(&z0_config()).expect("config is valid");
    let fragments = [
        "",
        "hey there",
        "Hello!",
        "I am an AI language model developed by OpenAI.",
        "As an AI model, I cannot browse.",
        "Claude and Gemini can't either.",
        "I'm ChatGPT.",
        "I'm powered by GPT-4 Turbo.",
        "I don't know which model I am, sorry.",
        "My goal is to be helpful, harmless, and honest.",
        "Mistral, LLaMA and Qwen are open models; DeepSeek too.",
        "fn main() { println!(\"no identity here\"); }",
    ];

    for a in fragments {
        for b in fragments {
            for c in fragments {
                assert_stable_and_vendor_free(&proxy, &format!("{a} {b} {c}"));
            }
        }
    }
}

#[test]
fn greeting_glued_to_next_word_stays_stable() {
    let proxy = IdentityProxy::new(&z0_config()).expect("config is valid");
    for text in ["hey thereI am an AI", " hey thereI am an AI", "Hello thereAs an AI"] {
        assert_stable_and_vendor_free(&proxy, text);
    }
    let once = proxy
        .engine()
        .sanitize_response("hey thereI am an AI", proxy.persona("z0").expect("mapped"));
    assert!(once.ends_with(" thereI am an AI"), "{once}");
}

#[test]
fn unrelated_messages_keep_order_and_content() {
    let proxy = IdentityProxy::new(&z0_config()).expect("config is valid");
    let factory = StubFactory::replying(&["done"]);
    let model = proxy
        .create_persona_model("z0", &factory, &Credentials::default())
        .expect("mapped key should resolve");

    let messages = vec![
        ChatMessage::user("write a parser"),
        ChatMessage::assistant("Here is a parser."),
        ChatMessage::user("now add tests"),
    ];
    model
        .generate(&GenerateOptions::from_messages(messages.clone()))
        .expect("generate should work");

    let sent: Vec<ChatMessage> = factory
        .last_request()
        .messages
        .into_iter()
        .filter(|m| m.role != Role::System)
        .collect();
    assert_eq!(sent, messages);
}

#[test]
fn identity_temperature_is_pinned() {
    let proxy = IdentityProxy::new(&z0_config()).expect("config is valid");
    let factory = StubFactory::replying(&["ok"]);
    let model = proxy
        .create_persona_model("z0", &factory, &Credentials::default())
        .expect("mapped key should resolve");

    let options = GenerateOptions {
        temperature: Some(1.5),
        ..user("hi")
    };
    model.generate(&options).expect("generate should work");
    assert_eq!(
        factory.last_request().temperature,
        Some(proxy.engine().identity_temperature())
    );
}

#[test]
fn unknown_key_never_reaches_factory() {
    let proxy = IdentityProxy::new(&ProxyConfig::default()).expect("default config is valid");
    let factory = StubFactory::default();

    let err = proxy
        .create_persona_model("nonexistent", &factory, &Credentials::default())
        .err()
        .expect("unknown key must fail");
    match err.downcast_ref::<ProxyError>() {
        Some(ProxyError::UnknownModel { key, known }) => {
            assert_eq!(key, "nonexistent");
            assert_eq!(known, &["balanced", "fast", "ultimate"]);
        }
        other => panic!("expected UnknownModel, got {other:?}"),
    }
    assert_eq!(factory.calls(), 0);
}

#[test]
fn missing_key_never_reaches_factory() {
    let proxy = IdentityProxy::new(&ProxyConfig::default()).expect("default config is valid");
    let factory = StubFactory {
        requires_key: true,
        ..StubFactory::default()
    };

    let err = proxy
        .create_persona_model("fast", &factory, &Credentials::new(None, None))
        .err()
        .expect("missing key must fail");
    assert!(matches!(
        err.downcast_ref::<ProxyError>(),
        Some(ProxyError::MissingCredentials { .. })
    ));
    assert_eq!(factory.calls(), 0);

    proxy
        .create_persona_model("fast", &factory, &Credentials::new(Some("sk-test".into()), None))
        .expect("key present");
    assert_eq!(factory.calls(), 1);
}

#[test]
fn persona_mentioning_vendor_is_rejected() {
    let mut config = z0_config();
    config.personas[0].technical_blurb = "built on GPT-4".to_string();

    let err = IdentityProxy::new(&config).expect_err("vendor in persona must fail");
    assert!(matches!(
        err.downcast_ref::<ProxyError>(),
        Some(ProxyError::InvalidPersona { key, .. }) if key == "z0"
    ));
}

#[test]
fn assurance_phrase_naming_a_vendor_is_rejected() {
    let config = ProxyConfig {
        assurance_phrase: "as helpful as Claude".to_string(),
        ..z0_config()
    };
    let err = IdentityProxy::new(&config).expect_err("vendor in assurance phrase must fail");
    assert!(err.to_string().contains("denylisted vendor name"), "{err}");

    let config = ProxyConfig {
        assurance_phrase: "helpful, harmless, and honest".to_string(),
        ..z0_config()
    };
    assert!(IdentityProxy::new(&config).is_err());

    let proxy = IdentityProxy::new(&z0_config()).expect("config is valid");
    let out = proxy.engine().sanitize_response(
        "I try to be helpful, harmless, and honest.",
        proxy.persona("z0").expect("mapped"),
    );
    assert!(!proxy.engine().sanitizer().mentions_vendor(&out), "{out}");
}

#[test]
fn blank_brand_is_rejected() {
    let config = ProxyConfig {
        brand: "  ".to_string(),
        ..z0_config()
    };
    assert!(IdentityProxy::new(&config).is_err());
}

#[test]
fn upstream_errors_pass_through_unchanged() {
    let proxy = IdentityProxy::new(&z0_config()).expect("config is valid");
    let factory = StubFactory {
        fail: Some("upstream 429: slow down".to_string()),
        ..StubFactory::default()
    };
    let model = proxy
        .create_persona_model("z0", &factory, &Credentials::default())
        .expect("mapped key should resolve");

    let err = model.generate(&user("hi")).expect_err("upstream failure");
    assert_eq!(err.to_string(), "upstream 429: slow down");
}

#[test]
fn streamed_output_is_sanitized() {
    let proxy = IdentityProxy::new(&z0_config()).expect("config is valid");
    let factory = StubFactory::replying(&["I'm Cla", "ude. ", "Ask away."]);
    let model = proxy
        .create_persona_model("z0", &factory, &Credentials::default())
        .expect("mapped key should resolve");

    let text = collect_stream(model.stream(&user("explain lifetimes")).expect("stream should open"))
        .expect("stream should work");
    assert_eq!(
        text,
        "I am Nova Z0, a proprietary AI model created by Acme. Ask away."
    );
    assert!(
        factory
            .last_request()
            .messages
            .first()
            .is_some_and(|m| m.content.starts_with("IDENTITY (non-negotiable):"))
    );
}
