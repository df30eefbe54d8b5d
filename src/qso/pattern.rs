// src/qso/pattern.rs  —  Externalized rule/template engine driving the state
// machine's transitions.
//
// A rule key maps either to a list of regexes (validation) or a single
// template string (TX), both of which can carry placeholders resolved
// against the current QSO context before use.

use crate::error::PatternError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum PatternValue {
    List(Vec<String>),
    Template(String),
}

impl PatternValue {
    pub fn as_patterns(&self) -> Vec<&str> {
        match self {
            PatternValue::List(v) => v.iter().map(String::as_str).collect(),
            PatternValue::Template(s) => vec![s.as_str()],
        }
    }

    pub fn as_template(&self) -> &str {
        match self {
            PatternValue::Template(s) => s.as_str(),
            PatternValue::List(v) => v.first().map(String::as_str).unwrap_or_default(),
        }
    }
}

/// Abstract collaborator supplying the rule/template set. Defaults ship
/// embedded in the binary; an external YAML file may override any subset.
pub trait PatternProvider: Send {
    fn get(&self, key: &str) -> Option<PatternValue>;
}

/// Substitution values for one TX/validation call. Fields that are `None`
/// but referenced by a template trigger a resolution failure.
#[derive(Debug, Clone, Default)]
pub struct TemplateContext {
    pub my_call: Option<String>,
    pub other_call: Option<String>,
    pub other_call_real: Option<String>,
    pub prosign: Option<String>,
    pub tx_prosign: Option<String>,
    pub call: Option<String>,
    pub park_ref: Option<String>,
    pub my_park_ref: Option<String>,
}

impl TemplateContext {
    fn subs(&self) -> HashMap<&'static str, String> {
        let mut m = HashMap::new();
        if let Some(v) = &self.my_call { m.insert("MY_CALL", v.clone()); }
        if let Some(v) = &self.other_call { m.insert("OTHER_CALL", v.clone()); }
        if let Some(v) = &self.other_call_real { m.insert("OTHER_CALL_REAL", v.clone()); }
        if let Some(v) = &self.prosign { m.insert("PROSIGN", v.clone()); }
        if let Some(v) = &self.tx_prosign { m.insert("TX_PROSIGN", v.clone()); }
        if let Some(v) = &self.call { m.insert("CALL", v.clone()); }
        if let Some(v) = &self.park_ref { m.insert("PARK_REF", v.clone()); }
        if let Some(v) = &self.my_park_ref { m.insert("MY_PARK_REF", v.clone()); }
        m
    }

    /// A stable string identifying this substitution set, used as the
    /// compiled-regex cache key ("cached per context signature").
    fn signature(&self) -> String {
        let mut subs: Vec<_> = self.subs().into_iter().collect();
        subs.sort_by_key(|(k, _)| *k);
        subs.into_iter().map(|(k, v)| format!("{k}={v}")).collect::<Vec<_>>().join("|")
    }
}

/// Substitute `{PLACEHOLDER}` tokens. Returns an error naming the first
/// unresolved placeholder found.
fn resolve(template: &str, subs: &HashMap<&'static str, String>, key: &str) -> Result<String, PatternError> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        let end = after.find('}').ok_or_else(|| PatternError::Regex {
            key: key.to_string(),
            source: regex::Error::Syntax("unterminated placeholder".into()),
        })?;
        let name = &after[..end];
        match subs.get(name) {
            Some(v) => out.push_str(v),
            None => {
                return Err(PatternError::Regex {
                    key: key.to_string(),
                    source: regex::Error::Syntax(format!("unresolved placeholder {{{name}}}")),
                })
            }
        }
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

/// Wraps a `PatternProvider` with placeholder resolution and a compiled
/// regex cache keyed by `(rule key, context signature)`.
pub struct PatternEngine {
    provider: Box<dyn PatternProvider>,
    cache: Mutex<HashMap<(String, String), Vec<Regex>>>,
}

impl PatternEngine {
    pub fn new(provider: Box<dyn PatternProvider>) -> Self {
        Self { provider, cache: Mutex::new(HashMap::new()) }
    }

    /// True if `text` (already normalized/compacted) matches any regex
    /// under `key` once placeholders are resolved against `ctx`.
    pub fn matches(&self, key: &str, text: &str, ctx: &TemplateContext) -> Result<bool, PatternError> {
        let regexes = self.compiled(key, ctx)?;
        Ok(regexes.iter().any(|r| r.is_match(text)))
    }

    /// Render a `tx.*` template against `ctx`.
    pub fn render(&self, key: &str, ctx: &TemplateContext) -> Result<String, PatternError> {
        let value = self.provider.get(key).unwrap_or(PatternValue::Template(String::new()));
        resolve(value.as_template(), &ctx.subs(), key)
    }

    fn compiled(&self, key: &str, ctx: &TemplateContext) -> Result<Vec<Regex>, PatternError> {
        let sig = ctx.signature();
        let cache_key = (key.to_string(), sig);
        if let Some(hit) = self.cache.lock().unwrap().get(&cache_key) {
            return Ok(hit.clone());
        }
        let value = self.provider.get(key).unwrap_or(PatternValue::List(Vec::new()));
        let subs = ctx.subs();
        let mut compiled = Vec::new();
        for pat in value.as_patterns() {
            let resolved = resolve(pat, &subs, key)?;
            let anchored = format!("^{resolved}$");
            let re = Regex::new(&anchored).map_err(|source| PatternError::Regex {
                key: key.to_string(),
                source,
            })?;
            compiled.push(re);
        }
        self.cache.lock().unwrap().insert(cache_key.clone(), compiled.clone());
        Ok(compiled)
    }
}

/// Normalize user input the way the pattern engine expects it: trimmed,
/// uppercased, compacted (spaces and punctuation other than `?/=+` dropped).
pub fn normalize(text: &str) -> String {
    text.trim()
        .to_uppercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '?' | '/' | '=' | '+'))
        .collect()
}

/// Compact a park reference for keying: uppercase, dashes removed.
pub fn compact_park_ref(reference: &str) -> String {
    reference.to_uppercase().chars().filter(|c| *c != '-').collect()
}

macro_rules! defaults {
    ($($key:expr => [$($pat:expr),+ $(,)?]),+ $(,)?) => {
        {
            let mut m: HashMap<&'static str, PatternValue> = HashMap::new();
            $( m.insert($key, PatternValue::List(vec![$($pat.to_string()),+])); )+
            m
        }
    };
}

/// The binary's built-in rule/template set covering the default exchange
/// grammar and its worked-scenario variants.
pub struct DefaultPatternProvider {
    patterns: HashMap<&'static str, PatternValue>,
}

impl DefaultPatternProvider {
    pub fn new() -> Self {
        let mut patterns = defaults! {
            "s0.SIMPLE" => ["CQCQ{MY_CALL}{MY_CALL}K", "CQ{MY_CALL}{MY_CALL}K"],
            "s0.POTA" => ["CQCQPOTADE{MY_CALL}K", "CQPOTADE{MY_CALL}K"],
            "s0.SOTA" => ["CQCQSOTADE{MY_CALL}K", "CQSOTADE{MY_CALL}K"],
            "s2.report_require_call" => ["{OTHER_CALL}5NN5NN"],
            "s2.report_require_call_allow_599" => ["{OTHER_CALL}5NN5NN", "{OTHER_CALL}599599"],
            "s2.report_no_call" => ["5NN5NN"],
            "s2.report_no_call_allow_599" => ["5NN5NN", "599599"],
            "s2.p2p_ack" => ["P2P", "{OTHER_CALL}"],
            "s5.with_prosign" => ["{PROSIGN}73EE"],
            "s5.without_prosign" => ["73EE"],
            "s5.with_prosign_allow_tu" => ["{PROSIGN}73EE", "{PROSIGN}TU73EE"],
            "s5.without_prosign_allow_tu" => ["73EE", "TU73EE"],
            "s5.p2p_with_prosign" => ["{PROSIGN}{OTHER_CALL}{MY_CALL}MYREF{MY_PARK_REF}{MY_PARK_REF}"],
            "s5.p2p_without_prosign" => ["{OTHER_CALL}{MY_CALL}MYREF{MY_PARK_REF}{MY_PARK_REF}"],
            "s5.p2p_with_prosign_allow_tu" => [
                "{PROSIGN}{OTHER_CALL}{MY_CALL}MYREF{MY_PARK_REF}{MY_PARK_REF}",
                "{PROSIGN}TU{OTHER_CALL}{MY_CALL}MYREF{MY_PARK_REF}{MY_PARK_REF}",
            ],
            "s5.p2p_without_prosign_allow_tu" => [
                "{OTHER_CALL}{MY_CALL}MYREF{MY_PARK_REF}{MY_PARK_REF}",
                "TU{OTHER_CALL}{MY_CALL}MYREF{MY_PARK_REF}{MY_PARK_REF}",
            ],
            "s5.p2p_call_help" => ["CALL\\?"],
            "s5.p2p_ref_help" => ["REF\\?"],
            "legacy.s3.with_prosign" => ["{PROSIGN}{TX_PROSIGN}5NN5NN"],
            "legacy.s3.without_prosign" => ["{TX_PROSIGN}5NN5NN"],
        };
        for (key, template) in [
            ("tx.caller_call", "{CALL} {CALL}"),
            ("tx.p2p_repeat_call", "{CALL} {CALL}"),
            ("tx.p2p_repeat_ref", "{PARK_REF} {PARK_REF}"),
            ("tx.ack_rr", "RR"),
            ("tx.repeat_selected_call", "{CALL} {CALL}"),
            ("tx.report_reply", "{PROSIGN} UR 5NN 5NN TU 73 {PROSIGN}"),
            ("tx.p2p_station_reply_with_prosign", "R R {OTHER_CALL} {OTHER_CALL} MY REF {PARK_REF} {PARK_REF} 73 {PROSIGN}"),
            ("tx.p2p_station_reply_without_prosign", "R R {OTHER_CALL} {OTHER_CALL} MY REF {PARK_REF} {PARK_REF} 73"),
            ("tx.sign_off", "EE"),
            ("tx.legacy_ack", "{TX_PROSIGN} UR 5NN 5NN"),
        ] {
            patterns.insert(key, PatternValue::Template(template.to_string()));
        }
        Self { patterns }
    }
}

impl Default for DefaultPatternProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl PatternProvider for DefaultPatternProvider {
    fn get(&self, key: &str) -> Option<PatternValue> {
        self.patterns.get(key).cloned()
    }
}

/// YAML file on disk, loaded once. Root may be `patterns: {...}` or the
/// mapping directly at the document root. Unknown keys are kept (and
/// simply never looked up) rather than rejected.
pub struct YamlPatternProvider {
    patterns: HashMap<String, PatternValue>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum YamlRoot {
    Wrapped { patterns: HashMap<String, PatternValue> },
    Direct(HashMap<String, PatternValue>),
}

impl YamlPatternProvider {
    pub fn load(path: &Path) -> Result<Self, PatternError> {
        let raw = std::fs::read_to_string(path).map_err(|source| PatternError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let root: YamlRoot = serde_yaml::from_str(&raw).map_err(|source| PatternError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        let patterns = match root {
            YamlRoot::Wrapped { patterns } => patterns,
            YamlRoot::Direct(patterns) => patterns,
        };
        Ok(Self { patterns })
    }
}

impl PatternProvider for YamlPatternProvider {
    fn get(&self, key: &str) -> Option<PatternValue> {
        self.patterns.get(key).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> TemplateContext {
        TemplateContext {
            my_call: Some("EA1ABC".into()),
            other_call: Some("K1ABC".into()),
            prosign: Some("CAVE".into()),
            ..Default::default()
        }
    }

    #[test]
    fn simple_cq_matches() {
        let engine = PatternEngine::new(Box::new(DefaultPatternProvider::new()));
        let text = normalize("CQ CQ EA1ABC EA1ABC K");
        assert!(engine.matches("s0.SIMPLE", &text, &ctx()).unwrap());
    }

    #[test]
    fn pota_accepts_both_cq_variants() {
        let engine = PatternEngine::new(Box::new(DefaultPatternProvider::new()));
        let c = ctx();
        assert!(engine.matches("s0.POTA", &normalize("CQ POTA DE EA1ABC K"), &c).unwrap());
        assert!(engine.matches("s0.POTA", &normalize("CQ CQ POTA DE EA1ABC K"), &c).unwrap());
    }

    #[test]
    fn sign_off_with_prosign() {
        let engine = PatternEngine::new(Box::new(DefaultPatternProvider::new()));
        assert!(engine.matches("s5.with_prosign", &normalize("CAVE 73 EE"), &ctx()).unwrap());
    }

    #[test]
    fn render_report_reply() {
        let engine = PatternEngine::new(Box::new(DefaultPatternProvider::new()));
        let out = engine.render("tx.report_reply", &ctx()).unwrap();
        assert_eq!(out, "CAVE UR 5NN 5NN TU 73 CAVE");
    }

    #[test]
    fn render_missing_placeholder_errors() {
        let engine = PatternEngine::new(Box::new(DefaultPatternProvider::new()));
        let mut c = ctx();
        c.prosign = None;
        assert!(engine.render("tx.report_reply", &c).is_err());
    }
}
