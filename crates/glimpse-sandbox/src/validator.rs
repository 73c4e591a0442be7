//! Static gate for generated component source.
//!
//! A fixed, versioned rule table checked with regular expressions only; the
//! input is never executed. Two families:
//!
//! - **Denylist** rules reject constructs a generated component has no
//!   business using (code evaluation, runtime namespaces, storage, markup
//!   sinks, raw script tags, string timers).
//! - **Structural** rules require the [`COMPONENT_NAME`] function
//!   declaration, a return path yielding markup, and roughly balanced tags.
//!
//! Every broken rule is reported, formatted as `"<rule-id>: <violation>"`.
//!
//! Namespace rules are anchored with `(?:^|[^\w$.])` so that identifier
//! fragments (`photos.map`) and member accesses (`data.os.name`) never match.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::artifact::COMPONENT_NAME;

/// Maximum source size in bytes (64 KB).
pub const DEFAULT_MAX_CODE_SIZE: usize = 64 * 1024;

/// Version of the rule table below. Bump when rules change.
pub const RULESET_VERSION: u32 = 1;

/// Unmatched open/close tags tolerated before `balanced-markup` fires.
pub const TAG_MISMATCH_SLACK: usize = 2;

/// (id, pattern, violation)
const DENYLIST: &[(&str, &str, &str)] = &[
    (
        "dynamic-eval",
        r"\beval\s*\(",
        "dynamic code evaluation via eval()",
    ),
    (
        "function-constructor",
        r#"\bnew\s+Function\s*\(|(?:^|[^\w$.])Function\s*\(\s*["'`]"#,
        "dynamic code evaluation via the Function constructor",
    ),
    (
        "dynamic-module",
        r"(?:^|[^\w$.])(?:import|require)\s*\(",
        "dynamic module loading",
    ),
    (
        "process-access",
        r"(?:^|[^\w$.])process\s*\.\s*(?:env|exit|argv|binding|kill|cwd|stdin|stdout|stderr|platform|versions?)\b",
        "access to the process namespace",
    ),
    (
        "runtime-access",
        r"(?:^|[^\w$.])(?:Deno|Bun)\s*\.|\bimport\s*\.\s*meta\b",
        "access to runtime environment globals",
    ),
    (
        "filesystem-access",
        r#"(?:^|[^\w$.])(?:fs|fsPromises|child_process)\s*\.\s*\w|["'](?:node:)?(?:fs|fs/promises|child_process)["']"#,
        "access to the filesystem or child processes",
    ),
    (
        "os-access",
        r#"(?:^|[^\w$.])os\s*\.\s*\w|["'](?:node:)?os["']"#,
        "access to the OS namespace",
    ),
    (
        "cookie-access",
        r"\bdocument\s*\.\s*cookie\b",
        "direct access to document.cookie",
    ),
    (
        "storage-access",
        r"\b(?:localStorage|sessionStorage|indexedDB)\b",
        "direct access to browser storage",
    ),
    (
        "markup-injection",
        r#"\bdangerouslySetInnerHTML\b|\.\s*(?:innerHTML|outerHTML)\s*\+?=|\[\s*["'`](?:inner|outer)HTML["'`]\s*\]|\binsertAdjacentHTML\s*\(|\bdocument\s*\.\s*write(?:ln)?\s*\("#,
        "markup injection sink",
    ),
    (
        "inline-event-handler",
        r#"(?i)<[a-z][\w.:-]*(?:[^<>{}]|\{(?:[^{}]|\{[^{}]*\})*\})*?\son[a-z]+\s*=\s*["']"#,
        "inline event-handler attribute",
    ),
    (
        "script-tag",
        r"(?i)<\s*/?\s*(?:script|iframe|object|embed)\b",
        "raw script, iframe, object or embed tag",
    ),
    (
        "string-timer",
        r#"\b(?:setTimeout|setInterval|setImmediate)\s*\(\s*["'`]"#,
        "timer called with a code string",
    ),
    (
        "navigation-access",
        r"\b(?:window|globalThis|self)\s*\.\s*(?:top|parent|opener|location)\b|(?:^|[^\w$.])(?:top|parent)\s*\.\s*location\b|(?:^|[^\w$.])location\s*\.\s*(?:href|assign|replace|reload)\b",
        "top-level navigation access",
    ),
    (
        "network-access",
        r"(?:^|[^\w$.])fetch\s*\(|\bnew\s+(?:XMLHttpRequest|WebSocket|EventSource)\b|\bnavigator\s*\.\s*sendBeacon\b",
        "network access from inside the component",
    ),
    (
        "prototype-escape",
        r"__proto__|\bconstructor\s*\.\s*constructor\b|\bconstructor\s*\[|\bglobalThis\s*\[",
        "prototype chain or global object escape",
    ),
];

/// (id, pattern, violation)
const RENDERABLE_RETURN: (&str, &str, &str) = (
    "renderable-return",
    r"\breturn\s*(?:\(\s*)?(?:<|React\s*\.\s*createElement\s*\()",
    "no return path yields renderable markup",
);

/// Attribute expressions (`{...}`, two levels deep) are skipped whole so an
/// arrow's `=>` does not end the tag.
static OPEN_TAG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<([A-Za-z][\w.:-]*)(?:[^<>{}]|\{(?:[^{}]|\{[^{}]*\})*\})*?(/?)>")
        .expect("static open-tag pattern")
});

static CLOSE_TAG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"</\s*(?:[A-Za-z][\w.:-]*)?\s*>").expect("static close-tag pattern")
});

static RULES: LazyLock<Vec<Rule>> = LazyLock::new(build_rules);

/// Which family a rule belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleFamily {
    /// Rejects when the pattern is present.
    Denylist,
    /// Rejects when the requirement is missing.
    Structural,
}

enum Check {
    Deny(Regex),
    Require(Regex),
    BalancedTags,
}

/// One entry of the rule table.
pub struct Rule {
    /// Stable rule identifier, the prefix of every violation it produces.
    pub id: &'static str,
    /// Rule family.
    pub family: RuleFamily,
    /// Human-readable violation.
    pub violation: &'static str,
    check: Check,
}

impl Rule {
    /// Returns the formatted violation if `source` breaks this rule.
    pub fn check(&self, source: &str) -> Option<String> {
        match &self.check {
            Check::Deny(re) if re.is_match(source) => Some(self.format(self.violation)),
            Check::Require(re) if !re.is_match(source) => Some(self.format(self.violation)),
            Check::BalancedTags => {
                let unmatched = tag_mismatch(source);
                (unmatched > TAG_MISMATCH_SLACK)
                    .then(|| self.format(&format!("{unmatched} {}", self.violation)))
            }
            _ => None,
        }
    }

    fn format(&self, violation: &str) -> String {
        format!("{}: {}", self.id, violation)
    }
}

impl std::fmt::Debug for Rule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rule")
            .field("id", &self.id)
            .field("family", &self.family)
            .finish()
    }
}

fn build_rules() -> Vec<Rule> {
    let mut rules: Vec<Rule> = DENYLIST
        .iter()
        .map(|(id, pattern, violation)| Rule {
            id,
            family: RuleFamily::Denylist,
            violation,
            check: Check::Deny(Regex::new(pattern).expect("static denylist pattern")),
        })
        .collect();

    let declaration = format!(r"\bfunction\s+{COMPONENT_NAME}\s*\(");
    rules.push(Rule {
        id: "component-declaration",
        family: RuleFamily::Structural,
        violation: "missing `function GeneratedComponent(...)` declaration",
        check: Check::Require(Regex::new(&declaration).expect("static declaration pattern")),
    });

    let (id, pattern, violation) = RENDERABLE_RETURN;
    rules.push(Rule {
        id,
        family: RuleFamily::Structural,
        violation,
        check: Check::Require(Regex::new(pattern).expect("static return pattern")),
    });

    rules.push(Rule {
        id: "balanced-markup",
        family: RuleFamily::Structural,
        violation: "unmatched markup tags",
        check: Check::BalancedTags,
    });

    rules
}

/// The rule table, in evaluation order.
pub fn rules() -> &'static [Rule] {
    &RULES
}

/// Outcome of validating one source text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    /// True when no rule was broken.
    pub is_valid: bool,
    /// Every broken rule, formatted `"<rule-id>: <violation>"`.
    pub violations: Vec<String>,
    /// Packaging-stripped source, present only when valid.
    pub sanitized_text: Option<String>,
}

impl ValidationResult {
    /// Whether the rule with this id was broken.
    pub fn violates(&self, rule_id: &str) -> bool {
        self.violations
            .iter()
            .any(|v| v.split_once(':').is_some_and(|(id, _)| id == rule_id))
    }
}

/// Source text that is allowed into a render boundary.
///
/// Only produced by a passing [`Validator::gate`] or by
/// [`crate::fallback::fallback_source`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedSource(String);

impl ValidatedSource {
    pub(crate) fn trusted(text: String) -> Self {
        Self(text)
    }

    /// The sanitized source.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Size in bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the source is empty. Never true for a validated source.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Consume into the sanitized source.
    pub fn into_string(self) -> String {
        self.0
    }
}

/// Runs the rule table with a configured size limit.
#[derive(Debug, Clone)]
pub struct Validator {
    max_code_size: usize,
}

impl Default for Validator {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CODE_SIZE)
    }
}

impl Validator {
    /// A validator rejecting sources larger than `max_code_size` bytes.
    pub fn new(max_code_size: usize) -> Self {
        Self { max_code_size }
    }

    /// Configured size limit.
    pub fn max_code_size(&self) -> usize {
        self.max_code_size
    }

    /// Check `source` against every rule. Never fails; an invalid source is
    /// a routine result.
    ///
    /// Rules see both the raw text and the sanitized text that would be
    /// handed out, so packaging removal can never produce source that would
    /// itself fail.
    pub fn validate(&self, source: &str) -> ValidationResult {
        let mut violations = Vec::new();
        let sanitized = sanitize(source);

        if source.len() > self.max_code_size {
            violations.push(format!(
                "code-size: source exceeds {} bytes (got {})",
                self.max_code_size,
                source.len()
            ));
        }
        if sanitized.is_empty() {
            violations.push("empty-source: source is empty".to_string());
        }

        violations.extend(
            rules()
                .iter()
                .filter_map(|rule| rule.check(source).or_else(|| rule.check(&sanitized))),
        );

        if violations.is_empty() {
            ValidationResult {
                is_valid: true,
                violations,
                sanitized_text: Some(sanitized),
            }
        } else {
            tracing::debug!(count = violations.len(), "source failed validation");
            ValidationResult {
                is_valid: false,
                violations,
                sanitized_text: None,
            }
        }
    }

    /// Validate and, on success, hand back renderable source.
    pub fn gate(&self, source: &str) -> Result<ValidatedSource, ValidationResult> {
        let result = self.validate(source);
        match result.sanitized_text {
            Some(text) if result.is_valid => Ok(ValidatedSource(text)),
            _ => Err(result),
        }
    }
}

/// Validate with the default size limit.
pub fn validate(source: &str) -> ValidationResult {
    Validator::default().validate(source)
}

/// Strip packaging the generator may echo around the component.
///
/// Removes markdown fence lines, drops `import` statements (including
/// multi-line ones), removes leading `export default ` / `export `
/// keywords, and trims. Code is otherwise left untouched.
pub fn sanitize(source: &str) -> String {
    let mut out: Vec<String> = Vec::new();
    let mut in_import = false;

    for line in source.lines() {
        let trimmed = line.trim_start();
        if in_import {
            if starts_statement(trimmed) {
                in_import = false;
            } else {
                in_import = !continuation_ends_import(trimmed);
                continue;
            }
        }
        if trimmed.starts_with("```") {
            continue;
        }
        if is_static_import(trimmed) {
            in_import = opens_import_list(trimmed);
            continue;
        }

        let indent = &line[..line.len() - trimmed.len()];
        if let Some(rest) = trimmed.strip_prefix("export default ") {
            out.push(format!("{indent}{rest}"));
        } else if let Some(rest) = trimmed.strip_prefix("export ") {
            out.push(format!("{indent}{rest}"));
        } else {
            out.push(line.to_string());
        }
    }

    out.join("\n").trim().to_string()
}

fn is_static_import(line: &str) -> bool {
    match line.strip_prefix("import") {
        Some(rest) => rest.starts_with([' ', '{', '*', '\'', '"']),
        None => false,
    }
}

/// An import whose `{` list is left open continues on the next lines.
/// Anything else (`import React`, `import './a.css'`) ends on its own line.
fn opens_import_list(line: &str) -> bool {
    line.matches('{').count() > line.matches('}').count()
        && !line.contains(" from ")
        && !line.trim_end().ends_with(';')
}

fn continuation_ends_import(line: &str) -> bool {
    line.contains("from") || line.trim_end().ends_with(';')
}

fn starts_statement(line: &str) -> bool {
    const KEYWORDS: &[&str] = &[
        "function ", "async ", "const ", "let ", "var ", "class ", "export ", "return ", "import ",
    ];
    KEYWORDS.iter().any(|k| line.starts_with(k))
}

/// Absolute difference between opening and closing tags, ignoring
/// self-closing tags.
fn tag_mismatch(source: &str) -> usize {
    let opens = OPEN_TAG_RE
        .captures_iter(source)
        .filter(|caps| caps.get(2).map_or(true, |slash| slash.as_str().is_empty()))
        .count()
        + source.matches("<>").count();
    let closes = CLOSE_TAG_RE.find_iter(source).count();
    opens.abs_diff(closes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn component(body: &str) -> String {
        format!("function GeneratedComponent({{ data }}) {{\n{body}\n}}")
    }

    fn assert_rejects(source: &str, rule_id: &str) {
        let result = validate(source);
        assert!(!result.is_valid, "expected rejection for {rule_id}: {source}");
        assert!(
            result.violates(rule_id),
            "expected {rule_id} in {:?}",
            result.violations
        );
        assert!(result.sanitized_text.is_none());
    }

    fn assert_accepts(source: &str) {
        let result = validate(source);
        assert!(result.is_valid, "unexpected violations: {:?}", result.violations);
    }

    #[test]
    fn accepts_plain_component() {
        assert_accepts(&component(
            "  return (\n    <ul>\n      {data.items.map(i => <li key={i.id}>{i.name}</li>)}\n    </ul>\n  );",
        ));
    }

    #[test]
    fn accepts_create_element_return() {
        assert_accepts(&component(
            "  return React.createElement('div', null, data.title);",
        ));
    }

    #[test]
    fn rejects_empty_source() {
        let result = validate("   ");
        assert!(!result.is_valid);
        assert!(result.violates("empty-source"));
    }

    #[test]
    fn rejects_oversized_source() {
        let validator = Validator::new(32);
        let result = validator.validate(&component("  return <div>ok</div>;"));
        assert!(result.violates("code-size"));
    }

    #[test]
    fn rejects_eval() {
        assert_rejects(&component("  eval('1');\n  return <div />;"), "dynamic-eval");
    }

    #[test]
    fn rejects_function_constructor() {
        assert_rejects(
            &component("  const f = new Function('return 1');\n  return <div />;"),
            "function-constructor",
        );
    }

    #[test]
    fn rejects_dynamic_import_and_require() {
        assert_rejects(
            &component("  import('fs');\n  return <div />;"),
            "dynamic-module",
        );
        assert_rejects(
            &component("  const x = require('x');\n  return <div />;"),
            "dynamic-module",
        );
    }

    #[test]
    fn rejects_process_env() {
        assert_rejects(
            &component("  const k = process.env.KEY;\n  return <div>{k}</div>;"),
            "process-access",
        );
    }

    #[test]
    fn accepts_data_process_status() {
        assert_accepts(&component("  return <div>{data.process.status}</div>;"));
    }

    #[test]
    fn rejects_os_namespace() {
        assert_rejects(
            &component("  const h = os.hostname();\n  return <div>{h}</div>;"),
            "os-access",
        );
    }

    #[test]
    fn os_fragments_are_not_flagged() {
        assert_accepts(&component(
            "  const photos = data.photos;\n  return <div>{photos.length} {data.os.name} {pos.x}</div>;",
        ));
    }

    #[test]
    fn rejects_filesystem() {
        assert_rejects(
            &component("  fs.readFileSync('/etc/passwd');\n  return <div />;"),
            "filesystem-access",
        );
    }

    #[test]
    fn rejects_cookie_and_storage() {
        let source = component(
            "  const c = document.cookie;\n  localStorage.setItem('c', c);\n  return <div />;",
        );
        let result = validate(&source);
        assert!(result.violates("cookie-access"));
        assert!(result.violates("storage-access"));
    }

    #[test]
    fn rejects_markup_sinks() {
        assert_rejects(
            &component("  return <div dangerouslySetInnerHTML={{ __html: data.html }} />;"),
            "markup-injection",
        );
        assert_rejects(
            &component("  el.innerHTML = data.html;\n  return <div />;"),
            "markup-injection",
        );
    }

    #[test]
    fn rejects_compound_and_bracket_markup_sinks() {
        assert_rejects(
            &component("  el.innerHTML += data.html;\n  return <div />;"),
            "markup-injection",
        );
        assert_rejects(
            &component("  el[\"outerHTML\"] = data.html;\n  return <div />;"),
            "markup-injection",
        );
    }

    #[test]
    fn rejects_camel_case_string_handler() {
        assert_rejects(
            &component("  return <img src={data.u} onError=\"fetchIt()\" />;"),
            "inline-event-handler",
        );
        assert_rejects(
            &component("  return <a href=\"#\" onClick={() => go()} ONMOUSEOVER='x()'>go</a>;"),
            "inline-event-handler",
        );
    }

    #[test]
    fn rejects_inline_handler_attribute() {
        assert_rejects(
            &component("  return <button onclick=\"steal()\">x</button>;"),
            "inline-event-handler",
        );
    }

    #[test]
    fn accepts_jsx_handler_with_function() {
        assert_accepts(&component(
            "  return <button onClick={() => setOpen(!open)}>toggle</button>;",
        ));
    }

    #[test]
    fn rejects_script_tags_any_case() {
        assert_rejects(
            &component("  return <div><SCRIPT>alert(1)</SCRIPT></div>;"),
            "script-tag",
        );
        assert_rejects(
            &component("  return <iframe src={data.url}></iframe>;"),
            "script-tag",
        );
    }

    #[test]
    fn string_timers_rejected_function_timers_allowed() {
        assert_rejects(
            &component("  setTimeout(\"tick()\", 10);\n  return <div />;"),
            "string-timer",
        );
        assert_accepts(&component(
            "  setTimeout(() => setN(n + 1), 10);\n  return <div>{n}</div>;",
        ));
    }

    #[test]
    fn rejects_navigation_and_network() {
        let source = component(
            "  window.top.location = 'x';\n  fetch(data.url);\n  return <div />;",
        );
        let result = validate(&source);
        assert!(result.violates("navigation-access"));
        assert!(result.violates("network-access"));
    }

    #[test]
    fn refetch_identifier_is_not_network_access() {
        assert_accepts(&component("  const refetch = () => 1;\n  return <div>{refetch()}</div>;"));
    }

    #[test]
    fn rejects_prototype_escape() {
        assert_rejects(
            &component("  ({}).__proto__.x = 1;\n  return <div />;"),
            "prototype-escape",
        );
    }

    #[test]
    fn requires_component_declaration() {
        assert_rejects(
            "function Other() { return <div />; }",
            "component-declaration",
        );
    }

    #[test]
    fn requires_renderable_return() {
        assert_rejects(&component("  return data.name;"), "renderable-return");
    }

    #[test]
    fn tag_mismatch_within_slack_is_tolerated() {
        assert_accepts(&component("  return (<div><span><b>x</div>);"));
    }

    #[test]
    fn tag_mismatch_beyond_slack_is_flagged() {
        assert_rejects(
            &component("  return (<div><span><b><i>x</div>);"),
            "balanced-markup",
        );
    }

    #[test]
    fn arrow_handlers_in_self_closing_tags_balance() {
        let form = component(
            "  return (\n    <form>\n      <input onChange={e => setA(e.target.value)} />\n      <input onChange={e => setB(e.target.value)} />\n      <input onChange={e => { setC(e.target.value); }} />\n    </form>\n  );",
        );
        assert_eq!(tag_mismatch(&form), 0);
        assert_accepts(&form);
    }

    #[test]
    fn self_closing_and_fragments_balance() {
        assert_eq!(tag_mismatch("<><img src=\"a\" /><br/><p>x</p></>"), 0);
    }

    #[test]
    fn enumerates_every_violation() {
        let result = validate("eval('x'); document.cookie; setInterval('x', 1);");
        assert!(result.violates("dynamic-eval"));
        assert!(result.violates("cookie-access"));
        assert!(result.violates("string-timer"));
        assert!(result.violates("component-declaration"));
        assert!(result.violates("renderable-return"));
        assert_eq!(result.violations.len(), 5);
    }

    #[test]
    fn violations_are_prefixed_with_rule_id() {
        let result = validate("eval('x')");
        assert!(result
            .violations
            .iter()
            .all(|v| v.split_once(": ").is_some()));
    }

    #[test]
    fn rule_ids_are_unique() {
        let mut ids: Vec<&str> = rules().iter().map(|r| r.id).collect();
        let total = ids.len();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), total);
    }

    #[test]
    fn sanitize_strips_fences_imports_and_exports() {
        let raw = "```jsx\nimport React from 'react';\nimport {\n  useState,\n} from 'react';\nimport './styles.css';\n\nexport default function GeneratedComponent({ data }) {\n  return <div>{data.a}</div>;\n}\n```\n";
        assert_eq!(
            sanitize(raw),
            "function GeneratedComponent({ data }) {\n  return <div>{data.a}</div>;\n}"
        );
    }

    #[test]
    fn bare_import_does_not_swallow_the_component() {
        let raw = "import React\nfunction GeneratedComponent({ data }) {\n  return <div>{data.a}</div>;\n}";
        assert_eq!(
            sanitize(raw),
            "function GeneratedComponent({ data }) {\n  return <div>{data.a}</div>;\n}"
        );
        let validated = Validator::default().gate(raw).unwrap();
        assert!(validate(validated.as_str()).is_valid);
    }

    #[test]
    fn open_import_list_stops_at_next_statement() {
        let raw = "import {\n  useState,\nfunction GeneratedComponent() {\n  return <div />;\n}";
        assert!(sanitize(raw).starts_with("function GeneratedComponent()"));
    }

    #[test]
    fn source_destroyed_by_sanitizing_is_rejected() {
        let result = validate("```jsx function GeneratedComponent() { return <div />; }\n```");
        assert!(!result.is_valid);
        assert!(result.violates("empty-source"), "{:?}", result.violations);
        assert!(result.violates("component-declaration"));
        assert!(result.sanitized_text.is_none());

        let only_fences = validate("```\n```");
        assert!(only_fences.violates("empty-source"));
    }

    #[test]
    fn sanitize_keeps_logic() {
        let raw = "  function GeneratedComponent() {\n  const important = 1;\n  return <div>{important}</div>;\n}  ";
        let cleaned = sanitize(raw);
        assert!(cleaned.contains("const important = 1;"));
        assert!(cleaned.starts_with("function"));
    }

    #[test]
    fn gate_returns_sanitized_source() {
        let validated = Validator::default()
            .gate("export function GeneratedComponent() { return <div />; }")
            .unwrap();
        assert_eq!(
            validated.as_str(),
            "function GeneratedComponent() { return <div />; }"
        );
    }

    #[test]
    fn gate_rejects_with_result() {
        let err = Validator::default().gate("nothing here").unwrap_err();
        assert!(!err.is_valid);
        assert!(err.violates("component-declaration"));
    }
}
