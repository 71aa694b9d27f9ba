//! DOM Analyzer — static inspection of page markup for structural threats.
//!
//! Detection rules:
//!  1. **hidden_text** — content present in the DOM but visually concealed
//!     (display:none, zero opacity, white-on-white, off-screen, aria-hidden)
//!  2. **suspicious_form** — credential forms submitting cross-domain or
//!     over plaintext
//!  3. **malicious_iframe** — near-viewport cross-origin frames, unsafe
//!     sandbox grants, data-URI frames carrying forms
//!  4. **risky_script** — inline eval/Function/document.write, long base64
//!     payloads, obfuscated identifier soup
//!  5. **deceptive_overlay** — high z-index covers holding controls or links
//!
//! Scripts are never executed and no layout is computed: styling is read
//! lexically from inline `style=` attributes and simple `<style>` rules.

use ego_tree::NodeId;
use scraper::{ElementRef, Html, Node, Selector};
use std::collections::HashSet;
use url::Url;

use crate::types::{kinds, layers, LayerReport, PageContext, Signal};

/// Default size cap; larger pages are truncated and flagged `oversize`.
pub const DEFAULT_MAX_HTML_BYTES: usize = 5 * 1024 * 1024;

const EVIDENCE_EXCERPT: usize = 120;

/// Verbs that turn hidden prose into hidden instructions.
const IMPERATIVE_MARKERS: &[&str] = &["ignore", "override", "must", "disregard"];

/// Second-level suffixes under which the registrable domain takes three labels.
const MULTI_PART_SUFFIXES: &[&str] = &[
    "co.uk", "org.uk", "gov.uk", "ac.uk", "co.jp", "ne.jp", "or.jp", "com.au",
    "net.au", "org.au", "co.nz", "com.br", "com.cn", "com.mx", "co.in", "co.za",
];

/// Visible and hidden text pulled from the same parse the analyzer ran on.
#[derive(Debug, Clone, Default)]
pub struct TextExtraction {
    pub visible: String,
    pub hidden: String,
}

/// One compiled `<style>` rule we honor: a simple selector and its declarations.
enum SimpleSelector {
    Tag(String),
    Class(String),
    Id(String),
}

struct StyleRule {
    selector: SimpleSelector,
    declarations: Vec<(String, String)>,
}

pub struct DomAnalyzer {
    max_html_bytes: usize,
    base64_re: regex::Regex,
}

impl Default for DomAnalyzer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_HTML_BYTES)
    }
}

impl DomAnalyzer {
    pub fn new(max_html_bytes: usize) -> Self {
        Self {
            max_html_bytes,
            base64_re: regex::Regex::new(r"[A-Za-z0-9+/=]{200,}").unwrap(),
        }
    }

    /// Structural analysis only. Deterministic for identical input.
    pub fn analyze(&self, page: &PageContext) -> LayerReport {
        self.analyze_full(page).0
    }

    /// Analysis plus the visible/hidden text split, so the classifier can
    /// reuse this parse instead of running its own.
    pub fn analyze_full(&self, page: &PageContext) -> (LayerReport, TextExtraction) {
        let started = std::time::Instant::now();
        let mut signals = Vec::new();

        let trimmed = page.html.trim();
        if !trimmed.is_empty() && !trimmed.contains('<') {
            // Tag soup recovers, but markup-free input is not a page at all.
            // Fail-suspicious rather than fail-open.
            signals.push(Signal::new(
                layers::DOM,
                kinds::PARSE_ERROR,
                0.3,
                "input contains no markup",
                0.6,
            ));
            return (
                LayerReport::error(
                    layers::DOM,
                    "ParseError",
                    signals,
                    started.elapsed().as_millis() as u64,
                ),
                TextExtraction::default(),
            );
        }

        let mut html = page.html.as_str();
        if html.len() > self.max_html_bytes {
            let mut cut = self.max_html_bytes;
            while cut > 0 && !html.is_char_boundary(cut) {
                cut -= 1;
            }
            signals.push(Signal::new(
                layers::DOM,
                kinds::OVERSIZE,
                0.2,
                format!("page truncated at {} of {} bytes", cut, html.len()),
                0.8,
            ));
            html = &html[..cut];
        }

        let doc = Html::parse_document(html);
        let style_rules = collect_style_rules(&doc);
        let page_url = Url::parse(&page.url).ok();

        let mut hidden_ids = HashSet::new();
        let mut hidden_chunks: Vec<String> = Vec::new();

        for node in doc.tree.nodes() {
            let Some(element) = ElementRef::wrap(node) else { continue };
            let name = element.value().name();
            if matches!(name, "html" | "head" | "script" | "style" | "noscript") {
                continue;
            }

            // Skip descendants of an already-hidden element; the ancestor's
            // signal covers their text.
            if node.ancestors().any(|a| hidden_ids.contains(&a.id())) {
                continue;
            }

            if let Some(method) = is_hidden(&element, &style_rules) {
                let text = collapse_ws(&element.text().collect::<Vec<_>>().join(" "));
                if !text.is_empty() {
                    hidden_ids.insert(node.id());
                    hidden_chunks.push(text.clone());
                    let lowered = text.to_lowercase();
                    let imperative = IMPERATIVE_MARKERS.iter().any(|m| lowered.contains(m));
                    let severity = if imperative { 0.8 } else { 0.6 };
                    signals.push(Signal::new(
                        layers::DOM,
                        kinds::HIDDEN_TEXT,
                        severity,
                        format!("<{}> hidden via {}: \"{}\"", name, method, excerpt(&text)),
                        0.9,
                    ));
                }
            }

            match name {
                "form" => {
                    if let Some(signal) = self.inspect_form(&element, page_url.as_ref()) {
                        signals.push(signal);
                    }
                }
                "iframe" => {
                    if let Some(signal) = self.inspect_iframe(&element, page_url.as_ref()) {
                        signals.push(signal);
                    }
                }
                _ => {}
            }

            if is_overlay(&element, &style_rules) {
                signals.push(Signal::new(
                    layers::DOM,
                    kinds::DECEPTIVE_OVERLAY,
                    0.6,
                    format!("<{}> full-viewport overlay above z-index 9000 with interactive content", name),
                    0.9,
                ));
            }
        }

        let script_sel = Selector::parse("script").unwrap();
        for script in doc.select(&script_sel) {
            if script.value().attr("src").is_some() {
                continue;
            }
            let body = script.text().collect::<Vec<_>>().join("");
            signals.extend(self.inspect_inline_script(&body));
        }

        let texts = TextExtraction {
            visible: extract_visible_text(&doc, &hidden_ids),
            hidden: hidden_chunks.join(" "),
        };

        let report = LayerReport::ok(layers::DOM, signals, started.elapsed().as_millis() as u64);
        (report, texts)
    }

    // ── Form inspection ─────────────────────────────────────────────────────

    fn inspect_form(&self, form: &ElementRef, page_url: Option<&Url>) -> Option<Signal> {
        let action = form.value().attr("action").unwrap_or("").trim();
        let input_sel = Selector::parse("input").unwrap();
        let mut has_password = false;
        let mut has_credential = false;
        for input in form.select(&input_sel) {
            let ty = input.value().attr("type").unwrap_or("text").to_ascii_lowercase();
            let input_name = input.value().attr("name").unwrap_or("").to_ascii_lowercase();
            if ty == "password" {
                has_password = true;
            }
            if ty == "password"
                || ty == "email"
                || input_name.contains("pass")
                || input_name.contains("card")
                || input_name.contains("ssn")
            {
                has_credential = true;
            }
        }

        let action_url = resolve_url(action, page_url);
        let cross_domain = match (&action_url, page_url) {
            (Some(a), Some(p)) => match (a.host_str(), p.host_str()) {
                (Some(ah), Some(ph)) => registrable_domain(ah) != registrable_domain(ph),
                _ => false,
            },
            // An absolute action on a page with no usable URL is treated as
            // external: there is nothing to prove it is same-origin.
            (Some(a), None) => a.host_str().is_some(),
            _ => false,
        };
        let plaintext = action_url
            .as_ref()
            .map(|u| u.scheme() == "http")
            .unwrap_or(false);

        let mut indicators = Vec::new();
        if cross_domain {
            indicators.push("cross-domain action");
        }
        if cross_domain && has_credential {
            indicators.push("credential field posts externally");
        }
        if plaintext && has_credential {
            indicators.push("credential field posts over plaintext");
        }
        if indicators.is_empty() {
            return None;
        }

        let target = if action.is_empty() { "(empty)" } else { action };
        Some(Signal::new(
            layers::DOM,
            kinds::SUSPICIOUS_FORM,
            0.7,
            format!(
                "form action=\"{}\" ({}){}",
                excerpt(target),
                indicators.join("; "),
                if has_password { " [password field]" } else { "" },
            ),
            0.9,
        ))
    }

    // ── Iframe inspection ───────────────────────────────────────────────────

    fn inspect_iframe(&self, iframe: &ElementRef, page_url: Option<&Url>) -> Option<Signal> {
        let src = iframe.value().attr("src").unwrap_or("").trim();
        let sandbox = iframe.value().attr("sandbox").map(|s| s.to_ascii_lowercase());

        if let Some(sandbox) = &sandbox {
            // allow-scripts + allow-same-origin together lets the frame strip
            // its own sandbox.
            if sandbox.contains("allow-scripts") && sandbox.contains("allow-same-origin") {
                return Some(Signal::new(
                    layers::DOM,
                    kinds::MALICIOUS_IFRAME,
                    0.6,
                    format!("iframe sandbox grants scripts and same-origin: \"{}\"", excerpt(src)),
                    0.9,
                ));
            }
        }

        if src.starts_with("data:") && data_uri_contains_form(src) {
            return Some(Signal::new(
                layers::DOM,
                kinds::MALICIOUS_IFRAME,
                0.6,
                "data-URI iframe embeds a form",
                0.9,
            ));
        }

        if near_viewport(iframe) {
            let src_url = resolve_url(src, page_url);
            let cross_origin = match (&src_url, page_url) {
                (Some(s), Some(p)) => match (s.host_str(), p.host_str()) {
                    (Some(sh), Some(ph)) => registrable_domain(sh) != registrable_domain(ph),
                    _ => false,
                },
                (Some(s), None) => s.host_str().is_some(),
                _ => false,
            };
            if cross_origin {
                return Some(Signal::new(
                    layers::DOM,
                    kinds::MALICIOUS_IFRAME,
                    0.6,
                    format!("near-viewport cross-origin iframe: \"{}\"", excerpt(src)),
                    0.9,
                ));
            }
        }

        None
    }

    // ── Inline script inspection ────────────────────────────────────────────

    fn inspect_inline_script(&self, body: &str) -> Vec<Signal> {
        let mut signals = Vec::new();
        if body.trim().is_empty() {
            return signals;
        }
        let lowered = body.to_lowercase();

        for (needle, label) in [
            ("eval(", "eval"),
            ("new function(", "Function constructor"),
            ("document.write(", "document.write"),
        ] {
            if lowered.contains(needle) {
                signals.push(Signal::new(
                    layers::DOM,
                    kinds::RISKY_SCRIPT,
                    0.4,
                    format!("inline script uses {}", label),
                    0.9,
                ));
            }
        }

        if let Some(m) = self.base64_re.find(body) {
            signals.push(Signal::new(
                layers::DOM,
                kinds::RISKY_SCRIPT,
                0.4,
                format!("inline script carries {}-char base64 payload", m.as_str().len()),
                0.9,
            ));
        }

        let ratio = obfuscated_token_ratio(body);
        if ratio > 0.3 {
            signals.push(Signal::new(
                layers::DOM,
                kinds::RISKY_SCRIPT,
                0.4,
                format!("inline script identifier soup (obfuscation ratio {:.2})", ratio),
                0.9,
            ));
        }

        signals
    }
}

// ── Style handling ──────────────────────────────────────────────────────────

/// Pull simple `.class` / `#id` / `tag` rules out of `<style>` blocks.
/// Combinators, pseudo-classes and attribute selectors are ignored: without
/// a layout engine they cannot be evaluated faithfully anyway.
fn collect_style_rules(doc: &Html) -> Vec<StyleRule> {
    let style_sel = Selector::parse("style").unwrap();
    let rule_re = regex::Regex::new(r"(?s)([^{}]+)\{([^}]*)\}").unwrap();
    let mut rules = Vec::new();
    for style in doc.select(&style_sel) {
        let css = style.text().collect::<Vec<_>>().join("");
        for cap in rule_re.captures_iter(&css) {
            let declarations = parse_declarations(&cap[2]);
            if declarations.is_empty() {
                continue;
            }
            for raw in cap[1].split(',') {
                let sel = raw.trim();
                if sel.is_empty() || sel.contains(|c: char| c.is_whitespace()) || sel.contains([':', '>', '[', '+', '~', '*']) {
                    continue;
                }
                let selector = if let Some(class) = sel.strip_prefix('.') {
                    SimpleSelector::Class(class.to_ascii_lowercase())
                } else if let Some(id) = sel.strip_prefix('#') {
                    SimpleSelector::Id(id.to_ascii_lowercase())
                } else if sel.chars().all(|c| c.is_ascii_alphanumeric()) {
                    SimpleSelector::Tag(sel.to_ascii_lowercase())
                } else {
                    continue;
                };
                rules.push(StyleRule { selector, declarations: declarations.clone() });
            }
        }
    }
    rules
}

fn parse_declarations(block: &str) -> Vec<(String, String)> {
    block
        .split(';')
        .filter_map(|decl| {
            let (prop, value) = decl.split_once(':')?;
            let prop = prop.trim().to_ascii_lowercase();
            let value = collapse_ws(&value.to_ascii_lowercase());
            if prop.is_empty() || value.is_empty() {
                None
            } else {
                Some((prop, value))
            }
        })
        .collect()
}

/// Effective declarations for an element: matching stylesheet rules first,
/// inline `style=` last so it wins on lookup-from-the-back.
fn effective_style(element: &ElementRef, rules: &[StyleRule]) -> Vec<(String, String)> {
    let el = element.value();
    let name = el.name().to_ascii_lowercase();
    let id = el.id().map(|s| s.to_ascii_lowercase());
    let classes: Vec<String> = el.classes().map(|c| c.to_ascii_lowercase()).collect();

    let mut style = Vec::new();
    for rule in rules {
        let hit = match &rule.selector {
            SimpleSelector::Tag(t) => *t == name,
            SimpleSelector::Class(c) => classes.iter().any(|cl| cl == c),
            SimpleSelector::Id(i) => id.as_deref() == Some(i.as_str()),
        };
        if hit {
            style.extend(rule.declarations.iter().cloned());
        }
    }
    if let Some(inline) = el.attr("style") {
        style.extend(parse_declarations(inline));
    }
    style
}

fn style_value<'a>(style: &'a [(String, String)], prop: &str) -> Option<&'a str> {
    style.iter().rev().find(|(p, _)| p == prop).map(|(_, v)| v.as_str())
}

fn is_white(value: &str) -> bool {
    matches!(
        value,
        "white" | "#fff" | "#ffffff" | "rgb(255,255,255)" | "rgb(255, 255, 255)"
    )
}

fn px_value(value: &str) -> Option<f64> {
    value
        .trim_end_matches("px")
        .trim_end_matches("pt")
        .trim()
        .parse::<f64>()
        .ok()
}

/// Lexical hiddenness check. Returns the hiding method name.
fn is_hidden(element: &ElementRef, rules: &[StyleRule]) -> Option<&'static str> {
    let style = effective_style(element, rules);

    if style_value(&style, "display") == Some("none") {
        return Some("display:none");
    }
    if style_value(&style, "visibility") == Some("hidden") {
        return Some("visibility:hidden");
    }
    if let Some(op) = style_value(&style, "opacity").and_then(px_value) {
        if op == 0.0 {
            return Some("opacity:0");
        }
    }
    if let Some(size) = style_value(&style, "font-size").and_then(px_value) {
        if size <= 1.0 {
            return Some("tiny font");
        }
    }
    let fg_white = style_value(&style, "color").map(is_white).unwrap_or(false);
    let bg_white = style_value(&style, "background")
        .or_else(|| style_value(&style, "background-color"))
        .map(is_white)
        .unwrap_or(false);
    if fg_white && bg_white {
        return Some("white-on-white");
    }
    if matches!(style_value(&style, "position"), Some("absolute") | Some("fixed")) {
        for prop in ["left", "top"] {
            if let Some(v) = style_value(&style, prop).and_then(px_value) {
                if v < -1000.0 {
                    return Some("off-screen position");
                }
            }
        }
    }
    let zero_w = style_value(&style, "width").and_then(px_value) == Some(0.0);
    let zero_h = style_value(&style, "height").and_then(px_value) == Some(0.0);
    if zero_w && zero_h {
        return Some("zero size");
    }
    if element.value().attr("aria-hidden") == Some("true") {
        let text_len: usize = element.text().map(|t| t.trim().len()).sum();
        if text_len > 30 {
            return Some("aria-hidden");
        }
    }
    None
}

/// Reference viewport for lexical coverage checks (no layout engine).
const VIEWPORT_W: f64 = 1280.0;
const VIEWPORT_H: f64 = 720.0;

fn dimension_covers(value: Option<&str>, full: f64) -> bool {
    match value {
        Some(v) if v == "100%" || v == "100vw" || v == "100vh" => true,
        Some(v) => px_value(v).map(|px| px >= 0.8 * full).unwrap_or(false),
        None => false,
    }
}

fn near_viewport(element: &ElementRef) -> bool {
    let el = element.value();
    let attr_covers = |attr: &str, full: f64| {
        el.attr(attr)
            .map(|v| {
                let v = v.trim();
                v == "100%" || v.parse::<f64>().map(|px| px >= 0.8 * full).unwrap_or(false)
            })
            .unwrap_or(false)
    };
    let style = el
        .attr("style")
        .map(parse_declarations)
        .unwrap_or_default();
    let w = attr_covers("width", VIEWPORT_W) || dimension_covers(style_value(&style, "width"), VIEWPORT_W);
    let h = attr_covers("height", VIEWPORT_H) || dimension_covers(style_value(&style, "height"), VIEWPORT_H);
    w && h
}

fn is_overlay(element: &ElementRef, rules: &[StyleRule]) -> bool {
    let style = effective_style(element, rules);
    let z = style_value(&style, "z-index")
        .and_then(|v| v.parse::<i64>().ok())
        .unwrap_or(0);
    if z <= 9000 {
        return false;
    }
    let positioned = matches!(style_value(&style, "position"), Some("absolute") | Some("fixed"));
    if !positioned {
        return false;
    }
    let pinned = ["top", "left", "right", "bottom"]
        .iter()
        .all(|p| style_value(&style, p).and_then(px_value) == Some(0.0));
    let covers = dimension_covers(style_value(&style, "width"), VIEWPORT_W)
        && dimension_covers(style_value(&style, "height"), VIEWPORT_H);
    if !pinned && !covers {
        return false;
    }
    let interactive_sel = Selector::parse("a, input, button, form, select, textarea").unwrap();
    element.select(&interactive_sel).next().is_some()
}

// ── URL / domain helpers ────────────────────────────────────────────────────

fn resolve_url(raw: &str, base: Option<&Url>) -> Option<Url> {
    if raw.is_empty() || raw == "#" || raw.starts_with("javascript:") {
        return None;
    }
    if let Ok(url) = Url::parse(raw) {
        return Some(url);
    }
    base.and_then(|b| b.join(raw).ok())
}

/// eTLD+1 approximation: two labels, three under common two-part suffixes.
pub fn registrable_domain(host: &str) -> String {
    let host = host.trim_start_matches("www.").to_ascii_lowercase();
    let labels: Vec<&str> = host.split('.').collect();
    if labels.len() <= 2 {
        return host;
    }
    let last_two = labels[labels.len() - 2..].join(".");
    let take = if MULTI_PART_SUFFIXES.contains(&last_two.as_str()) { 3 } else { 2 };
    labels[labels.len() - take..].join(".")
}

fn data_uri_contains_form(src: &str) -> bool {
    let lowered = src.to_ascii_lowercase();
    if lowered.contains("<form") || lowered.contains("%3cform") {
        return true;
    }
    if let Some(idx) = lowered.find("base64,") {
        use base64::Engine as _;
        let payload = &src[idx + "base64,".len()..];
        if let Ok(decoded) = base64::engine::general_purpose::STANDARD.decode(payload.trim()) {
            let text = String::from_utf8_lossy(&decoded).to_ascii_lowercase();
            return text.contains("<form");
        }
    }
    false
}

// ── Script obfuscation heuristic ────────────────────────────────────────────

/// Share of identifier-like tokens that are hex-like (hex-prefixed names or
/// runs of hex digits) or non-ASCII.
fn obfuscated_token_ratio(body: &str) -> f64 {
    let mut total = 0usize;
    let mut suspicious = 0usize;
    for token in body.split(|c: char| !c.is_alphanumeric() && c != '_') {
        if token.len() < 3 {
            continue;
        }
        total += 1;
        let hex_like = token.starts_with("0x")
            || token.starts_with("_0x")
            || (token.len() >= 8 && token.chars().all(|c| c.is_ascii_hexdigit()));
        let non_ascii = !token.is_ascii();
        if hex_like || non_ascii {
            suspicious += 1;
        }
    }
    if total == 0 {
        0.0
    } else {
        suspicious as f64 / total as f64
    }
}

// ── Text extraction ─────────────────────────────────────────────────────────

fn extract_visible_text(doc: &Html, hidden_ids: &HashSet<NodeId>) -> String {
    let mut parts: Vec<String> = Vec::new();
    for node in doc.tree.nodes() {
        let Node::Text(text) = node.value() else { continue };
        let concealed = node.ancestors().any(|a| {
            if hidden_ids.contains(&a.id()) {
                return true;
            }
            match a.value() {
                Node::Element(el) => matches!(el.name(), "script" | "style" | "noscript" | "head"),
                _ => false,
            }
        });
        if concealed {
            continue;
        }
        let piece = collapse_ws(&text.text);
        if !piece.is_empty() {
            parts.push(piece);
        }
    }
    parts.join(" ")
}

fn collapse_ws(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn excerpt(text: &str) -> String {
    if text.len() <= EVIDENCE_EXCERPT {
        return text.to_string();
    }
    let mut cut = EVIDENCE_EXCERPT;
    while cut > 0 && !text.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}…", &text[..cut])
}
