//! HTML → [`PageNode`] extraction.
//!
//! The portal serves framework-generated markup whose interesting parts are
//! reachable with anchored scans: element ids, attribute bags, and quoted
//! URLs inside inline scripts. This module turns a fetched document into the
//! parsed-page structure the orchestration core consumes. It is not a general
//! HTML parser and does not try to be one.

use super::{
    FormNode, FrameNode, ImageNode, LinkNode, OptionNode, PageNode, RowNode, SelectNode, TableNode,
};
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::OnceLock;

macro_rules! static_re {
    ($name:ident, $pattern:expr) => {
        fn $name() -> &'static Regex {
            static RE: OnceLock<Regex> = OnceLock::new();
            RE.get_or_init(|| {
                Regex::new($pattern).unwrap_or_else(|e| panic!("invalid regex {}: {e}", $pattern))
            })
        }
    };
}

static_re!(script_re, r"(?is)<script\b[^>]*>(.*?)</script>");
static_re!(style_re, r"(?is)<style\b[^>]*>.*?</style>");
static_re!(form_re, r"(?is)<form\b[^>]*>.*?</form>");
static_re!(form_open_re, r"(?is)<form\b[^>]*>");
static_re!(table_re, r"(?is)<table\b[^>]*>.*?</table>");
static_re!(table_open_re, r"(?is)<table\b[^>]*>");
static_re!(caption_re, r"(?is)<caption\b[^>]*>(.*?)</caption>");
static_re!(tr_re, r"(?is)<tr\b[^>]*>.*?</tr>");
static_re!(tr_open_re, r"(?is)<tr\b[^>]*>");
static_re!(anchor_re, r"(?is)<a\b[^>]*>.*?</a>");
static_re!(anchor_open_re, r"(?is)<a\b[^>]*>");
static_re!(img_re, r"(?i)<img\b[^>]*>");
static_re!(frame_re, r"(?i)<i?frame\b[^>]*>");
static_re!(input_re, r"(?i)<input\b[^>]*>");
static_re!(select_re, r"(?is)<select\b[^>]*>.*?</select>");
static_re!(select_open_re, r"(?is)<select\b[^>]*>");
static_re!(option_re, r"(?is)<option\b([^>]*)>([^<]*)");
static_re!(textarea_re, r"(?is)<textarea\b([^>]*)>(.*?)</textarea>");
static_re!(tag_re, r"(?s)<[^>]+>");
static_re!(
    attr_re,
    r#"(?i)([a-zA-Z][a-zA-Z0-9_-]*)\s*=\s*("([^"]*)"|'([^']*)'|([^\s>]+))"#
);
static_re!(
    alert_re,
    r#"(?is)<div\b[^>]*class\s*=\s*["'][^"']*alert[^"']*["'][^>]*>(.*?)</div>"#
);

/// Attribute bag of a single opening tag, keys lowercased, quotes stripped.
/// Bare boolean attributes (`checked`, `selected`) are detected separately.
fn attrs(tag: &str) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    for captures in attr_re().captures_iter(tag) {
        let key = captures[1].to_lowercase();
        let value = captures
            .get(3)
            .or_else(|| captures.get(4))
            .or_else(|| captures.get(5))
            .map(|m| m.as_str().to_string())
            .unwrap_or_default();
        out.entry(key).or_insert(value);
    }
    out
}

fn has_bare_attr(tag: &str, name: &str) -> bool {
    let lowered = tag.to_lowercase();
    lowered
        .split(|c: char| c.is_whitespace() || c == '>' || c == '/')
        .any(|token| token == name || token.starts_with(&format!("{name}=")))
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

/// Tag-stripped, entity-decoded, whitespace-collapsed text of a fragment
pub(crate) fn strip_tags(fragment: &str) -> String {
    let no_tags = tag_re().replace_all(fragment, " ");
    decode_entities(&no_tags)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn opening_tag<'a>(fragment: &'a str, open_re: &Regex) -> &'a str {
    open_re
        .find(fragment)
        .map(|m| m.as_str())
        .unwrap_or(fragment)
}

fn parse_link(anchor_html: &str) -> LinkNode {
    let open = opening_tag(anchor_html, anchor_open_re());
    let bag = attrs(open);
    let inner = anchor_html
        .find('>')
        .map(|i| &anchor_html[i + 1..])
        .unwrap_or("");
    LinkNode {
        href: decode_entities(bag.get("href").cloned().unwrap_or_default().as_str()),
        text: strip_tags(inner),
        title: bag.get("title").map(|t| decode_entities(t)),
        classes: bag
            .get("class")
            .map(|c| c.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default(),
        onmouseover: bag.get("onmouseover").map(|t| decode_entities(t)),
    }
}

fn parse_images(fragment: &str) -> Vec<ImageNode> {
    // Anchor spans, so each image can inherit its wrapping anchor's tooltip
    let anchor_spans: Vec<(std::ops::Range<usize>, Option<String>)> = anchor_re()
        .find_iter(fragment)
        .map(|m| {
            let open = opening_tag(m.as_str(), anchor_open_re());
            (m.range(), attrs(open).get("onmouseover").cloned())
        })
        .collect();

    img_re()
        .find_iter(fragment)
        .map(|m| {
            let bag = attrs(m.as_str());
            let anchor_tooltip = anchor_spans
                .iter()
                .find(|(range, _)| range.contains(&m.start()))
                .and_then(|(_, tooltip)| tooltip.clone());
            ImageNode {
                src: bag.get("src").cloned().unwrap_or_default(),
                alt: bag.get("alt").cloned(),
                classes: bag
                    .get("class")
                    .map(|c| c.split_whitespace().map(str::to_string).collect())
                    .unwrap_or_default(),
                anchor_tooltip: anchor_tooltip.map(|t| decode_entities(&t)),
            }
        })
        .collect()
}

fn parse_row(row_html: &str) -> RowNode {
    let open = opening_tag(row_html, tr_open_re());
    let bag = attrs(open);
    RowNode {
        id: bag.get("id").cloned(),
        text: strip_tags(row_html),
        links: anchor_re()
            .find_iter(row_html)
            .map(|m| parse_link(m.as_str()))
            .collect(),
        images: parse_images(row_html),
    }
}

fn parse_table(table_html: &str) -> TableNode {
    let open = opening_tag(table_html, table_open_re());
    let bag = attrs(open);
    TableNode {
        id: bag.get("id").cloned(),
        caption: caption_re()
            .captures(table_html)
            .map(|c| strip_tags(&c[1])),
        rows: tr_re()
            .find_iter(table_html)
            .map(|m| parse_row(m.as_str()))
            .collect(),
    }
}

fn parse_select(select_html: &str) -> Option<SelectNode> {
    let open = opening_tag(select_html, select_open_re());
    let bag = attrs(open);
    let name = bag.get("name").cloned()?;

    let mut options = Vec::new();
    let mut selected = None;
    for captures in option_re().captures_iter(select_html) {
        let option_attrs = attrs(&captures[1]);
        let label = strip_tags(&captures[2]);
        let value = option_attrs
            .get("value")
            .cloned()
            .unwrap_or_else(|| label.clone());
        if has_bare_attr(&captures[1], "selected") {
            selected = Some(value.clone());
        }
        options.push(OptionNode { value, label });
    }

    Some(SelectNode {
        name,
        selected,
        options,
    })
}

fn parse_form(form_html: &str) -> FormNode {
    let open = opening_tag(form_html, form_open_re());
    let bag = attrs(open);

    let mut fields = BTreeMap::new();
    let mut radio_groups: BTreeMap<String, String> = BTreeMap::new();

    for m in input_re().find_iter(form_html) {
        let input = attrs(m.as_str());
        let Some(name) = input.get("name").cloned() else {
            continue;
        };
        let value = input.get("value").cloned().unwrap_or_default();
        let input_type = input
            .get("type")
            .map(|t| t.to_lowercase())
            .unwrap_or_default();

        match input_type.as_str() {
            "radio" | "checkbox" => {
                if input_type == "radio" {
                    radio_groups.entry(name.clone()).or_insert(value.clone());
                }
                if has_bare_attr(m.as_str(), "checked") {
                    fields.insert(name, value);
                }
            }
            _ => {
                fields.insert(name, value);
            }
        }
    }

    // Unmarked radio groups still submit a value: their first option
    for (name, first_value) in radio_groups {
        fields.entry(name).or_insert(first_value);
    }

    for captures in textarea_re().captures_iter(form_html) {
        let textarea_attrs = attrs(&captures[1]);
        if let Some(name) = textarea_attrs.get("name") {
            fields.insert(name.clone(), strip_tags(&captures[2]));
        }
    }

    FormNode {
        id: bag.get("id").cloned(),
        name: bag.get("name").cloned(),
        action: decode_entities(bag.get("action").cloned().unwrap_or_default().as_str()),
        method: bag
            .get("method")
            .map(|m| m.to_lowercase())
            .unwrap_or_else(|| "post".to_string()),
        fields,
        selects: select_re()
            .find_iter(form_html)
            .filter_map(|m| parse_select(m.as_str()))
            .collect(),
    }
}

/// Parse a fetched document into the structure the core consumes
pub fn parse_page(url: impl Into<String>, html: &str) -> PageNode {
    let scripts: Vec<String> = script_re()
        .captures_iter(html)
        .map(|c| c[1].to_string())
        .collect();

    let without_scripts = script_re().replace_all(html, " ");
    let visible = style_re().replace_all(&without_scripts, " ");

    PageNode {
        url: url.into(),
        raw: html.to_string(),
        text: strip_tags(&visible),
        forms: form_re()
            .find_iter(&visible)
            .map(|m| parse_form(m.as_str()))
            .collect(),
        tables: table_re()
            .find_iter(&visible)
            .map(|m| parse_table(m.as_str()))
            .collect(),
        links: anchor_re()
            .find_iter(&visible)
            .map(|m| parse_link(m.as_str()))
            .collect(),
        frames: frame_re()
            .find_iter(html)
            .map(|m| {
                let bag = attrs(m.as_str());
                FrameNode {
                    id: bag.get("id").cloned(),
                    src: decode_entities(bag.get("src").cloned().unwrap_or_default().as_str()),
                }
            })
            .collect(),
        scripts,
        alerts: alert_re()
            .captures_iter(&visible)
            .map(|c| strip_tags(&c[1]))
            .filter(|t| !t.is_empty())
            .collect(),
    }
}
