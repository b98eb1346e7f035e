//! Hierarchy snapshots via `uiautomator dump`, parsed from the emitted XML.
//!
//! The dump is a tree of `<node .../>` tags whose attribute set is stable
//! across platform releases; a scanning parser is enough and keeps the
//! dependency surface flat.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use regex::Regex;

use ad_domain::error::{codes, AgentError, Result};
use ad_shell::Shell;

use super::element::{Bounds, UiElement};
use super::HierarchyStrategy;

const DUMP_PATH: &str = "/data/local/tmp/autodroid_hierarchy.xml";

fn attr_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"([a-zA-Z_-]+)="([^"]*)""#).unwrap_or_else(|_| unreachable!()))
}

fn bounds_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\[(-?\d+),(-?\d+)\]\[(-?\d+),(-?\d+)\]").unwrap_or_else(|_| unreachable!())
    })
}

fn unescape(s: &str) -> String {
    if !s.contains('&') {
        return s.to_string();
    }
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

fn non_empty(s: Option<&String>) -> Option<String> {
    s.filter(|v| !v.is_empty()).map(|v| unescape(v))
}

fn flag(attrs: &HashMap<String, String>, name: &str) -> bool {
    attrs.get(name).map(String::as_str) == Some("true")
}

fn element_from_attrs(attrs: &HashMap<String, String>) -> UiElement {
    let bounds = attrs
        .get("bounds")
        .and_then(|b| bounds_regex().captures(b))
        .and_then(|c| {
            Some(Bounds {
                left: c.get(1)?.as_str().parse().ok()?,
                top: c.get(2)?.as_str().parse().ok()?,
                right: c.get(3)?.as_str().parse().ok()?,
                bottom: c.get(4)?.as_str().parse().ok()?,
            })
        })
        .unwrap_or_default();

    UiElement {
        resource_id: non_empty(attrs.get("resource-id")),
        text: non_empty(attrs.get("text")),
        class_name: non_empty(attrs.get("class")),
        description: non_empty(attrs.get("content-desc")),
        package: non_empty(attrs.get("package")),
        bounds,
        enabled: flag(attrs, "enabled"),
        clickable: flag(attrs, "clickable"),
        scrollable: flag(attrs, "scrollable"),
        focusable: flag(attrs, "focusable"),
        checked: flag(attrs, "checked"),
        selected: flag(attrs, "selected"),
        children: Vec::new(),
    }
}

fn attach(el: UiElement, stack: &mut [UiElement], roots: &mut Vec<UiElement>) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(el),
        None => roots.push(el),
    }
}

/// Parse a uiautomator dump into an element forest. Tolerates leading
/// chatter and non-node tags; fails only when no nodes are found.
pub fn parse_ui_xml(xml: &str) -> Result<Vec<UiElement>> {
    let mut roots: Vec<UiElement> = Vec::new();
    let mut stack: Vec<UiElement> = Vec::new();
    let mut rest = xml;

    while let Some(start) = rest.find('<') {
        rest = &rest[start..];
        let Some(end) = rest.find('>') else { break };
        let tag = &rest[..=end];
        rest = &rest[end + 1..];

        if tag.starts_with("</node") {
            if let Some(done) = stack.pop() {
                attach(done, &mut stack, &mut roots);
            }
        } else if tag.starts_with("<node") {
            let mut attrs = HashMap::new();
            for cap in attr_regex().captures_iter(tag) {
                attrs.insert(cap[1].to_string(), cap[2].to_string());
            }
            let el = element_from_attrs(&attrs);
            if tag.ends_with("/>") {
                attach(el, &mut stack, &mut roots);
            } else {
                stack.push(el);
            }
        }
        // Any other tag (<?xml, <hierarchy>, </hierarchy>) is skipped.
    }

    // Tolerate a truncated dump: close whatever is still open.
    while let Some(done) = stack.pop() {
        attach(done, &mut stack, &mut roots);
    }

    if roots.is_empty() {
        return Err(AgentError::new(
            codes::HIERARCHY_UNAVAILABLE,
            "dump contained no nodes",
        ));
    }
    Ok(roots)
}

pub struct ShellHierarchy {
    shell: Arc<dyn Shell>,
}

impl ShellHierarchy {
    pub fn new(shell: Arc<dyn Shell>) -> Self {
        Self { shell }
    }
}

#[async_trait::async_trait]
impl HierarchyStrategy for ShellHierarchy {
    fn name(&self) -> &str {
        "shell"
    }

    fn requires_privilege(&self) -> bool {
        false
    }

    async fn dump(&self) -> Result<Vec<UiElement>> {
        let out = self
            .shell
            .run(
                &format!("uiautomator dump {DUMP_PATH} >/dev/null 2>&1 && cat {DUMP_PATH}"),
                false,
                Duration::from_secs(20),
            )
            .await?;
        if !out.success() {
            return Err(AgentError::new(
                codes::HIERARCHY_UNAVAILABLE,
                format!("uiautomator dump failed: {}", out.stderr.trim()),
            ));
        }
        parse_ui_xml(&out.stdout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<?xml version='1.0' encoding='UTF-8' standalone='yes' ?>
<hierarchy rotation="0">
  <node index="0" text="" resource-id="" class="android.widget.FrameLayout" package="com.example.app" content-desc="" checkable="false" checked="false" clickable="false" enabled="true" focusable="false" scrollable="false" selected="false" bounds="[0,0][1080,1920]">
    <node index="0" text="Tom &amp; Jerry" resource-id="com.example.app:id/title" class="android.widget.TextView" package="com.example.app" content-desc="" checked="false" clickable="false" enabled="true" focusable="false" scrollable="false" selected="false" bounds="[0,0][1080,150]" />
    <node index="1" text="OK" resource-id="com.example.app:id/btn_ok" class="android.widget.Button" package="com.example.app" content-desc="confirm" checked="false" clickable="true" enabled="true" focusable="true" scrollable="false" selected="false" bounds="[400,800][680,950]" />
  </node>
</hierarchy>
"#;

    #[test]
    fn parses_nesting_attributes_and_bounds() {
        let roots = parse_ui_xml(SAMPLE).unwrap();
        assert_eq!(roots.len(), 1);
        let root = &roots[0];
        assert_eq!(root.class_name.as_deref(), Some("android.widget.FrameLayout"));
        assert_eq!(root.children.len(), 2);

        let title = &root.children[0];
        assert_eq!(title.text.as_deref(), Some("Tom & Jerry"));
        assert_eq!(title.resource_id.as_deref(), Some("com.example.app:id/title"));

        let btn = &root.children[1];
        assert!(btn.clickable);
        assert_eq!(btn.description.as_deref(), Some("confirm"));
        assert_eq!(btn.bounds.center(), (540, 875));
    }

    #[test]
    fn empty_attributes_become_none() {
        let roots = parse_ui_xml(SAMPLE).unwrap();
        assert!(roots[0].text.is_none());
        assert!(roots[0].resource_id.is_none());
    }

    #[test]
    fn tolerates_leading_chatter_and_truncation() {
        let with_chatter = format!("UI hierchary dumped to: {DUMP_PATH}\n{SAMPLE}");
        assert!(parse_ui_xml(&with_chatter).is_ok());

        let truncated = &SAMPLE[..SAMPLE.find("btn_ok").unwrap()];
        let roots = parse_ui_xml(truncated).unwrap();
        assert_eq!(roots.len(), 1);
        assert_eq!(roots[0].children.len(), 1);
    }

    #[test]
    fn no_nodes_is_hierarchy_unavailable() {
        let err = parse_ui_xml("ERROR: could not get idle state").unwrap_err();
        assert_eq!(err.code, codes::HIERARCHY_UNAVAILABLE);
    }
}
