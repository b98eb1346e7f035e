//! Element selectors: AND-combined fields, wildcard when unspecified.
//!
//! Matching walks the hierarchy in pre-order; ties go to the first
//! encounter. Nested `child`/`parent` selectors restrict by tree position.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::element::UiElement;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Selector {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub resource_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub text_contains: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub text_matches: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub class_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub description_contains: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub package: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub clickable: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub scrollable: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub focusable: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub checked: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub selected: Option<bool>,
    /// The element must have a direct child matching this selector.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub child: Option<Box<Selector>>,
    /// The element's direct parent must match this selector.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub parent: Option<Box<Selector>>,
}

impl Selector {
    pub fn parse(value: &Value) -> Result<Self, String> {
        serde_json::from_value(value.clone()).map_err(|e| format!("invalid selector: {e}"))
    }

    /// True when every field is a wildcard: matches every element.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    fn text_field_matches(actual: Option<&str>, expected: &Option<String>) -> bool {
        match expected {
            None => true,
            Some(want) => actual == Some(want.as_str()),
        }
    }

    /// Field-only check, ignoring tree-position constraints.
    fn fields_match(&self, el: &UiElement) -> bool {
        if !Self::text_field_matches(el.resource_id.as_deref(), &self.resource_id) {
            return false;
        }
        if !Self::text_field_matches(el.text.as_deref(), &self.text) {
            return false;
        }
        if let Some(needle) = &self.text_contains {
            if !el.text.as_deref().is_some_and(|t| t.contains(needle.as_str())) {
                return false;
            }
        }
        if let Some(pattern) = &self.text_matches {
            let matched = regex::Regex::new(pattern)
                .map(|re| el.text.as_deref().is_some_and(|t| re.is_match(t)))
                .unwrap_or_else(|e| {
                    tracing::warn!(pattern = %pattern, error = %e, "invalid textMatches pattern");
                    false
                });
            if !matched {
                return false;
            }
        }
        if !Self::text_field_matches(el.class_name.as_deref(), &self.class_name) {
            return false;
        }
        if !Self::text_field_matches(el.description.as_deref(), &self.description) {
            return false;
        }
        if let Some(needle) = &self.description_contains {
            if !el
                .description
                .as_deref()
                .is_some_and(|d| d.contains(needle.as_str()))
            {
                return false;
            }
        }
        if !Self::text_field_matches(el.package.as_deref(), &self.package) {
            return false;
        }
        for (want, have) in [
            (self.enabled, el.enabled),
            (self.clickable, el.clickable),
            (self.scrollable, el.scrollable),
            (self.focusable, el.focusable),
            (self.checked, el.checked),
            (self.selected, el.selected),
        ] {
            if want.is_some_and(|w| w != have) {
                return false;
            }
        }
        true
    }

    /// Full check including `child` and `parent` constraints.
    pub fn matches(&self, el: &UiElement, parent: Option<&UiElement>) -> bool {
        if !self.fields_match(el) {
            return false;
        }
        if let Some(child_sel) = &self.child {
            if !el.children.iter().any(|c| child_sel.matches(c, Some(el))) {
                return false;
            }
        }
        if let Some(parent_sel) = &self.parent {
            match parent {
                Some(p) => {
                    if !parent_sel.fields_match(p) {
                        return false;
                    }
                }
                None => return false,
            }
        }
        true
    }

    /// All matches in the forest, pre-order.
    pub fn find_all<'a>(&self, roots: &'a [UiElement]) -> Vec<&'a UiElement> {
        let mut out = Vec::new();
        fn walk<'a>(
            sel: &Selector,
            el: &'a UiElement,
            parent: Option<&'a UiElement>,
            out: &mut Vec<&'a UiElement>,
        ) {
            if sel.matches(el, parent) {
                out.push(el);
            }
            for child in &el.children {
                walk(sel, child, Some(el), out);
            }
        }
        for root in roots {
            walk(self, root, None, &mut out);
        }
        out
    }

    /// First match in pre-order, if any.
    pub fn find_first<'a>(&self, roots: &'a [UiElement]) -> Option<&'a UiElement> {
        // Early-exit walk rather than find_all().first() to avoid scanning
        // a large tree after the first hit.
        fn walk<'a>(
            sel: &Selector,
            el: &'a UiElement,
            parent: Option<&'a UiElement>,
        ) -> Option<&'a UiElement> {
            if sel.matches(el, parent) {
                return Some(el);
            }
            for child in &el.children {
                if let Some(hit) = walk(sel, child, Some(el)) {
                    return Some(hit);
                }
            }
            None
        }
        roots.iter().find_map(|root| walk(self, root, None))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::element::Bounds;
    use serde_json::json;

    fn tree() -> Vec<UiElement> {
        vec![UiElement {
            class_name: Some("android.widget.FrameLayout".into()),
            package: Some("com.example.app".into()),
            enabled: true,
            children: vec![
                UiElement {
                    resource_id: Some("com.example.app:id/btn_save".into()),
                    text: Some("Save".into()),
                    class_name: Some("android.widget.Button".into()),
                    package: Some("com.example.app".into()),
                    bounds: Bounds {
                        left: 0,
                        top: 100,
                        right: 200,
                        bottom: 200,
                    },
                    enabled: true,
                    clickable: true,
                    ..Default::default()
                },
                UiElement {
                    class_name: Some("android.widget.LinearLayout".into()),
                    package: Some("com.example.app".into()),
                    enabled: true,
                    children: vec![UiElement {
                        text: Some("Save as draft".into()),
                        class_name: Some("android.widget.TextView".into()),
                        package: Some("com.example.app".into()),
                        enabled: true,
                        ..Default::default()
                    }],
                    ..Default::default()
                },
            ],
            ..Default::default()
        }]
    }

    #[test]
    fn empty_selector_matches_everything() {
        let roots = tree();
        let sel = Selector::default();
        assert!(sel.is_empty());
        assert_eq!(sel.find_all(&roots).len(), UiElement::count_forest(&roots));
    }

    #[test]
    fn exact_text_vs_contains_vs_regex() {
        let roots = tree();
        let exact = Selector {
            text: Some("Save".into()),
            ..Default::default()
        };
        assert_eq!(exact.find_all(&roots).len(), 1);

        let contains = Selector {
            text_contains: Some("Save".into()),
            ..Default::default()
        };
        assert_eq!(contains.find_all(&roots).len(), 2);

        let matches = Selector {
            text_matches: Some("^Save( as draft)?$".into()),
            ..Default::default()
        };
        assert_eq!(matches.find_all(&roots).len(), 2);

        let bad_regex = Selector {
            text_matches: Some("([".into()),
            ..Default::default()
        };
        assert!(bad_regex.find_all(&roots).is_empty());
    }

    #[test]
    fn fields_and_combine() {
        let roots = tree();
        let sel = Selector {
            text_contains: Some("Save".into()),
            clickable: Some(true),
            ..Default::default()
        };
        let hits = sel.find_all(&roots);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].resource_id.as_deref(), Some("com.example.app:id/btn_save"));
    }

    #[test]
    fn first_match_is_pre_order() {
        let roots = tree();
        let sel = Selector {
            text_contains: Some("Save".into()),
            ..Default::default()
        };
        let first = sel.find_first(&roots).unwrap();
        assert_eq!(first.text.as_deref(), Some("Save"));
    }

    #[test]
    fn child_constraint_restricts_to_containers() {
        let roots = tree();
        let sel = Selector {
            class_name: Some("android.widget.LinearLayout".into()),
            child: Some(Box::new(Selector {
                text: Some("Save as draft".into()),
                ..Default::default()
            })),
            ..Default::default()
        };
        assert_eq!(sel.find_all(&roots).len(), 1);

        let miss = Selector {
            class_name: Some("android.widget.LinearLayout".into()),
            child: Some(Box::new(Selector {
                text: Some("Discard".into()),
                ..Default::default()
            })),
            ..Default::default()
        };
        assert!(miss.find_all(&roots).is_empty());
    }

    #[test]
    fn parent_constraint_requires_matching_parent() {
        let roots = tree();
        let sel = Selector {
            text: Some("Save as draft".into()),
            parent: Some(Box::new(Selector {
                class_name: Some("android.widget.LinearLayout".into()),
                ..Default::default()
            })),
            ..Default::default()
        };
        assert_eq!(sel.find_all(&roots).len(), 1);

        // Root elements have no parent, so any parent constraint excludes them.
        let root_sel = Selector {
            class_name: Some("android.widget.FrameLayout".into()),
            parent: Some(Box::new(Selector::default())),
            ..Default::default()
        };
        assert!(root_sel.find_all(&roots).is_empty());
    }

    #[test]
    fn parse_accepts_wire_shape() {
        let sel = Selector::parse(&json!({
            "resourceId": "btn_x",
            "textContains": "OK",
            "clickable": true,
            "child": {"className": "android.widget.ImageView"}
        }))
        .unwrap();
        assert_eq!(sel.resource_id.as_deref(), Some("btn_x"));
        assert_eq!(sel.text_contains.as_deref(), Some("OK"));
        assert_eq!(sel.clickable, Some(true));
        assert!(sel.child.is_some());
    }
}
