//! The UI element model produced by hierarchy strategies.

use serde::{Deserialize, Serialize};

/// Screen-space rectangle of an element.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bounds {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl Bounds {
    pub fn center(&self) -> (i32, i32) {
        ((self.left + self.right) / 2, (self.top + self.bottom) / 2)
    }

    pub fn width(&self) -> i32 {
        self.right - self.left
    }

    pub fn height(&self) -> i32 {
        self.bottom - self.top
    }
}

/// One node of the UI hierarchy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UiElement {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub resource_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub class_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub package: Option<String>,
    pub bounds: Bounds,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub clickable: bool,
    #[serde(default)]
    pub scrollable: bool,
    #[serde(default)]
    pub focusable: bool,
    #[serde(default)]
    pub checked: bool,
    #[serde(default)]
    pub selected: bool,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub children: Vec<UiElement>,
}

impl UiElement {
    /// Pre-order flattening of this subtree, self included.
    pub fn flatten(&self) -> Vec<&UiElement> {
        let mut out = Vec::new();
        fn walk<'a>(el: &'a UiElement, out: &mut Vec<&'a UiElement>) {
            out.push(el);
            for child in &el.children {
                walk(child, out);
            }
        }
        walk(self, &mut out);
        out
    }

    /// Total node count of a forest.
    pub fn count_forest(roots: &[UiElement]) -> usize {
        roots.iter().map(|r| r.flatten().len()).sum()
    }

    /// A copy with children stripped, for flat match listings.
    pub fn without_children(&self) -> UiElement {
        UiElement {
            children: Vec::new(),
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounds_center_and_size() {
        let b = Bounds {
            left: 10,
            top: 20,
            right: 110,
            bottom: 220,
        };
        assert_eq!(b.center(), (60, 120));
        assert_eq!(b.width(), 100);
        assert_eq!(b.height(), 200);
    }

    #[test]
    fn flatten_is_pre_order() {
        let tree = UiElement {
            text: Some("root".into()),
            children: vec![
                UiElement {
                    text: Some("a".into()),
                    children: vec![UiElement {
                        text: Some("a1".into()),
                        ..Default::default()
                    }],
                    ..Default::default()
                },
                UiElement {
                    text: Some("b".into()),
                    ..Default::default()
                },
            ],
            ..Default::default()
        };
        let order: Vec<&str> = tree
            .flatten()
            .iter()
            .map(|e| e.text.as_deref().unwrap())
            .collect();
        assert_eq!(order, vec!["root", "a", "a1", "b"]);
        assert_eq!(UiElement::count_forest(std::slice::from_ref(&tree)), 4);
    }
}
