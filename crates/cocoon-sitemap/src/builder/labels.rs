//! Which views a statement can branch into.

use std::collections::HashMap;

use super::config::{ViewConfig, ViewPosition};

/// Pseudo-label every generator and aggregate carries.
pub const FIRST: &str = "first";
/// Pseudo-label every serializer carries.
pub const LAST: &str = "last";

/// Label name to the views declared `from_label` (or `from_position`) it.
#[derive(Debug, Default)]
pub struct LabelMap {
    views: HashMap<String, Vec<String>>,
}

impl LabelMap {
    pub fn new(views: &[ViewConfig]) -> Self {
        let mut map = Self::default();
        for view in views {
            if let Some(label) = &view.from_label {
                map.add(label, &view.name);
            }
            match view.from_position {
                ViewPosition::First => map.add(FIRST, &view.name),
                ViewPosition::Last => map.add(LAST, &view.name),
                ViewPosition::None => {}
            }
        }
        map
    }

    fn add(&mut self, label: &str, view: &str) {
        let views = self.views.entry(label.to_string()).or_default();
        if !views.iter().any(|v| v == view) {
            views.push(view.to_string());
        }
    }

    /// Views reachable from any of `labels`, each once, in declaration order
    /// of the labels.
    pub fn views_for<'a>(&self, labels: impl IntoIterator<Item = &'a str>) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        for label in labels {
            for view in self.views.get(label).into_iter().flatten() {
                if !out.contains(&view.as_str()) {
                    out.push(view);
                }
            }
        }
        out
    }

    pub fn is_empty(&self) -> bool {
        self.views.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn view(name: &str, label: Option<&str>, position: ViewPosition) -> ViewConfig {
        ViewConfig {
            name: name.into(),
            from_label: label.map(str::to_string),
            from_position: position,
            statements: Vec::new(),
        }
    }

    #[test]
    fn labels_and_positions() {
        let map = LabelMap::new(&[
            view("content", Some("content"), ViewPosition::None),
            view("pretty", None, ViewPosition::Last),
            view("raw", Some("content"), ViewPosition::First),
        ]);
        assert_eq!(map.views_for(["content"]), vec!["content", "raw"]);
        assert_eq!(map.views_for([FIRST]), vec!["raw"]);
        assert_eq!(map.views_for([LAST]), vec!["pretty"]);
        assert_eq!(map.views_for(["content", FIRST]), vec!["content", "raw"]);
        assert!(map.views_for(["other"]).is_empty());
    }

    #[test]
    fn no_views_no_labels() {
        assert!(LabelMap::new(&[]).is_empty());
    }
}
