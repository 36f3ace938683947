mod labeller;

use std::ops::Index;
use std::path::Path;

use indexmap::IndexMap;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::cuts::{Cuts, RawCut};
use crate::error::{Error, Result};

pub use labeller::{Labeller, LABELS_COLUMN};

const EMBEDDED_CATALOG: &str = include_str!("flavours.yaml");

/// Categories left out of [`LabelContainer::flavours`].
const EXTENDED_CATEGORIES: &[&str] = &["single-btag-extended"];

/// Names of the labels in the embedded catalog, for keyed access such as
/// `flavours[names::BJETS]`.
pub mod names {
    pub const BJETS: &str = "bjets";
    pub const CJETS: &str = "cjets";
    pub const UJETS: &str = "ujets";
    pub const TAUJETS: &str = "taujets";
    pub const BBJETS: &str = "bbjets";
    pub const BXJETS: &str = "bxjets";
    pub const CCJETS: &str = "ccjets";
    pub const CXJETS: &str = "cxjets";
    pub const LXJETS: &str = "lxjets";
    pub const GHOSTBJETS: &str = "ghostbjets";
    pub const GHOSTCJETS: &str = "ghostcjets";
    pub const GHOSTUJETS: &str = "ghostujets";
    pub const HBB: &str = "hbb";
    pub const HCC: &str = "hcc";
    pub const TOP: &str = "top";
    pub const QCD: &str = "qcd";
}

/// Labels never treated as a tagging signal.
const NON_SIGNAL: &[&str] = &[names::UJETS, names::QCD];

// ---------------------------------------------------------------------------
// Label – one flavour definition
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Label {
    pub name: String,
    /// Display label, may contain LaTeX.
    pub label: String,
    pub cuts: Cuts,
    pub colour: String,
    pub category: String,
    /// Explicit probability column name, see [`Label::px`].
    #[serde(rename = "_px", alias = "px", default, skip_serializing_if = "Option::is_none")]
    pub px_column: Option<String>,
}

fn remove_suffix<'a>(s: &'a str, suffix: &str) -> &'a str {
    s.strip_suffix(suffix).unwrap_or(s)
}

impl Label {
    pub fn new<I, R>(
        name: &str,
        label: &str,
        cuts: I,
        colour: &str,
        category: &str,
    ) -> Result<Label>
    where
        I: IntoIterator<Item = R>,
        R: Into<RawCut>,
    {
        Ok(Label {
            name: name.to_string(),
            label: label.to_string(),
            cuts: Cuts::from_list(cuts)?,
            colour: colour.to_string(),
            category: category.to_string(),
            px_column: None,
        })
    }

    pub fn with_px(mut self, px: impl Into<String>) -> Self {
        self.px_column = Some(px.into());
        self
    }

    /// Tagger probability column, `p` + name without the `jets` suffix
    /// unless set explicitly.
    pub fn px(&self) -> String {
        match &self.px_column {
            Some(px) => px.clone(),
            None => format!("p{}", remove_suffix(&self.name, "jets")),
        }
    }

    pub fn eff_str(&self) -> String {
        format!("{} efficiency", self.label.replace("jets", "jet"))
    }

    pub fn rej_str(&self) -> String {
        format!("{} rejection", self.label.replace("jets", "jet"))
    }

    pub fn frac_str(&self) -> String {
        format!("f{}", remove_suffix(&self.name, "jets"))
    }
}

impl std::fmt::Display for Label {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name)
    }
}

// ---------------------------------------------------------------------------
// LabelContainer – the catalog
// ---------------------------------------------------------------------------

/// Ordered catalog of labels keyed by name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LabelContainer {
    labels: IndexMap<String, Label>,
}

impl LabelContainer {
    /// The embedded catalog without the extended categories.
    pub fn flavours() -> Result<Self> {
        Self::embedded(EXTENDED_CATEGORIES)
    }

    pub fn embedded(exclude_categories: &[&str]) -> Result<Self> {
        Self::from_yaml_str(EMBEDDED_CATALOG, exclude_categories)
    }

    pub fn from_yaml(path: &Path, exclude_categories: &[&str]) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        debug!("loading label catalog from {}", path.display());
        Self::from_yaml_str(&text, exclude_categories)
    }

    /// Parse a YAML list of label records. Duplicate names or duplicate cut
    /// definitions are rejected before categories are excluded.
    pub fn from_yaml_str(text: &str, exclude_categories: &[&str]) -> Result<Self> {
        let config: Vec<Label> = serde_yaml::from_str(text)?;
        check_unique(&config)?;
        Ok(Self::collect(config.into_iter().filter(|l| {
            !exclude_categories.contains(&l.category.as_str())
        })))
    }

    /// Build from labels given in order, with the same uniqueness rules as
    /// [`LabelContainer::from_yaml_str`].
    pub fn from_list(labels: impl IntoIterator<Item = Label>) -> Result<Self> {
        let labels: Vec<Label> = labels.into_iter().collect();
        check_unique(&labels)?;
        Ok(Self::collect(labels))
    }

    /// Subsets of a validated container need no further checks.
    fn collect(labels: impl IntoIterator<Item = Label>) -> Self {
        LabelContainer {
            labels: labels.into_iter().map(|l| (l.name.clone(), l)).collect(),
        }
    }

    pub fn get(&self, name: &str) -> Result<&Label> {
        self.labels
            .get(name)
            .ok_or_else(|| Error::UnknownLabel(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.labels.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Label> {
        self.labels.values()
    }

    pub fn names(&self) -> Vec<&str> {
        self.labels.keys().map(String::as_str).collect()
    }

    /// Categories in first-seen order.
    pub fn categories(&self) -> Vec<&str> {
        let mut seen: Vec<&str> = Vec::new();
        for label in self.iter() {
            if !seen.contains(&label.category.as_str()) {
                seen.push(&label.category);
            }
        }
        seen
    }

    pub fn by_category(&self, category: &str) -> Result<LabelContainer> {
        let found = Self::collect(self.iter().filter(|l| l.category == category).cloned());
        if found.is_empty() {
            return Err(Error::UnknownCategory(category.to_string()));
        }
        Ok(found)
    }

    /// Reverse lookup by cut set, order-insensitive.
    pub fn from_cuts(&self, cuts: &Cuts) -> Result<&Label> {
        self.iter()
            .find(|l| &l.cuts == cuts)
            .ok_or_else(|| Error::UnknownLabel(format!("with cuts [{cuts}]")))
    }

    /// Other labels of the signal's category. With `only_signals == false`
    /// the light-jet and QCD classes are dropped as well.
    pub fn backgrounds(&self, signal: &Label, only_signals: bool) -> Result<LabelContainer> {
        let found = Self::collect(
            self.iter()
                .filter(|l| l.category == signal.category && l.name != signal.name)
                .filter(|l| only_signals || !NON_SIGNAL.contains(&l.name.as_str()))
                .cloned(),
        );
        if found.is_empty() {
            return Err(Error::UnknownLabel(format!(
                "no background for signal '{}'",
                signal.name
            )));
        }
        Ok(found)
    }
}

impl Index<&str> for LabelContainer {
    type Output = Label;

    /// Panics if the label is absent, like map indexing. Use
    /// [`LabelContainer::get`] for a fallible lookup.
    fn index(&self, name: &str) -> &Label {
        &self.labels[name]
    }
}

impl<'a> IntoIterator for &'a LabelContainer {
    type Item = &'a Label;
    type IntoIter = indexmap::map::Values<'a, String, Label>;

    fn into_iter(self) -> Self::IntoIter {
        self.labels.values()
    }
}

fn check_unique(labels: &[Label]) -> Result<()> {
    for (i, label) in labels.iter().enumerate() {
        for other in &labels[..i] {
            if other.name == label.name {
                return Err(Error::DuplicateLabel(format!("name '{}'", label.name)));
            }
            if other.cuts == label.cuts {
                return Err(Error::DuplicateLabel(format!(
                    "'{}' and '{}' share cuts [{}]",
                    other.name, label.name, label.cuts
                )));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_attributes() {
        let label = Label::new("test", "test_label", ["x == 1"], "red", "cat").unwrap();
        assert_eq!(label.px(), "ptest");
        assert_eq!(label.eff_str(), "test_label efficiency");
        assert_eq!(label.rej_str(), "test_label rejection");
        assert_eq!(label.frac_str(), "ftest");
        assert_eq!(label.to_string(), "test");
        assert_eq!(label.with_px("ptestdefined").px(), "ptestdefined");

        let b = Label::new("bjets", "$b$-jets", ["x == 5"], "blue", "cat").unwrap();
        assert_eq!(b.px(), "pb");
        assert_eq!(b.frac_str(), "fb");
        assert_eq!(b.eff_str(), "$b$-jet efficiency");
    }

    #[test]
    fn embedded_catalog() {
        let flavours = LabelContainer::flavours().unwrap();
        assert!(flavours.contains(names::BJETS));
        assert!(!flavours.contains(names::BBJETS));
        assert!(!flavours.contains("undefined"));
        assert_eq!(
            flavours.categories(),
            vec!["single-btag", "single-btag-ghost", "xbb"]
        );
        assert_eq!(flavours[names::HBB].px(), "phbb");
        assert_eq!(flavours.get("bjets").unwrap(), &flavours[names::BJETS]);
        assert!(matches!(flavours.get("nope"), Err(Error::UnknownLabel(_))));

        let all = LabelContainer::embedded(&[]).unwrap();
        assert!(all.len() > flavours.len());
        assert_eq!(LabelContainer::from_list(all.iter().cloned()).unwrap(), all);
    }

    #[test]
    fn by_category() {
        let flavours = LabelContainer::flavours().unwrap();
        let xbb = flavours.by_category("xbb").unwrap();
        assert_eq!(xbb.names(), vec!["hbb", "hcc", "top", "qcd"]);
        assert!(matches!(
            flavours.by_category("nope"),
            Err(Error::UnknownCategory(_))
        ));
    }

    #[test]
    fn from_cuts() {
        let flavours = LabelContainer::flavours().unwrap();
        let cuts = Cuts::from_list(["HadronConeExclTruthLabelID == 5"]).unwrap();
        assert_eq!(flavours.from_cuts(&cuts).unwrap().name, "bjets");
        let reordered =
            Cuts::from_list(["GhostCHadronsFinalCount > 0", "GhostBHadronsFinalCount == 0"])
                .unwrap();
        assert_eq!(flavours.from_cuts(&reordered).unwrap().name, "ghostcjets");
        let missing = Cuts::from_list(["dummy == -1"]).unwrap();
        assert!(matches!(
            flavours.from_cuts(&missing),
            Err(Error::UnknownLabel(_))
        ));
    }

    #[test]
    fn backgrounds() {
        let flavours = LabelContainer::flavours().unwrap();
        let bkg = flavours.backgrounds(&flavours[names::BJETS], true).unwrap();
        assert_eq!(bkg.names(), vec!["cjets", "ujets", "taujets"]);
        let bkg = flavours.backgrounds(&flavours[names::BJETS], false).unwrap();
        assert_eq!(bkg.names(), vec!["cjets", "taujets"]);
        let lonely = LabelContainer::from_list([flavours[names::BJETS].clone()]).unwrap();
        assert!(lonely.backgrounds(&lonely[names::BJETS], true).is_err());
    }

    #[test]
    fn duplicates_rejected() {
        let yaml = r#"
- {name: a, label: A, cuts: ["x == 1"], colour: red, category: c}
- {name: a, label: B, cuts: ["x == 2"], colour: red, category: c}
"#;
        assert!(matches!(
            LabelContainer::from_yaml_str(yaml, &[]),
            Err(Error::DuplicateLabel(_))
        ));
        let yaml = r#"
- {name: a, label: A, cuts: ["x == 1", "y > 0"], colour: red, category: c}
- {name: b, label: B, cuts: ["y > 0", "x == 1"], colour: red, category: c}
"#;
        assert!(matches!(
            LabelContainer::from_yaml_str(yaml, &[]),
            Err(Error::DuplicateLabel(_))
        ));
    }

    #[test]
    fn list_duplicates_rejected() {
        let flavours = LabelContainer::flavours().unwrap();
        let bjets = flavours[names::BJETS].clone();
        assert!(matches!(
            LabelContainer::from_list([bjets.clone(), bjets.clone()]),
            Err(Error::DuplicateLabel(_))
        ));
        let mut renamed = bjets.clone();
        renamed.name = "bjets_again".to_string();
        assert!(matches!(
            LabelContainer::from_list([bjets, renamed]),
            Err(Error::DuplicateLabel(_))
        ));
    }
}
