//! Cascading selection over a [`LocationHierarchy`] plus the numeric inputs.
//!
//! Dependent lists are re-derived explicitly on every ancestor change:
//! `select_state` cascades to the mandal list, which cascades to the RBK
//! list. Unknown keys degrade to empty lists and empty choices.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::LocationHierarchy;
use crate::error::{InsightError, InsightResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Season {
    #[default]
    Kharif,
    Rabi,
    Summer,
}

impl Season {
    pub const ALL: [Season; 3] = [Season::Kharif, Season::Rabi, Season::Summer];

    pub fn as_str(&self) -> &'static str {
        match self {
            Season::Kharif => "Kharif",
            Season::Rabi => "Rabi",
            Season::Summer => "Summer",
        }
    }
}

impl fmt::Display for Season {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Season {
    type Err = InsightError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Season::ALL
            .into_iter()
            .find(|season| season.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| InsightError::Config(format!("unknown season '{}'", s)))
    }
}

/// The values sent to the scoring endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Selection {
    pub state: String,
    pub mandal: String,
    pub rbk: String,
    pub season: Season,
    #[serde(rename = "qty")]
    pub quantity: f64,
    #[serde(rename = "farmers")]
    pub farmer_count: u32,
}

impl Default for Selection {
    fn default() -> Self {
        Self {
            state: String::new(),
            mandal: String::new(),
            rbk: String::new(),
            season: Season::Kharif,
            quantity: 10.0,
            farmer_count: 50,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SelectionState {
    hierarchy: LocationHierarchy,
    states: Vec<String>,
    mandals: Vec<String>,
    rbks: Vec<String>,
    selection: Selection,
}

impl SelectionState {
    /// Start from a loaded hierarchy with the first state selected.
    pub fn new(hierarchy: LocationHierarchy) -> Self {
        let mut state = Self {
            states: hierarchy.states(),
            hierarchy,
            ..Self::default()
        };
        if let Some(first) = state.states.first().cloned() {
            state.select_state(&first);
        }
        state
    }

    pub fn select_state(&mut self, state: &str) {
        self.selection.state = state.to_string();
        self.mandals = self.hierarchy.mandals(state);
        let first_mandal = self.mandals.first().cloned().unwrap_or_default();
        self.select_mandal(&first_mandal);
    }

    pub fn select_mandal(&mut self, mandal: &str) {
        self.selection.mandal = mandal.to_string();
        self.rbks = self.hierarchy.rbks(&self.selection.state, mandal);
        self.selection.rbk = self.rbks.first().cloned().unwrap_or_default();
    }

    pub fn select_rbk(&mut self, rbk: &str) {
        self.selection.rbk = rbk.to_string();
    }

    pub fn set_season(&mut self, season: Season) {
        self.selection.season = season;
    }

    pub fn set_quantity(&mut self, quantity: f64) -> InsightResult<()> {
        if !quantity.is_finite() || quantity < 0.0 {
            return Err(InsightError::Config(format!(
                "quantity must be a non-negative number, got {}",
                quantity
            )));
        }
        self.selection.quantity = quantity;
        Ok(())
    }

    pub fn set_farmers(&mut self, farmers: u32) {
        self.selection.farmer_count = farmers;
    }

    pub fn states(&self) -> &[String] {
        &self.states
    }

    pub fn mandals(&self) -> &[String] {
        &self.mandals
    }

    pub fn rbks(&self) -> &[String] {
        &self.rbks
    }

    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    /// The "Copy JSON" payload: `{state, mandal, rbk, season, qty, farmers}`.
    pub fn selection_json(&self) -> serde_json::Value {
        serde_json::json!({
            "state": self.selection.state,
            "mandal": self.selection.mandal,
            "rbk": self.selection.rbk,
            "season": self.selection.season,
            "qty": self.selection.quantity,
            "farmers": self.selection.farmer_count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hierarchy() -> LocationHierarchy {
        LocationHierarchy::from_json(
            r#"{
                "Guntur": { "Tenali": ["T1", "T2"], "Bapatla": ["B1"] },
                "Krishna": { "Gudivada": ["G1", "G2"], "Empty": [] },
                "Hollow": {}
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn test_new_defaults_to_first_of_each_level() {
        let s = SelectionState::new(hierarchy());
        assert_eq!(s.selection().state, "Guntur");
        assert_eq!(s.selection().mandal, "Tenali");
        assert_eq!(s.selection().rbk, "T1");
        assert_eq!(s.rbks(), ["T1", "T2"]);
    }

    #[test]
    fn test_select_state_cascades() {
        let h = hierarchy();
        let mut s = SelectionState::new(h.clone());
        for state in h.states() {
            s.select_state(&state);
            assert_eq!(s.mandals(), h.mandals(&state).as_slice());
            let first_mandal = h.mandals(&state).first().cloned().unwrap_or_default();
            let expected_rbk = h.rbks(&state, &first_mandal).first().cloned().unwrap_or_default();
            assert_eq!(s.selection().rbk, expected_rbk);
            // never points outside the new subtree
            if !s.selection().mandal.is_empty() {
                assert!(h.mandals(&state).contains(&s.selection().mandal));
            }
            if !s.selection().rbk.is_empty() {
                assert!(h.rbks(&state, &s.selection().mandal).contains(&s.selection().rbk));
            }
        }
    }

    #[test]
    fn test_state_without_mandals_clears_children() {
        let mut s = SelectionState::new(hierarchy());
        s.select_state("Hollow");
        assert!(s.mandals().is_empty());
        assert_eq!(s.selection().mandal, "");
        assert_eq!(s.selection().rbk, "");
    }

    #[test]
    fn test_stale_paths_never_fail() {
        let mut s = SelectionState::new(hierarchy());
        s.select_state("Atlantis");
        assert!(s.mandals().is_empty());
        assert!(s.rbks().is_empty());
        s.select_mandal("Tenali");
        assert!(s.rbks().is_empty());
        assert_eq!(s.selection().rbk, "");
    }

    #[test]
    fn test_select_mandal_and_rbk() {
        let mut s = SelectionState::new(hierarchy());
        s.select_state("Krishna");
        s.select_mandal("Empty");
        assert_eq!(s.selection().rbk, "");
        s.select_mandal("Gudivada");
        s.select_rbk("G2");
        assert_eq!(s.selection().rbk, "G2");
        assert_eq!(s.selection().mandal, "Gudivada");
    }

    #[test]
    fn test_empty_hierarchy_leaves_lists_empty() {
        let s = SelectionState::new(LocationHierarchy::default());
        assert!(s.states().is_empty());
        assert_eq!(s.selection().state, "");
    }

    #[test]
    fn test_inputs_and_json() {
        let mut s = SelectionState::new(hierarchy());
        s.set_season("rabi".parse().unwrap());
        s.set_quantity(12.5).unwrap();
        s.set_farmers(7);
        assert!(s.set_quantity(-1.0).is_err());
        assert!(s.set_quantity(f64::NAN).is_err());

        let json = s.selection_json();
        assert_eq!(json["season"], "Rabi");
        assert_eq!(json["qty"], 12.5);
        assert_eq!(json["farmers"], 7);
        assert_eq!(json["state"], "Guntur");
    }
}
