use std::collections::BTreeMap;

use rustc_hash::FxHashSet;

use crate::prom::SeriesSample;

/// Label that carries the metric name; never a suppression candidate.
pub const METRIC_NAME_LABEL: &str = "__name__";

/// The label judged to be driving a metric's cardinality.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HighCardSeries {
    pub metric_name: String,
    /// Empty when no label distinguishes the metric's series.
    pub label_name: String,
    pub distinct_values: usize,
}

impl HighCardSeries {
    pub fn is_actionable(&self) -> bool {
        !self.label_name.is_empty()
    }
}

/// Distinct values seen per label across the series of one metric.
///
/// Keyed in label order so that ties resolve the same way on every run.
#[derive(Debug, Default)]
pub struct CardinalityTracker(BTreeMap<String, FxHashSet<String>>);

impl CardinalityTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds one series' label/value pairs into the tracker.
    pub fn observe(&mut self, series: &SeriesSample) {
        for (label, value) in series {
            if label == METRIC_NAME_LABEL {
                continue;
            }
            self.0
                .entry(label.clone())
                .or_default()
                .insert(value.clone());
        }
    }

    pub fn distinct_values(&self, label: &str) -> usize {
        self.0.get(label).map_or(0, |values| values.len())
    }

    /// Returns the label with the strictly greatest number of distinct values
    /// and that number. Ties go to the lexicographically smallest label. A
    /// label holding a single value does not tell series apart and is never
    /// returned.
    pub fn high_water_mark(&self) -> Option<(&str, usize)> {
        let mut hwm: Option<(&str, usize)> = None;
        for (label, values) in &self.0 {
            let count = values.len();
            if count > hwm.map_or(1, |(_, n)| n) {
                hwm = Some((label.as_str(), count));
            }
        }
        hwm
    }
}

impl<'a> FromIterator<&'a SeriesSample> for CardinalityTracker {
    fn from_iter<I: IntoIterator<Item = &'a SeriesSample>>(iter: I) -> Self {
        let mut tracker = Self::new();
        iter.into_iter().for_each(|series| tracker.observe(series));
        tracker
    }
}

/// Picks the high-cardinality label for `metric_name` from its series.
pub fn select_high_card_label(metric_name: &str, series: &[SeriesSample]) -> HighCardSeries {
    let tracker: CardinalityTracker = series.iter().collect();
    let (label_name, distinct_values) = tracker
        .high_water_mark()
        .map_or((String::new(), 0), |(label, n)| (label.to_owned(), n));
    HighCardSeries {
        metric_name: metric_name.to_owned(),
        label_name,
        distinct_values,
    }
}
